/*
 * Log record
 *
 * One Record is built per accepted logging call. Extra processors annotate it
 * before dispatch; from then on it is only ever read. Records cross the async
 * queue by value.
 */

use chrono::{DateTime, Local};
use serde::Serialize;
use serde_json::{Map, Value};
use std::panic::Location;

/// A single log event.
#[derive(Debug, Clone, Serialize)]
pub struct Record {
    pub channel: String,
    pub level: crate::Level,
    pub message: String,
    /// Free-form payload, rendered by the formatter
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context: Option<Value>,
    /// Annotations added by extra processors
    #[serde(skip_serializing_if = "Map::is_empty")]
    pub extra: Map<String, Value>,
    #[serde(rename = "time")]
    pub timestamp: DateTime<Local>,
    /// Call site of the leveled method that produced this record
    #[serde(skip)]
    pub location: Option<&'static Location<'static>>,
}

impl Record {
    pub fn new(channel: impl Into<String>, level: crate::Level, message: impl Into<String>) -> Self {
        Record {
            channel: channel.into(),
            level,
            message: message.into(),
            context: None,
            extra: Map::new(),
            timestamp: Local::now(),
            location: None,
        }
    }

    pub fn with_context(mut self, context: Value) -> Self {
        self.context = Some(context);
        self
    }

    pub fn with_timestamp(mut self, timestamp: DateTime<Local>) -> Self {
        self.timestamp = timestamp;
        self
    }
}
