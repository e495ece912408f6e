/*
 * Record formatters
 *
 * A formatter turns a Record into bytes. Formatters are pure and shared
 * between threads, so every implementation must be reentrant.
 * - LineFormatter: one human readable line per record
 * - JsonFormatter: one JSON document per record
 */

use chrono::format::{Item, StrftimeItems};
use chrono::{DateTime, Local, SecondsFormat};
use serde_json::Value;
use std::fmt::Write as _;
use std::io::Write;

use crate::error::LogError;
use crate::record::Record;

pub trait Formatter: Send + Sync {
    fn to_bytes(&self, record: &Record) -> Result<Vec<u8>, LogError>;

    /// Streams the formatted record into `sink`, returning the bytes written.
    fn write_to(&self, sink: &mut dyn Write, record: &Record) -> Result<usize, LogError> {
        let bytes = self.to_bytes(record)?;
        sink.write_all(&bytes)?;
        Ok(bytes.len())
    }

    /// Content-Type used when the formatted bytes are sent over HTTP
    fn content_type(&self) -> &'static str {
        "text/plain; charset=utf-8"
    }
}

/// Rejects strftime patterns chrono cannot render.
pub(crate) fn check_time_format(format: &str) -> Result<(), LogError> {
    if StrftimeItems::new(format).any(|item| matches!(item, Item::Error)) {
        return Err(LogError::Config {
            field: "time_format".to_string(),
            reason: format!("invalid strftime pattern '{}'", format),
        });
    }
    Ok(())
}

/// RFC 3339 with nanoseconds unless a strftime pattern is given.
pub(crate) fn format_time(timestamp: &DateTime<Local>, format: Option<&str>) -> Result<String, LogError> {
    match format {
        Some(format) => {
            let mut out = String::new();
            write!(out, "{}", timestamp.format(format)).map_err(|_| LogError::Config {
                field: "time_format".to_string(),
                reason: format!("failed to render time with '{}'", format),
            })?;
            Ok(out)
        }
        None => Ok(timestamp.to_rfc3339_opts(SecondsFormat::Nanos, true)),
    }
}

/// Renders a JSON value for human eyes: strings unquoted, everything else compact JSON.
pub(crate) fn render_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// `[time] channel.LEVEL message context k: v, k: v`
#[derive(Debug, Clone, Default)]
pub struct LineFormatter {
    time_format: Option<String>,
}

impl LineFormatter {
    pub fn new() -> Self {
        LineFormatter { time_format: None }
    }

    /// Overrides the RFC 3339 timestamp with a chrono strftime pattern.
    pub fn with_time_format(mut self, format: impl Into<String>) -> Result<Self, LogError> {
        let format = format.into();
        check_time_format(&format)?;
        self.time_format = Some(format);
        Ok(self)
    }

    fn format_line(&self, record: &Record) -> Result<String, LogError> {
        let mut line = String::with_capacity(64 + record.message.len());
        line.push('[');
        line.push_str(&format_time(&record.timestamp, self.time_format.as_deref())?);
        line.push_str("] ");
        if !record.channel.is_empty() {
            line.push_str(&record.channel);
            line.push('.');
        }
        line.push_str(record.level.as_str());
        line.push(' ');
        line.push_str(&record.message);
        if let Some(context) = &record.context {
            line.push(' ');
            line.push_str(&context.to_string());
        }
        let extras: Vec<String> = record
            .extra
            .iter()
            .map(|(key, value)| format!("{}: {}", key, render_value(value)))
            .collect();
        if !extras.is_empty() {
            line.push(' ');
            line.push_str(&extras.join(", "));
        }
        line.push('\n');
        Ok(line)
    }
}

impl Formatter for LineFormatter {
    fn to_bytes(&self, record: &Record) -> Result<Vec<u8>, LogError> {
        Ok(self.format_line(record)?.into_bytes())
    }
}

/// One JSON object per record, newline terminated.
#[derive(Debug, Clone, Default)]
pub struct JsonFormatter {
    pretty: bool,
}

impl JsonFormatter {
    pub fn new() -> Self {
        JsonFormatter { pretty: false }
    }

    pub fn pretty(mut self, pretty: bool) -> Self {
        self.pretty = pretty;
        self
    }
}

impl Formatter for JsonFormatter {
    fn to_bytes(&self, record: &Record) -> Result<Vec<u8>, LogError> {
        let mut bytes = if self.pretty {
            serde_json::to_vec_pretty(record)?
        } else {
            serde_json::to_vec(record)?
        };
        bytes.push(b'\n');
        Ok(bytes)
    }

    fn content_type(&self) -> &'static str {
        "application/json"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Level;
    use chrono::{Local, TimeZone};
    use serde_json::json;

    fn sample() -> Record {
        let time = Local.with_ymd_and_hms(2024, 3, 9, 8, 30, 0).unwrap();
        Record::new("orders", Level::Warning, "stock low").with_timestamp(time)
    }

    #[test]
    fn line_has_channel_level_and_message() {
        let line = LineFormatter::new()
            .with_time_format("%Y-%m-%d %H:%M:%S")
            .unwrap()
            .to_bytes(&sample())
            .unwrap();
        assert_eq!(
            String::from_utf8(line).unwrap(),
            "[2024-03-09 08:30:00] orders.WARNING stock low\n"
        );
    }

    #[test]
    fn line_omits_empty_channel_and_renders_payloads() {
        let mut record = sample().with_context(json!({"sku": "A-1"}));
        record.channel.clear();
        record.extra.insert("ip".to_owned(), json!("10.1.1.1"));
        record.extra.insert("line".to_owned(), json!(42));
        let line = String::from_utf8(LineFormatter::new().to_bytes(&record).unwrap()).unwrap();
        assert!(line.contains("] WARNING stock low {\"sku\":\"A-1\"} ip: 10.1.1.1, line: 42\n"));
    }

    #[test]
    fn write_to_reports_written_length() {
        let mut sink = Vec::new();
        let written = LineFormatter::new().write_to(&mut sink, &sample()).unwrap();
        assert_eq!(written, sink.len());
        assert!(sink.ends_with(b"\n"));
    }

    #[test]
    fn json_is_one_object_per_line() {
        let formatter = JsonFormatter::new();
        let bytes = formatter.to_bytes(&sample()).unwrap();
        assert_eq!(bytes.iter().filter(|b| **b == b'\n').count(), 1);
        let value: Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(value["level"], "WARNING");
        assert_eq!(formatter.content_type(), "application/json");
    }

    #[test]
    fn invalid_time_format_is_rejected() {
        let err = LineFormatter::new().with_time_format("%Q bad").unwrap_err();
        assert!(matches!(err, LogError::Config { ref field, .. } if field == "time_format"));
        assert!(check_time_format("%H:%M:%S%.3f").is_ok());
    }
}
