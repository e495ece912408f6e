/*
 * Extra processors
 *
 * Enrichment steps run on every record, in registration order, before the
 * record is dispatched. Each one may add entries to `extra` or adjust the
 * context.
 */

use serde_json::{Map, Value};
use std::net::{IpAddr, UdpSocket};

use crate::record::Record;

pub trait ExtraProcessor: Send + Sync {
    fn process(&self, record: &mut Record);
}

/// Adds the `file` and `line` of the logging call site.
#[derive(Debug, Clone, Default)]
pub struct CallerLocation;

impl ExtraProcessor for CallerLocation {
    fn process(&self, record: &mut Record) {
        if let Some(location) = record.location {
            record
                .extra
                .insert("file".to_string(), Value::from(location.file()));
            record
                .extra
                .insert("line".to_string(), Value::from(location.line()));
        }
    }
}

/// Adds the host's outbound IP address under `ip`.
#[derive(Debug, Clone)]
pub struct HostIp {
    ip: Option<String>,
}

impl HostIp {
    /// Resolves the local address once; nothing is sent on the wire.
    pub fn new() -> Self {
        HostIp { ip: detect_host_ip() }
    }

    pub fn with_address(ip: impl Into<String>) -> Self {
        HostIp { ip: Some(ip.into()) }
    }

    pub fn address(&self) -> Option<&str> {
        self.ip.as_deref()
    }
}

impl Default for HostIp {
    fn default() -> Self {
        Self::new()
    }
}

impl ExtraProcessor for HostIp {
    fn process(&self, record: &mut Record) {
        if let Some(ip) = &self.ip {
            record.extra.insert("ip".to_string(), Value::from(ip.as_str()));
        }
    }
}

fn detect_host_ip() -> Option<String> {
    // Connecting a UDP socket only selects a route, no packet leaves the host
    let socket = UdpSocket::bind("0.0.0.0:0").ok()?;
    socket.connect("192.0.2.1:9").ok()?;
    let ip = socket.local_addr().ok()?.ip();
    match ip {
        IpAddr::V4(v4) if !v4.is_loopback() && !v4.is_unspecified() => Some(ip.to_string()),
        _ => None,
    }
}

/// Adds a fixed set of key/value pairs to every record.
#[derive(Debug, Clone, Default)]
pub struct StaticFields {
    fields: Map<String, Value>,
}

impl StaticFields {
    pub fn new() -> Self {
        StaticFields { fields: Map::new() }
    }

    pub fn field(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.insert(key.into(), value.into());
        self
    }
}

impl ExtraProcessor for StaticFields {
    fn process(&self, record: &mut Record) {
        for (key, value) in &self.fields {
            record.extra.insert(key.clone(), value.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Level;
    use std::panic::Location;

    #[test]
    fn caller_location_uses_record_location() {
        let mut record = Record::new("app", Level::Info, "hi");
        record.location = Some(Location::caller());
        CallerLocation.process(&mut record);
        assert_eq!(record.extra["file"], Value::from(file!()));
        assert!(record.extra["line"].as_u64().unwrap() > 0);
    }

    #[test]
    fn caller_location_without_location_is_noop() {
        let mut record = Record::new("app", Level::Info, "hi");
        CallerLocation.process(&mut record);
        assert!(record.extra.is_empty());
    }

    #[test]
    fn host_ip_override() {
        let mut record = Record::new("app", Level::Info, "hi");
        HostIp::with_address("10.9.8.7").process(&mut record);
        assert_eq!(record.extra["ip"], "10.9.8.7");
    }

    #[test]
    fn static_fields_are_copied() {
        let fields = StaticFields::new().field("service", "billing").field("shard", 3);
        let mut record = Record::new("app", Level::Info, "hi");
        fields.process(&mut record);
        assert_eq!(record.extra["service"], "billing");
        assert_eq!(record.extra["shard"], 3);
    }
}
