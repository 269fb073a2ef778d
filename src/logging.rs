//! Structured logging utilities.
//!
//! `setup` wires the tracing subscriber (async file appender, optional
//! stdout); `LogEvent` builds one-line JSON payloads for lifecycle events
//! that operators grep for (transfer transitions, observed payments).

pub mod setup;

use serde_json::{json, Value};
use std::time::{SystemTime, UNIX_EPOCH};

/// Get current timestamp in milliseconds
pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap()
        .as_millis() as u64
}

/// Structured log event builder
///
/// Usage:
/// ```
/// use stellar_anchor::logging::LogEvent;
///
/// let log_value = LogEvent::new("TRANSFER_STATUS_CHANGED")
///     .field("transfer_id", "pGq4cGiVRSieLCVSvx2hGg")
///     .field("status", "pending_stellar")
///     .service("anchor")
///     .build();
///
/// tracing::info!("{}", log_value);
/// ```
pub struct LogEvent {
    fields: serde_json::Map<String, Value>,
}

impl LogEvent {
    /// Create a new log event with the given event name
    pub fn new(event: &str) -> Self {
        let mut fields = serde_json::Map::new();
        fields.insert("event".to_string(), json!(event));
        fields.insert("timestamp_ms".to_string(), json!(now_ms()));

        Self { fields }
    }

    /// Add a field to the log event
    pub fn field(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.fields.insert(key.to_string(), value.into());
        self
    }

    /// Add service name
    pub fn service(mut self, service: &str) -> Self {
        self.fields.insert("service".to_string(), json!(service));
        self
    }

    /// Build the final JSON value
    pub fn build(self) -> Value {
        Value::Object(self.fields)
    }
}
