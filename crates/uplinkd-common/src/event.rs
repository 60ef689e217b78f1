//! Event log entries for external observers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids;

/// Category of an [`Event`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    Switch,
    Sample,
    Error,
    Discover,
    Remove,
    Command,
    Maintenance,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::Switch => "switch",
            EventType::Sample => "sample",
            EventType::Error => "error",
            EventType::Discover => "discover",
            EventType::Remove => "remove",
            EventType::Command => "command",
            EventType::Maintenance => "maintenance",
        }
    }
}

/// A single log entry appended to the telemetry store's global event
/// ring buffer and surfaced via the `events` RPC method.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    #[serde(rename = "type")]
    pub event_type: EventType,
    pub member: Option<String>,
    pub message: String,
    pub data: serde_json::Value,
}

impl Event {
    pub fn new(event_type: EventType, message: impl Into<String>) -> Self {
        Event {
            id: ids::event_id(),
            timestamp: Utc::now(),
            event_type,
            member: None,
            message: message.into(),
            data: serde_json::Value::Null,
        }
    }

    pub fn with_member(mut self, member: impl Into<String>) -> Self {
        self.member = Some(member.into());
        self
    }

    pub fn with_data(mut self, data: serde_json::Value) -> Self {
        self.data = data;
        self
    }
}
