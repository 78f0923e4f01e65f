//! Events and event-descriptor matching.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;

/// Origin class of an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    /// Raised by the interpreter itself (errors, `done.*`).
    Platform,
    /// Raised by `<raise>` or sent to `#_internal`.
    Internal,
    /// Everything else.
    #[default]
    External,
}

impl EventKind {
    /// The value exposed as `_event.type`.
    pub fn as_str(self) -> &'static str {
        match self {
            EventKind::Platform => "platform",
            EventKind::Internal => "internal",
            EventKind::External => "external",
        }
    }
}

/// An event. Events are plain values; every recipient gets its own copy.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Event {
    pub name: String,

    #[serde(default)]
    pub kind: EventKind,

    /// Payload: null, a scalar, or an object.
    #[serde(default)]
    pub data: Value,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub send_id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub origin: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub origin_type: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub invoke_id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delay: Option<Duration>,
}

impl Event {
    /// An external event with no payload.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn internal(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: EventKind::Internal,
            ..Default::default()
        }
    }

    pub fn platform(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: EventKind::Platform,
            ..Default::default()
        }
    }

    /// `error.<category>` carrying a message and the offending send id.
    pub fn error(category: &str, message: impl Into<String>, send_id: Option<String>) -> Self {
        let message = message.into();
        Self {
            name: format!("error.{}", category),
            kind: EventKind::Platform,
            data: Value::String(message),
            send_id,
            ..Default::default()
        }
    }

    pub fn with_data(mut self, data: Value) -> Self {
        self.data = data;
        self
    }

    pub fn with_send_id(mut self, send_id: impl Into<String>) -> Self {
        self.send_id = Some(send_id.into());
        self
    }

    pub fn with_invoke_id(mut self, invoke_id: impl Into<String>) -> Self {
        self.invoke_id = Some(invoke_id.into());
        self
    }

    pub fn with_origin(mut self, origin: impl Into<String>, origin_type: impl Into<String>) -> Self {
        self.origin = Some(origin.into());
        self.origin_type = Some(origin_type.into());
        self
    }

    pub fn is_error(&self) -> bool {
        self.name == "error" || self.name.starts_with("error.")
    }

    /// The `_event` object seen by expressions.
    pub fn to_value(&self) -> Value {
        let opt = |s: &Option<String>| s.clone().map(Value::String).unwrap_or(Value::Null);
        serde_json::json!({
            "name": self.name,
            "type": self.kind.as_str(),
            "sendid": opt(&self.send_id),
            "origin": opt(&self.origin),
            "origintype": opt(&self.origin_type),
            "invokeid": opt(&self.invoke_id),
            "data": self.data,
        })
    }
}

/// Matches an event name against one transition event descriptor.
///
/// `*` matches every event. Otherwise the descriptor, with an optional
/// trailing `.*` or `.` removed, must equal the name or be a prefix of it
/// ending on a `.` token boundary: `error` matches `error.execution` but not
/// `errors`.
pub fn matches_descriptor(descriptor: &str, name: &str) -> bool {
    let descriptor = descriptor.trim();
    if descriptor == "*" {
        return true;
    }
    let prefix = descriptor.strip_suffix(".*").unwrap_or(descriptor);
    let prefix = prefix.strip_suffix('.').unwrap_or(prefix);
    if prefix.is_empty() {
        return false;
    }
    match name.strip_prefix(prefix) {
        Some(rest) => rest.is_empty() || rest.starts_with('.'),
        None => false,
    }
}
