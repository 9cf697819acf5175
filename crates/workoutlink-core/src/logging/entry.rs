//! One JSONL log line

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A single self-contained log line
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LinkLogEntry {
    /// RFC 3339 timestamp with millisecond precision
    pub ts: String,

    /// trace, debug, info, warn or error
    pub level: String,

    /// Instance that wrote the file
    pub instance: String,

    /// `controller` or `sensor`, when logged inside a peer task
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,

    /// Workout correlation token, when the event carried one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workout_id: Option<String>,

    /// Module path of the call site
    pub target: String,

    pub msg: String,

    /// Remaining structured fields
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub fields: Map<String, Value>,
}

impl LinkLogEntry {
    /// Entry stamped with the current time
    pub fn new(
        level: impl Into<String>,
        instance: impl Into<String>,
        target: impl Into<String>,
        msg: impl Into<String>,
    ) -> Self {
        Self {
            ts: chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true),
            level: level.into(),
            instance: instance.into(),
            role: None,
            workout_id: None,
            target: target.into(),
            msg: msg.into(),
            fields: Map::new(),
        }
    }

    /// Attach structured fields, lifting `role` and `workout_id` out of them
    pub fn with_fields(mut self, mut fields: Map<String, Value>) -> Self {
        if let Some(role) = take_string(&mut fields, "role") {
            self.role = Some(role);
        }
        if let Some(workout_id) = take_string(&mut fields, "workout_id") {
            self.workout_id = Some(workout_id);
        }
        self.fields.extend(fields);
        self
    }

    pub fn to_json_line(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn from_json_line(line: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(line)
    }
}

fn take_string(fields: &mut Map<String, Value>, key: &str) -> Option<String> {
    match fields.remove(key)? {
        Value::String(s) => Some(s),
        other => Some(other.to_string()),
    }
}
