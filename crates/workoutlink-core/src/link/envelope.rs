//! Versioned envelope codec
//!
//! Every message between the two peers travels as a schema-less mapping with
//! exactly three top-level keys:
//!
//! ```text
//! {
//!   "v":       1,               // optional, missing => 0
//!   "kind":    "liveMetrics",   // ping | command | workoutState | liveMetrics | error
//!   "payload": { ... }          // required mapping, schema fixed per kind
//! }
//! ```
//!
//! The codec only validates the outer wrapper. Typed payload decoding lives
//! in [`crate::link::protocol`].
//!
//! The version is informational. It is carried through decoding but never
//! used to reject a message, so older and newer peers keep talking.

use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::CodecError;

/// Current envelope version stamped on every outgoing message
pub const ENVELOPE_VERSION: u32 = 1;

/// Wire key for the envelope version
pub const VERSION_KEY: &str = "v";
/// Wire key for the message kind
pub const KIND_KEY: &str = "kind";
/// Wire key for the payload mapping
pub const PAYLOAD_KEY: &str = "payload";

/// A wire envelope as handed to and received from the transport
pub type WireEnvelope = Map<String, Value>;

/// A payload mapping before typed decoding
pub type PayloadMap = Map<String, Value>;

/// Closed set of message kinds the protocol carries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum MessageKind {
    /// Diagnostic ping, no reply expected
    Ping,
    /// Control command (controller -> sensor)
    Command,
    /// Workout started/ended notice (sensor -> controller)
    WorkoutState,
    /// Telemetry sample (sensor -> controller)
    LiveMetrics,
    /// Reserved, no producer
    Error,
}

impl MessageKind {
    /// Every kind, in wire order
    pub const ALL: [MessageKind; 5] = [
        MessageKind::Ping,
        MessageKind::Command,
        MessageKind::WorkoutState,
        MessageKind::LiveMetrics,
        MessageKind::Error,
    ];

    /// Wire string for this kind
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageKind::Ping => "ping",
            MessageKind::Command => "command",
            MessageKind::WorkoutState => "workoutState",
            MessageKind::LiveMetrics => "liveMetrics",
            MessageKind::Error => "error",
        }
    }
}

impl std::fmt::Display for MessageKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MessageKind {
    type Err = CodecError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        MessageKind::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| CodecError::UnknownKind(s.to_string()))
    }
}

/// A decoded outer wrapper: kind, raw payload and version
#[derive(Debug, Clone, PartialEq)]
pub struct Envelope {
    /// Envelope version (0 when the sender predates versioning)
    pub version: u32,
    /// Message kind, fixed once constructed
    pub kind: MessageKind,
    /// Payload mapping, decoded per kind by the protocol layer
    pub payload: PayloadMap,
}

impl Envelope {
    /// Wrap a payload at the current envelope version
    pub fn new(kind: MessageKind, payload: PayloadMap) -> Self {
        Self {
            version: ENVELOPE_VERSION,
            kind,
            payload,
        }
    }

    /// Build the wire mapping
    pub fn encode(&self) -> WireEnvelope {
        let mut wire = Map::with_capacity(3);
        wire.insert(VERSION_KEY.to_string(), Value::from(self.version));
        wire.insert(KIND_KEY.to_string(), Value::from(self.kind.as_str()));
        wire.insert(PAYLOAD_KEY.to_string(), Value::Object(self.payload.clone()));
        wire
    }

    /// Parse a wire mapping.
    ///
    /// # Errors
    ///
    /// - `CodecError::MissingKind` if `kind` is absent or not a string
    /// - `CodecError::UnknownKind` if `kind` is outside the closed set
    /// - `CodecError::MissingPayload` if `payload` is absent or not a mapping
    pub fn decode(wire: &WireEnvelope) -> Result<Self, CodecError> {
        let kind = wire
            .get(KIND_KEY)
            .and_then(Value::as_str)
            .ok_or(CodecError::MissingKind)?
            .parse::<MessageKind>()?;

        let payload = wire
            .get(PAYLOAD_KEY)
            .and_then(Value::as_object)
            .cloned()
            .ok_or(CodecError::MissingPayload)?;

        let version = wire
            .get(VERSION_KEY)
            .and_then(Value::as_u64)
            .and_then(|v| u32::try_from(v).ok())
            .unwrap_or(0);

        Ok(Self {
            version,
            kind,
            payload,
        })
    }

    /// Serialize to JSON bytes for byte-oriented transports
    pub fn to_bytes(&self) -> Result<Vec<u8>, CodecError> {
        serde_json::to_vec(&self.encode()).map_err(|e| CodecError::InvalidBytes(e.to_string()))
    }

    /// Parse JSON bytes into an envelope
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, CodecError> {
        let wire: WireEnvelope =
            serde_json::from_slice(bytes).map_err(|e| CodecError::InvalidBytes(e.to_string()))?;
        Self::decode(&wire)
    }
}

/// Wrap `payload` as `kind` at the current version
pub fn encode(kind: MessageKind, payload: PayloadMap) -> WireEnvelope {
    Envelope::new(kind, payload).encode()
}

/// Split a wire mapping into kind, payload and version
pub fn decode(wire: &WireEnvelope) -> Result<Envelope, CodecError> {
    Envelope::decode(wire)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn wire(value: Value) -> WireEnvelope {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn test_encode_stamps_current_version() {
        let mut payload = Map::new();
        payload.insert("origin".into(), json!("controller"));

        let encoded = encode(MessageKind::Ping, payload);

        assert_eq!(encoded.get("v"), Some(&json!(ENVELOPE_VERSION)));
        assert_eq!(encoded.get("kind"), Some(&json!("ping")));
        assert_eq!(encoded.get("payload"), Some(&json!({"origin": "controller"})));
        assert_eq!(encoded.len(), 3);
    }

    #[test]
    fn test_decode_roundtrip() {
        let env = Envelope::new(
            MessageKind::WorkoutState,
            wire(json!({"workoutID": "abc", "state": "ended", "timestamp": 1.0})),
        );
        let decoded = decode(&env.encode()).unwrap();
        assert_eq!(decoded, env);
    }

    #[test]
    fn test_missing_version_is_zero() {
        let decoded = decode(&wire(json!({"kind": "ping", "payload": {}}))).unwrap();
        assert_eq!(decoded.version, 0);
        assert_eq!(decoded.kind, MessageKind::Ping);
    }

    #[test]
    fn test_future_version_is_not_rejected() {
        let decoded = decode(&wire(json!({"v": 42, "kind": "ping", "payload": {}}))).unwrap();
        assert_eq!(decoded.version, 42);
    }

    #[test]
    fn test_non_integer_version_is_zero() {
        let decoded = decode(&wire(json!({"v": "two", "kind": "ping", "payload": {}}))).unwrap();
        assert_eq!(decoded.version, 0);
    }

    #[test]
    fn test_missing_kind_fails() {
        let result = decode(&wire(json!({"v": 1, "payload": {}})));
        assert_eq!(result, Err(CodecError::MissingKind));
    }

    #[test]
    fn test_non_string_kind_fails() {
        let result = decode(&wire(json!({"v": 1, "kind": 3, "payload": {}})));
        assert_eq!(result, Err(CodecError::MissingKind));
    }

    #[test]
    fn test_unknown_kind_fails() {
        let result = decode(&wire(json!({"v": 1, "kind": "heartbeat", "payload": {}})));
        assert_eq!(result, Err(CodecError::UnknownKind("heartbeat".into())));
    }

    #[test]
    fn test_missing_payload_fails() {
        let result = decode(&wire(json!({"v": 1, "kind": "command"})));
        assert_eq!(result, Err(CodecError::MissingPayload));

        let result = decode(&wire(json!({"v": 1, "kind": "command", "payload": [1, 2]})));
        assert_eq!(result, Err(CodecError::MissingPayload));
    }

    #[test]
    fn test_kind_wire_strings() {
        for kind in MessageKind::ALL {
            assert_eq!(kind.as_str().parse::<MessageKind>().unwrap(), kind);
            assert_eq!(serde_json::to_value(kind).unwrap(), json!(kind.as_str()));
        }
    }

    #[test]
    fn test_bytes_roundtrip_and_garbage() {
        let env = Envelope::new(MessageKind::Error, Map::new());
        let bytes = env.to_bytes().unwrap();
        assert_eq!(Envelope::from_bytes(&bytes).unwrap(), env);

        assert!(matches!(
            Envelope::from_bytes(b"[1,2,3]"),
            Err(CodecError::InvalidBytes(_))
        ));
        assert!(matches!(
            Envelope::from_bytes(b"\xff\x00"),
            Err(CodecError::InvalidBytes(_))
        ));
    }
}
