//! Typed payloads for the workout session protocol
//!
//! Each [`MessageKind`] has one fixed payload schema. [`LinkMessage`] is the
//! tagged union over them: decoding an envelope produces the variant directly,
//! so callers never do key lookups on raw mappings.
//!
//! ## Message Flow
//!
//! ```text
//! Controller                                  Sensor
//!     |                                          |
//!     |--- command {start, 37, 1} -------------->|  owner.start(37, 1)
//!     |<-- workoutState {id, started} -----------|
//!     |<-- liveMetrics {id, hr, kcal, ...} ------|  (immediate only, lossy)
//!     |<-- liveMetrics ... ----------------------|
//!     |--- command {end} ----------------------->|  owner.end()
//!     |<-- workoutState {id, ended} -------------|  (queued if unreachable)
//! ```
//!
//! Typed decoding is strict: a missing required field fails that message
//! only. Unknown extra keys are ignored so newer senders stay compatible.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::CodecError;
use crate::link::envelope::{Envelope, MessageKind, PayloadMap, WireEnvelope};
use crate::types::{now_epoch_secs, PeerRole, WorkoutId};

/// Activity code used when a command omits `activityType`
pub const DEFAULT_ACTIVITY_TYPE: u32 = 37;

/// Location code used when a command omits `locationType`
pub const DEFAULT_LOCATION_TYPE: i64 = 1;

fn default_activity_type() -> u32 {
    DEFAULT_ACTIVITY_TYPE
}

fn default_location_type() -> i64 {
    DEFAULT_LOCATION_TYPE
}

/// Control commands relayed to the Workout Session Owner
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CommandType {
    Start,
    End,
    Pause,
    Resume,
}

impl std::fmt::Display for CommandType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CommandType::Start => write!(f, "start"),
            CommandType::End => write!(f, "end"),
            CommandType::Pause => write!(f, "pause"),
            CommandType::Resume => write!(f, "resume"),
        }
    }
}

/// `command` payload.
///
/// `activity_type` and `location_type` are opaque codes from the owner's
/// taxonomy. Their range is never checked; absent values fall back to
/// [`DEFAULT_ACTIVITY_TYPE`] and [`DEFAULT_LOCATION_TYPE`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Command {
    pub command: CommandType,
    #[serde(default = "default_activity_type")]
    pub activity_type: u32,
    #[serde(default = "default_location_type")]
    pub location_type: i64,
}

impl Command {
    /// Start a workout with the given activity and location codes
    pub fn start(activity_type: u32, location_type: i64) -> Self {
        Self {
            command: CommandType::Start,
            activity_type,
            location_type,
        }
    }

    /// A command that carries no codes of its own (end, pause, resume)
    pub fn bare(command: CommandType) -> Self {
        Self {
            command,
            activity_type: DEFAULT_ACTIVITY_TYPE,
            location_type: DEFAULT_LOCATION_TYPE,
        }
    }
}

/// One telemetry sample from the sensor
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LiveMetrics {
    /// Beats per minute
    pub heart_rate: f64,
    /// Kilocalories burned so far
    pub active_energy: f64,
    /// Meters covered so far
    pub distance: f64,
    /// Seconds since the workout started
    pub elapsed: f64,
    /// Sample time as epoch seconds
    #[serde(with = "epoch_seconds")]
    pub timestamp: f64,
}

impl LiveMetrics {
    /// Sample stamped with the current time
    pub fn now(heart_rate: f64, active_energy: f64, distance: f64, elapsed: f64) -> Self {
        Self {
            heart_rate,
            active_energy,
            distance,
            elapsed,
            timestamp: now_epoch_secs(),
        }
    }
}

/// `liveMetrics` payload: a sample plus the workout it belongs to
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LiveMetricsSample {
    #[serde(rename = "workoutID")]
    pub workout_id: WorkoutId,
    #[serde(flatten)]
    pub metrics: LiveMetrics,
}

/// Workout lifecycle states announced by the sensor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkoutState {
    Started,
    Ended,
}

impl std::fmt::Display for WorkoutState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WorkoutState::Started => write!(f, "started"),
            WorkoutState::Ended => write!(f, "ended"),
        }
    }
}

/// `workoutState` payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkoutStateNotice {
    #[serde(rename = "workoutID")]
    pub workout_id: WorkoutId,
    pub state: WorkoutState,
    #[serde(with = "epoch_seconds")]
    pub timestamp: f64,
}

impl WorkoutStateNotice {
    /// Notice stamped with the current time
    pub fn now(workout_id: WorkoutId, state: WorkoutState) -> Self {
        Self {
            workout_id,
            state,
            timestamp: now_epoch_secs(),
        }
    }
}

/// Every message the protocol carries, one variant per [`MessageKind`]
#[derive(Debug, Clone, PartialEq)]
pub enum LinkMessage {
    /// Free-form diagnostic payload
    Ping(PayloadMap),
    Command(Command),
    WorkoutState(WorkoutStateNotice),
    LiveMetrics(LiveMetricsSample),
    /// Reserved. Nothing in this crate produces it.
    Error(PayloadMap),
}

impl LinkMessage {
    /// Diagnostic ping tagged with its origin and send time
    pub fn ping(origin: PeerRole) -> Self {
        let mut payload = Map::new();
        payload.insert("origin".to_string(), Value::from(origin.to_string()));
        payload.insert("sentAt".to_string(), Value::from(now_epoch_secs()));
        LinkMessage::Ping(payload)
    }

    /// The envelope tag for this message
    pub fn kind(&self) -> MessageKind {
        match self {
            LinkMessage::Ping(_) => MessageKind::Ping,
            LinkMessage::Command(_) => MessageKind::Command,
            LinkMessage::WorkoutState(_) => MessageKind::WorkoutState,
            LinkMessage::LiveMetrics(_) => MessageKind::LiveMetrics,
            LinkMessage::Error(_) => MessageKind::Error,
        }
    }

    /// The workout this message correlates with, if any
    pub fn workout_id(&self) -> Option<&WorkoutId> {
        match self {
            LinkMessage::WorkoutState(notice) => Some(&notice.workout_id),
            LinkMessage::LiveMetrics(sample) => Some(&sample.workout_id),
            _ => None,
        }
    }

    /// Wrap this message in an envelope at the current version
    pub fn to_envelope(&self) -> Result<Envelope, CodecError> {
        let kind = self.kind();
        let payload = match self {
            LinkMessage::Ping(map) | LinkMessage::Error(map) => map.clone(),
            LinkMessage::Command(cmd) => to_payload(kind, cmd)?,
            LinkMessage::WorkoutState(notice) => to_payload(kind, notice)?,
            LinkMessage::LiveMetrics(sample) => to_payload(kind, sample)?,
        };
        Ok(Envelope::new(kind, payload))
    }

    /// Decode the typed payload of an already-unwrapped envelope
    pub fn from_envelope(envelope: &Envelope) -> Result<Self, CodecError> {
        let kind = envelope.kind;
        let payload = &envelope.payload;
        Ok(match kind {
            MessageKind::Ping => LinkMessage::Ping(payload.clone()),
            MessageKind::Error => LinkMessage::Error(payload.clone()),
            MessageKind::Command => LinkMessage::Command(from_payload(kind, payload)?),
            MessageKind::WorkoutState => LinkMessage::WorkoutState(from_payload(kind, payload)?),
            MessageKind::LiveMetrics => LinkMessage::LiveMetrics(from_payload(kind, payload)?),
        })
    }

    /// Encode straight to a wire mapping
    pub fn encode(&self) -> Result<WireEnvelope, CodecError> {
        Ok(self.to_envelope()?.encode())
    }

    /// Decode straight from a wire mapping
    pub fn decode(wire: &WireEnvelope) -> Result<Self, CodecError> {
        Self::from_envelope(&Envelope::decode(wire)?)
    }
}

fn to_payload<T: Serialize>(kind: MessageKind, value: &T) -> Result<PayloadMap, CodecError> {
    match serde_json::to_value(value) {
        // NaN and infinities serialize as null; no typed payload field is nullable.
        Ok(Value::Object(map)) => match map.iter().find(|(_, v)| v.is_null()) {
            Some((key, _)) => Err(CodecError::MalformedPayload {
                kind,
                reason: format!("`{}` is not a finite number", key),
            }),
            None => Ok(map),
        },
        Ok(other) => Err(CodecError::MalformedPayload {
            kind,
            reason: format!("payload serialized to non-object: {}", other),
        }),
        Err(e) => Err(CodecError::MalformedPayload {
            kind,
            reason: e.to_string(),
        }),
    }
}

fn from_payload<T: DeserializeOwned>(kind: MessageKind, payload: &PayloadMap) -> Result<T, CodecError> {
    serde_json::from_value(Value::Object(payload.clone())).map_err(|e| CodecError::MalformedPayload {
        kind,
        reason: e.to_string(),
    })
}

/// Timestamps encode as epoch seconds and decode from either epoch seconds
/// or an RFC 3339 date string.
mod epoch_seconds {
    use serde::de::Error as _;
    use serde::{Deserialize, Deserializer, Serializer};

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum RawTimestamp {
        Seconds(f64),
        Date(String),
    }

    pub fn serialize<S: Serializer>(secs: &f64, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_f64(*secs)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<f64, D::Error> {
        match RawTimestamp::deserialize(deserializer)? {
            RawTimestamp::Seconds(secs) => Ok(secs),
            RawTimestamp::Date(text) => {
                let date = chrono::DateTime::parse_from_rfc3339(&text)
                    .map_err(|e| D::Error::custom(format!("invalid timestamp {:?}: {}", text, e)))?;
                Ok(date.timestamp() as f64 + f64::from(date.timestamp_subsec_micros()) / 1_000_000.0)
            }
        }
    }
}
