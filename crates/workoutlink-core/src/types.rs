//! Core types for WorkoutLink

use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Correlation token for one physical workout.
///
/// Minted once by the local Workout Session Owner when a session starts and
/// held constant until it ends. Every telemetry sample and state notice of
/// that workout carries it. IDs minted here are ULIDs, but IDs received
/// from the counterpart are accepted as arbitrary strings.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WorkoutId(pub String);

impl WorkoutId {
    /// Mint a fresh, time-ordered workout ID
    pub fn new() -> Self {
        Self(Ulid::new().to_string())
    }

    /// Wrap an existing token
    pub fn from_string(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    /// Borrow the raw token
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for WorkoutId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for WorkoutId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for WorkoutId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Which end of the link a peer is
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PeerRole {
    /// Handheld device issuing commands
    Controller,
    /// Wrist-worn unit running the workout and sampling metrics
    Sensor,
}

impl PeerRole {
    /// The role on the other end of the link
    pub fn counterpart(self) -> Self {
        match self {
            PeerRole::Controller => PeerRole::Sensor,
            PeerRole::Sensor => PeerRole::Controller,
        }
    }
}

impl std::fmt::Display for PeerRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PeerRole::Controller => write!(f, "controller"),
            PeerRole::Sensor => write!(f, "sensor"),
        }
    }
}

/// Current wall-clock time as fractional epoch seconds
pub fn now_epoch_secs() -> f64 {
    let now = chrono::Utc::now();
    now.timestamp() as f64 + f64::from(now.timestamp_subsec_micros()) / 1_000_000.0
}
