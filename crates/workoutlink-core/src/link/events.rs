//! Peer diagnostics and observer events
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │  ActivationState: session lifecycle                             │
//! │  ├── NotActivated: never activated, failed, or deactivated      │
//! │  ├── Activating: activate() issued, waiting for the platform    │
//! │  ├── Inactive: platform is switching the session away           │
//! │  └── Activated: sends are possible                              │
//! │                                                                 │
//! │  PeerDiagnostics: read-only snapshot for UI collaborators       │
//! │                                                                 │
//! │  PeerEvent: decoded telemetry and state notices for observers   │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Reachability is orthogonal to activation: it is tracked separately and
//! never moves `ActivationState`.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::link::envelope::PayloadMap;
use crate::link::protocol::{Command, LiveMetrics, WorkoutState};
use crate::types::{PeerRole, WorkoutId};

/// Session lifecycle state of one peer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ActivationState {
    #[default]
    NotActivated,
    Activating,
    Inactive,
    Activated,
}

impl fmt::Display for ActivationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ActivationState::NotActivated => write!(f, "notActivated"),
            ActivationState::Activating => write!(f, "activating"),
            ActivationState::Inactive => write!(f, "inactive"),
            ActivationState::Activated => write!(f, "activated"),
        }
    }
}

/// Observability snapshot of a Session Peer.
///
/// Written only by the peer's own task; everyone else reads copies.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PeerDiagnostics {
    pub role: PeerRole,
    pub activation_state: ActivationState,
    pub is_reachable: bool,
    pub is_paired: bool,
    pub is_app_installed: bool,
    /// Short description of the most recent inbound envelope, decodable or not
    pub last_received: String,
    /// Most recent transport, decode or availability error
    pub last_error: Option<String>,
    /// Outbound queue depth, when the transport tracks it
    pub pending_queue_count: Option<usize>,
    /// Envelopes handed to the transport
    pub messages_sent: u64,
    /// Envelopes received from the transport
    pub messages_received: u64,
    /// Outbound or inbound messages dropped
    pub messages_dropped: u64,
}

impl PeerDiagnostics {
    /// Fresh, never-activated diagnostics for `role`
    pub fn new(role: PeerRole) -> Self {
        Self {
            role,
            activation_state: ActivationState::NotActivated,
            is_reachable: false,
            is_paired: false,
            is_app_installed: false,
            last_received: String::new(),
            last_error: None,
            pending_queue_count: None,
            messages_sent: 0,
            messages_received: 0,
            messages_dropped: 0,
        }
    }

    /// True when an immediate send would be attempted
    pub fn can_send_immediate(&self) -> bool {
        self.activation_state == ActivationState::Activated && self.is_reachable
    }
}

/// Notifications a peer publishes to local observers
#[derive(Debug, Clone, PartialEq)]
pub enum PeerEvent {
    /// Activation state moved
    ActivationChanged(ActivationState),
    /// Immediate channel became usable or unusable
    ReachabilityChanged(bool),
    /// Decoded telemetry sample (controller side)
    LiveMetrics {
        workout_id: WorkoutId,
        metrics: LiveMetrics,
    },
    /// Decoded workout state notice (controller side)
    WorkoutStateChanged {
        workout_id: WorkoutId,
        state: WorkoutState,
        timestamp: f64,
    },
    /// A command was relayed to the Workout Session Owner (sensor side)
    CommandReceived(Command),
    /// Diagnostic ping from the counterpart
    PingReceived(PayloadMap),
}

impl PeerEvent {
    /// The workout this event correlates with, if any
    pub fn workout_id(&self) -> Option<&WorkoutId> {
        match self {
            PeerEvent::LiveMetrics { workout_id, .. } => Some(workout_id),
            PeerEvent::WorkoutStateChanged { workout_id, .. } => Some(workout_id),
            _ => None,
        }
    }
}
