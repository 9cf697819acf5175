//! WorkoutLink Core Library
//!
//! Cross-device workout session protocol between a controller (phone) and a
//! sensor (wrist device).
//!
//! ## Overview
//!
//! The controller issues `start`/`end`/`pause`/`resume` commands. The sensor
//! relays them to its local Workout Session Owner, then streams telemetry and
//! workout state notices back. Every message travels in a versioned
//! `{v, kind, payload}` envelope over a [`Transport`] with two channels:
//!
//! - **immediate**: low latency, only while reachable, never retried
//! - **queued**: best effort, delivered after reconnection
//!
//! Telemetry is lossy. `workoutState(ended)` is not: it falls back to the
//! queued channel so it survives a disconnect. Samples and notices carry the
//! workout's `workoutID`, which the controller uses to merge messages that
//! arrive out of order across channels.
//!
//! ## Quick Start
//!
//! ```ignore
//! use std::sync::Arc;
//! use workoutlink_core::{ControllerPeer, MemoryLink, OwnerRegistry, PeerConfig, PeerRole, SensorPeer};
//!
//! let link = MemoryLink::new();
//! let registry = OwnerRegistry::new();
//! let owner = registry.register(my_owner);
//!
//! let controller = ControllerPeer::spawn(Arc::new(link.transport(PeerRole::Controller)), PeerConfig::default());
//! let sensor = SensorPeer::spawn(Arc::new(link.transport(PeerRole::Sensor)), registry, Some(owner), PeerConfig::default());
//!
//! link.set_reachable(true);
//! controller.send_start_command(37, 1)?;
//! ```

pub mod config;
pub mod error;
pub mod link;
pub mod logging;
pub mod owner;
pub mod tracker;
pub mod types;

// Re-exports
pub use config::PeerConfig;
pub use error::{CodecError, LinkError, LinkResult, TransportError};
pub use link::{
    ActivationState, Command, CommandType, ControllerPeer, Envelope, LinkMessage, LiveMetrics,
    LiveMetricsSample, MemoryLink, MemoryTransport, MessageKind, PeerDiagnostics, PeerEvent,
    SensorPeer, Transport, TransportEvent, TransportSink, WireEnvelope, WorkoutState,
    WorkoutStateNotice, ENVELOPE_VERSION,
};
pub use owner::{OwnerHandle, OwnerRegistry, WorkoutSessionOwner};
pub use tracker::{RemotePhase, RemoteWorkout, RemoteWorkouts};
pub use types::*;
