//! Session peers and the wire protocol between them
//!
//! ```text
//! ┌──────────────── phone ────────────────┐        ┌──────────────── wrist ────────────────┐
//! │                                       │        │                                       │
//! │  UI ──> ControllerPeer                │        │                SensorPeer <── owner   │
//! │           │   ▲                       │        │                  │   ▲                │
//! │           │   └─ RemoteWorkouts       │ command│                  │   └─ OwnerRegistry │
//! │           │      (by workoutID)       │───────>│ (immediate)      │      (start/end/..)│
//! │           ▼                           │        │                  ▼                    │
//! │       Transport ◄─────────────────────┼────────┼──────────── Transport                 │
//! │                                       │<───────│ liveMetrics (immediate, lossy)        │
//! │                                       │<───────│ workoutState (immediate or queued)    │
//! └───────────────────────────────────────┘        └───────────────────────────────────────┘
//! ```
//!
//! - [`envelope`]: `{v, kind, payload}` wrapper and the closed kind set
//! - [`protocol`]: typed payloads and [`LinkMessage`]
//! - [`transport`]: the platform adapter seam and its callbacks
//! - [`memory`]: in-process paired transport for simulation and tests
//! - [`events`]: diagnostics snapshot and observer events
//! - [`controller`] / [`sensor`]: the two roles

pub mod controller;
pub mod envelope;
pub mod events;
pub mod memory;
mod peer;
pub mod protocol;
pub mod sensor;
pub mod transport;

pub use controller::ControllerPeer;
pub use envelope::{Envelope, MessageKind, PayloadMap, WireEnvelope, ENVELOPE_VERSION};
pub use events::{ActivationState, PeerDiagnostics, PeerEvent};
pub use memory::{MemoryLink, MemoryTransport};
pub use protocol::{
    Command, CommandType, LinkMessage, LiveMetrics, LiveMetricsSample, WorkoutState,
    WorkoutStateNotice, DEFAULT_ACTIVITY_TYPE, DEFAULT_LOCATION_TYPE,
};
pub use sensor::SensorPeer;
pub use transport::{Transport, TransportEvent, TransportSink};
