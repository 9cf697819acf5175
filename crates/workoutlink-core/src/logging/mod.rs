//! Per-peer JSONL logging
//!
//! A controller and a sensor usually run side by side (in the simulator, in
//! tests, or on two devices whose logs get collected afterwards). Each peer
//! instance appends to its own file, so concurrent peers never interleave
//! partial lines:
//!
//! ```text
//! logs/
//! └── raw/                         # one file per instance per day
//!     ├── 2026-10-16_controller.jsonl
//!     └── 2026-10-16_sensor.jsonl
//! ```
//!
//! One [`JsonlLayer`] serves every peer in the process: the `instance` field
//! of the enclosing `peer` span picks the file, and events outside any peer
//! go to the layer's default instance.
//!
//! Every line is a [`LinkLogEntry`]. The span's `role` and any `workout_id`
//! field are lifted to the top level, so one workout can be followed across
//! both files with [`read_workout_timeline`] or:
//!
//! ```bash
//! cat logs/raw/*.jsonl | jq -s 'map(select(.workout_id == "01J...")) | sort_by(.ts)'
//! ```
//!
//! ```ignore
//! use tracing_subscriber::prelude::*;
//! use workoutlink_core::logging::JsonlLayer;
//!
//! let layer = JsonlLayer::new("./logs", "workoutlink")?;
//! tracing_subscriber::registry()
//!     .with(layer)
//!     .with(tracing_subscriber::fmt::layer())
//!     .init();
//! ```

pub mod entry;
pub mod layer;
pub mod writer;

pub use entry::LinkLogEntry;
pub use layer::JsonlLayer;
pub use writer::{read_entries, read_workout_timeline, InstanceLogWriter};
