//! Transport adapter over the platform's peer-session primitive
//!
//! A transport offers two delivery primitives with different guarantees:
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │  send_immediate                                                  │
//! │  ├── low latency, usable only while reachable                    │
//! │  └── no retry: a failed or unreachable send is gone              │
//! │                                                                  │
//! │  send_queued                                                     │
//! │  ├── persistent best-effort queue, drained on reconnection       │
//! │  └── no delivery-time guarantee, no completion callback          │
//! └──────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Order is FIFO within one channel. There is no ordering across channels.
//!
//! Lifecycle callbacks and inbound messages are pushed into the owning peer
//! through a [`TransportSink`]. The sink may be called from any thread: it
//! only enqueues onto the peer's serialized inbox, and all state mutation
//! happens later on the peer's own task.

use std::fmt;
use std::sync::Arc;

use crate::error::TransportError;
use crate::link::envelope::WireEnvelope;

/// Callbacks a transport delivers to its peer
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    /// Activation finished, successfully or with a reason
    ActivationCompleted(Result<(), String>),
    /// The platform is about to switch the session away
    BecameInactive,
    /// The platform deactivated the session; the peer must re-activate
    Deactivated,
    /// The immediate channel became usable or unusable
    ReachabilityChanged(bool),
    /// Pairing or counterpart-install state changed
    PairingChanged {
        is_paired: bool,
        is_app_installed: bool,
    },
    /// An inbound envelope, from either channel
    Received(WireEnvelope),
    /// A previously accepted immediate send failed on the platform
    DeliveryFailed(String),
}

/// Handle a transport uses to push [`TransportEvent`]s into its peer.
///
/// Cheap to clone and safe to call from any thread.
#[derive(Clone)]
pub struct TransportSink {
    deliver: Arc<dyn Fn(TransportEvent) -> bool + Send + Sync>,
}

impl TransportSink {
    /// Build a sink from a delivery function.
    ///
    /// The function returns `false` once the receiving peer is gone.
    pub fn from_fn(deliver: impl Fn(TransportEvent) -> bool + Send + Sync + 'static) -> Self {
        Self {
            deliver: Arc::new(deliver),
        }
    }

    /// Push an event to the peer. Returns `false` if the peer has shut down.
    pub fn deliver(&self, event: TransportEvent) -> bool {
        (self.deliver)(event)
    }
}

impl fmt::Debug for TransportSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransportSink").finish_non_exhaustive()
    }
}

/// The peer-session primitive a Session Peer drives.
///
/// Implementations must never block: both send primitives hand the envelope
/// off and return.
pub trait Transport: Send + Sync + 'static {
    /// Register the peer's inbox. Called once, before `activate`.
    fn attach(&self, sink: TransportSink);

    /// Whether this device supports a peer session at all
    fn is_supported(&self) -> bool {
        true
    }

    /// Begin or resume the session lifecycle.
    ///
    /// Idempotent. Eventually delivers `TransportEvent::ActivationCompleted`.
    fn activate(&self);

    /// Latest known reachability of the immediate channel
    fn is_reachable(&self) -> bool;

    /// Fire-and-forget delivery over the immediate channel
    fn send_immediate(&self, envelope: WireEnvelope) -> Result<(), TransportError>;

    /// Hand the envelope to the persistent queue
    fn send_queued(&self, envelope: WireEnvelope) -> Result<(), TransportError>;

    /// Outbound messages still waiting in the queue, when the platform tracks it
    fn pending_queue_count(&self) -> Option<usize> {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_sink_forwards_events() {
        let count = Arc::new(AtomicUsize::new(0));
        let counter = count.clone();
        let sink = TransportSink::from_fn(move |event| {
            assert_eq!(event, TransportEvent::ReachabilityChanged(true));
            counter.fetch_add(1, Ordering::SeqCst);
            true
        });

        let clone = sink.clone();
        assert!(sink.deliver(TransportEvent::ReachabilityChanged(true)));
        assert!(clone.deliver(TransportEvent::ReachabilityChanged(true)));
        assert_eq!(count.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_sink_reports_closed_peer() {
        let sink = TransportSink::from_fn(|_| false);
        assert!(!sink.deliver(TransportEvent::Deactivated));
    }
}
