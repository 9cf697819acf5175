//! In-process paired transport
//!
//! `MemoryLink` connects a controller endpoint and a sensor endpoint inside
//! one process. It behaves like the platform session: reachability is a
//! shared signal, immediate sends are delivered at once or rejected, and
//! queued sends wait until [`MemoryLink::flush_queued`] drains them while the
//! link is reachable.
//!
//! The link also exposes the knobs a platform would turn on its own
//! (deactivation, pairing changes, injected failures). The CLI simulator and
//! the integration tests drive those.
//!
//! ```ignore
//! let link = MemoryLink::new();
//! let controller = ControllerPeer::spawn(Arc::new(link.transport(PeerRole::Controller)), config.clone());
//! let sensor = SensorPeer::spawn(Arc::new(link.transport(PeerRole::Sensor)), registry, None, config);
//!
//! link.set_reachable(false);
//! sensor.publish_workout_state(id, WorkoutState::Ended)?; // queued
//! link.set_reachable(true);
//! link.flush_queued();                                     // delivered once
//! ```

use std::collections::VecDeque;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, trace};

use crate::error::TransportError;
use crate::link::envelope::WireEnvelope;
use crate::link::transport::{Transport, TransportEvent, TransportSink};
use crate::types::PeerRole;

#[derive(Default)]
struct Endpoint {
    sink: Option<TransportSink>,
    activated: bool,
    fail_next_activation: Option<String>,
    fail_next_immediate: Option<String>,
    fail_next_delivery: Option<String>,
    /// Outbound queued envelopes, oldest first
    outbox: VecDeque<WireEnvelope>,
}

impl Endpoint {
    fn notify(&self, event: TransportEvent) {
        if let Some(sink) = &self.sink {
            sink.deliver(event);
        }
    }
}

struct LinkState {
    reachable: bool,
    supported: bool,
    is_paired: bool,
    is_app_installed: bool,
    controller: Endpoint,
    sensor: Endpoint,
}

impl LinkState {
    fn endpoint(&self, role: PeerRole) -> &Endpoint {
        match role {
            PeerRole::Controller => &self.controller,
            PeerRole::Sensor => &self.sensor,
        }
    }

    fn endpoint_mut(&mut self, role: PeerRole) -> &mut Endpoint {
        match role {
            PeerRole::Controller => &mut self.controller,
            PeerRole::Sensor => &mut self.sensor,
        }
    }

    fn notify_all(&self, event: TransportEvent) {
        self.controller.notify(event.clone());
        self.sensor.notify(event);
    }
}

/// Shared state behind a pair of [`MemoryTransport`]s
#[derive(Clone)]
pub struct MemoryLink {
    state: Arc<Mutex<LinkState>>,
}

impl MemoryLink {
    /// A paired link with the counterpart app installed, initially unreachable
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(LinkState {
                reachable: false,
                supported: true,
                is_paired: true,
                is_app_installed: true,
                controller: Endpoint::default(),
                sensor: Endpoint::default(),
            })),
        }
    }

    /// Transport for one end of the link
    pub fn transport(&self, role: PeerRole) -> MemoryTransport {
        MemoryTransport {
            role,
            state: self.state.clone(),
        }
    }

    /// Flip reachability. Both attached endpoints are notified on change.
    pub fn set_reachable(&self, reachable: bool) {
        let mut state = self.state.lock();
        if state.reachable == reachable {
            return;
        }
        debug!(reachable, "Memory link reachability changed");
        state.reachable = reachable;
        state.notify_all(TransportEvent::ReachabilityChanged(reachable));
    }

    /// Current reachability
    pub fn is_reachable(&self) -> bool {
        self.state.lock().reachable
    }

    /// Drain both queues to their counterparts, oldest first.
    ///
    /// Does nothing while unreachable. A queue whose receiving endpoint is not
    /// activated stays put. Returns the number of envelopes delivered.
    pub fn flush_queued(&self) -> usize {
        let mut state = self.state.lock();
        if !state.reachable {
            return 0;
        }

        let mut delivered = 0;
        for from in [PeerRole::Controller, PeerRole::Sensor] {
            let to = from.counterpart();
            let receiver_sink = match state.endpoint(to) {
                Endpoint {
                    activated: true,
                    sink: Some(sink),
                    ..
                } => sink.clone(),
                _ => continue,
            };
            let outbox = std::mem::take(&mut state.endpoint_mut(from).outbox);
            for envelope in outbox {
                receiver_sink.deliver(TransportEvent::Received(envelope));
                delivered += 1;
            }
        }
        debug!(delivered, "Memory link flushed queued envelopes");
        delivered
    }

    /// Envelopes `from` has queued that are not yet delivered
    pub fn queued_count(&self, from: PeerRole) -> usize {
        self.state.lock().endpoint(from).outbox.len()
    }

    /// Simulate the platform deactivating one endpoint's session
    pub fn deactivate(&self, role: PeerRole) {
        let mut state = self.state.lock();
        let endpoint = state.endpoint_mut(role);
        endpoint.activated = false;
        endpoint.notify(TransportEvent::Deactivated);
    }

    /// Simulate the platform marking one endpoint's session inactive
    pub fn mark_inactive(&self, role: PeerRole) {
        self.state.lock().endpoint(role).notify(TransportEvent::BecameInactive);
    }

    /// Change pairing/install state, notifying both endpoints
    pub fn set_paired(&self, is_paired: bool, is_app_installed: bool) {
        let mut state = self.state.lock();
        state.is_paired = is_paired;
        state.is_app_installed = is_app_installed;
        state.notify_all(TransportEvent::PairingChanged {
            is_paired,
            is_app_installed,
        });
    }

    /// Mark the link as unsupported on this device
    pub fn set_supported(&self, supported: bool) {
        self.state.lock().supported = supported;
    }

    /// Make the next `activate` on `role` fail with `reason`
    pub fn fail_next_activation(&self, role: PeerRole, reason: impl Into<String>) {
        self.state.lock().endpoint_mut(role).fail_next_activation = Some(reason.into());
    }

    /// Make the next immediate send from `role` fail with `reason`
    pub fn fail_next_immediate(&self, role: PeerRole, reason: impl Into<String>) {
        self.state.lock().endpoint_mut(role).fail_next_immediate = Some(reason.into());
    }

    /// Accept the next immediate send from `role`, then lose it and report
    /// `DeliveryFailed(reason)` back to the sender
    pub fn fail_next_delivery(&self, role: PeerRole, reason: impl Into<String>) {
        self.state.lock().endpoint_mut(role).fail_next_delivery = Some(reason.into());
    }
}

impl Default for MemoryLink {
    fn default() -> Self {
        Self::new()
    }
}

/// One end of a [`MemoryLink`]
pub struct MemoryTransport {
    role: PeerRole,
    state: Arc<Mutex<LinkState>>,
}

impl MemoryTransport {
    /// Which end of the link this is
    pub fn role(&self) -> PeerRole {
        self.role
    }
}

impl Transport for MemoryTransport {
    fn attach(&self, sink: TransportSink) {
        self.state.lock().endpoint_mut(self.role).sink = Some(sink);
    }

    fn is_supported(&self) -> bool {
        self.state.lock().supported
    }

    fn activate(&self) {
        let mut state = self.state.lock();
        let (reachable, is_paired, is_app_installed) =
            (state.reachable, state.is_paired, state.is_app_installed);
        let endpoint = state.endpoint_mut(self.role);

        if let Some(reason) = endpoint.fail_next_activation.take() {
            endpoint.notify(TransportEvent::ActivationCompleted(Err(reason)));
            return;
        }

        endpoint.activated = true;
        endpoint.notify(TransportEvent::ActivationCompleted(Ok(())));
        endpoint.notify(TransportEvent::PairingChanged {
            is_paired,
            is_app_installed,
        });
        endpoint.notify(TransportEvent::ReachabilityChanged(reachable));
    }

    fn is_reachable(&self) -> bool {
        self.state.lock().reachable
    }

    fn send_immediate(&self, envelope: WireEnvelope) -> Result<(), TransportError> {
        let mut state = self.state.lock();
        if !state.supported {
            return Err(TransportError::Unsupported);
        }
        if !state.endpoint(self.role).activated {
            return Err(TransportError::NotActivated);
        }
        if let Some(reason) = state.endpoint_mut(self.role).fail_next_immediate.take() {
            return Err(TransportError::Platform(reason));
        }
        if !state.reachable {
            return Err(TransportError::NotReachable);
        }
        if let Some(reason) = state.endpoint_mut(self.role).fail_next_delivery.take() {
            trace!(from = %self.role, %reason, "Immediate delivery lost after hand-off");
            state
                .endpoint(self.role)
                .notify(TransportEvent::DeliveryFailed(reason));
            return Ok(());
        }

        match state.endpoint(self.role.counterpart()) {
            Endpoint {
                activated: true,
                sink: Some(sink),
                ..
            } => {
                trace!(from = %self.role, "Immediate delivery");
                sink.deliver(TransportEvent::Received(envelope));
                Ok(())
            }
            _ => Err(TransportError::NotReachable),
        }
    }

    fn send_queued(&self, envelope: WireEnvelope) -> Result<(), TransportError> {
        let mut state = self.state.lock();
        if !state.supported {
            return Err(TransportError::Unsupported);
        }
        let endpoint = state.endpoint_mut(self.role);
        if !endpoint.activated {
            return Err(TransportError::NotActivated);
        }
        endpoint.outbox.push_back(envelope);
        trace!(from = %self.role, queued = endpoint.outbox.len(), "Queued delivery");
        Ok(())
    }

    fn pending_queue_count(&self) -> Option<usize> {
        Some(self.state.lock().endpoint(self.role).outbox.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::link::envelope::{encode, MessageKind};
    use serde_json::Map;
    use std::sync::mpsc;

    fn attach(transport: &MemoryTransport) -> mpsc::Receiver<TransportEvent> {
        let (tx, rx) = mpsc::channel();
        transport.attach(TransportSink::from_fn(move |event| tx.send(event).is_ok()));
        rx
    }

    fn ping() -> WireEnvelope {
        encode(MessageKind::Ping, Map::new())
    }

    fn received(rx: &mpsc::Receiver<TransportEvent>) -> Vec<WireEnvelope> {
        rx.try_iter()
            .filter_map(|event| match event {
                TransportEvent::Received(env) => Some(env),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_activate_reports_lifecycle() {
        let link = MemoryLink::new();
        let controller = link.transport(PeerRole::Controller);
        let rx = attach(&controller);

        controller.activate();

        let events: Vec<_> = rx.try_iter().collect();
        assert_eq!(events[0], TransportEvent::ActivationCompleted(Ok(())));
        assert!(events.contains(&TransportEvent::ReachabilityChanged(false)));
    }

    #[test]
    fn test_failed_activation() {
        let link = MemoryLink::new();
        let sensor = link.transport(PeerRole::Sensor);
        let rx = attach(&sensor);

        link.fail_next_activation(PeerRole::Sensor, "denied");
        sensor.activate();

        assert_eq!(
            rx.try_iter().collect::<Vec<_>>(),
            vec![TransportEvent::ActivationCompleted(Err("denied".into()))]
        );
        assert_eq!(sensor.send_queued(ping()), Err(TransportError::NotActivated));
    }

    #[test]
    fn test_immediate_requires_reachable() {
        let link = MemoryLink::new();
        let controller = link.transport(PeerRole::Controller);
        let sensor = link.transport(PeerRole::Sensor);
        let _crx = attach(&controller);
        let srx = attach(&sensor);
        controller.activate();
        sensor.activate();

        assert_eq!(
            controller.send_immediate(ping()),
            Err(TransportError::NotReachable)
        );
        assert!(received(&srx).is_empty());

        link.set_reachable(true);
        controller.send_immediate(ping()).unwrap();
        assert_eq!(received(&srx).len(), 1);
    }

    #[test]
    fn test_queued_delivered_once_after_reconnect() {
        let link = MemoryLink::new();
        let controller = link.transport(PeerRole::Controller);
        let sensor = link.transport(PeerRole::Sensor);
        let crx = attach(&controller);
        let _srx = attach(&sensor);
        controller.activate();
        sensor.activate();

        sensor.send_queued(ping()).unwrap();
        assert_eq!(sensor.pending_queue_count(), Some(1));
        assert_eq!(link.flush_queued(), 0);

        link.set_reachable(true);
        assert_eq!(link.flush_queued(), 1);
        assert_eq!(link.flush_queued(), 0);
        assert_eq!(received(&crx).len(), 1);
        assert_eq!(link.queued_count(PeerRole::Sensor), 0);
    }

    #[test]
    fn test_injected_immediate_failure_is_one_shot() {
        let link = MemoryLink::new();
        let controller = link.transport(PeerRole::Controller);
        let sensor = link.transport(PeerRole::Sensor);
        let _crx = attach(&controller);
        let _srx = attach(&sensor);
        controller.activate();
        sensor.activate();
        link.set_reachable(true);

        link.fail_next_immediate(PeerRole::Controller, "radio off");
        assert_eq!(
            controller.send_immediate(ping()),
            Err(TransportError::Platform("radio off".into()))
        );
        assert!(controller.send_immediate(ping()).is_ok());
    }

    #[test]
    fn test_delivery_failure_reported_after_hand_off() {
        let link = MemoryLink::new();
        let controller = link.transport(PeerRole::Controller);
        let sensor = link.transport(PeerRole::Sensor);
        let crx = attach(&controller);
        let srx = attach(&sensor);
        controller.activate();
        sensor.activate();
        link.set_reachable(true);
        let _ = crx.try_iter().count();

        link.fail_next_delivery(PeerRole::Controller, "watch asleep");
        assert!(controller.send_immediate(ping()).is_ok());
        assert!(received(&srx).is_empty());
        assert_eq!(
            crx.try_iter().collect::<Vec<_>>(),
            vec![TransportEvent::DeliveryFailed("watch asleep".into())]
        );

        controller.send_immediate(ping()).unwrap();
        assert_eq!(received(&srx).len(), 1);
    }

    #[test]
    fn test_deactivate_notifies_endpoint() {
        let link = MemoryLink::new();
        let sensor = link.transport(PeerRole::Sensor);
        let rx = attach(&sensor);
        sensor.activate();
        let _ = rx.try_iter().count();

        link.deactivate(PeerRole::Sensor);
        assert_eq!(rx.try_iter().collect::<Vec<_>>(), vec![TransportEvent::Deactivated]);
        assert_eq!(sensor.send_queued(ping()), Err(TransportError::NotActivated));
    }
}
