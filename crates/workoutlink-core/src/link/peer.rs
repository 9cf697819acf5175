//! Shared Session Peer machinery
//!
//! Each peer is one tokio task that exclusively owns its state. Everything
//! that can touch that state arrives through a single unbounded inbox:
//!
//! ```text
//!   API calls (any thread) ──┐
//!                            ├──> inbox (FIFO) ──> peer task ──> PeerCore + RoleLogic
//!   Transport callbacks  ────┘     (mpsc)          (single writer)
//!   (any thread, via TransportSink)                     │
//!                                                       ├──> diagnostics snapshot (RwLock)
//!                                                       └──> PeerEvent broadcast
//! ```
//!
//! Transport callbacks never mutate state directly; the sink only enqueues.
//! The sink and the task's own flush requeue hold weak senders, so the task
//! ends once every handle is dropped.
//! `PeerCore` holds what both roles share: activation lifecycle, reachability,
//! diagnostics, the send policy primitives and the decode-or-drop path.
//! Role-specific dispatch lives behind [`RoleLogic`].

use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;

use parking_lot::RwLock;
use tokio::sync::{broadcast, mpsc, oneshot};
use tracing::{debug, info, trace, warn, Instrument};

use crate::config::PeerConfig;
use crate::error::{CodecError, LinkError, LinkResult, TransportError};
use crate::link::envelope::{Envelope, MessageKind, WireEnvelope};
use crate::link::events::{ActivationState, PeerDiagnostics, PeerEvent};
use crate::link::protocol::LinkMessage;
use crate::link::transport::{Transport, TransportEvent, TransportSink};
use crate::types::PeerRole;

/// Everything a peer task can be asked to process
pub(crate) enum PeerInput<R> {
    Transport(TransportEvent),
    Activate,
    Ping,
    Flush(oneshot::Sender<()>),
    Shutdown,
    Role(R),
}

/// Which transport primitive to hand a message to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Channel {
    Immediate,
    Queued,
}

/// Role-specific half of a peer
pub(crate) trait RoleLogic: Send + 'static {
    type Request: Send + 'static;

    /// A decoded inbound message that the shared core did not consume
    fn on_message(&mut self, core: &mut PeerCore, message: LinkMessage);

    /// A role-specific API request
    fn on_request(&mut self, core: &mut PeerCore, request: Self::Request);
}

/// State and primitives shared by controller and sensor
pub(crate) struct PeerCore {
    role: PeerRole,
    transport: Arc<dyn Transport>,
    state: PeerDiagnostics,
    published: Arc<RwLock<PeerDiagnostics>>,
    event_tx: broadcast::Sender<PeerEvent>,
    /// Queued-channel messages issued before activation completed
    held: VecDeque<LinkMessage>,
}

impl PeerCore {
    pub(crate) fn role(&self) -> PeerRole {
        self.role
    }

    pub(crate) fn is_reachable(&self) -> bool {
        self.state.is_reachable
    }

    pub(crate) fn is_activated(&self) -> bool {
        self.state.activation_state == ActivationState::Activated
    }

    /// Request activation. A no-op while already activated or activating.
    pub(crate) fn activate(&mut self) {
        if !self.transport.is_supported() {
            debug!("Peer session unsupported, activation skipped");
            self.record_error(TransportError::Unsupported);
            return;
        }
        match self.state.activation_state {
            ActivationState::Activated | ActivationState::Activating => {
                trace!(state = %self.state.activation_state, "Activation already in progress or done");
            }
            ActivationState::NotActivated | ActivationState::Inactive => {
                self.set_activation(ActivationState::Activating);
                self.transport.activate();
            }
        }
    }

    fn set_activation(&mut self, next: ActivationState) {
        if self.state.activation_state == next {
            return;
        }
        info!(from = %self.state.activation_state, to = %next, "Activation state changed");
        self.state.activation_state = next;
        self.emit(PeerEvent::ActivationChanged(next));
    }

    /// Apply a transport callback. Returns a decoded message for the role
    /// logic when one arrived and was not consumed here.
    pub(crate) fn handle_transport(&mut self, event: TransportEvent) -> Option<LinkMessage> {
        match event {
            TransportEvent::ActivationCompleted(Ok(())) => {
                self.set_activation(ActivationState::Activated);
                self.release_held();
                None
            }
            TransportEvent::ActivationCompleted(Err(reason)) => {
                warn!(%reason, "Activation failed");
                self.record_error(format!("Activation failed: {}", reason));
                self.set_activation(ActivationState::NotActivated);
                None
            }
            TransportEvent::BecameInactive => {
                self.set_activation(ActivationState::Inactive);
                None
            }
            TransportEvent::Deactivated => {
                info!("Session deactivated, re-activating");
                self.set_activation(ActivationState::NotActivated);
                self.activate();
                None
            }
            TransportEvent::ReachabilityChanged(reachable) => {
                if self.state.is_reachable != reachable {
                    info!(reachable, "Reachability changed");
                    self.state.is_reachable = reachable;
                    self.emit(PeerEvent::ReachabilityChanged(reachable));
                }
                None
            }
            TransportEvent::PairingChanged {
                is_paired,
                is_app_installed,
            } => {
                debug!(is_paired, is_app_installed, "Pairing state changed");
                self.state.is_paired = is_paired;
                self.state.is_app_installed = is_app_installed;
                None
            }
            TransportEvent::DeliveryFailed(reason) => {
                warn!(%reason, "Immediate delivery failed");
                self.state.messages_dropped += 1;
                self.record_error(TransportError::Platform(reason));
                None
            }
            TransportEvent::Received(wire) => self.receive(wire),
        }
    }

    fn receive(&mut self, wire: WireEnvelope) -> Option<LinkMessage> {
        self.state.messages_received += 1;

        let envelope = match Envelope::decode(&wire) {
            Ok(envelope) => envelope,
            Err(e) => {
                self.state.last_received = format!("undecodable envelope ({})", e);
                self.drop_inbound(e);
                return None;
            }
        };
        self.state.last_received = format!("{} v{}", envelope.kind, envelope.version);

        let message = match LinkMessage::from_envelope(&envelope) {
            Ok(message) => message,
            Err(e) => {
                self.drop_inbound(e);
                return None;
            }
        };
        trace!(kind = %envelope.kind, version = envelope.version, "Received message");

        match message {
            LinkMessage::Ping(payload) => {
                debug!("Ping received");
                self.emit(PeerEvent::PingReceived(payload));
                None
            }
            LinkMessage::Error(_) => {
                debug!("Reserved error message received, dropping");
                None
            }
            other => Some(other),
        }
    }

    fn drop_inbound(&mut self, err: CodecError) {
        warn!(error = %err, "Dropping inbound message");
        self.state.messages_dropped += 1;
        self.record_error(err);
    }

    /// Hand a message to the transport. Failures only touch diagnostics.
    ///
    /// Queued-channel messages issued before activation completes are held
    /// and handed over on `ActivationCompleted(Ok)`. Returns whether the
    /// message was accepted or held.
    pub(crate) fn send(&mut self, message: &LinkMessage, channel: Channel) -> bool {
        let kind = message.kind();

        if !self.is_activated() {
            if channel == Channel::Queued && self.transport.is_supported() {
                debug!(%kind, state = %self.state.activation_state, "Holding queued message until activated");
                self.held.push_back(message.clone());
                return true;
            }
            self.drop_outbound(kind, TransportError::NotActivated);
            return false;
        }
        if channel == Channel::Immediate && !self.state.is_reachable {
            debug!(%kind, transport_reachable = self.transport.is_reachable(), "Immediate channel unusable");
            self.drop_outbound(kind, TransportError::NotReachable);
            return false;
        }

        let wire = match message.encode() {
            Ok(wire) => wire,
            Err(e) => {
                warn!(%kind, error = %e, "Failed to encode outbound message");
                self.state.messages_dropped += 1;
                self.record_error(e);
                return false;
            }
        };

        let result = match channel {
            Channel::Immediate => self.transport.send_immediate(wire),
            Channel::Queued => self.transport.send_queued(wire),
        };
        match result {
            Ok(()) => {
                trace!(%kind, ?channel, "Message handed to transport");
                self.state.messages_sent += 1;
                true
            }
            Err(e) => {
                self.drop_outbound(kind, e);
                false
            }
        }
    }

    /// Hand held messages to the persistent queue, oldest first
    fn release_held(&mut self) {
        if self.held.is_empty() {
            return;
        }
        info!(count = self.held.len(), "Releasing messages held during activation");
        for message in std::mem::take(&mut self.held) {
            self.send(&message, Channel::Queued);
        }
    }

    fn drop_outbound(&mut self, kind: MessageKind, err: TransportError) {
        debug!(%kind, error = %err, "Outbound message dropped");
        self.state.messages_dropped += 1;
        self.record_error(err);
    }

    /// Count a message the role logic chose not to send
    pub(crate) fn note_dropped(&mut self) {
        self.state.messages_dropped += 1;
    }

    pub(crate) fn record_error(&mut self, err: impl fmt::Display) {
        self.state.last_error = Some(err.to_string());
    }

    /// Notify observers; having none is fine
    pub(crate) fn emit(&self, event: PeerEvent) {
        let _ = self.event_tx.send(event);
    }

    fn publish(&mut self) {
        self.state.pending_queue_count = self.transport.pending_queue_count();
        *self.published.write() = self.state.clone();
    }
}

/// Client side of a peer task
pub(crate) struct PeerHandle<R> {
    inbox: mpsc::UnboundedSender<PeerInput<R>>,
    diagnostics: Arc<RwLock<PeerDiagnostics>>,
    event_tx: broadcast::Sender<PeerEvent>,
}

impl<R> Clone for PeerHandle<R> {
    fn clone(&self) -> Self {
        Self {
            inbox: self.inbox.clone(),
            diagnostics: self.diagnostics.clone(),
            event_tx: self.event_tx.clone(),
        }
    }
}

impl<R: Send + 'static> PeerHandle<R> {
    /// Attach to `transport` and spawn the peer task on the current runtime
    pub(crate) fn spawn<L>(
        role: PeerRole,
        transport: Arc<dyn Transport>,
        config: &PeerConfig,
        logic: L,
    ) -> Self
    where
        L: RoleLogic<Request = R>,
    {
        let (inbox, rx) = mpsc::unbounded_channel();
        let (event_tx, _) = broadcast::channel(config.event_channel_capacity.max(1));
        let diagnostics = Arc::new(RwLock::new(PeerDiagnostics::new(role)));

        let sink_tx = inbox.downgrade();
        transport.attach(TransportSink::from_fn(move |event| match sink_tx.upgrade() {
            Some(tx) => tx.send(PeerInput::Transport(event)).is_ok(),
            None => false,
        }));

        let core = PeerCore {
            role,
            transport,
            state: PeerDiagnostics::new(role),
            published: diagnostics.clone(),
            event_tx: event_tx.clone(),
            held: VecDeque::new(),
        };

        let instance = config
            .instance_name
            .clone()
            .unwrap_or_else(|| role.to_string());
        let span = tracing::info_span!("peer", %role, %instance);
        tokio::spawn(run(core, logic, rx, inbox.downgrade()).instrument(span));

        Self {
            inbox,
            diagnostics,
            event_tx,
        }
    }

    fn enqueue(&self, input: PeerInput<R>) -> LinkResult<()> {
        self.inbox.send(input).map_err(|_| LinkError::PeerStopped)
    }

    pub(crate) fn activate(&self) -> LinkResult<()> {
        self.enqueue(PeerInput::Activate)
    }

    pub(crate) fn send_ping(&self) -> LinkResult<()> {
        self.enqueue(PeerInput::Ping)
    }

    pub(crate) fn request(&self, request: R) -> LinkResult<()> {
        self.enqueue(PeerInput::Role(request))
    }

    /// Resolve once the peer task has drained its inbox
    pub(crate) async fn flush(&self) -> LinkResult<()> {
        let (done_tx, done_rx) = oneshot::channel();
        self.enqueue(PeerInput::Flush(done_tx))?;
        done_rx.await.map_err(|_| LinkError::PeerStopped)
    }

    pub(crate) fn teardown(&self) -> LinkResult<()> {
        self.enqueue(PeerInput::Shutdown)
    }

    pub(crate) fn is_running(&self) -> bool {
        !self.inbox.is_closed()
    }

    pub(crate) fn diagnostics(&self) -> PeerDiagnostics {
        self.diagnostics.read().clone()
    }

    pub(crate) fn subscribe(&self) -> broadcast::Receiver<PeerEvent> {
        self.event_tx.subscribe()
    }
}

async fn run<L: RoleLogic>(
    mut core: PeerCore,
    mut logic: L,
    mut inbox: mpsc::UnboundedReceiver<PeerInput<L::Request>>,
    requeue: mpsc::WeakUnboundedSender<PeerInput<L::Request>>,
) {
    debug!("Peer task started");

    while let Some(input) = inbox.recv().await {
        match input {
            PeerInput::Transport(event) => {
                if let Some(message) = core.handle_transport(event) {
                    logic.on_message(&mut core, message);
                }
            }
            PeerInput::Activate => core.activate(),
            PeerInput::Ping => {
                let ping = LinkMessage::ping(core.role());
                core.send(&ping, Channel::Immediate);
            }
            PeerInput::Flush(done) => {
                // Inputs produced while handling earlier ones (transport
                // callbacks) may still be queued; settle only when empty.
                match requeue.upgrade() {
                    Some(tx) if !inbox.is_empty() => {
                        let _ = tx.send(PeerInput::Flush(done));
                    }
                    _ => {
                        core.publish();
                        let _ = done.send(());
                    }
                }
                continue;
            }
            PeerInput::Shutdown => {
                info!("Peer torn down");
                break;
            }
            PeerInput::Role(request) => logic.on_request(&mut core, request),
        }
        core.publish();
    }

    debug!("Peer task ended");
}
