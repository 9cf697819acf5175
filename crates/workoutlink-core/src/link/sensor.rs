//! Sensor role: relays commands to the local owner, publishes telemetry

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;
use tokio::time::Instant;
use tracing::{debug, info, trace};

use crate::config::PeerConfig;
use crate::error::LinkResult;
use crate::link::events::{PeerDiagnostics, PeerEvent};
use crate::link::peer::{Channel, PeerCore, PeerHandle, RoleLogic};
use crate::link::protocol::{
    Command, CommandType, LinkMessage, LiveMetrics, LiveMetricsSample, WorkoutState,
    WorkoutStateNotice,
};
use crate::link::transport::Transport;
use crate::owner::{OwnerHandle, OwnerRegistry};
use crate::types::{PeerRole, WorkoutId};

pub(crate) enum SensorRequest {
    PublishMetrics(LiveMetricsSample),
    PublishState(WorkoutStateNotice),
    BindOwner(Option<OwnerHandle>),
}

struct SensorLogic {
    registry: OwnerRegistry,
    owner: Option<OwnerHandle>,
    min_metrics_interval: Option<Duration>,
    last_metrics_sent: Option<Instant>,
}

impl SensorLogic {
    fn dispatch(&mut self, core: &mut PeerCore, command: Command) {
        let Some(handle) = self.owner else {
            debug!(command = %command.command, "No workout session owner bound, dropping command");
            return;
        };
        let Some(owner) = self.registry.get(handle) else {
            debug!(%handle, command = %command.command, "Workout session owner is gone, dropping command");
            return;
        };

        info!(
            %handle,
            command = %command.command,
            activity_type = command.activity_type,
            location_type = command.location_type,
            "Relaying command to owner"
        );
        match command.command {
            CommandType::Start => owner.start(command.activity_type, command.location_type),
            CommandType::End => owner.end(),
            CommandType::Pause => owner.pause(),
            CommandType::Resume => owner.resume(),
        }
        core.emit(PeerEvent::CommandReceived(command));
    }

    fn publish_metrics(&mut self, core: &mut PeerCore, sample: LiveMetricsSample) {
        let now = Instant::now();
        if let (Some(window), Some(last)) = (self.min_metrics_interval, self.last_metrics_sent) {
            if now.duration_since(last) < window {
                trace!(workout_id = %sample.workout_id, "Metrics sample throttled");
                core.note_dropped();
                return;
            }
        }
        if core.send(&LinkMessage::LiveMetrics(sample), Channel::Immediate) {
            self.last_metrics_sent = Some(now);
        }
    }

    fn publish_state(&mut self, core: &mut PeerCore, notice: WorkoutStateNotice) {
        let channel = if core.is_activated() && core.is_reachable() {
            Channel::Immediate
        } else {
            Channel::Queued
        };
        info!(
            workout_id = %notice.workout_id,
            state = %notice.state,
            ?channel,
            "Publishing workout state"
        );
        core.send(&LinkMessage::WorkoutState(notice), channel);
    }
}

impl RoleLogic for SensorLogic {
    type Request = SensorRequest;

    fn on_message(&mut self, core: &mut PeerCore, message: LinkMessage) {
        match message {
            LinkMessage::Command(command) => self.dispatch(core, command),
            other => {
                debug!(kind = %other.kind(), "Sensor ignores message");
            }
        }
    }

    fn on_request(&mut self, core: &mut PeerCore, request: SensorRequest) {
        match request {
            SensorRequest::PublishMetrics(sample) => self.publish_metrics(core, sample),
            SensorRequest::PublishState(notice) => self.publish_state(core, notice),
            SensorRequest::BindOwner(owner) => {
                debug!(owner = ?owner, "Workout session owner bound");
                self.owner = owner;
            }
        }
    }
}

/// Sensor-side Session Peer.
///
/// Telemetry is lossy: samples go out on the immediate channel only and are
/// dropped while unreachable or inside the throttle window. Workout state
/// notices use the immediate channel when reachable and the queued channel
/// otherwise, so an `ended` survives a disconnect. A notice published before
/// the session finishes (re)activating is held and queued once it does.
#[derive(Clone)]
pub struct SensorPeer {
    handle: PeerHandle<SensorRequest>,
    registry: OwnerRegistry,
}

impl SensorPeer {
    /// Spawn the peer task on the current tokio runtime. Activation is
    /// requested right away.
    ///
    /// Commands are relayed to `owner` through `registry`; the peer never
    /// keeps the owner alive on its own.
    pub fn spawn(
        transport: Arc<dyn Transport>,
        registry: OwnerRegistry,
        owner: Option<OwnerHandle>,
        config: PeerConfig,
    ) -> Self {
        let logic = SensorLogic {
            registry: registry.clone(),
            owner,
            min_metrics_interval: config.min_metrics_interval(),
            last_metrics_sent: None,
        };
        let handle = PeerHandle::spawn(PeerRole::Sensor, transport, &config, logic);
        let peer = Self { handle, registry };
        let _ = peer.activate();
        peer
    }

    pub fn activate(&self) -> LinkResult<()> {
        self.handle.activate()
    }

    /// Bind (or clear) the owner that receives inbound commands
    pub fn bind_owner(&self, owner: Option<OwnerHandle>) -> LinkResult<()> {
        self.handle.request(SensorRequest::BindOwner(owner))
    }

    /// The registry commands are resolved through
    pub fn registry(&self) -> &OwnerRegistry {
        &self.registry
    }

    /// Publish one telemetry sample for `workout_id`
    pub fn publish_live_metrics(&self, workout_id: WorkoutId, metrics: LiveMetrics) -> LinkResult<()> {
        self.handle
            .request(SensorRequest::PublishMetrics(LiveMetricsSample {
                workout_id,
                metrics,
            }))
    }

    /// Announce a workout state change, timestamped now
    pub fn publish_workout_state(&self, workout_id: WorkoutId, state: WorkoutState) -> LinkResult<()> {
        self.publish_notice(WorkoutStateNotice::now(workout_id, state))
    }

    /// Announce a prebuilt workout state notice
    pub fn publish_notice(&self, notice: WorkoutStateNotice) -> LinkResult<()> {
        self.handle.request(SensorRequest::PublishState(notice))
    }

    pub fn send_ping(&self) -> LinkResult<()> {
        self.handle.send_ping()
    }

    pub fn diagnostics(&self) -> PeerDiagnostics {
        self.handle.diagnostics()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PeerEvent> {
        self.handle.subscribe()
    }

    /// Wait until every request and transport callback enqueued so far has
    /// been processed
    pub async fn flush(&self) -> LinkResult<()> {
        self.handle.flush().await
    }

    pub fn teardown(&self) -> LinkResult<()> {
        self.handle.teardown()
    }

    pub fn is_running(&self) -> bool {
        self.handle.is_running()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::link::memory::MemoryLink;

    fn sensor(link: &MemoryLink, config: PeerConfig) -> SensorPeer {
        SensorPeer::spawn(
            Arc::new(link.transport(PeerRole::Sensor)),
            OwnerRegistry::new(),
            None,
            config,
        )
    }

    #[tokio::test]
    async fn test_state_queued_while_unreachable() {
        let link = MemoryLink::new();
        let peer = sensor(&link, PeerConfig::default());

        peer.publish_workout_state(WorkoutId::from("w1"), WorkoutState::Ended)
            .unwrap();
        peer.flush().await.unwrap();

        let diag = peer.diagnostics();
        assert_eq!(diag.messages_sent, 1);
        assert_eq!(diag.pending_queue_count, Some(1));
        assert_eq!(link.queued_count(PeerRole::Sensor), 1);
    }

    #[tokio::test]
    async fn test_state_held_until_activation_completes() {
        let link = MemoryLink::new();
        link.fail_next_activation(PeerRole::Sensor, "companion busy");
        let peer = sensor(&link, PeerConfig::default());
        peer.flush().await.unwrap();

        peer.publish_workout_state(WorkoutId::from("w1"), WorkoutState::Ended)
            .unwrap();
        peer.flush().await.unwrap();
        assert_eq!(link.queued_count(PeerRole::Sensor), 0);
        assert_eq!(peer.diagnostics().messages_dropped, 0);

        peer.activate().unwrap();
        peer.flush().await.unwrap();

        let diag = peer.diagnostics();
        assert_eq!(diag.messages_sent, 1);
        assert_eq!(link.queued_count(PeerRole::Sensor), 1);
    }

    #[tokio::test]
    async fn test_non_finite_sample_is_recorded_not_sent() {
        let link = MemoryLink::new();
        let peer = sensor(&link, PeerConfig::default());
        link.set_reachable(true);
        peer.flush().await.unwrap();

        peer.publish_live_metrics(WorkoutId::from("w1"), LiveMetrics::now(f64::NAN, 1.0, 2.0, 3.0))
            .unwrap();
        peer.flush().await.unwrap();

        let diag = peer.diagnostics();
        assert_eq!(diag.messages_sent, 0);
        assert_eq!(diag.messages_dropped, 1);
        assert!(diag.last_error.unwrap().contains("heartRate"));
    }

    #[tokio::test]
    async fn test_metrics_never_queued() {
        let link = MemoryLink::new();
        let peer = sensor(&link, PeerConfig::default());

        peer.publish_live_metrics(WorkoutId::from("w1"), LiveMetrics::now(120.0, 1.0, 2.0, 3.0))
            .unwrap();
        peer.flush().await.unwrap();

        let diag = peer.diagnostics();
        assert_eq!(diag.messages_sent, 0);
        assert_eq!(diag.messages_dropped, 1);
        assert_eq!(link.queued_count(PeerRole::Sensor), 0);
    }
}
