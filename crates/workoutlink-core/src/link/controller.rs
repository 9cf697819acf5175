//! Controller role: issues commands, consumes telemetry and state notices

use std::sync::Arc;

use parking_lot::RwLock;
use tokio::sync::broadcast;
use tracing::{debug, info};

use crate::config::PeerConfig;
use crate::error::LinkResult;
use crate::link::events::{PeerDiagnostics, PeerEvent};
use crate::link::peer::{Channel, PeerCore, PeerHandle, RoleLogic};
use crate::link::protocol::{Command, CommandType, LinkMessage};
use crate::link::transport::Transport;
use crate::tracker::{Applied, RemoteWorkout, RemoteWorkouts};
use crate::types::{PeerRole, WorkoutId};

pub(crate) enum ControllerRequest {
    SendCommand(Command),
}

struct ControllerLogic {
    workouts: Arc<RwLock<RemoteWorkouts>>,
}

impl RoleLogic for ControllerLogic {
    type Request = ControllerRequest;

    fn on_message(&mut self, core: &mut PeerCore, message: LinkMessage) {
        match message {
            LinkMessage::LiveMetrics(sample) => {
                let applied = self
                    .workouts
                    .write()
                    .apply_metrics(&sample.workout_id, sample.metrics);
                if applied == Applied::Ignored {
                    debug!(workout_id = %sample.workout_id, "Stale metrics sample ignored");
                    return;
                }
                core.emit(PeerEvent::LiveMetrics {
                    workout_id: sample.workout_id,
                    metrics: sample.metrics,
                });
            }
            LinkMessage::WorkoutState(notice) => {
                let applied = self.workouts.write().apply_state(&notice);
                if applied == Applied::Ignored {
                    debug!(
                        workout_id = %notice.workout_id,
                        state = %notice.state,
                        "Late or duplicate workout state ignored"
                    );
                    return;
                }
                info!(workout_id = %notice.workout_id, state = %notice.state, "Remote workout state");
                core.emit(PeerEvent::WorkoutStateChanged {
                    workout_id: notice.workout_id,
                    state: notice.state,
                    timestamp: notice.timestamp,
                });
            }
            other => {
                debug!(kind = %other.kind(), "Controller ignores message");
            }
        }
    }

    fn on_request(&mut self, core: &mut PeerCore, request: ControllerRequest) {
        match request {
            ControllerRequest::SendCommand(command) => {
                info!(
                    command = %command.command,
                    activity_type = command.activity_type,
                    location_type = command.location_type,
                    "Sending command"
                );
                core.send(&LinkMessage::Command(command), Channel::Immediate);
            }
        }
    }
}

/// Controller-side Session Peer.
///
/// Commands go out on the immediate channel only. When the counterpart is
/// unreachable or the session is not activated the command is dropped and
/// recorded in [`PeerDiagnostics::last_error`]; nothing is retried.
#[derive(Clone)]
pub struct ControllerPeer {
    handle: PeerHandle<ControllerRequest>,
    workouts: Arc<RwLock<RemoteWorkouts>>,
}

impl ControllerPeer {
    /// Spawn the peer task on the current tokio runtime. Activation is
    /// requested right away.
    pub fn spawn(transport: Arc<dyn Transport>, config: PeerConfig) -> Self {
        let workouts = Arc::new(RwLock::new(RemoteWorkouts::new()));
        let logic = ControllerLogic {
            workouts: workouts.clone(),
        };
        let handle = PeerHandle::spawn(PeerRole::Controller, transport, &config, logic);
        let peer = Self { handle, workouts };
        let _ = peer.activate();
        peer
    }

    /// Ask the session to (re)activate. No-op if already activated.
    pub fn activate(&self) -> LinkResult<()> {
        self.handle.activate()
    }

    /// Send `start` with the given activity and location codes
    pub fn send_start_command(&self, activity_type: u32, location_type: i64) -> LinkResult<()> {
        self.send_command(Command::start(activity_type, location_type))
    }

    pub fn send_end_command(&self) -> LinkResult<()> {
        self.send_command(Command::bare(CommandType::End))
    }

    pub fn send_pause_command(&self) -> LinkResult<()> {
        self.send_command(Command::bare(CommandType::Pause))
    }

    pub fn send_resume_command(&self) -> LinkResult<()> {
        self.send_command(Command::bare(CommandType::Resume))
    }

    /// Send an arbitrary command
    pub fn send_command(&self, command: Command) -> LinkResult<()> {
        self.handle.request(ControllerRequest::SendCommand(command))
    }

    /// Diagnostic ping, immediate channel only
    pub fn send_ping(&self) -> LinkResult<()> {
        self.handle.send_ping()
    }

    /// Everything known about one remote workout
    pub fn workout(&self, workout_id: &WorkoutId) -> Option<RemoteWorkout> {
        self.workouts.read().get(workout_id).cloned()
    }

    /// The remote workout currently in progress, if any
    pub fn active_workout(&self) -> Option<RemoteWorkout> {
        self.workouts.read().active().cloned()
    }

    /// Every remote workout seen so far
    pub fn workouts(&self) -> Vec<RemoteWorkout> {
        self.workouts.read().all()
    }

    /// Drop ended workouts whose `ended` notice is older than `cutoff`
    /// (epoch seconds). Returns how many were removed.
    pub fn prune_ended_before(&self, cutoff: f64) -> usize {
        self.workouts.write().prune_ended_before(cutoff)
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

    /// Stop the peer task. Later calls return [`LinkError::PeerStopped`].
    ///
    /// [`LinkError::PeerStopped`]: crate::error::LinkError::PeerStopped
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
    use crate::error::{LinkError, TransportError};
    use crate::link::envelope::WireEnvelope;
    use crate::link::events::ActivationState;
    use crate::link::memory::MemoryLink;
    use crate::link::transport::{TransportEvent, TransportSink};

    fn controller(link: &MemoryLink) -> ControllerPeer {
        ControllerPeer::spawn(
            Arc::new(link.transport(PeerRole::Controller)),
            PeerConfig::default(),
        )
    }

    #[tokio::test]
    async fn test_spawn_activates() {
        let link = MemoryLink::new();
        let peer = controller(&link);
        peer.flush().await.unwrap();

        let diag = peer.diagnostics();
        assert_eq!(diag.role, PeerRole::Controller);
        assert_eq!(diag.activation_state, ActivationState::Activated);
        assert!(diag.is_paired);
        assert!(!diag.is_reachable);
    }

    #[tokio::test]
    async fn test_command_while_unreachable_is_dropped() {
        let link = MemoryLink::new();
        let peer = controller(&link);
        peer.flush().await.unwrap();

        peer.send_start_command(37, 1).unwrap();
        peer.flush().await.unwrap();

        let diag = peer.diagnostics();
        assert_eq!(diag.messages_sent, 0);
        assert_eq!(diag.messages_dropped, 1);
        assert!(diag.last_error.unwrap().contains("not reachable"));
    }

    /// Transport that keeps the sink it was given and accepts nothing else
    #[derive(Default)]
    struct CapturingTransport {
        sink: parking_lot::Mutex<Option<TransportSink>>,
    }

    impl Transport for CapturingTransport {
        fn attach(&self, sink: TransportSink) {
            *self.sink.lock() = Some(sink);
        }

        fn activate(&self) {}

        fn is_reachable(&self) -> bool {
            false
        }

        fn send_immediate(&self, _envelope: WireEnvelope) -> Result<(), TransportError> {
            Err(TransportError::NotReachable)
        }

        fn send_queued(&self, _envelope: WireEnvelope) -> Result<(), TransportError> {
            Err(TransportError::NotActivated)
        }
    }

    #[tokio::test]
    async fn test_dropping_every_handle_ends_the_task() {
        let transport = Arc::new(CapturingTransport::default());
        let peer = ControllerPeer::spawn(transport.clone(), PeerConfig::default());
        let clone = peer.clone();
        peer.flush().await.unwrap();

        let sink = transport.sink.lock().clone().unwrap();
        assert!(sink.deliver(TransportEvent::ReachabilityChanged(true)));

        drop(peer);
        assert!(sink.deliver(TransportEvent::ReachabilityChanged(false)));
        drop(clone);
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }

        assert!(!sink.deliver(TransportEvent::ReachabilityChanged(true)));
    }

    #[tokio::test]
    async fn test_teardown_stops_peer() {
        let link = MemoryLink::new();
        let peer = controller(&link);
        peer.teardown().unwrap();

        assert!(matches!(peer.flush().await, Err(LinkError::PeerStopped)));
        assert!(!peer.is_running());
        assert!(matches!(peer.send_end_command(), Err(LinkError::PeerStopped)));
    }
}
