//! Controller-side view of workouts running on the sensor
//!
//! Messages reach the controller over two channels with no ordering between
//! them. A queued `workoutState(started)` can land after the first immediate
//! `liveMetrics`, and a queued `ended` can land after later telemetry. Records
//! are therefore keyed by `workoutID` and merged by these rules, never by
//! arrival order:
//!
//! - `ended` is terminal. Nothing reopens an ended workout.
//! - Metrics for an unknown workout open an active record.
//! - Only the newest metrics sample (by timestamp) is kept.

use std::collections::HashMap;

use serde::Serialize;

use crate::link::protocol::{LiveMetrics, WorkoutState, WorkoutStateNotice};
use crate::types::WorkoutId;

/// Lifecycle of a remote workout as seen by the controller
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum RemotePhase {
    Active,
    Ended,
}

/// Everything the controller knows about one remote workout
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteWorkout {
    pub workout_id: WorkoutId,
    pub phase: RemotePhase,
    pub started_at: Option<f64>,
    pub ended_at: Option<f64>,
    pub last_metrics: Option<LiveMetrics>,
    pub samples_received: u64,
}

impl RemoteWorkout {
    fn opened(workout_id: WorkoutId) -> Self {
        Self {
            workout_id,
            phase: RemotePhase::Active,
            started_at: None,
            ended_at: None,
            last_metrics: None,
            samples_received: 0,
        }
    }

    pub fn is_ended(&self) -> bool {
        self.phase == RemotePhase::Ended
    }
}

/// Outcome of applying one message to the tracker
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Applied {
    /// The record changed
    Updated,
    /// Late or duplicate message; the record is unchanged
    Ignored,
}

/// All remote workouts keyed by `workoutID`
#[derive(Debug, Clone, Default)]
pub struct RemoteWorkouts {
    workouts: HashMap<WorkoutId, RemoteWorkout>,
}

impl RemoteWorkouts {
    pub fn new() -> Self {
        Self::default()
    }

    /// Merge a workout state notice
    pub fn apply_state(&mut self, notice: &WorkoutStateNotice) -> Applied {
        let record = self
            .workouts
            .entry(notice.workout_id.clone())
            .or_insert_with(|| RemoteWorkout::opened(notice.workout_id.clone()));

        match notice.state {
            WorkoutState::Started => {
                if record.is_ended() || record.started_at.is_some() {
                    return Applied::Ignored;
                }
                record.started_at = Some(notice.timestamp);
                Applied::Updated
            }
            WorkoutState::Ended => {
                if record.is_ended() {
                    return Applied::Ignored;
                }
                record.phase = RemotePhase::Ended;
                record.ended_at = Some(notice.timestamp);
                Applied::Updated
            }
        }
    }

    /// Merge a telemetry sample
    pub fn apply_metrics(&mut self, workout_id: &WorkoutId, metrics: LiveMetrics) -> Applied {
        let record = self
            .workouts
            .entry(workout_id.clone())
            .or_insert_with(|| RemoteWorkout::opened(workout_id.clone()));

        if record.is_ended() {
            return Applied::Ignored;
        }
        record.samples_received += 1;
        let stale = record
            .last_metrics
            .is_some_and(|last| last.timestamp > metrics.timestamp);
        if stale {
            return Applied::Ignored;
        }
        record.last_metrics = Some(metrics);
        Applied::Updated
    }

    pub fn get(&self, workout_id: &WorkoutId) -> Option<&RemoteWorkout> {
        self.workouts.get(workout_id)
    }

    /// The active workout most recently started or sampled, if any
    pub fn active(&self) -> Option<&RemoteWorkout> {
        self.workouts
            .values()
            .filter(|w| !w.is_ended())
            .max_by(|a, b| latest_activity(a).total_cmp(&latest_activity(b)))
    }

    /// Snapshot of every record
    pub fn all(&self) -> Vec<RemoteWorkout> {
        let mut all: Vec<_> = self.workouts.values().cloned().collect();
        all.sort_by(|a, b| a.workout_id.cmp(&b.workout_id));
        all
    }

    /// Forget ended workouts whose `ended` notice is older than `cutoff`
    /// (epoch seconds). Returns how many records were removed.
    ///
    /// A message that arrives later for a pruned ID opens a fresh record, so
    /// the cutoff should sit well behind the longest expected disconnect.
    pub fn prune_ended_before(&mut self, cutoff: f64) -> usize {
        let before = self.workouts.len();
        self.workouts
            .retain(|_, w| !(w.is_ended() && w.ended_at.is_some_and(|at| at < cutoff)));
        before - self.workouts.len()
    }

    pub fn len(&self) -> usize {
        self.workouts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.workouts.is_empty()
    }
}

fn latest_activity(workout: &RemoteWorkout) -> f64 {
    let sampled = workout.last_metrics.map(|m| m.timestamp).unwrap_or(f64::MIN);
    workout.started_at.unwrap_or(f64::MIN).max(sampled)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn notice(id: &str, state: WorkoutState, timestamp: f64) -> WorkoutStateNotice {
        WorkoutStateNotice {
            workout_id: WorkoutId::from(id),
            state,
            timestamp,
        }
    }

    fn sample(heart_rate: f64, timestamp: f64) -> LiveMetrics {
        LiveMetrics {
            heart_rate,
            active_energy: 0.0,
            distance: 0.0,
            elapsed: 0.0,
            timestamp,
        }
    }

    #[test]
    fn test_started_then_ended() {
        let mut workouts = RemoteWorkouts::new();
        let id = WorkoutId::from("abc");

        assert_eq!(
            workouts.apply_state(&notice("abc", WorkoutState::Started, 10.0)),
            Applied::Updated
        );
        assert_eq!(workouts.get(&id).unwrap().phase, RemotePhase::Active);

        assert_eq!(
            workouts.apply_state(&notice("abc", WorkoutState::Ended, 20.0)),
            Applied::Updated
        );
        let record = workouts.get(&id).unwrap();
        assert_eq!(record.phase, RemotePhase::Ended);
        assert_eq!(record.started_at, Some(10.0));
        assert_eq!(record.ended_at, Some(20.0));
    }

    #[test]
    fn test_late_started_does_not_reopen() {
        let mut workouts = RemoteWorkouts::new();
        workouts.apply_state(&notice("abc", WorkoutState::Ended, 20.0));

        assert_eq!(
            workouts.apply_state(&notice("abc", WorkoutState::Started, 10.0)),
            Applied::Ignored
        );
        assert!(workouts.get(&WorkoutId::from("abc")).unwrap().is_ended());
        assert!(workouts.active().is_none());
    }

    #[test]
    fn test_metrics_before_started_open_record() {
        let mut workouts = RemoteWorkouts::new();
        let id = WorkoutId::from("abc");

        assert_eq!(workouts.apply_metrics(&id, sample(120.0, 5.0)), Applied::Updated);
        assert_eq!(
            workouts.apply_state(&notice("abc", WorkoutState::Started, 1.0)),
            Applied::Updated
        );

        let record = workouts.get(&id).unwrap();
        assert_eq!(record.phase, RemotePhase::Active);
        assert_eq!(record.started_at, Some(1.0));
        assert_eq!(record.last_metrics.unwrap().heart_rate, 120.0);
    }

    #[test]
    fn test_metrics_after_ended_are_ignored() {
        let mut workouts = RemoteWorkouts::new();
        let id = WorkoutId::from("abc");
        workouts.apply_state(&notice("abc", WorkoutState::Ended, 20.0));

        assert_eq!(workouts.apply_metrics(&id, sample(140.0, 30.0)), Applied::Ignored);
        assert!(workouts.get(&id).unwrap().last_metrics.is_none());
    }

    #[test]
    fn test_keeps_newest_sample() {
        let mut workouts = RemoteWorkouts::new();
        let id = WorkoutId::from("abc");
        workouts.apply_metrics(&id, sample(150.0, 10.0));

        assert_eq!(workouts.apply_metrics(&id, sample(130.0, 9.0)), Applied::Ignored);
        let record = workouts.get(&id).unwrap();
        assert_eq!(record.last_metrics.unwrap().heart_rate, 150.0);
        assert_eq!(record.samples_received, 2);
    }

    #[test]
    fn test_duplicate_ended_is_ignored() {
        let mut workouts = RemoteWorkouts::new();
        workouts.apply_state(&notice("abc", WorkoutState::Ended, 20.0));
        assert_eq!(
            workouts.apply_state(&notice("abc", WorkoutState::Ended, 21.0)),
            Applied::Ignored
        );
        assert_eq!(
            workouts.get(&WorkoutId::from("abc")).unwrap().ended_at,
            Some(20.0)
        );
    }

    #[test]
    fn test_prune_removes_only_old_ended_workouts() {
        let mut workouts = RemoteWorkouts::new();
        workouts.apply_state(&notice("old", WorkoutState::Ended, 10.0));
        workouts.apply_state(&notice("recent", WorkoutState::Ended, 100.0));
        workouts.apply_state(&notice("running", WorkoutState::Started, 1.0));

        assert_eq!(workouts.prune_ended_before(50.0), 1);
        assert!(workouts.get(&WorkoutId::from("old")).is_none());
        assert!(workouts.get(&WorkoutId::from("recent")).is_some());
        assert!(workouts.get(&WorkoutId::from("running")).is_some());
        assert_eq!(workouts.prune_ended_before(50.0), 0);
    }

    #[test]
    fn test_active_picks_most_recent() {
        let mut workouts = RemoteWorkouts::new();
        workouts.apply_state(&notice("old", WorkoutState::Started, 1.0));
        workouts.apply_state(&notice("new", WorkoutState::Started, 5.0));

        assert_eq!(workouts.active().unwrap().workout_id.as_str(), "new");
        assert_eq!(workouts.len(), 2);
        assert_eq!(workouts.all()[0].workout_id.as_str(), "new");
    }
}
