//! Workout Session Owner and the registry that hands out non-owning handles
//!
//! The sensor peer never holds its owner directly. It keeps an [`OwnerHandle`]
//! and resolves it through an [`OwnerRegistry`] for each inbound command, so
//! "the owner has already been torn down" is an explicit branch: the lookup
//! returns `None` and the command is dropped.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::debug;

/// The workout state machine a peer drives locally.
///
/// Methods are invoked on the peer's own task, one at a time, so the owner
/// has a single writer.
pub trait WorkoutSessionOwner: Send + Sync {
    /// Start a workout with opaque activity and location codes
    fn start(&self, activity_type: u32, location_type: i64);

    /// End the current workout
    fn end(&self);

    /// Pause the current workout
    fn pause(&self) {}

    /// Resume a paused workout
    fn resume(&self) {}
}

/// Opaque, never-reused reference to a registered owner
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct OwnerHandle(u64);

impl std::fmt::Display for OwnerHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "owner#{}", self.0)
    }
}

#[derive(Default)]
struct RegistryInner {
    next_id: u64,
    owners: HashMap<OwnerHandle, Arc<dyn WorkoutSessionOwner>>,
}

/// Process-local table of live Workout Session Owners
#[derive(Clone, Default)]
pub struct OwnerRegistry {
    inner: Arc<RwLock<RegistryInner>>,
}

impl OwnerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an owner and return its handle
    pub fn register(&self, owner: Arc<dyn WorkoutSessionOwner>) -> OwnerHandle {
        let mut inner = self.inner.write();
        inner.next_id += 1;
        let handle = OwnerHandle(inner.next_id);
        inner.owners.insert(handle, owner);
        debug!(%handle, "Workout session owner registered");
        handle
    }

    /// Drop the registry's reference. Returns `false` if it was already gone.
    pub fn unregister(&self, handle: OwnerHandle) -> bool {
        let removed = self.inner.write().owners.remove(&handle).is_some();
        if removed {
            debug!(%handle, "Workout session owner unregistered");
        }
        removed
    }

    /// Resolve a handle, if its owner is still alive
    pub fn get(&self, handle: OwnerHandle) -> Option<Arc<dyn WorkoutSessionOwner>> {
        self.inner.read().owners.get(&handle).cloned()
    }

    /// Whether `handle` still resolves
    pub fn contains(&self, handle: OwnerHandle) -> bool {
        self.inner.read().owners.contains_key(&handle)
    }

    /// Number of live owners
    pub fn len(&self) -> usize {
        self.inner.read().owners.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    #[derive(Default)]
    struct Recorder {
        calls: Mutex<Vec<String>>,
    }

    impl WorkoutSessionOwner for Recorder {
        fn start(&self, activity_type: u32, location_type: i64) {
            self.calls
                .lock()
                .push(format!("start({}, {})", activity_type, location_type));
        }

        fn end(&self) {
            self.calls.lock().push("end".to_string());
        }
    }

    #[test]
    fn test_register_and_resolve() {
        let registry = OwnerRegistry::new();
        let recorder = Arc::new(Recorder::default());
        let handle = registry.register(recorder.clone());

        let owner = registry.get(handle).unwrap();
        owner.start(37, 1);
        owner.pause();

        assert_eq!(*recorder.calls.lock(), vec!["start(37, 1)".to_string()]);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_unregistered_handle_resolves_to_none() {
        let registry = OwnerRegistry::new();
        let handle = registry.register(Arc::new(Recorder::default()));

        assert!(registry.unregister(handle));
        assert!(!registry.unregister(handle));
        assert!(registry.get(handle).is_none());
        assert!(registry.is_empty());
    }

    #[test]
    fn test_handles_are_not_reused() {
        let registry = OwnerRegistry::new();
        let first = registry.register(Arc::new(Recorder::default()));
        registry.unregister(first);
        let second = registry.register(Arc::new(Recorder::default()));

        assert_ne!(first, second);
        assert!(!registry.contains(first));
        assert!(registry.contains(second));
    }

    #[test]
    fn test_registry_does_not_prolong_unregistered_owner() {
        let registry = OwnerRegistry::new();
        let recorder = Arc::new(Recorder::default());
        let handle = registry.register(recorder.clone());
        assert_eq!(Arc::strong_count(&recorder), 2);

        registry.unregister(handle);
        assert_eq!(Arc::strong_count(&recorder), 1);
    }
}
