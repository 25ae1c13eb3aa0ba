//! Explicit resource state tracking.
//!
//! Nothing in the backend infers hazards between passes. Every resource the
//! renderer owns has a [`ResourceState`] recorded here, every change of state
//! produces a [`Barrier`] that must be recorded before the consuming pass, and
//! passes assert the state they expect with [`StateTracker::require`].

use std::collections::HashMap;
use std::fmt;

use super::ResourceId;

/// Usage state of a GPU resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceState {
    /// Freshly created, contents undefined
    Uninitialized,
    /// Written by shaders or used as an attachment being written
    WriteTarget,
    /// Read by shaders, or bound as read-only depth / vertex input
    ShaderReadable,
    TransferSource,
    TransferDestination,
    /// Handed to the presentation engine (externally owned images only)
    Present,
}

impl fmt::Display for ResourceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ResourceState::Uninitialized => "uninitialized",
            ResourceState::WriteTarget => "write-target",
            ResourceState::ShaderReadable => "shader-readable",
            ResourceState::TransferSource => "transfer-source",
            ResourceState::TransferDestination => "transfer-destination",
            ResourceState::Present => "present",
        };
        f.write_str(name)
    }
}

/// A recorded state transition of one resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Barrier {
    pub resource: ResourceId,
    pub before: ResourceState,
    pub after: ResourceState,
}

impl Barrier {
    pub fn new(resource: ResourceId, before: ResourceState, after: ResourceState) -> Self {
        Self {
            resource,
            before,
            after,
        }
    }
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum StateError {
    #[error("resource {0:?} is not tracked")]
    Untracked(ResourceId),

    #[error("resource {resource:?} is {actual}, pass requires {expected}")]
    Mismatch {
        resource: ResourceId,
        expected: ResourceState,
        actual: ResourceState,
    },

    #[error("resource {resource:?} cannot transition from {from} to {to}")]
    InvalidTransition {
        resource: ResourceId,
        from: ResourceState,
        to: ResourceState,
    },
}

/// Current state of every tracked resource.
#[derive(Debug, Default, Clone)]
pub struct StateTracker {
    states: HashMap<ResourceId, ResourceState>,
}

impl StateTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start tracking a resource in the given state.
    pub fn register(&mut self, resource: ResourceId, state: ResourceState) {
        self.states.insert(resource, state);
    }

    pub fn state(&self, resource: ResourceId) -> Option<ResourceState> {
        self.states.get(&resource).copied()
    }

    /// Move a resource to `to`.
    ///
    /// Returns the barrier to record, or `None` when the resource is already in
    /// that state. Nothing can go back to `Uninitialized`.
    pub fn transition(
        &mut self,
        resource: ResourceId,
        to: ResourceState,
    ) -> Result<Option<Barrier>, StateError> {
        let current = self
            .states
            .get_mut(&resource)
            .ok_or(StateError::Untracked(resource))?;

        if to == ResourceState::Uninitialized {
            return Err(StateError::InvalidTransition {
                resource,
                from: *current,
                to,
            });
        }
        if *current == to {
            return Ok(None);
        }

        let barrier = Barrier::new(resource, *current, to);
        *current = to;
        Ok(Some(barrier))
    }

    /// Transition several resources, collecting the barriers that are needed.
    pub fn transition_all(
        &mut self,
        resources: impl IntoIterator<Item = ResourceId>,
        to: ResourceState,
    ) -> Result<Vec<Barrier>, StateError> {
        let mut barriers = Vec::new();
        for resource in resources {
            barriers.extend(self.transition(resource, to)?);
        }
        Ok(barriers)
    }

    /// Fail unless the resource is currently in `expected`.
    pub fn require(&self, resource: ResourceId, expected: ResourceState) -> Result<(), StateError> {
        let actual = self.state(resource).ok_or(StateError::Untracked(resource))?;
        if actual != expected {
            return Err(StateError::Mismatch {
                resource,
                expected,
                actual,
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transition_emits_barrier_once() {
        let mut tracker = StateTracker::new();
        let id = ResourceId(7);
        tracker.register(id, ResourceState::Uninitialized);

        let barrier = tracker.transition(id, ResourceState::WriteTarget).unwrap();
        assert_eq!(
            barrier,
            Some(Barrier::new(id, ResourceState::Uninitialized, ResourceState::WriteTarget))
        );
        assert_eq!(tracker.transition(id, ResourceState::WriteTarget).unwrap(), None);
        assert_eq!(tracker.state(id), Some(ResourceState::WriteTarget));
    }

    #[test]
    fn test_require_catches_missing_transition() {
        let mut tracker = StateTracker::new();
        let id = ResourceId(1);
        tracker.register(id, ResourceState::WriteTarget);

        assert_eq!(
            tracker.require(id, ResourceState::ShaderReadable),
            Err(StateError::Mismatch {
                resource: id,
                expected: ResourceState::ShaderReadable,
                actual: ResourceState::WriteTarget,
            })
        );
        tracker.transition(id, ResourceState::ShaderReadable).unwrap();
        assert!(tracker.require(id, ResourceState::ShaderReadable).is_ok());
    }

    #[test]
    fn test_cannot_return_to_uninitialized() {
        let mut tracker = StateTracker::new();
        let id = ResourceId(3);
        tracker.register(id, ResourceState::ShaderReadable);
        assert!(matches!(
            tracker.transition(id, ResourceState::Uninitialized),
            Err(StateError::InvalidTransition { .. })
        ));
        assert_eq!(
            tracker.transition(ResourceId(99), ResourceState::WriteTarget),
            Err(StateError::Untracked(ResourceId(99)))
        );
    }

    #[test]
    fn test_transition_all_skips_resources_in_place() {
        let mut tracker = StateTracker::new();
        tracker.register(ResourceId(1), ResourceState::WriteTarget);
        tracker.register(ResourceId(2), ResourceState::ShaderReadable);
        let barriers = tracker
            .transition_all([ResourceId(1), ResourceId(2)], ResourceState::ShaderReadable)
            .unwrap();
        assert_eq!(barriers.len(), 1);
        assert_eq!(barriers[0].resource, ResourceId(1));
    }
}
