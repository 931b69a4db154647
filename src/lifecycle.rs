//! Resource lifecycle state machine.

use chrono::{DateTime, Utc};

/// Lifecycle state of a resource instance: declared, stored, computed,
/// initialized, disposed — a DI singleton's init runs at most once, so
/// unlike a pooled connection there is no in-use/idle/maintenance cycling
/// here, only a single forward walk with one failure exit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum LifecycleState {
    /// Declared but not yet initialized.
    #[default]
    Created,
    /// `init` is running.
    Initializing,
    /// `init` resolved; available for use.
    Ready,
    /// Running `dispose`.
    Cleanup,
    /// `dispose` completed.
    Terminated,
    /// `init` or a later operation failed unrecoverably.
    Failed,
}

impl LifecycleState {
    /// Whether a resource in this state can be handed to a caller.
    #[must_use]
    pub fn is_available(&self) -> bool {
        matches!(self, Self::Ready)
    }

    /// Whether this state is a final state — no further transitions expected.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Terminated | Self::Failed)
    }

    /// Whether this state is transient (expected to move on its own).
    #[must_use]
    pub fn is_transitional(&self) -> bool {
        matches!(self, Self::Initializing | Self::Cleanup)
    }

    /// Whether a resource in this state can be acquired right now.
    #[must_use]
    pub fn can_acquire(&self) -> bool {
        self.is_available()
    }

    /// Whether a transition from `self` to `target` is permitted.
    #[must_use]
    pub fn can_transition_to(&self, target: Self) -> bool {
        match (*self, target) {
            (Self::Created, Self::Initializing) => true,
            (Self::Initializing, Self::Ready | Self::Failed) => true,
            (Self::Ready, Self::Cleanup) => true,
            (Self::Cleanup, Self::Terminated | Self::Failed) => true,
            (Self::Terminated | Self::Failed, _) => false,
            (state, target) if state == target => true,
            _ => false,
        }
    }

    /// States directly reachable from this one.
    #[must_use]
    pub fn next_states(&self) -> &'static [Self] {
        match self {
            Self::Created => &[Self::Initializing],
            Self::Initializing => &[Self::Ready, Self::Failed],
            Self::Ready => &[Self::Cleanup],
            Self::Cleanup => &[Self::Terminated, Self::Failed],
            Self::Terminated | Self::Failed => &[],
        }
    }
}

impl std::fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Created => "created",
            Self::Initializing => "initializing",
            Self::Ready => "ready",
            Self::Cleanup => "cleanup",
            Self::Terminated => "terminated",
            Self::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// A single lifecycle state transition, with an optional metadata payload.
#[derive(Debug, Clone)]
pub struct LifecycleEvent {
    /// The resource that transitioned.
    pub resource_id: String,
    /// The state it transitioned from.
    pub from_state: LifecycleState,
    /// The state it transitioned to.
    pub to_state: LifecycleState,
    /// When the transition was recorded.
    pub timestamp: DateTime<Utc>,
    /// Optional structured metadata (e.g. failure reason).
    pub metadata: Option<serde_json::Value>,
}

impl LifecycleEvent {
    /// Create a new lifecycle event with the current timestamp.
    pub fn new(
        resource_id: impl Into<String>,
        from_state: LifecycleState,
        to_state: LifecycleState,
    ) -> Self {
        Self {
            resource_id: resource_id.into(),
            from_state,
            to_state,
            timestamp: Utc::now(),
            metadata: None,
        }
    }

    /// Attach structured metadata to this event.
    #[must_use]
    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = Some(metadata);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ready_is_available() {
        assert!(LifecycleState::Ready.is_available());
        assert!(!LifecycleState::Created.is_available());
    }

    #[test]
    fn terminated_and_failed_are_terminal() {
        assert!(LifecycleState::Terminated.is_terminal());
        assert!(LifecycleState::Failed.is_terminal());
        assert!(!LifecycleState::Ready.is_terminal());
    }

    #[test]
    fn created_can_only_move_to_initializing() {
        assert!(LifecycleState::Created.can_transition_to(LifecycleState::Initializing));
        assert!(!LifecycleState::Created.can_transition_to(LifecycleState::Ready));
    }

    #[test]
    fn terminal_states_accept_no_further_transitions() {
        assert!(!LifecycleState::Terminated.can_transition_to(LifecycleState::Ready));
        assert!(!LifecycleState::Failed.can_transition_to(LifecycleState::Initializing));
    }

    #[test]
    fn self_transition_always_allowed() {
        assert!(LifecycleState::Ready.can_transition_to(LifecycleState::Ready));
    }

    #[test]
    fn can_acquire_matches_is_available() {
        assert_eq!(
            LifecycleState::Ready.can_acquire(),
            LifecycleState::Ready.is_available()
        );
    }

    #[test]
    fn dispose_walk_is_ready_then_cleanup_then_terminated() {
        assert!(LifecycleState::Ready.can_transition_to(LifecycleState::Cleanup));
        assert!(LifecycleState::Cleanup.can_transition_to(LifecycleState::Terminated));
    }
}
