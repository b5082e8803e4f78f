use std::fmt;

use domain::ConfigurationError;

/// Lifecycle of one scope.
///
/// A dispatch walks `Idle → PipelineEntered → HandlerInvoked → Succeeded →
/// Flushing`, then alternates `Flushing ⇄ Cascading` until no new events are
/// produced. Any failure moves to `Failed`, from which the only way out is
/// `Closed`. Scopes opened by the host start in `Idle` and go straight to
/// `Flushing` on commit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DispatchState {
    Idle,
    PipelineEntered,
    HandlerInvoked,
    Succeeded,
    Failed,
    Flushing,
    Cascading,
    Closed,
}

impl DispatchState {
    /// Name used in logs and errors.
    pub fn as_str(&self) -> &'static str {
        match self {
            DispatchState::Idle => "idle",
            DispatchState::PipelineEntered => "pipeline_entered",
            DispatchState::HandlerInvoked => "handler_invoked",
            DispatchState::Succeeded => "succeeded",
            DispatchState::Failed => "failed",
            DispatchState::Flushing => "flushing",
            DispatchState::Cascading => "cascading",
            DispatchState::Closed => "closed",
        }
    }

    /// True when `next` may follow this state.
    pub fn can_transition_to(&self, next: DispatchState) -> bool {
        use DispatchState::*;

        matches!(
            (*self, next),
            (Idle, PipelineEntered)
                | (Idle, Flushing)
                | (Idle, Closed)
                | (PipelineEntered, HandlerInvoked)
                | (PipelineEntered, Failed)
                | (HandlerInvoked, Succeeded)
                | (HandlerInvoked, Failed)
                | (Succeeded, Flushing)
                | (Flushing, Cascading)
                | (Flushing, Closed)
                | (Flushing, Failed)
                | (Cascading, Flushing)
                | (Cascading, Failed)
                | (Failed, Closed)
        )
    }

    /// Moves to `next`, rejecting an illegal step.
    pub fn transition(self, next: DispatchState) -> Result<DispatchState, ConfigurationError> {
        if self.can_transition_to(next) {
            Ok(next)
        } else {
            Err(ConfigurationError::IllegalTransition {
                from: self.as_str(),
                to: next.as_str(),
            })
        }
    }
}

impl fmt::Display for DispatchState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::DispatchState::*;
    use super::*;

    #[test]
    fn test_happy_path_is_allowed() {
        let path = [
            PipelineEntered,
            HandlerInvoked,
            Succeeded,
            Flushing,
            Cascading,
            Flushing,
            Closed,
        ];
        let mut state = Idle;
        for next in path {
            state = state.transition(next).unwrap();
        }
        assert_eq!(state, Closed);
    }

    #[test]
    fn test_failed_never_returns_to_handler() {
        assert!(!Failed.can_transition_to(HandlerInvoked));
        assert!(!Failed.can_transition_to(Flushing));
        assert!(Failed.can_transition_to(Closed));
    }

    #[test]
    fn test_failure_before_handler_skips_flush() {
        let state = Idle.transition(PipelineEntered).unwrap();
        let state = state.transition(Failed).unwrap();

        let err = state.transition(Flushing).unwrap_err();
        assert_eq!(
            err,
            ConfigurationError::IllegalTransition {
                from: "failed",
                to: "flushing"
            }
        );
    }

    #[test]
    fn test_closed_is_terminal() {
        for next in [Idle, PipelineEntered, Flushing, Failed, Closed] {
            assert!(!Closed.can_transition_to(next));
        }
    }
}
