//! Outcome of one tick of an operation.

use crate::error::ControlError;

#[derive(Debug, Clone, PartialEq)]
pub enum Transition {
    /// Nothing to report.
    Continue,
    /// Non-terminal progress for the owner.
    Progress(String),
    /// Hunting locked on: now Tracking. Answers the owner.
    Lock(String),
    /// Tracking lost lock and is hunting again. Log only.
    Unlock(String),
    /// Operation finished, subsystem Idle.
    Done(String),
    /// Operation failed, subsystem Stopped.
    Abort(ControlError),
}

impl Transition {
    /// Whether the transition answers the owning channel.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Lock(_) | Self::Done(_) | Self::Abort(_))
    }
}

/// How a subsystem took a command.
#[derive(Debug, Clone, PartialEq)]
pub enum Accepted {
    /// An operation started; the reply follows when it finishes.
    Operation,
    /// A paddle nudge was applied to the running operation.
    Nudge,
    /// Completed on the spot.
    Immediate(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_transitions() {
        assert!(Transition::Done("ok".into()).is_terminal());
        assert!(Transition::Lock("locked".into()).is_terminal());
        assert!(!Transition::Unlock("lost".into()).is_terminal());
        assert!(!Transition::Progress("x homed".into()).is_terminal());
        assert!(!Transition::Continue.is_terminal());
    }
}
