//! Bounded reconnection for the relay link.
//!
//! The controller reacts to relay disconnects and non-ignorable relay
//! errors. Retries back off linearly (attempt × base delay) until the
//! configured maximum, at which point the controller parks in `Failed`
//! and the caller surfaces exactly one user-visible error. `Failed` is
//! terminal — only a fresh session init leaves it.
//!
//! Peer channel drops are out of scope here: they are registry removals,
//! recovered only by a later discovery pass.

use std::time::Duration;

/// Retry schedule parameters.
#[derive(Debug, Clone)]
pub struct ReconnectPolicy {
    /// Disconnect events tolerated before giving up.
    pub max_attempts: u32,
    /// Delay unit; attempt N waits N × this.
    pub base_delay: Duration,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_secs(1),
        }
    }
}

/// Controller state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconnectState {
    /// Relay link up; counter at zero.
    Stable,
    /// Waiting out a backoff delay before attempt `attempt`.
    Retrying { attempt: u32 },
    /// Attempts exhausted. Terminal.
    Failed,
}

/// What to do about a disconnect event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Schedule attempt `attempt` after `delay`.
    Retry { attempt: u32, delay: Duration },
    /// The maximum was just reached: notify the user once, stop retrying.
    GiveUp,
    /// Already failed earlier; stay silent.
    AlreadyFailed,
}

/// Linear-backoff retry state machine.
#[derive(Debug)]
pub struct ReconnectController {
    policy: ReconnectPolicy,
    state: ReconnectState,
}

impl ReconnectController {
    pub fn new(policy: ReconnectPolicy) -> Self {
        Self {
            policy,
            state: ReconnectState::Stable,
        }
    }

    pub fn state(&self) -> ReconnectState {
        self.state
    }

    pub fn is_failed(&self) -> bool {
        self.state == ReconnectState::Failed
    }

    /// Successful relay registration: back to `Stable`, counter reset.
    /// A no-op once `Failed`.
    pub fn on_open(&mut self) {
        if self.state != ReconnectState::Failed {
            self.state = ReconnectState::Stable;
        }
    }

    /// Relay disconnect or non-ignorable relay error.
    pub fn on_disconnect(&mut self) -> RetryDecision {
        let attempt = match self.state {
            ReconnectState::Failed => return RetryDecision::AlreadyFailed,
            ReconnectState::Stable => 1,
            ReconnectState::Retrying { attempt } => attempt + 1,
        };

        if attempt >= self.policy.max_attempts {
            self.state = ReconnectState::Failed;
            return RetryDecision::GiveUp;
        }

        self.state = ReconnectState::Retrying { attempt };
        RetryDecision::Retry {
            attempt,
            delay: self.policy.base_delay * attempt,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn controller(max_attempts: u32) -> ReconnectController {
        ReconnectController::new(ReconnectPolicy {
            max_attempts,
            base_delay: Duration::from_millis(100),
        })
    }

    #[test]
    fn test_starts_stable() {
        let ctrl = controller(3);
        assert_eq!(ctrl.state(), ReconnectState::Stable);
        assert!(!ctrl.is_failed());
    }

    #[test]
    fn test_linear_backoff() {
        let mut ctrl = controller(5);

        match ctrl.on_disconnect() {
            RetryDecision::Retry { attempt, delay } => {
                assert_eq!(attempt, 1);
                assert_eq!(delay, Duration::from_millis(100));
            }
            other => panic!("expected retry, got {other:?}"),
        }
        match ctrl.on_disconnect() {
            RetryDecision::Retry { attempt, delay } => {
                assert_eq!(attempt, 2);
                assert_eq!(delay, Duration::from_millis(200));
            }
            other => panic!("expected retry, got {other:?}"),
        }
    }

    #[test]
    fn test_open_resets_counter() {
        let mut ctrl = controller(3);
        ctrl.on_disconnect();
        ctrl.on_disconnect();
        ctrl.on_open();
        assert_eq!(ctrl.state(), ReconnectState::Stable);

        // Counter restarted from scratch.
        match ctrl.on_disconnect() {
            RetryDecision::Retry { attempt, .. } => assert_eq!(attempt, 1),
            other => panic!("expected retry, got {other:?}"),
        }
    }

    #[test]
    fn test_exhaustion_notifies_exactly_once() {
        // Three consecutive disconnects with max_attempts = 3: two retries,
        // then GiveUp; a fourth event is silent.
        let mut ctrl = controller(3);

        assert!(matches!(
            ctrl.on_disconnect(),
            RetryDecision::Retry { attempt: 1, .. }
        ));
        assert!(matches!(
            ctrl.on_disconnect(),
            RetryDecision::Retry { attempt: 2, .. }
        ));
        assert_eq!(ctrl.on_disconnect(), RetryDecision::GiveUp);
        assert!(ctrl.is_failed());

        assert_eq!(ctrl.on_disconnect(), RetryDecision::AlreadyFailed);
    }

    #[test]
    fn test_failed_is_terminal() {
        let mut ctrl = controller(1);
        assert_eq!(ctrl.on_disconnect(), RetryDecision::GiveUp);

        // Neither an open nor further disconnects leave Failed.
        ctrl.on_open();
        assert!(ctrl.is_failed());
        assert_eq!(ctrl.on_disconnect(), RetryDecision::AlreadyFailed);
    }
}
