//! Shared connection state snapshots.

use std::time::{Duration, SystemTime};

/// A read-only snapshot of backend reachability.
///
/// Mutated exclusively by the health monitor; consumers receive clones
/// through subscription callbacks and must treat them as immutable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionState {
    /// Whether the last completed probe reached the backend.
    pub connected: bool,
    /// True only while a probe is in flight.
    pub probing: bool,
    /// When the last probe completed, if any.
    pub last_check: Option<SystemTime>,
    /// Human-readable description of the last failure, cleared on success.
    pub error: Option<String>,
    /// Round-trip time of the last successful probe.
    pub response_time: Option<Duration>,
    /// Whether the user has been idle past the inactivity timeout.
    /// Informational only; polling and channels continue regardless.
    pub inactive: bool,
    /// Count of consecutive failed probes. Reset to zero on any success.
    pub consecutive_failures: u32,
}

impl ConnectionState {
    /// State at process start: nothing known yet, first probe pending.
    pub(crate) fn initial() -> Self {
        Self {
            connected: false,
            probing: true,
            last_check: None,
            error: None,
            response_time: None,
            inactive: false,
            consecutive_failures: 0,
        }
    }

    /// Neutral state while monitoring is suspended (unauthenticated).
    ///
    /// Deliberately reads as "connected": an unauthenticated client has
    /// no reason to probe, and must not be reported as down.
    pub(crate) fn suspended() -> Self {
        Self {
            connected: true,
            probing: false,
            last_check: None,
            error: None,
            response_time: None,
            inactive: false,
            consecutive_failures: 0,
        }
    }
}

impl Default for ConnectionState {
    fn default() -> Self {
        Self::initial()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn initial_state_is_unknown_and_probing() {
        let state = ConnectionState::initial();
        assert!(!state.connected);
        assert!(state.probing);
        assert_eq!(state.consecutive_failures, 0);
        assert!(state.error.is_none());
    }

    #[test]
    fn suspended_state_is_neutral_not_down() {
        let state = ConnectionState::suspended();
        assert!(state.connected);
        assert!(!state.probing);
        assert_eq!(state.consecutive_failures, 0);
    }
}
