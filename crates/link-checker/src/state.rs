//! Link status state machine.

use database::LinkStatus;

use crate::probe::ProbeOutcome;

/// Status and failure counter a link should move to after a probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    pub status: LinkStatus,
    pub consecutive_failures: i64,
}

/// Apply one probe result to a link's current state.
///
/// Success always resets the counter and restores `active`. A failure bumps
/// the counter and breaks an active link once the counter reaches
/// `failure_threshold`, or at once for fatal failures. Removed links never
/// change.
pub fn next_state(
    current: LinkStatus,
    consecutive_failures: i64,
    outcome: &ProbeOutcome,
    failure_threshold: i64,
) -> Transition {
    if current == LinkStatus::Removed {
        return Transition {
            status: current,
            consecutive_failures,
        };
    }

    if outcome.is_healthy() {
        return Transition {
            status: LinkStatus::Active,
            consecutive_failures: 0,
        };
    }

    let failures = consecutive_failures + 1;
    let status = if outcome.is_fatal() || failures >= failure_threshold.max(1) {
        LinkStatus::Broken
    } else {
        current
    };

    Transition {
        status,
        consecutive_failures: failures,
    }
}
