//! Alert decisions: when a failure run crosses its tolerance, and when it ends.

use chrono::{DateTime, Utc};

use crate::monitoring::{CheckOutcome, CheckStatus, MonitorState};

/// What the alert channels should do after a run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlertAction {
    None,
    Failure,
    Success,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Decision {
    pub action: AlertAction,
    /// Start of the failure run this decision belongs to
    pub failed_at: Option<DateTime<Utc>>,
    /// Recovery hint for the event; taken out of the state on `Success`
    pub recovery_info: Option<String>,
}

impl Decision {
    fn none() -> Self {
        Self { action: AlertAction::None, failed_at: None, recovery_info: None }
    }

    pub fn should_alert(&self) -> bool {
        self.action != AlertAction::None
    }
}

/// Fold one run into `state` and decide whether to alert.
///
/// A failure alerts only on the run where the failure count first exceeds
/// `tolerance`. A success clears the state, and alerts only if that failure
/// alert was sent.
pub fn decide(state: &mut MonitorState, outcome: &CheckOutcome, tolerance: u32) -> Decision {
    if let Some(info) = &outcome.recovery_info {
        state.recovery_info = Some(info.clone());
    }

    let previous = state.consecutive_failures;

    match outcome.status {
        CheckStatus::Failure => {
            state.consecutive_failures = previous.saturating_add(1);
            let failed_at = *state.first_failure_time.get_or_insert(outcome.timestamp);

            let crossed = previous <= tolerance && state.consecutive_failures > tolerance;
            Decision {
                action: if crossed { AlertAction::Failure } else { AlertAction::None },
                failed_at: Some(failed_at),
                recovery_info: state.recovery_info.clone(),
            }
        }
        CheckStatus::Success => {
            let failed_at = state.first_failure_time.take();
            let recovery_info = state.recovery_info.take();
            state.consecutive_failures = 0;

            if previous > tolerance {
                Decision { action: AlertAction::Success, failed_at, recovery_info }
            } else {
                Decision::none()
            }
        }
    }
}
