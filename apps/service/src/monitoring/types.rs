use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Outcome of a single check run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CheckStatus {
    Success,
    Failure,
}

impl std::fmt::Display for CheckStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CheckStatus::Success => write!(f, "ok"),
            CheckStatus::Failure => write!(f, "failed"),
        }
    }
}

/// Result of running a monitor's check once
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckOutcome {
    pub status: CheckStatus,

    /// Free-form diagnostic text shown to alerters and sinks
    pub message: String,

    /// Hint attached by the check on how the problem was or can be fixed
    pub recovery_info: Option<String>,

    /// When the check finished
    pub timestamp: DateTime<Utc>,

    /// How long the check took
    pub duration: Duration,
}

impl CheckOutcome {
    fn new(status: CheckStatus, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
            recovery_info: None,
            timestamp: Utc::now(),
            duration: Duration::ZERO,
        }
    }

    /// The check passed
    pub fn success(message: impl Into<String>) -> Self {
        Self::new(CheckStatus::Success, message)
    }

    /// The check ran and found a problem
    pub fn failure(message: impl Into<String>) -> Self {
        Self::new(CheckStatus::Failure, message)
    }

    pub fn with_recovery_info(mut self, info: impl Into<String>) -> Self {
        self.recovery_info = Some(info.into());
        self
    }

    /// Stamp the outcome with the wall time it finished and how long it ran
    pub fn timed(mut self, timestamp: DateTime<Utc>, duration: Duration) -> Self {
        self.timestamp = timestamp;
        self.duration = duration;
        self
    }

    pub fn is_success(&self) -> bool {
        self.status == CheckStatus::Success
    }
}
