//! Alert channels and the events they receive.

pub mod decision;
pub mod log;
pub mod slack;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::error::DeliveryError;
use crate::monitoring::Monitor;
use decision::{AlertAction, Decision};

pub use decision::decide;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertKind {
    Failure,
    Success,
}

impl std::fmt::Display for AlertKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AlertKind::Failure => write!(f, "failure"),
            AlertKind::Success => write!(f, "success"),
        }
    }
}

/// Everything a channel needs to tell someone about a monitor
#[derive(Debug, Clone, Serialize)]
pub struct AlertEvent {
    pub kind: AlertKind,
    pub monitor: String,
    pub type_tag: String,
    pub group: String,
    pub failed_at: Option<DateTime<Utc>>,
    /// Seconds since `failed_at` when the event was built
    pub downtime_secs: Option<i64>,
    pub virtual_fail_count: u32,
    pub last_result: String,
    pub description: String,
    pub recovery_info: Option<String>,
    pub hostname: String,
}

impl AlertEvent {
    /// Build the event for a decision, or `None` when nothing should be sent
    pub fn from_decision(
        monitor: &Monitor,
        decision: &Decision,
        hostname: &str,
        now: DateTime<Utc>,
    ) -> Option<Self> {
        let kind = match decision.action {
            AlertAction::None => return None,
            AlertAction::Failure => AlertKind::Failure,
            AlertAction::Success => AlertKind::Success,
        };
        let state = monitor.state();

        Some(Self {
            kind,
            monitor: monitor.name().to_string(),
            type_tag: monitor.type_tag().to_string(),
            group: monitor.group().to_string(),
            failed_at: decision.failed_at,
            downtime_secs: decision.failed_at.map(|since| (now - since).num_seconds().max(0)),
            virtual_fail_count: state.consecutive_failures,
            last_result: state.last_result.clone(),
            description: monitor.describe(),
            recovery_info: decision.recovery_info.clone(),
            hostname: hostname.to_string(),
        })
    }

    pub fn downtime(&self) -> String {
        format_downtime(self.downtime_secs.unwrap_or_default())
    }
}

/// Something that can notify a human about failures and recoveries.
///
/// A failed `send` marks the channel unavailable for the rest of the cycle.
#[async_trait::async_trait]
pub trait AlertChannel: Send + Sync {
    fn type_tag(&self) -> &'static str;

    fn describe(&self) -> String;

    async fn send(&self, event: &AlertEvent) -> Result<(), DeliveryError>;
}

/// `[d days, ]h:mm:ss`
pub fn format_downtime(total_seconds: i64) -> String {
    let days = total_seconds / 86_400;
    let hours = (total_seconds % 86_400) / 3600;
    let minutes = (total_seconds % 3600) / 60;
    let seconds = total_seconds % 60;

    match days {
        0 => format!("{hours}:{minutes:02}:{seconds:02}"),
        1 => format!("1 day, {hours}:{minutes:02}:{seconds:02}"),
        _ => format!("{days} days, {hours}:{minutes:02}:{seconds:02}"),
    }
}

/// Render an optional time the way alerts show it
pub fn format_time(time: Option<DateTime<Utc>>) -> String {
    time.map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string()).unwrap_or_default()
}
