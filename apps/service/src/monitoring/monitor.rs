//! A configured monitor: its check, its settings and its failure-run state.

use std::collections::BTreeSet;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::time::timeout;

use super::checker::Check;
use super::types::{CheckOutcome, CheckStatus};
use crate::alerting::decision::{Decision, decide};
use crate::config::DEFAULT_GROUP;

/// Per-monitor run state. Survives configuration reloads as long as the
/// monitor keeps its name and type.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MonitorState {
    /// Zero exactly when `first_failure_time` is `None`
    pub consecutive_failures: u32,
    pub first_failure_time: Option<DateTime<Utc>>,
    pub last_result: String,
    pub recovery_info: Option<String>,
    pub last_status: Option<CheckStatus>,
    pub last_run: Option<DateTime<Utc>>,
    pub last_duration: Option<Duration>,
}

impl MonitorState {
    pub fn is_failing(&self) -> bool {
        self.consecutive_failures > 0
    }

    /// How long the current failure run has lasted
    pub fn downtime(&self, now: DateTime<Utc>) -> Option<chrono::Duration> {
        self.first_failure_time.map(|since| now - since)
    }
}

/// Settings shared by every monitor type
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MonitorSettings {
    pub tolerance: u32,
    pub dependencies: BTreeSet<String>,
    pub group: String,
    /// Minimum time between two runs; zero means every cycle
    pub gap: Duration,
    pub timeout: Duration,
}

impl Default for MonitorSettings {
    fn default() -> Self {
        Self {
            tolerance: 0,
            dependencies: BTreeSet::new(),
            group: DEFAULT_GROUP.to_string(),
            gap: Duration::ZERO,
            timeout: Duration::from_secs(30),
        }
    }
}

/// What happened to a monitor in the most recent cycle
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CycleStatus {
    /// No cycle has looked at it yet
    #[default]
    Pending,
    Ran,
    /// A dependency was down
    Skipped,
    /// Inside its gap, showing the previous result
    Deferred,
}

/// Public view of a monitor, serialised for sinks and remote reports
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitorSnapshot {
    pub name: String,
    pub type_tag: String,
    pub group: String,
    pub description: String,
    pub tolerance: u32,
    pub cycle_status: CycleStatus,
    #[serde(flatten)]
    pub state: MonitorState,
}

pub struct Monitor {
    name: String,
    settings: MonitorSettings,
    check: Box<dyn Check>,
    state: MonitorState,
    cycle_status: CycleStatus,
    /// Start of the cycle that last ran the check
    last_started: Option<Instant>,
}

impl std::fmt::Debug for Monitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Monitor")
            .field("name", &self.name)
            .field("type", &self.check.type_tag())
            .field("settings", &self.settings)
            .field("state", &self.state)
            .finish()
    }
}

impl Monitor {
    pub fn new(name: impl Into<String>, settings: MonitorSettings, check: Box<dyn Check>) -> Self {
        Self {
            name: name.into(),
            settings,
            check,
            state: MonitorState::default(),
            cycle_status: CycleStatus::Pending,
            last_started: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn type_tag(&self) -> &'static str {
        self.check.type_tag()
    }

    pub fn group(&self) -> &str {
        &self.settings.group
    }

    pub fn settings(&self) -> &MonitorSettings {
        &self.settings
    }

    pub fn state(&self) -> &MonitorState {
        &self.state
    }

    pub fn describe(&self) -> String {
        self.check.describe()
    }

    pub fn cycle_status(&self) -> CycleStatus {
        self.cycle_status
    }

    /// Record that this cycle passed the monitor by
    pub fn pass_over(&mut self, status: CycleStatus) {
        self.cycle_status = status;
    }

    /// Same name and same check type: run state may carry over a reload
    pub fn same_identity(&self, other: &Monitor) -> bool {
        self.name == other.name && self.type_tag() == other.type_tag()
    }

    /// Take over the run state of the monitor this one replaces
    pub fn inherit_state(&mut self, previous: Monitor) {
        self.state = previous.state;
        self.last_started = previous.last_started;
    }

    /// Whether enough time has passed since the last run
    pub fn is_due(&self, now: Instant) -> bool {
        match self.last_started {
            None => true,
            Some(started) => now.saturating_duration_since(started) >= self.settings.gap,
        }
    }

    /// Run the check once. Errors and timeouts become failing outcomes.
    ///
    /// `cycle_start` is remembered for [`is_due`](Self::is_due), so a gap
    /// equal to the polling interval runs on every cycle.
    pub async fn run(&mut self, cycle_start: Instant) -> CheckOutcome {
        let started = Instant::now();
        self.last_started = Some(cycle_start);
        self.cycle_status = CycleStatus::Ran;

        let outcome = match timeout(self.settings.timeout, self.check.check()).await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(e)) => CheckOutcome::failure(e.to_string()),
            Err(_) => CheckOutcome::failure(format!(
                "check timed out after {}s",
                self.settings.timeout.as_secs_f64()
            )),
        };

        outcome.timed(Utc::now(), started.elapsed())
    }

    /// Fold an outcome into the run state and decide whether to alert
    pub fn record(&mut self, outcome: &CheckOutcome) -> Decision {
        let decision = decide(&mut self.state, outcome, self.settings.tolerance);

        self.state.last_result = outcome.message.clone();
        self.state.last_status = Some(outcome.status);
        self.state.last_run = Some(outcome.timestamp);
        self.state.last_duration = Some(outcome.duration);

        decision
    }

    pub fn snapshot(&self) -> MonitorSnapshot {
        MonitorSnapshot {
            name: self.name.clone(),
            type_tag: self.type_tag().to_string(),
            group: self.settings.group.clone(),
            description: self.describe(),
            tolerance: self.settings.tolerance,
            cycle_status: self.cycle_status,
            state: self.state.clone(),
        }
    }
}
