//! Per-cycle admission of alert channels and sinks.

use std::collections::BTreeSet;

use crate::config::{DEFAULT_GROUP, ParticipantEntry};

/// Dependency and group routing for one channel or sink. `connected` and
/// `available` only describe the current cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Gate {
    dependencies: BTreeSet<String>,
    groups: BTreeSet<String>,
    connected: bool,
    available: bool,
}

impl Default for Gate {
    fn default() -> Self {
        Self::new([], [DEFAULT_GROUP.to_string()])
    }
}

impl Gate {
    pub fn new(
        dependencies: impl IntoIterator<Item = String>,
        groups: impl IntoIterator<Item = String>,
    ) -> Self {
        Self {
            dependencies: dependencies.into_iter().collect(),
            groups: groups.into_iter().collect(),
            connected: true,
            available: true,
        }
    }

    pub fn from_entry(entry: &ParticipantEntry) -> Self {
        Self::new(entry.depend.iter().cloned(), entry.groups.iter().cloned())
    }

    /// Recompute connectivity from this cycle's failed monitors and make the
    /// participant available again
    pub fn reset_cycle(&mut self, failed: &BTreeSet<String>) -> bool {
        self.connected = self.dependencies.is_disjoint(failed);
        self.available = true;
        self.connected
    }

    /// Stop delivering for the rest of the cycle after a delivery error
    pub fn mark_unavailable(&mut self) {
        self.available = false;
    }

    pub fn is_connected(&self) -> bool {
        self.connected
    }

    pub fn is_available(&self) -> bool {
        self.available
    }

    /// Pure admission test: no failed dependency and the monitor's group is
    /// subscribed
    pub fn admits(&self, group: &str, failed: &BTreeSet<String>) -> bool {
        self.dependencies.is_disjoint(failed) && self.groups.contains(group)
    }

    /// Admission with the state computed by the last [`Gate::reset_cycle`]
    pub fn accepts(&self, group: &str) -> bool {
        self.connected && self.available && self.groups.contains(group)
    }

    pub fn groups(&self) -> &BTreeSet<String> {
        &self.groups
    }
}
