//! Latest snapshot reported by each remote sender.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

/// One monitor as reported by another instance
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteEntry {
    pub type_tag: String,
    pub attributes: serde_json::Value,
}

/// Monitor name to entry, one sender's entire report
pub type RemoteSnapshot = BTreeMap<String, RemoteEntry>;

#[derive(Debug, Clone)]
struct SenderRecord {
    epoch: u64,
    sequence: u64,
    received: DateTime<Utc>,
    monitors: RemoteSnapshot,
}

/// Snapshots keyed by sender. Every update replaces the sender's whole
/// mapping; entries from different senders are never merged.
#[derive(Debug, Default)]
pub struct RemoteStateStore {
    senders: RwLock<BTreeMap<String, SenderRecord>>,
}

impl RemoteStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Swap in `snapshot` as everything `sender` currently reports
    pub fn replace(&self, sender: &str, snapshot: RemoteSnapshot) {
        let mut senders = self.senders.write();
        let (epoch, sequence) =
            senders.get(sender).map(|record| (record.epoch, record.sequence)).unwrap_or_default();
        senders.insert(
            sender.to_string(),
            SenderRecord { epoch, sequence, received: Utc::now(), monitors: snapshot },
        );
    }

    /// Like [`replace`](Self::replace), but ignores a snapshot that is not
    /// newer than the one held. Versions order by `(epoch, sequence)`, so a
    /// restarted sender with a later epoch starts over at any sequence.
    pub fn replace_versioned(
        &self,
        sender: &str,
        epoch: u64,
        sequence: u64,
        snapshot: RemoteSnapshot,
    ) -> bool {
        let mut senders = self.senders.write();
        if let Some(current) = senders.get(sender) {
            if (epoch, sequence) <= (current.epoch, current.sequence) {
                return false;
            }
        }
        senders.insert(
            sender.to_string(),
            SenderRecord { epoch, sequence, received: Utc::now(), monitors: snapshot },
        );
        true
    }

    /// Copy of every sender's snapshot
    pub fn view(&self) -> BTreeMap<String, RemoteSnapshot> {
        self.senders
            .read()
            .iter()
            .map(|(sender, record)| (sender.clone(), record.monitors.clone()))
            .collect()
    }

    pub fn last_update(&self, sender: &str) -> Option<DateTime<Utc>> {
        self.senders.read().get(sender).map(|record| record.received)
    }

    /// Drop a sender entirely. Returns whether it was known.
    pub fn forget(&self, sender: &str) -> bool {
        self.senders.write().remove(sender).is_some()
    }

    pub fn len(&self) -> usize {
        self.senders.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.senders.read().is_empty()
    }
}
