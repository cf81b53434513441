//! Result sinks: every evaluated monitor, every cycle.

pub mod batch;
pub mod file;
pub mod json;
pub mod network;

use std::sync::Arc;
use std::sync::atomic::AtomicU64;

use crate::error::DeliveryError;
use crate::monitoring::MonitorSnapshot;
use crate::remote::RemoteStateStore;

pub use batch::{BatchCoordinator, BatchScope};

/// Somewhere results are recorded.
///
/// Sinks are driven synchronously from the polling loop, one cycle at a
/// time, through a [`BatchCoordinator`]. A sink that batches gets the whole
/// cycle in one [`ResultSink::process_batch`] call; any other sink gets one
/// [`ResultSink::save_result`] call per monitor.
pub trait ResultSink: Send {
    fn type_tag(&self) -> &'static str;

    fn describe(&self) -> String;

    fn supports_batch(&self) -> bool {
        false
    }

    /// Record one result. Batch sinks are never called here.
    fn save_result(&mut self, _entry: &MonitorSnapshot) -> Result<(), DeliveryError> {
        Ok(())
    }

    /// Commit one cycle's results. Called exactly once per batch, even when
    /// nothing was delivered.
    fn process_batch(&mut self, _entries: &[MonitorSnapshot]) -> Result<(), DeliveryError> {
        Ok(())
    }
}

/// Shared state handed to sink factories
#[derive(Clone)]
pub struct SinkContext {
    pub hostname: String,
    /// Start of this process, used as the report epoch
    pub epoch: u64,
    /// Report counter within `epoch`, carried across reloads
    pub sequence: Arc<AtomicU64>,
    pub remote: Arc<RemoteStateStore>,
}
