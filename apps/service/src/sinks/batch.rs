//! Begin/deliver/end bracketing of one polling cycle per sink.

use tracing::{error, warn};

use super::ResultSink;
use crate::error::{DeliveryError, ProtocolViolation};
use crate::monitoring::MonitorSnapshot;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchState {
    Idle,
    Batching,
}

/// Owns one sink and the buffer it accumulates during a batch. The buffer
/// belongs to this coordinator alone.
pub struct BatchCoordinator {
    name: String,
    sink: Box<dyn ResultSink>,
    state: BatchState,
    buffer: Vec<MonitorSnapshot>,
    violations: u64,
}

impl BatchCoordinator {
    pub fn new(name: impl Into<String>, sink: Box<dyn ResultSink>) -> Self {
        Self {
            name: name.into(),
            sink,
            state: BatchState::Idle,
            buffer: Vec::new(),
            violations: 0,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn sink(&self) -> &dyn ResultSink {
        self.sink.as_ref()
    }

    pub fn state(&self) -> BatchState {
        self.state
    }

    /// Protocol violations seen so far
    pub fn violations(&self) -> u64 {
        self.violations
    }

    fn violation(&mut self, violation: ProtocolViolation) {
        self.violations += 1;
        error!(target: "hostwatch::sink", "{violation}");
    }

    pub fn begin(&mut self) {
        if !self.sink.supports_batch() {
            return;
        }
        if self.state == BatchState::Batching {
            self.violation(ProtocolViolation::BeginWhileBatching(self.name.clone()));
        }
        self.buffer.clear();
        self.state = BatchState::Batching;
    }

    /// Buffer `entry` for a batching sink, or write it straight through
    pub fn deliver(&mut self, entry: &MonitorSnapshot) -> Result<(), DeliveryError> {
        if !self.sink.supports_batch() {
            return self.sink.save_result(entry);
        }
        match self.state {
            BatchState::Batching => self.buffer.push(entry.clone()),
            BatchState::Idle => {
                self.violation(ProtocolViolation::DeliverOutsideBatch(self.name.clone()))
            }
        }
        Ok(())
    }

    /// Hand the buffer to the sink's batch hook and go idle. Ending a batch
    /// that was never begun is logged and otherwise ignored.
    pub fn end(&mut self) -> Result<(), DeliveryError> {
        if !self.sink.supports_batch() {
            return Ok(());
        }
        if self.state == BatchState::Idle {
            self.violation(ProtocolViolation::EndWithoutBegin(self.name.clone()));
            return Ok(());
        }

        self.state = BatchState::Idle;
        let entries = std::mem::take(&mut self.buffer);
        self.sink.process_batch(&entries)
    }

    /// Begin a batch that ends when the returned scope is finished or dropped
    pub fn scope(&mut self) -> BatchScope<'_> {
        self.begin();
        BatchScope { coordinator: self, open: true }
    }
}

/// A running batch. Dropping it without [`BatchScope::finish`] still ends the
/// batch; a delivery error from the hook is then only logged.
pub struct BatchScope<'a> {
    coordinator: &'a mut BatchCoordinator,
    open: bool,
}

impl BatchScope<'_> {
    pub fn deliver(&mut self, entry: &MonitorSnapshot) -> Result<(), DeliveryError> {
        self.coordinator.deliver(entry)
    }

    pub fn finish(mut self) -> Result<(), DeliveryError> {
        self.open = false;
        self.coordinator.end()
    }
}

impl Drop for BatchScope<'_> {
    fn drop(&mut self) {
        if !self.open {
            return;
        }
        if let Err(e) = self.coordinator.end() {
            warn!(target: "hostwatch::sink", sink = %self.coordinator.name, "Failed to process batch: {e}");
        }
    }
}
