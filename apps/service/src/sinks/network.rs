//! Reports each cycle's snapshot to another instance.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tracing::{debug, warn};

use super::{ResultSink, SinkContext};
use crate::config::OptionReader;
use crate::error::{ConfigError, DeliveryError};
use crate::monitoring::MonitorSnapshot;
use crate::remote::protocol::{RemoteReport, encode_frame};
use crate::remote::{RemoteEntry, RemoteSnapshot};

/// Frames allowed to wait for the sender task
const OUTBOX_CAPACITY: usize = 4;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Batch sink that hands one frame per cycle to a background task, so the
/// polling loop never waits on the network
pub struct NetworkSink {
    target: String,
    key: Arc<[u8]>,
    sender: String,
    epoch: u64,
    /// Shared with the sink that replaces this one on reload
    sequence: Arc<AtomicU64>,
    outbox: Option<mpsc::Sender<Vec<u8>>>,
}

impl NetworkSink {
    pub fn new(
        target: impl Into<String>,
        key: &str,
        sender: impl Into<String>,
        epoch: u64,
        sequence: Arc<AtomicU64>,
    ) -> Self {
        Self {
            target: target.into(),
            key: Arc::from(key.as_bytes()),
            sender: sender.into(),
            epoch,
            sequence,
            outbox: None,
        }
    }

    pub fn from_options(options: &mut OptionReader<'_>, context: &SinkContext) -> Result<Self, ConfigError> {
        let host = options.required_string("host");
        let port: u16 = options.required("port");
        let key = options.required_string("key");
        if port == 0 {
            options.error("port", "Port 0 is not valid");
        }
        options.finish()?;
        Ok(Self::new(
            format!("{host}:{port}"),
            &key,
            context.hostname.clone(),
            context.epoch,
            context.sequence.clone(),
        ))
    }

    /// Report built from one cycle's entries, numbered `sequence`
    pub fn report(&self, entries: &[MonitorSnapshot], sequence: u64) -> Result<RemoteReport, DeliveryError> {
        let mut monitors = RemoteSnapshot::new();
        for entry in entries {
            let attributes = serde_json::to_value(entry)?;
            monitors.insert(entry.name.clone(), RemoteEntry { type_tag: entry.type_tag.clone(), attributes });
        }
        Ok(RemoteReport {
            sender: self.sender.clone(),
            epoch: self.epoch,
            sequence,
            monitors,
        })
    }

    /// Sender task, started on first use from inside the runtime
    fn outbox(&mut self) -> Result<&mpsc::Sender<Vec<u8>>, DeliveryError> {
        if self.outbox.as_ref().is_none_or(|outbox| outbox.is_closed()) {
            let runtime = tokio::runtime::Handle::try_current().map_err(|_| DeliveryError::QueueUnavailable)?;
            let (tx, rx) = mpsc::channel(OUTBOX_CAPACITY);
            runtime.spawn(deliver_frames(self.target.clone(), rx));
            self.outbox = Some(tx);
        }
        self.outbox.as_ref().ok_or(DeliveryError::QueueUnavailable)
    }
}

async fn deliver_frames(target: String, mut frames: mpsc::Receiver<Vec<u8>>) {
    use tokio::io::AsyncWriteExt;

    while let Some(frame) = frames.recv().await {
        let mut stream = match timeout(CONNECT_TIMEOUT, TcpStream::connect(&target)).await {
            Ok(Ok(stream)) => stream,
            Ok(Err(e)) => {
                warn!(target: "hostwatch::sink", "Failed to connect to {target}: {e}");
                continue;
            }
            Err(_) => {
                warn!(target: "hostwatch::sink", "Timed out connecting to {target}");
                continue;
            }
        };

        match stream.write_all(&frame).await {
            Ok(()) => {
                let _ = stream.shutdown().await;
                debug!(target: "hostwatch::sink", bytes = frame.len(), "Sent report to {target}");
            }
            Err(e) => warn!(target: "hostwatch::sink", "Failed to send report to {target}: {e}"),
        }
    }
}

impl ResultSink for NetworkSink {
    fn type_tag(&self) -> &'static str {
        "network"
    }

    fn describe(&self) -> String {
        format!("Sending monitor results to {}", self.target)
    }

    fn supports_batch(&self) -> bool {
        true
    }

    fn process_batch(&mut self, entries: &[MonitorSnapshot]) -> Result<(), DeliveryError> {
        let sequence = self.sequence.fetch_add(1, Ordering::SeqCst) + 1;
        let report = self.report(entries, sequence)?;
        let frame = encode_frame(&report, &self.key)?;

        self.outbox()?.try_send(frame).map_err(|_| DeliveryError::QueueUnavailable)
    }
}
