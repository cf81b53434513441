use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{OwnedSemaphorePermit, Semaphore, mpsc};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use super::protocol::{RemoteReport, read_frame};
use crate::config::RemoteListenerSettings;
use crate::error::LifecycleError;

/// Reports waiting for the polling loop
pub const QUEUE_CAPACITY: usize = 64;

/// Longest wait for the next frame on an open connection
pub const READ_TIMEOUT: Duration = Duration::from_secs(30);

/// Connections served at once; further ones are closed on accept
pub const MAX_CONNECTIONS: usize = 16;

/// Accepts remote reports and forwards them to the polling loop's queue
pub struct RemoteListener {
    listener: TcpListener,
    key: Arc<[u8]>,
    read_timeout: Duration,
    permits: Arc<Semaphore>,
}

impl RemoteListener {
    pub async fn bind(settings: &RemoteListenerSettings) -> Result<Self, LifecycleError> {
        let listener = TcpListener::bind(settings.listen).await.map_err(|source| {
            LifecycleError::Bind { addr: settings.listen.to_string(), source }
        })?;
        Ok(Self {
            listener,
            key: Arc::from(settings.key.as_bytes()),
            read_timeout: READ_TIMEOUT,
            permits: Arc::new(Semaphore::new(MAX_CONNECTIONS)),
        })
    }

    pub fn with_limits(mut self, read_timeout: Duration, max_connections: usize) -> Self {
        self.read_timeout = read_timeout;
        self.permits = Arc::new(Semaphore::new(max_connections));
        self
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Serve connections until the queue's receiver goes away
    pub fn spawn(self, queue: mpsc::Sender<RemoteReport>) -> JoinHandle<()> {
        tokio::spawn(async move {
            if let Ok(addr) = self.listener.local_addr() {
                info!(target: "hostwatch::remote", "Listening for remote reports on {addr}");
            }
            loop {
                let (stream, peer) = tokio::select! {
                    _ = queue.closed() => break,
                    accepted = self.listener.accept() => match accepted {
                        Ok(accepted) => accepted,
                        Err(e) => {
                            warn!(target: "hostwatch::remote", "Failed to accept connection: {e}");
                            continue;
                        }
                    },
                };
                let Ok(permit) = self.permits.clone().try_acquire_owned() else {
                    warn!(target: "hostwatch::remote", %peer, "Too many open connections, closing");
                    continue;
                };
                let connection = Connection {
                    peer,
                    key: self.key.clone(),
                    read_timeout: self.read_timeout,
                    _permit: permit,
                };
                tokio::spawn(connection.serve(stream, queue.clone()));
            }
            debug!(target: "hostwatch::remote", "Remote listener stopped");
        })
    }
}

/// One accepted peer. Dropping it frees its connection slot.
struct Connection {
    peer: SocketAddr,
    key: Arc<[u8]>,
    read_timeout: Duration,
    _permit: OwnedSemaphorePermit,
}

impl Connection {
    async fn serve(self, mut stream: TcpStream, queue: mpsc::Sender<RemoteReport>) {
        let peer = self.peer;
        loop {
            let mut report = match timeout(self.read_timeout, read_frame(&mut stream, &self.key)).await {
                Ok(Ok(Some(report))) => report,
                Ok(Ok(None)) => return,
                Ok(Err(e)) => {
                    warn!(target: "hostwatch::remote", %peer, "Rejected remote report: {e}");
                    return;
                }
                Err(_) => {
                    warn!(target: "hostwatch::remote", %peer, "No complete frame within {:?}, closing", self.read_timeout);
                    return;
                }
            };

            if report.sender.is_empty() {
                report.sender = peer.ip().to_string();
            }
            debug!(
                target: "hostwatch::remote",
                sender = %report.sender,
                monitors = report.monitors.len(),
                "Received remote report"
            );

            if queue.send(report).await.is_err() {
                return;
            }
        }
    }
}
