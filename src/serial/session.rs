//! Port session: one open scale connection plus its receive listener.
//!
//! A read installs a single-slot responder, writes the command and waits
//! on the responder for [`READ_TIMEOUT`]. The listener task drains the
//! port, decodes whole chunks and fulfils the responder, so the reader
//! either gets a complete weight or times out. A listener that stopped on
//! a receive error invalidates its connection; the next read reopens it.
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex as StdMutex, MutexGuard};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::{oneshot, watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout, Instant};

use super::protocol::{decode_frame, FrameError, ReadOutcome, Weight, RESPONSE_LEN};
use super::{PortConnector, Result, SerialError, SerialPortIO, READ_TIMEOUT, READ_WEIGHT_COMMAND};

/// Delay between two polls of the port for buffered bytes.
const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Gap that ends a burst: about two character times at 9600 8N1.
const BURST_GAP: Duration = Duration::from_millis(2);

type SharedLink = Arc<Mutex<Box<dyn SerialPortIO>>>;

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct SessionMetrics {
    pub reads: u64,
    pub connects: u64,
    pub frames_decoded: u64,
    pub frames_rejected: u64,
    pub read_timeouts: u64,
    pub write_failures: u64,
    pub last_latency_ms: Option<u64>,
    pub last_error: Option<String>,
}

struct PendingRead {
    responder: oneshot::Sender<Weight>,
    rejected: Option<FrameError>,
}

/// State shared with the listener task.
struct Shared {
    port_name: String,
    last_value: AtomicI64,
    pending: StdMutex<Option<PendingRead>>,
    metrics_tx: watch::Sender<SessionMetrics>,
}

impl Shared {
    fn pending(&self) -> MutexGuard<'_, Option<PendingRead>> {
        self.pending.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn handle_chunk(&self, chunk: &[u8]) {
        match decode_frame(chunk) {
            Ok(weight) => {
                self.last_value.store(weight.hundredths(), Ordering::SeqCst);
                self.metrics_tx.send_modify(|m| m.frames_decoded += 1);
                if let Some(pending) = self.pending().take() {
                    // The reader may have timed out already.
                    let _ = pending.responder.send(weight);
                }
            }
            Err(error) => {
                log::debug!(
                    "Dropped chunk from {} ({}): {}",
                    self.port_name,
                    error,
                    hex::encode(chunk)
                );
                self.metrics_tx.send_modify(|m| m.frames_rejected += 1);
                if let Some(pending) = self.pending().as_mut() {
                    pending.rejected = Some(error);
                }
            }
        }
    }
}

struct Connection {
    link: SharedLink,
    /// Yields the receive error that stopped the listener.
    listener: JoinHandle<String>,
}

impl Connection {
    fn is_alive(&self) -> bool {
        !self.listener.is_finished()
    }

    /// Stop the listener and release the port handle. Returns the receive
    /// error if the listener had already stopped on its own.
    async fn shutdown(self) -> Option<String> {
        self.listener.abort();
        let stopped = self.listener.await.ok();
        drop(self.link);
        stopped
    }
}

struct SessionState {
    connection: Option<Connection>,
    last_error: Option<String>,
    last_outcome: Option<ReadOutcome>,
}

/// A scale attached to one serial port.
pub struct ScaleSession {
    connector: Arc<dyn PortConnector>,
    shared: Arc<Shared>,
    state: Mutex<SessionState>,
    metrics_rx: watch::Receiver<SessionMetrics>,
}

impl ScaleSession {
    /// Open `port_name` and start listening for replies.
    ///
    /// Fails with [`SerialError::ConnectionFailed`] when the port is missing,
    /// busy or invalid. Must be called from within a tokio runtime.
    pub fn open(port_name: &str, connector: Arc<dyn PortConnector>) -> Result<Self> {
        let (metrics_tx, metrics_rx) = watch::channel(SessionMetrics::default());
        let shared = Arc::new(Shared {
            port_name: port_name.to_string(),
            last_value: AtomicI64::new(0),
            pending: StdMutex::new(None),
            metrics_tx,
        });

        let connection = connect(&shared, connector.as_ref())?;

        Ok(Self {
            connector,
            shared,
            state: Mutex::new(SessionState {
                connection: Some(connection),
                last_error: None,
                last_outcome: None,
            }),
            metrics_rx,
        })
    }

    pub fn port_name(&self) -> &str {
        &self.shared.port_name
    }

    /// Ask the scale for its weight.
    ///
    /// Returns the weight (zero when nothing valid arrived within the read
    /// window), [`Weight::NO_CONNECTION`] when the port cannot be reopened,
    /// or [`Weight::WRITE_FAILED`] when the command could not be sent. A
    /// failed write drops the connection so the next call reopens it.
    pub async fn read_value(&self) -> Weight {
        let mut state = self.state.lock().await;
        state.last_error = None;
        self.shared.metrics_tx.send_modify(|m| m.reads += 1);

        if state.connection.as_ref().is_some_and(|c| !c.is_alive()) {
            if let Some(error) = self.drop_connection(&mut state).await {
                log::warn!("Receive loop on {} had stopped ({}), reopening", self.port_name(), error);
                state.last_error = Some(error);
            }
        }

        let existing = state.connection.as_ref().map(|c| c.link.clone());
        let link = match existing {
            Some(link) => link,
            None => match connect(&self.shared, self.connector.as_ref()) {
                Ok(connection) => {
                    let link = connection.link.clone();
                    state.connection = Some(connection);
                    link
                }
                Err(e) => {
                    log::warn!("Cannot open scale port {}: {}", self.port_name(), e);
                    return self.fail(&mut state, e, ReadOutcome::NoConnection, Weight::NO_CONNECTION);
                }
            },
        };

        self.shared.last_value.store(0, Ordering::SeqCst);
        let (tx, rx) = oneshot::channel();
        *self.shared.pending() = Some(PendingRead {
            responder: tx,
            rejected: None,
        });

        let started = Instant::now();
        let write_result = link.lock().await.send_data(&READ_WEIGHT_COMMAND).await;
        if let Err(e) = write_result {
            log::warn!("Failed to send read command to {}: {}", self.port_name(), e);
            self.shared.pending().take();
            self.drop_connection(&mut state).await;
            self.shared.metrics_tx.send_modify(|m| m.write_failures += 1);
            return self.fail(&mut state, e, ReadOutcome::WriteFailed, Weight::WRITE_FAILED);
        }

        let (weight, outcome) = match timeout(READ_TIMEOUT, rx).await {
            Ok(Ok(weight)) => {
                let latency_ms = started.elapsed().as_millis() as u64;
                self.shared
                    .metrics_tx
                    .send_modify(|m| m.last_latency_ms = Some(latency_ms));
                (weight, ReadOutcome::Weighed { weight })
            }
            _ => {
                let rejected = self.shared.pending().take().and_then(|p| p.rejected);
                self.shared.metrics_tx.send_modify(|m| m.read_timeouts += 1);
                match rejected {
                    Some(error) => {
                        log::debug!("No valid reply from {} ({})", self.port_name(), error);
                        (Weight::ZERO, ReadOutcome::Garbled { error })
                    }
                    None => {
                        log::debug!("No reply from {} within {:?}", self.port_name(), READ_TIMEOUT);
                        (Weight::ZERO, ReadOutcome::NoResponse)
                    }
                }
            }
        };

        state.last_outcome = Some(outcome);
        weight
    }

    /// Release the port. Does nothing when no connection is open.
    pub async fn close(&self) {
        let mut state = self.state.lock().await;
        if state.connection.is_some() {
            self.drop_connection(&mut state).await;
            log::info!("Scale session on {} closed", self.port_name());
        }
    }

    /// Whether a port is open and its listener is still receiving.
    pub async fn is_connected(&self) -> bool {
        self.state
            .lock()
            .await
            .connection
            .as_ref()
            .is_some_and(Connection::is_alive)
    }

    /// Message of the error raised by the most recent read, if any.
    pub async fn last_error(&self) -> Option<String> {
        self.state.lock().await.last_error.clone()
    }

    pub async fn last_outcome(&self) -> Option<ReadOutcome> {
        self.state.lock().await.last_outcome.clone()
    }

    /// Most recently decoded weight.
    pub fn last_value(&self) -> Weight {
        Weight::from_hundredths(self.shared.last_value.load(Ordering::SeqCst))
    }

    pub fn metrics(&self) -> SessionMetrics {
        self.metrics_rx.borrow().clone()
    }

    pub fn metrics_receiver(&self) -> watch::Receiver<SessionMetrics> {
        self.metrics_rx.clone()
    }

    async fn drop_connection(&self, state: &mut SessionState) -> Option<String> {
        match state.connection.take() {
            Some(connection) => connection.shutdown().await,
            None => None,
        }
    }

    fn fail(
        &self,
        state: &mut SessionState,
        error: SerialError,
        outcome: ReadOutcome,
        sentinel: Weight,
    ) -> Weight {
        let message = error.to_string();
        state.last_error = Some(message.clone());
        state.last_outcome = Some(outcome);
        self.shared
            .metrics_tx
            .send_modify(|m| m.last_error = Some(message));
        sentinel
    }
}

impl Drop for ScaleSession {
    fn drop(&mut self) {
        if let Some(connection) = self.state.get_mut().connection.take() {
            connection.listener.abort();
        }
    }
}

fn connect(shared: &Arc<Shared>, connector: &dyn PortConnector) -> Result<Connection> {
    let link: SharedLink = Arc::new(Mutex::new(connector.open(&shared.port_name)?));
    let listener = tokio::spawn(listen(link.clone(), shared.clone()));
    shared.metrics_tx.send_modify(|m| m.connects += 1);
    log::info!("Scale session connected on {}", shared.port_name);
    Ok(Connection { link, listener })
}

async fn listen(link: SharedLink, shared: Arc<Shared>) -> String {
    loop {
        match receive_burst(&link).await {
            Ok(chunk) if chunk.is_empty() => {}
            Ok(chunk) => shared.handle_chunk(&chunk),
            Err(e) => {
                log::warn!("Receive loop on {} stopped: {}", shared.port_name, e);
                let message = e.to_string();
                shared
                    .metrics_tx
                    .send_modify(|m| m.last_error = Some(message.clone()));
                return message;
            }
        }
        sleep(POLL_INTERVAL).await;
    }
}

/// Drain the port, then keep draining while a frame is still arriving.
async fn receive_burst(link: &SharedLink) -> Result<Vec<u8>> {
    let mut burst = link.lock().await.read_available().await?;
    while !burst.is_empty() && burst.len() < RESPONSE_LEN {
        sleep(BURST_GAP).await;
        let more = link.lock().await.read_available().await?;
        if more.is_empty() {
            break;
        }
        burst.extend_from_slice(&more);
    }
    Ok(burst)
}
