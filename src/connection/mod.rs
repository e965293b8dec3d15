// Telemetry channel lifecycle: connect, receive, reconnect with backoff, close.
// Knows nothing about snapshot contents; messages are forwarded verbatim and in order.

mod state;
pub mod ws;

pub use state::{
    BackoffPolicy, ConnectionEvent, ConnectionState, DEFAULT_BACKOFF_BASE, DEFAULT_BACKOFF_CAP,
    DEFAULT_CONNECT_TIMEOUT, DEFAULT_IDLE_TIMEOUT, InvalidTransition, LivenessPolicy,
};

use std::future::Future;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{Duration, timeout};

/// Upper bound on the best-effort close handshake after a local close.
const CLOSE_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("websocket: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),
    #[error("invalid channel url: {0}")]
    Url(#[from] url::ParseError),
    #[error("{operation} timed out after {after:?}")]
    TimedOut {
        operation: &'static str,
        after: Duration,
    },
    #[error("{0}")]
    Other(String),
}

/// Opens telemetry channels. One call per connect attempt.
pub trait Transport: Send + Sync + 'static {
    type Channel: Channel;

    fn open(&self) -> impl Future<Output = Result<Self::Channel, TransportError>> + Send;
}

/// One open telemetry channel.
pub trait Channel: Send + 'static {
    /// Next text message; `None` once the remote side has closed the channel.
    fn recv(&mut self) -> impl Future<Output = Option<Result<String, TransportError>>> + Send;

    /// Best-effort close handshake on local teardown.
    fn close(&mut self) -> impl Future<Output = ()> + Send;
}

/// Output of the connection manager, delivered in order on one mpsc channel.
#[derive(Debug, Clone, PartialEq)]
pub enum ChannelEvent {
    Message(String),
    Status(ConnectionState),
}

/// Owner's side of a running connection manager. Dropping it closes the connection too.
pub struct ConnectionHandle {
    close_tx: Option<oneshot::Sender<()>>,
    task: JoinHandle<()>,
}

impl ConnectionHandle {
    /// Terminal: cancels any connect, receive or backoff wait; no further reconnects.
    pub fn close(&mut self) {
        if let Some(tx) = self.close_tx.take() {
            let _ = tx.send(());
        }
    }

    /// Closes and waits for the driver task to finish. The event receiver must be
    /// drained or dropped meanwhile, or the driver may block on a full channel.
    pub async fn shutdown(mut self) {
        self.close();
        let _ = (&mut self.task).await;
    }
}

pub struct ConnectionManager;

impl ConnectionManager {
    /// Starts the driver task and immediately begins connecting.
    pub fn spawn<T: Transport>(
        transport: T,
        policy: BackoffPolicy,
        liveness: LivenessPolicy,
        capacity: usize,
    ) -> (ConnectionHandle, mpsc::Receiver<ChannelEvent>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let (close_tx, close_rx) = oneshot::channel();
        let task = tokio::spawn(run(transport, policy, liveness, tx, close_rx));
        (
            ConnectionHandle {
                close_tx: Some(close_tx),
                task,
            },
            rx,
        )
    }
}

/// State plus retry counter; every transition is announced as a status event.
struct Machine {
    state: ConnectionState,
    attempt: u32,
    tx: mpsc::Sender<ChannelEvent>,
}

impl Machine {
    /// Applies `event`. Returns false when the consumer is gone and the driver should stop.
    async fn apply(&mut self, event: ConnectionEvent) -> bool {
        let next = match self.state.on(event) {
            Ok(next) => next,
            Err(e) => {
                tracing::error!(error = %e, "connection state machine rejected transition");
                return true;
            }
        };
        if next.is_open() {
            self.attempt = 0;
        }
        self.state = next;
        tracing::debug!(state = %next, "connection state");
        self.tx.send(ChannelEvent::Status(next)).await.is_ok()
    }
}

async fn run<T: Transport>(
    transport: T,
    policy: BackoffPolicy,
    liveness: LivenessPolicy,
    tx: mpsc::Sender<ChannelEvent>,
    mut close_rx: oneshot::Receiver<()>,
) {
    let mut machine = Machine {
        state: ConnectionState::Disconnected,
        attempt: 0,
        tx: tx.clone(),
    };
    if !machine.apply(ConnectionEvent::Connect).await {
        return;
    }

    'session: loop {
        let opened = tokio::select! {
            _ = &mut close_rx => break 'session,
            result = timeout(liveness.connect_timeout, transport.open()) => {
                result.unwrap_or(Err(TransportError::TimedOut {
                    operation: "connect",
                    after: liveness.connect_timeout,
                }))
            }
        };

        let failure = match opened {
            Ok(mut channel) => {
                if !machine.apply(ConnectionEvent::Opened).await {
                    return;
                }
                tracing::info!("Telemetry channel open");
                loop {
                    tokio::select! {
                        _ = &mut close_rx => {
                            let _ = timeout(CLOSE_TIMEOUT, channel.close()).await;
                            break 'session;
                        }
                        msg = timeout(liveness.idle_timeout, channel.recv()) => match msg {
                            Err(_) => {
                                tracing::warn!(
                                    idle_ms = liveness.idle_timeout.as_millis() as u64,
                                    operation = "recv",
                                    "telemetry channel silent, dropping it"
                                );
                                break ConnectionEvent::Failed;
                            }
                            Ok(Some(Ok(text))) => {
                                if tx.send(ChannelEvent::Message(text)).await.is_err() {
                                    return;
                                }
                            }
                            Ok(Some(Err(e))) => {
                                tracing::warn!(error = %e, operation = "recv", "telemetry channel failed");
                                break ConnectionEvent::Failed;
                            }
                            Ok(None) => {
                                tracing::info!("Telemetry channel closed by backend");
                                break ConnectionEvent::RemoteClosed;
                            }
                        }
                    }
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, operation = "connect", "telemetry connect failed");
                ConnectionEvent::Failed
            }
        };

        if !machine.apply(failure).await {
            return;
        }
        machine.attempt += 1;
        let attempt = machine.attempt;
        let delay = policy.delay_for(attempt);
        if !machine
            .apply(ConnectionEvent::RetryScheduled { attempt, delay })
            .await
        {
            return;
        }
        tracing::info!(
            attempt,
            delay_ms = delay.as_millis() as u64,
            "Reconnecting telemetry channel after backoff"
        );
        tokio::select! {
            _ = &mut close_rx => break 'session,
            _ = tokio::time::sleep(delay) => {}
        }
        if !machine.apply(ConnectionEvent::TimerElapsed).await {
            return;
        }
    }

    let _ = machine.apply(ConnectionEvent::LocalClose).await;
    tracing::debug!("Connection manager stopped");
}
