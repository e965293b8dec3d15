// Connection lifecycle as an explicit state machine, plus the reconnect backoff policy

use std::fmt;
use std::time::Duration;

pub const DEFAULT_BACKOFF_BASE: Duration = Duration::from_millis(800);
pub const DEFAULT_BACKOFF_CAP: Duration = Duration::from_millis(15_000);
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
/// Five missed snapshots at the backend's 2 s push interval.
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Not connected; initial, and terminal after a local close.
    Disconnected,
    Connecting,
    Open,
    /// Remote closed the channel.
    Closed,
    /// Connect attempt or open channel failed.
    Errored,
    /// Waiting `delay` before reconnect attempt number `attempt`.
    Backoff { attempt: u32, delay: Duration },
}

impl ConnectionState {
    /// Transition table. Local close is accepted from every state.
    pub fn on(self, event: ConnectionEvent) -> Result<ConnectionState, InvalidTransition> {
        use ConnectionEvent as E;
        use ConnectionState as S;
        match (self, event) {
            (_, E::LocalClose) => Ok(S::Disconnected),
            (S::Disconnected, E::Connect) => Ok(S::Connecting),
            (S::Connecting, E::Opened) => Ok(S::Open),
            (S::Connecting | S::Open, E::Failed) => Ok(S::Errored),
            (S::Open, E::RemoteClosed) => Ok(S::Closed),
            (S::Closed | S::Errored, E::RetryScheduled { attempt, delay }) => {
                Ok(S::Backoff { attempt, delay })
            }
            (S::Backoff { .. }, E::TimerElapsed) => Ok(S::Connecting),
            (from, event) => Err(InvalidTransition { from, event }),
        }
    }

    pub fn is_open(&self) -> bool {
        matches!(self, ConnectionState::Open)
    }

    pub fn label(&self) -> &'static str {
        match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Open => "open",
            ConnectionState::Closed => "closed",
            ConnectionState::Errored => "errored",
            ConnectionState::Backoff { .. } => "backoff",
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionState::Backoff { attempt, delay } => write!(
                f,
                "backoff (attempt {}, retry in {} ms)",
                attempt,
                delay.as_millis()
            ),
            other => f.write_str(other.label()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionEvent {
    Connect,
    Opened,
    RemoteClosed,
    Failed,
    RetryScheduled { attempt: u32, delay: Duration },
    TimerElapsed,
    LocalClose,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("invalid connection transition from {from:?} on {event:?}")]
pub struct InvalidTransition {
    pub from: ConnectionState,
    pub event: ConnectionEvent,
}

/// `delay(attempt) = min(cap, base * 2^(attempt-1))`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffPolicy {
    pub base: Duration,
    pub cap: Duration,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            base: DEFAULT_BACKOFF_BASE,
            cap: DEFAULT_BACKOFF_CAP,
        }
    }
}

impl BackoffPolicy {
    pub fn from_millis(base_ms: u64, cap_ms: u64) -> Self {
        Self {
            base: Duration::from_millis(base_ms),
            cap: Duration::from_millis(cap_ms),
        }
    }

    /// Delay before reconnect attempt `attempt` (1-based; 0 is treated as 1).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exp = attempt.max(1) - 1;
        let factor = 1u32.checked_shl(exp).unwrap_or(u32::MAX);
        self.base.saturating_mul(factor).min(self.cap)
    }
}

/// Deadlines that turn a stalled handshake or a silent channel into a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LivenessPolicy {
    pub connect_timeout: Duration,
    /// Longest gap between two messages on an open channel.
    pub idle_timeout: Duration,
}

impl Default for LivenessPolicy {
    fn default() -> Self {
        Self {
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            idle_timeout: DEFAULT_IDLE_TIMEOUT,
        }
    }
}

impl LivenessPolicy {
    pub fn from_millis(connect_timeout_ms: u64, idle_timeout_ms: u64) -> Self {
        Self {
            connect_timeout: Duration::from_millis(connect_timeout_ms),
            idle_timeout: Duration::from_millis(idle_timeout_ms),
        }
    }
}
