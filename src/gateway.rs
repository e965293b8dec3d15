// Control gateway: one-shot commands against the backend's admin API

use serde::{Deserialize, Serialize};
use std::fmt;
use std::future::Future;
use std::str::FromStr;
use std::time::Duration;
use tracing::instrument;

/// Backend refuses quotas below this.
pub const MIN_QUOTA_MB: u64 = 50;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Signals the backend accepts for kill-job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Signal {
    #[default]
    Term,
    Kill,
    Int,
    Hup,
}

impl Signal {
    pub fn as_str(&self) -> &'static str {
        match self {
            Signal::Term => "TERM",
            Signal::Kill => "KILL",
            Signal::Int => "INT",
            Signal::Hup => "HUP",
        }
    }
}

impl fmt::Display for Signal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Signal {
    type Err = ControlError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let upper = s.trim().to_ascii_uppercase();
        match upper.strip_prefix("SIG").unwrap_or(&upper) {
            "TERM" => Ok(Signal::Term),
            "KILL" => Ok(Signal::Kill),
            "INT" => Ok(Signal::Int),
            "HUP" => Ok(Signal::Hup),
            _ => Err(ControlError::UnsupportedSignal(s.to_string())),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ControlError {
    #[error("unsupported signal {0:?} (allowed: TERM, KILL, INT, HUP)")]
    UnsupportedSignal(String),
    #[error("quota must be at least {min} MB, got {got}")]
    QuotaBelowMinimum { min: u64, got: u64 },
    #[error("http request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("backend rejected command ({status}): {detail}")]
    Rejected { status: u16, detail: String },
}

/// Successful backend reply; `message` is the backend's human-readable summary.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct CommandAck {
    #[serde(default)]
    pub message: String,
}

/// A command the operator issued, as submitted to the gateway.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlCommand {
    StopSession { username: String },
    SetQuota { username: String, quota_mb: u64 },
    KillProcess { username: String, pid: u32, signal: Signal },
}

impl ControlCommand {
    pub fn username(&self) -> &str {
        match self {
            ControlCommand::StopSession { username }
            | ControlCommand::SetQuota { username, .. }
            | ControlCommand::KillProcess { username, .. } => username,
        }
    }
}

impl fmt::Display for ControlCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ControlCommand::StopSession { username } => write!(f, "stop {username}"),
            ControlCommand::SetQuota { username, quota_mb } => {
                write!(f, "quota {username} {quota_mb}MB")
            }
            ControlCommand::KillProcess {
                username,
                pid,
                signal,
            } => write!(f, "kill {username} {pid} SIG{signal}"),
        }
    }
}

/// Completed command, fed back into the console's event loop.
#[derive(Debug)]
pub struct CommandOutcome {
    pub command: ControlCommand,
    pub result: Result<CommandAck, ControlError>,
}

/// Backend control API. Each call is independent of the telemetry channel.
pub trait ControlGateway: Send + Sync + 'static {
    fn stop_session(
        &self,
        username: &str,
    ) -> impl Future<Output = Result<CommandAck, ControlError>> + Send;

    fn set_quota(
        &self,
        username: &str,
        quota_mb: u64,
    ) -> impl Future<Output = Result<CommandAck, ControlError>> + Send;

    fn kill_process(
        &self,
        username: &str,
        pid: u32,
        signal: Signal,
    ) -> impl Future<Output = Result<CommandAck, ControlError>> + Send;
}

/// Runs `command` against `gateway` and pairs the result with the command.
pub async fn dispatch<G: ControlGateway>(gateway: &G, command: ControlCommand) -> CommandOutcome {
    let result = match &command {
        ControlCommand::StopSession { username } => gateway.stop_session(username).await,
        ControlCommand::SetQuota { username, quota_mb } => {
            gateway.set_quota(username, *quota_mb).await
        }
        ControlCommand::KillProcess {
            username,
            pid,
            signal,
        } => gateway.kill_process(username, *pid, *signal).await,
    };
    CommandOutcome { command, result }
}

#[derive(Serialize)]
struct StopForm<'a> {
    username: &'a str,
}

#[derive(Serialize)]
struct QuotaForm<'a> {
    username: &'a str,
    quota_mb: u64,
}

#[derive(Serialize)]
struct KillForm<'a> {
    username: &'a str,
    pid: u32,
    signal_name: &'static str,
}

#[derive(Deserialize)]
struct ErrorBody {
    detail: serde_json::Value,
}

/// reqwest-backed gateway posting form bodies with the `x-admin-token` header.
#[derive(Clone)]
pub struct HttpControlGateway {
    http: reqwest::Client,
    base_url: String,
    token: String,
}

impl HttpControlGateway {
    pub fn new(base_url: impl Into<String>, token: impl Into<String>) -> Result<Self, ControlError> {
        let http = reqwest::Client::builder()
            .user_agent(crate::version::user_agent())
            .timeout(REQUEST_TIMEOUT)
            .build()?;
        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token: token.into(),
        })
    }

    async fn post_form<T: Serialize + ?Sized>(
        &self,
        path: &str,
        form: &T,
    ) -> Result<CommandAck, ControlError> {
        let url = format!("{}{}", self.base_url, path);
        let res = self
            .http
            .post(url)
            .header("x-admin-token", &self.token)
            .form(form)
            .send()
            .await?;

        let status = res.status();
        let body = res.text().await?;
        if status.is_success() {
            return Ok(serde_json::from_str(&body).unwrap_or_else(|e| {
                tracing::debug!(error = %e, "ack body is not a JSON message");
                CommandAck::default()
            }));
        }
        Err(ControlError::Rejected {
            status: status.as_u16(),
            detail: error_detail(&body),
        })
    }
}

/// FastAPI-style `{"detail": ...}` if present, otherwise the raw body.
fn error_detail(body: &str) -> String {
    match serde_json::from_str::<ErrorBody>(body) {
        Ok(ErrorBody {
            detail: serde_json::Value::String(s),
        }) => s,
        Ok(ErrorBody { detail }) => detail.to_string(),
        Err(_) => body.trim().to_string(),
    }
}

impl ControlGateway for HttpControlGateway {
    #[instrument(skip(self), fields(gateway = "http", operation = "stop_session"))]
    async fn stop_session(&self, username: &str) -> Result<CommandAck, ControlError> {
        self.post_form("/admin/stop-user", &StopForm { username })
            .await
    }

    #[instrument(skip(self), fields(gateway = "http", operation = "set_quota"))]
    async fn set_quota(&self, username: &str, quota_mb: u64) -> Result<CommandAck, ControlError> {
        if quota_mb < MIN_QUOTA_MB {
            return Err(ControlError::QuotaBelowMinimum {
                min: MIN_QUOTA_MB,
                got: quota_mb,
            });
        }
        self.post_form("/admin/set-quota", &QuotaForm { username, quota_mb })
            .await
    }

    #[instrument(skip(self), fields(gateway = "http", operation = "kill_process"))]
    async fn kill_process(
        &self,
        username: &str,
        pid: u32,
        signal: Signal,
    ) -> Result<CommandAck, ControlError> {
        self.post_form(
            "/admin/kill-job",
            &KillForm {
                username,
                pid,
                signal_name: signal.as_str(),
            },
        )
        .await
    }
}
