// Telemetry snapshot models (wire format of /admin/ws/stats)

use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Effective quota when the backend omits one (50 MiB, the backend's minimum).
pub const QUOTA_FLOOR_BYTES: u64 = 50 * 1024 * 1024;

/// Session container status; unknown backend values (e.g. "missing") map to `Unknown`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Running,
    #[serde(alias = "exited", alias = "created", alias = "paused")]
    Stopped,
    #[serde(other)]
    Unknown,
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::Running => "running",
            SessionStatus::Stopped => "stopped",
            SessionStatus::Unknown => "unknown",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregateStats {
    #[serde(rename = "containers")]
    pub session_count: u64,
    pub total_cpu_percent: f64,
    #[serde(rename = "total_mem_usage")]
    pub total_mem_bytes: u64,
    pub total_mem_percent: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobRow {
    pub pid: u32,
    pub command: String,
    pub elapsed_seconds: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionRow {
    pub username: String,
    pub container_id: String,
    pub status: SessionStatus,
    pub cpu_percent: f64,
    #[serde(rename = "mem_usage")]
    pub mem_usage_bytes: u64,
    pub mem_percent: f64,
    #[serde(rename = "workspace_size")]
    pub workspace_size_bytes: u64,
    #[serde(default)]
    pub quota_bytes: Option<u64>,
    #[serde(default)]
    pub shell_pid: Option<u32>,
    #[serde(default)]
    pub jobs: Vec<JobRow>,
}

impl SessionRow {
    /// Quota used for ratios: the reported quota, or the floor when absent or zero.
    pub fn effective_quota_bytes(&self) -> u64 {
        match self.quota_bytes {
            Some(q) if q > 0 => q,
            _ => QUOTA_FLOOR_BYTES,
        }
    }

    /// Workspace usage as a fraction of the effective quota.
    pub fn storage_ratio(&self) -> f64 {
        self.workspace_size_bytes as f64 / self.effective_quota_bytes() as f64
    }

    pub fn has_job(&self, pid: u32) -> bool {
        self.jobs.iter().any(|j| j.pid == pid)
    }

    /// Field-by-field equality; jobs compare as a set of (pid, command, elapsed_seconds).
    pub fn same_content(&self, other: &SessionRow) -> bool {
        self.username == other.username
            && self.container_id == other.container_id
            && self.status == other.status
            && self.cpu_percent == other.cpu_percent
            && self.mem_usage_bytes == other.mem_usage_bytes
            && self.mem_percent == other.mem_percent
            && self.workspace_size_bytes == other.workspace_size_bytes
            && self.quota_bytes == other.quota_bytes
            && self.shell_pid == other.shell_pid
            && same_jobs(&self.jobs, &other.jobs)
    }
}

fn same_jobs(a: &[JobRow], b: &[JobRow]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let set: HashSet<(u32, &str, u64)> = a
        .iter()
        .map(|j| (j.pid, j.command.as_str(), j.elapsed_seconds))
        .collect();
    b.iter()
        .all(|j| set.contains(&(j.pid, j.command.as_str(), j.elapsed_seconds)))
}

/// One full-fleet snapshot; always complete, never a delta.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FleetSnapshot {
    #[serde(rename = "overall")]
    pub aggregate: AggregateStats,
    #[serde(rename = "users", default)]
    pub sessions: Vec<SessionRow>,
}

#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("malformed snapshot: {0}")]
    Json(#[from] serde_json::Error),
    #[error("duplicate session {0:?} in snapshot")]
    DuplicateSession(String),
    #[error("duplicate pid {pid} in session {username:?}")]
    DuplicatePid { username: String, pid: u32 },
}

impl FleetSnapshot {
    /// Checks per-snapshot uniqueness of usernames and per-session uniqueness of pids.
    pub fn validate(&self) -> Result<(), DecodeError> {
        let mut users = HashSet::with_capacity(self.sessions.len());
        for s in &self.sessions {
            if !users.insert(s.username.as_str()) {
                return Err(DecodeError::DuplicateSession(s.username.clone()));
            }
            let mut pids = HashSet::with_capacity(s.jobs.len());
            for j in &s.jobs {
                if !pids.insert(j.pid) {
                    return Err(DecodeError::DuplicatePid {
                        username: s.username.clone(),
                        pid: j.pid,
                    });
                }
            }
        }
        Ok(())
    }
}

/// Anything the backend may push on the telemetry channel.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum ChannelMessage {
    Snapshot(FleetSnapshot),
    /// Backend-side collection failure, e.g. `{"error": "stats_error", "detail": "..."}`.
    ServerError {
        error: String,
        #[serde(default)]
        detail: Option<String>,
    },
}

impl ChannelMessage {
    pub fn decode(raw: &str) -> Result<Self, DecodeError> {
        let msg: ChannelMessage = serde_json::from_str(raw)?;
        if let ChannelMessage::Snapshot(s) = &msg {
            s.validate()?;
        }
        Ok(msg)
    }
}
