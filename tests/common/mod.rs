// Shared test helpers: session/snapshot builders and wire JSON

#![allow(dead_code)]

use fleetwatch::models::*;

pub fn job(pid: u32, command: &str, elapsed_seconds: u64) -> JobRow {
    JobRow {
        pid,
        command: command.into(),
        elapsed_seconds,
    }
}

pub fn session(username: &str) -> SessionRow {
    SessionRow {
        username: username.into(),
        container_id: format!("c-{username}"),
        status: SessionStatus::Running,
        cpu_percent: 0.0,
        mem_usage_bytes: 0,
        mem_percent: 0.0,
        workspace_size_bytes: 0,
        quota_bytes: None,
        shell_pid: None,
        jobs: vec![],
    }
}

pub fn session_with_cpu(username: &str, cpu_percent: f64) -> SessionRow {
    SessionRow {
        cpu_percent,
        ..session(username)
    }
}

pub fn session_with_jobs(username: &str, jobs: Vec<JobRow>) -> SessionRow {
    SessionRow {
        shell_pid: Some(1),
        jobs,
        ..session(username)
    }
}

pub fn aggregate(session_count: u64, total_cpu_percent: f64) -> AggregateStats {
    AggregateStats {
        session_count,
        total_cpu_percent,
        total_mem_bytes: 0,
        total_mem_percent: 0.0,
    }
}

pub fn snapshot(sessions: Vec<SessionRow>) -> FleetSnapshot {
    FleetSnapshot {
        aggregate: aggregate(sessions.len() as u64, 0.0),
        sessions,
    }
}

/// Wire JSON for one user with the given jobs, as the backend would push it.
pub fn user_json(username: &str, pids: &[u32]) -> serde_json::Value {
    let jobs: Vec<_> = pids
        .iter()
        .map(|pid| serde_json::json!({ "pid": pid, "command": "sleep 100", "elapsed_seconds": 5 }))
        .collect();
    serde_json::json!({
        "username": username,
        "container_id": format!("c-{username}"),
        "status": "running",
        "cpu_percent": 1.5,
        "mem_usage": 1024,
        "mem_percent": 0.5,
        "workspace_size": 2048,
        "quota_bytes": 52428800,
        "shell_pid": 7,
        "jobs": jobs,
    })
}

pub fn snapshot_json(users: Vec<serde_json::Value>) -> String {
    serde_json::json!({
        "overall": {
            "containers": users.len(),
            "total_cpu_percent": 1.5,
            "total_mem_usage": 1024,
            "total_mem_percent": 0.5,
        },
        "users": users,
    })
    .to_string()
}

pub fn names(rows: &[std::sync::Arc<SessionRow>]) -> Vec<String> {
    rows.iter().map(|r| r.username.clone()).collect()
}
