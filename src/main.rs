use anyhow::Result;
use fleetwatch::*;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::{broadcast, mpsc, watch};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt::time::FormatTime;

use fleetwatch::console::{Notification, Presentation};
use fleetwatch::operator::OperatorCommand;

/// Buffered telemetry events between the connection driver and the worker.
const CHANNEL_EVENT_CAPACITY: usize = 32;
const NOTIFICATION_CAPACITY: usize = 64;
const OPERATOR_CAPACITY: usize = 16;

struct LocalTimer;

impl FormatTime for LocalTimer {
    fn format_time(&self, w: &mut tracing_subscriber::fmt::format::Writer<'_>) -> std::fmt::Result {
        write!(
            w,
            "{}",
            chrono::Local::now().format("%Y-%m-%dT%H:%M:%S%.3f%:z")
        )
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_timer(LocalTimer)
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let app_config = config::AppConfig::load()?;
    tracing::info!(
        version = version::VERSION,
        backend = %app_config.backend.base_url,
        "Starting {}",
        version::NAME
    );

    let gateway = Arc::new(gateway::HttpControlGateway::new(
        app_config.backend.base_url.clone(),
        app_config.backend.admin_token.clone(),
    )?);
    let transport = connection::ws::WsTransport::from_base_url(
        &app_config.backend.base_url,
        &app_config.backend.admin_token,
    )?;
    let (connection, channel_rx) = connection::ConnectionManager::spawn(
        transport,
        app_config.reconnect.policy(),
        app_config.reconnect.liveness(),
        CHANNEL_EVENT_CAPACITY,
    );

    let tracker = match app_config.pending.expire_after_snapshots {
        Some(n) => pending::PendingActionTracker::with_expiry(n),
        None => pending::PendingActionTracker::new(),
    };
    let console = console::Console::new(app_config.view.initial_query(), tracker);

    let (notify_tx, notify_rx) = broadcast::channel(NOTIFICATION_CAPACITY);
    let (view_tx, view_rx) = watch::channel(console.presentation());
    let (operator_tx, operator_rx) = mpsc::channel(OPERATOR_CAPACITY);
    let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel();

    let worker_handle = worker::spawn(
        worker::WorkerDeps {
            console,
            gateway,
            connection,
            channel_rx,
            operator_rx,
            notify_tx,
            view_tx,
            shutdown_rx,
        },
        worker::WorkerConfig {
            stats_log_interval_secs: app_config.monitoring.stats_log_interval_secs,
        },
    );

    tokio::spawn(print_notifications(notify_rx));
    tokio::spawn(read_operator_input(operator_tx, view_rx));

    wait_for_shutdown_signal().await;
    tracing::info!("Received shutdown signal");
    let _ = shutdown_tx.send(());
    let _ = worker_handle.await;
    Ok(())
}

async fn wait_for_shutdown_signal() {
    #[cfg(unix)]
    {
        let mut sigterm =
            match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                Ok(s) => s,
                Err(_) => {
                    let _ = tokio::signal::ctrl_c().await;
                    return;
                }
            };
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = sigterm.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}

async fn print_notifications(mut rx: broadcast::Receiver<Notification>) {
    loop {
        match rx.recv().await {
            Ok(Notification::CommandSucceeded { command, message }) => {
                println!("ok: {command}: {message}");
            }
            Ok(Notification::CommandFailed { command, error }) => {
                println!("FAILED: {command}: {error}");
            }
            Ok(Notification::KillConfirmed(key)) => println!("gone: {key}"),
            Ok(Notification::KillExpired(key)) => {
                println!("FAILED: kill {key} not observed; marker expired");
            }
            Err(broadcast::error::RecvError::Lagged(n)) => {
                tracing::warn!("Notification printer lagged, skipped {} messages", n);
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}

/// Reads operator commands from stdin. View queries (show/pending/status) are answered
/// from the latest presentation; everything else goes to the worker.
async fn read_operator_input(
    tx: mpsc::Sender<OperatorCommand>,
    view_rx: watch::Receiver<Presentation>,
) {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(e) => {
                tracing::warn!(error = %e, operation = "read_stdin", "operator input failed");
                break;
            }
        };
        if line.trim().is_empty() {
            continue;
        }
        match line.parse::<OperatorCommand>() {
            Ok(OperatorCommand::Show) => print_rows(&view_rx.borrow()),
            Ok(OperatorCommand::Pending) => {
                let p = view_rx.borrow();
                if p.pending.is_empty() {
                    println!("no pending kills");
                }
                for key in &p.pending {
                    println!("pending: {key}");
                }
            }
            Ok(OperatorCommand::Status) => {
                let p = view_rx.borrow();
                println!(
                    "connection {} | snapshots {} | decode failures {} | reconnects {}",
                    p.status,
                    p.stats.snapshots_applied,
                    p.stats.decode_failures,
                    p.stats.reconnects
                );
            }
            Ok(cmd) => {
                if tx.send(cmd).await.is_err() {
                    break;
                }
            }
            Err(e) => println!("error: {e}"),
        }
    }
}

fn print_rows(p: &Presentation) {
    if let Some(agg) = &p.aggregate {
        println!(
            "{} sessions | cpu {:.1}% | mem {} MiB ({:.1}%) | {}",
            agg.session_count,
            agg.total_cpu_percent,
            agg.total_mem_bytes / (1024 * 1024),
            agg.total_mem_percent,
            p.status
        );
    } else {
        println!("no snapshot yet | {}", p.status);
    }
    for row in &p.rows {
        let killing = p.pending.iter().filter(|k| k.username == row.username).count();
        println!(
            "{:<16} {:<8} cpu {:>6.2}% mem {:>6.2}% disk {:>5.1}% jobs {}{}",
            row.username,
            row.status.as_str(),
            row.cpu_percent,
            row.mem_percent,
            row.storage_ratio() * 100.0,
            row.jobs.len(),
            if killing > 0 {
                format!(" ({killing} killing)")
            } else {
                String::new()
            }
        );
    }
}
