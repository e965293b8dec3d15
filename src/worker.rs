// Console event loop. Owns the Console; channel events, command results and operator
// input are handled one at a time, so merge/reconcile/project need no locks.
// Commands run in their own tasks and report back, so snapshots never wait on them.

use crate::connection::{ChannelEvent, ConnectionHandle};
use crate::console::{Console, Notification, Presentation};
use crate::gateway::{CommandOutcome, ControlCommand, ControlGateway, dispatch};
use crate::operator::OperatorCommand;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::time::{Duration, interval};

/// Command results waiting to be folded back into the console.
const OUTCOME_CHANNEL_CAPACITY: usize = 64;

/// Channels, collaborators and shutdown for the worker.
pub struct WorkerDeps<G: ControlGateway> {
    pub console: Console,
    pub gateway: Arc<G>,
    pub connection: ConnectionHandle,
    pub channel_rx: mpsc::Receiver<ChannelEvent>,
    /// Only control, filter and sort commands are acted on; the rest are host-side.
    pub operator_rx: mpsc::Receiver<OperatorCommand>,
    pub notify_tx: broadcast::Sender<Notification>,
    pub view_tx: watch::Sender<Presentation>,
    pub shutdown_rx: oneshot::Receiver<()>,
}

pub struct WorkerConfig {
    /// How often to log console stats at INFO level.
    pub stats_log_interval_secs: u64,
}

pub fn spawn<G: ControlGateway>(
    deps: WorkerDeps<G>,
    config: WorkerConfig,
) -> tokio::task::JoinHandle<()> {
    let WorkerDeps {
        mut console,
        gateway,
        connection,
        mut channel_rx,
        mut operator_rx,
        notify_tx,
        view_tx,
        mut shutdown_rx,
    } = deps;

    tokio::spawn(async move {
        let (outcome_tx, mut outcome_rx) =
            mpsc::channel::<CommandOutcome>(OUTCOME_CHANNEL_CAPACITY);
        let stats_log_interval = Duration::from_secs(config.stats_log_interval_secs.max(1));
        let mut stats_log_tick = interval(stats_log_interval);
        stats_log_tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        let mut operator_open = true;

        loop {
            tokio::select! {
                event = channel_rx.recv() => {
                    let Some(event) = event else {
                        tracing::debug!("Connection manager ended");
                        break;
                    };
                    for notice in console.handle_channel_event(event) {
                        notify(&notify_tx, notice);
                    }
                }
                Some(outcome) = outcome_rx.recv() => {
                    let notice = console.finish_command(outcome);
                    if notice.is_error() {
                        tracing::warn!(notice = ?notice, "command failed");
                    }
                    notify(&notify_tx, notice);
                }
                cmd = operator_rx.recv(), if operator_open => {
                    match cmd {
                        Some(OperatorCommand::Control(command)) => {
                            submit(&mut console, &gateway, &outcome_tx, &notify_tx, command);
                        }
                        Some(OperatorCommand::Filter(text)) => console.set_filter(text),
                        Some(OperatorCommand::Sort(key, direction)) => console.set_sort(key, direction),
                        Some(_) => {}
                        None => {
                            tracing::debug!("Operator input closed");
                            operator_open = false;
                        }
                    }
                }
                _ = stats_log_tick.tick() => {
                    let stats = console.stats();
                    tracing::info!(
                        status = %console.status(),
                        sessions = console.view().map_or(0, |v| v.len()),
                        pending_kills = console.tracker().len(),
                        snapshots_applied = stats.snapshots_applied,
                        decode_failures = stats.decode_failures,
                        server_errors = stats.server_errors,
                        reconnects = stats.reconnects,
                        "console stats"
                    );
                    continue;
                }
                _ = &mut shutdown_rx => {
                    tracing::debug!("Worker shutting down");
                    break;
                }
            }
            view_tx.send_replace(console.presentation());
        }

        // Keep draining until the driver exits so it never blocks on a full channel;
        // the last event is the terminal Disconnected status.
        let mut connection = connection;
        connection.close();
        while let Some(event) = channel_rx.recv().await {
            console.handle_channel_event(event);
        }
        view_tx.send_replace(console.presentation());
    })
}

fn submit<G: ControlGateway>(
    console: &mut Console,
    gateway: &Arc<G>,
    outcome_tx: &mpsc::Sender<CommandOutcome>,
    notify_tx: &broadcast::Sender<Notification>,
    command: ControlCommand,
) {
    if let ControlCommand::KillProcess {
        username,
        pid,
        signal,
    } = &command
        && !console.begin_kill(username, *pid, *signal)
    {
        notify(
            notify_tx,
            Notification::CommandFailed {
                command: command.to_string(),
                error: "a kill for this process is already pending".into(),
            },
        );
        return;
    }

    tracing::info!(command = %command, "submitting command");
    let gateway = gateway.clone();
    let outcome_tx = outcome_tx.clone();
    tokio::spawn(async move {
        let outcome = dispatch(gateway.as_ref(), command).await;
        if outcome_tx.send(outcome).await.is_err() {
            tracing::debug!("Worker gone; dropping command outcome");
        }
    });
}

fn notify(tx: &broadcast::Sender<Notification>, notice: Notification) {
    if tx.send(notice).is_err() {
        tracing::debug!(operation = "notify", "No notification receivers");
    }
}
