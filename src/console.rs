// Console state: merged view, pending kills, query and connection status.
// Every handler runs to completion; the worker feeds events in arrival order.

use crate::connection::{ChannelEvent, ConnectionState};
use crate::gateway::{CommandOutcome, ControlCommand, Signal};
use crate::merge::{MergeStats, merge_with_stats};
use crate::models::{
    AggregateStats, ChannelMessage, FleetSnapshot, FleetView, SessionRow, SortDirection, SortKey,
    ViewQuery,
};
use crate::pending::{PendingActionTracker, PendingKey, Reconciliation};
use crate::projection::project;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConsoleStats {
    pub snapshots_applied: u64,
    pub decode_failures: u64,
    pub server_errors: u64,
    pub reconnects: u64,
}

/// Result of applying one snapshot.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ViewUpdate {
    pub merge: MergeStats,
    pub reconciliation: Reconciliation,
}

/// Discrete messages for the operator; the only errors this core surfaces.
#[derive(Debug, Clone, PartialEq)]
pub enum Notification {
    CommandSucceeded { command: String, message: String },
    CommandFailed { command: String, error: String },
    /// The killed pid disappeared from a snapshot.
    KillConfirmed(PendingKey),
    /// The pid outlived the configured expiry; the kill is presumed ineffective.
    KillExpired(PendingKey),
}

impl Notification {
    pub fn is_error(&self) -> bool {
        matches!(
            self,
            Notification::CommandFailed { .. } | Notification::KillExpired(_)
        )
    }
}

/// Everything a host needs to render: published by the worker after each event.
#[derive(Debug, Clone)]
pub struct Presentation {
    pub status: ConnectionState,
    pub aggregate: Option<Arc<AggregateStats>>,
    pub rows: Vec<Arc<SessionRow>>,
    pub pending: Vec<PendingKey>,
    pub query: ViewQuery,
    pub stats: ConsoleStats,
}

#[derive(Debug)]
pub struct Console {
    view: Option<Arc<FleetView>>,
    tracker: PendingActionTracker,
    query: ViewQuery,
    status: ConnectionState,
    stats: ConsoleStats,
}

impl Default for Console {
    fn default() -> Self {
        Self::new(ViewQuery::default(), PendingActionTracker::new())
    }
}

impl Console {
    pub fn new(query: ViewQuery, tracker: PendingActionTracker) -> Self {
        Self {
            view: None,
            tracker,
            query,
            status: ConnectionState::Disconnected,
            stats: ConsoleStats::default(),
        }
    }

    /// Routes one connection manager event; returns notifications for the operator.
    pub fn handle_channel_event(&mut self, event: ChannelEvent) -> Vec<Notification> {
        match event {
            ChannelEvent::Status(state) => {
                self.set_status(state);
                Vec::new()
            }
            ChannelEvent::Message(raw) => match self.ingest(&raw) {
                Some(update) => reconciliation_notices(update.reconciliation),
                None => Vec::new(),
            },
        }
    }

    /// Decodes and applies one raw message. Malformed payloads and backend error
    /// payloads are logged and dropped; the view is left as it was.
    pub fn ingest(&mut self, raw: &str) -> Option<ViewUpdate> {
        match ChannelMessage::decode(raw) {
            Ok(ChannelMessage::Snapshot(snapshot)) => Some(self.apply_snapshot(snapshot)),
            Ok(ChannelMessage::ServerError { error, detail }) => {
                self.stats.server_errors += 1;
                tracing::warn!(
                    error = %error,
                    detail = detail.as_deref().unwrap_or(""),
                    "backend reported a stats error; keeping previous view"
                );
                None
            }
            Err(e) => {
                self.stats.decode_failures += 1;
                tracing::warn!(error = %e, operation = "decode_snapshot", "dropping malformed message");
                None
            }
        }
    }

    /// Merge, then reconcile pending kills against the new view.
    pub fn apply_snapshot(&mut self, snapshot: FleetSnapshot) -> ViewUpdate {
        let (view, merge) = merge_with_stats(self.view.as_deref(), snapshot);
        let reconciliation = self.tracker.reconcile(&view);
        self.view = Some(Arc::new(view));
        self.stats.snapshots_applied += 1;
        if merge.changed() {
            tracing::debug!(
                reused = merge.reused,
                replaced = merge.replaced,
                added = merge.added,
                dropped = merge.dropped,
                "view updated"
            );
        }
        ViewUpdate {
            merge,
            reconciliation,
        }
    }

    pub fn set_status(&mut self, state: ConnectionState) {
        if matches!(state, ConnectionState::Backoff { .. }) {
            self.stats.reconnects += 1;
        }
        self.status = state;
    }

    /// Marks an optimistic kill. False if the same target is already pending.
    pub fn begin_kill(&mut self, username: &str, pid: u32, signal: Signal) -> bool {
        self.tracker.mark_pending(username, pid, signal)
    }

    /// Applies a command result. A failed kill rolls back its marker immediately;
    /// the view itself is never touched here.
    pub fn finish_command(&mut self, outcome: CommandOutcome) -> Notification {
        let CommandOutcome { command, result } = outcome;
        match result {
            Ok(ack) => Notification::CommandSucceeded {
                command: command.to_string(),
                message: ack.message,
            },
            Err(e) => {
                if let ControlCommand::KillProcess { username, pid, .. } = &command {
                    self.tracker.reject_pending(username, *pid);
                }
                Notification::CommandFailed {
                    command: command.to_string(),
                    error: e.to_string(),
                }
            }
        }
    }

    /// Presented rows for the current query; empty before the first snapshot.
    pub fn presented(&self) -> Vec<Arc<SessionRow>> {
        match &self.view {
            Some(view) => project(&view.sessions, &self.query),
            None => Vec::new(),
        }
    }

    pub fn presentation(&self) -> Presentation {
        Presentation {
            status: self.status,
            aggregate: self.view.as_ref().map(|v| v.aggregate.clone()),
            rows: self.presented(),
            pending: self.tracker.keys(),
            query: self.query.clone(),
            stats: self.stats,
        }
    }

    pub fn set_filter(&mut self, text: impl Into<String>) {
        self.query.filter_text = text.into();
    }

    pub fn set_sort(&mut self, key: SortKey, direction: SortDirection) {
        self.query.sort_key = key;
        self.query.direction = direction;
    }

    pub fn view(&self) -> Option<&Arc<FleetView>> {
        self.view.as_ref()
    }

    pub fn query(&self) -> &ViewQuery {
        &self.query
    }

    pub fn tracker(&self) -> &PendingActionTracker {
        &self.tracker
    }

    pub fn status(&self) -> ConnectionState {
        self.status
    }

    pub fn stats(&self) -> ConsoleStats {
        self.stats
    }
}

fn reconciliation_notices(r: Reconciliation) -> Vec<Notification> {
    r.confirmed
        .into_iter()
        .map(Notification::KillConfirmed)
        .chain(r.expired.into_iter().map(Notification::KillExpired))
        .collect()
}
