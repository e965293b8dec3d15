// Snapshot merger: fold a fresh snapshot into the previous view, reusing unchanged rows

use crate::models::{FleetSnapshot, FleetView, SessionRow};
use std::collections::HashMap;
use std::sync::Arc;

/// Row-level outcome of one merge, for logging.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MergeStats {
    pub reused: usize,
    pub replaced: usize,
    pub added: usize,
    pub dropped: usize,
    pub aggregate_reused: bool,
}

impl MergeStats {
    pub fn changed(&self) -> bool {
        self.replaced > 0 || self.added > 0 || self.dropped > 0 || !self.aggregate_reused
    }
}

/// Merge `snapshot` into `previous` (None on first call). Pure; `previous` is not modified.
pub fn merge(previous: Option<&FleetView>, snapshot: FleetSnapshot) -> FleetView {
    merge_with_stats(previous, snapshot).0
}

pub fn merge_with_stats(
    previous: Option<&FleetView>,
    snapshot: FleetSnapshot,
) -> (FleetView, MergeStats) {
    let mut stats = MergeStats::default();

    let aggregate = match previous {
        Some(prev) if *prev.aggregate == snapshot.aggregate => {
            stats.aggregate_reused = true;
            prev.aggregate.clone()
        }
        _ => Arc::new(snapshot.aggregate),
    };

    let prev_rows: HashMap<&str, &Arc<SessionRow>> = previous
        .map(|p| {
            p.sessions
                .iter()
                .map(|row| (row.username.as_str(), row))
                .collect()
        })
        .unwrap_or_default();

    let mut sessions = Vec::with_capacity(snapshot.sessions.len());
    for row in snapshot.sessions {
        match prev_rows.get(row.username.as_str()) {
            Some(old) if old.same_content(&row) => {
                stats.reused += 1;
                sessions.push(Arc::clone(old));
            }
            Some(_) => {
                stats.replaced += 1;
                sessions.push(Arc::new(row));
            }
            None => {
                stats.added += 1;
                sessions.push(Arc::new(row));
            }
        }
    }
    stats.dropped = prev_rows.len().saturating_sub(stats.reused + stats.replaced);

    (
        FleetView {
            aggregate,
            sessions,
        },
        stats,
    )
}
