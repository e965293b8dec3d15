// Merged view: the long-lived, identity-preserving copy of the last applied snapshot

use std::sync::Arc;

use super::{AggregateStats, SessionRow};

/// Rows are shared with the previous view when unchanged, so `Arc::ptr_eq`
/// tells a consumer which rows it can skip re-rendering.
#[derive(Debug, Clone)]
pub struct FleetView {
    pub aggregate: Arc<AggregateStats>,
    pub sessions: Vec<Arc<SessionRow>>,
}

impl FleetView {
    pub fn session(&self, username: &str) -> Option<&Arc<SessionRow>> {
        self.sessions.iter().find(|s| s.username == username)
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}
