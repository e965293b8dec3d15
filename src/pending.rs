// Optimistic kill markers, reconciled against every merged view

use crate::gateway::Signal;
use crate::models::FleetView;
use std::collections::HashMap;
use std::fmt;

/// Structured key for one kill target; pids are only unique within a session.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PendingKey {
    pub username: String,
    pub pid: u32,
}

impl PendingKey {
    pub fn new(username: impl Into<String>, pid: u32) -> Self {
        Self {
            username: username.into(),
            pid,
        }
    }
}

impl fmt::Display for PendingKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.username, self.pid)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PendingAction {
    pub signal: Signal,
    /// Reconciliations survived while the pid was still listed.
    pub snapshots_seen: u32,
}

/// Keys resolved by one `reconcile` call, sorted.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Reconciliation {
    /// Target gone from the view: the kill took effect (or the session vanished).
    pub confirmed: Vec<PendingKey>,
    /// Still listed after the expiry limit; only populated when expiry is enabled.
    pub expired: Vec<PendingKey>,
}

impl Reconciliation {
    pub fn is_empty(&self) -> bool {
        self.confirmed.is_empty() && self.expired.is_empty()
    }
}

#[derive(Debug, Default)]
pub struct PendingActionTracker {
    actions: HashMap<PendingKey, PendingAction>,
    expire_after: Option<u32>,
}

impl PendingActionTracker {
    /// Markers persist until confirmed or rejected; no timeout.
    pub fn new() -> Self {
        Self::default()
    }

    /// Markers still listed after `snapshots` reconciliations are dropped and reported as expired.
    pub fn with_expiry(snapshots: u32) -> Self {
        Self {
            actions: HashMap::new(),
            expire_after: Some(snapshots.max(1)),
        }
    }

    /// Records an optimistic kill. Returns false if `(username, pid)` is already pending.
    pub fn mark_pending(&mut self, username: &str, pid: u32, signal: Signal) -> bool {
        let key = PendingKey::new(username, pid);
        if self.actions.contains_key(&key) {
            return false;
        }
        self.actions.insert(
            key,
            PendingAction {
                signal,
                snapshots_seen: 0,
            },
        );
        true
    }

    /// Rolls back a marker whose command failed. Returns whether a marker was removed.
    pub fn reject_pending(&mut self, username: &str, pid: u32) -> bool {
        self.actions.remove(&PendingKey::new(username, pid)).is_some()
    }

    pub fn reconcile(&mut self, view: &FleetView) -> Reconciliation {
        let mut result = Reconciliation::default();
        if self.actions.is_empty() {
            return result;
        }
        let sessions: HashMap<&str, _> = view
            .sessions
            .iter()
            .map(|s| (s.username.as_str(), s))
            .collect();
        let expire_after = self.expire_after;

        self.actions.retain(|key, action| {
            let still_running = sessions
                .get(key.username.as_str())
                .is_some_and(|s| s.has_job(key.pid));
            if !still_running {
                result.confirmed.push(key.clone());
                return false;
            }
            action.snapshots_seen += 1;
            if expire_after.is_some_and(|n| action.snapshots_seen >= n) {
                result.expired.push(key.clone());
                return false;
            }
            true
        });

        result.confirmed.sort();
        result.expired.sort();
        result
    }

    pub fn is_pending(&self, username: &str, pid: u32) -> bool {
        self.actions.contains_key(&PendingKey::new(username, pid))
    }

    pub fn get(&self, username: &str, pid: u32) -> Option<&PendingAction> {
        self.actions.get(&PendingKey::new(username, pid))
    }

    /// Pending keys, sorted.
    pub fn keys(&self) -> Vec<PendingKey> {
        let mut keys: Vec<_> = self.actions.keys().cloned().collect();
        keys.sort();
        keys
    }

    pub fn len(&self) -> usize {
        self.actions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }
}
