// View projector: filter + stable single-key sort over the merged rows

use crate::models::{SessionRow, SortDirection, SortKey, ViewQuery};
use std::cmp::Ordering;
use std::sync::Arc;

/// Rows to present for `query`, in order. Pure: `sessions` is left untouched and the
/// returned rows share identity with it.
pub fn project(sessions: &[Arc<SessionRow>], query: &ViewQuery) -> Vec<Arc<SessionRow>> {
    let needle = query.filter_text.to_lowercase();
    let mut rows: Vec<Arc<SessionRow>> = sessions
        .iter()
        .filter(|s| needle.is_empty() || s.username.to_lowercase().contains(&needle))
        .cloned()
        .collect();

    // sort_by is stable; reversing the comparator keeps ties in input order.
    rows.sort_by(|a, b| {
        let ord = compare(a, b, query.sort_key);
        match query.direction {
            SortDirection::Ascending => ord,
            SortDirection::Descending => ord.reverse(),
        }
    });
    rows
}

fn compare(a: &SessionRow, b: &SessionRow, key: SortKey) -> Ordering {
    match key {
        SortKey::Username => compare_names(&a.username, &b.username),
        SortKey::Cpu => a.cpu_percent.total_cmp(&b.cpu_percent),
        SortKey::Mem => a.mem_percent.total_cmp(&b.mem_percent),
        SortKey::Storage => a.storage_ratio().total_cmp(&b.storage_ratio()),
        SortKey::Status => a.status.as_str().cmp(b.status.as_str()),
    }
}

/// Locale-style name order: case-insensitive first, exact comparison only to break ties.
fn compare_names(a: &str, b: &str) -> Ordering {
    a.to_lowercase()
        .cmp(&b.to_lowercase())
        .then_with(|| a.cmp(b))
}
