// Snapshot merger tests: identity reuse, replacement, dropout

mod common;

use common::*;
use fleetwatch::merge::{merge, merge_with_stats};
use fleetwatch::models::*;
use std::sync::Arc;

#[test]
fn first_merge_takes_everything_from_snapshot() {
    let (view, stats) = merge_with_stats(None, snapshot(vec![session("bob"), session("amy")]));
    assert_eq!(names(&view.sessions), vec!["bob", "amy"]);
    assert_eq!(stats.added, 2);
    assert!(!stats.aggregate_reused);
}

#[test]
fn unchanged_rows_keep_identity_across_merges() {
    let bob = session_with_jobs("bob", vec![job(42, "sleep 100", 3)]);
    let v1 = merge(None, snapshot(vec![bob.clone(), session("amy")]));
    let v2 = merge(Some(&v1), snapshot(vec![bob.clone(), session_with_cpu("amy", 5.0)]));

    assert!(Arc::ptr_eq(&v1.sessions[0], &v2.sessions[0]), "bob unchanged");
    assert!(!Arc::ptr_eq(&v1.sessions[1], &v2.sessions[1]), "amy changed");
    assert_eq!(v2.sessions[1].cpu_percent, 5.0);

    let v3 = merge(Some(&v2), snapshot(vec![bob, session_with_cpu("amy", 5.0)]));
    assert!(Arc::ptr_eq(&v1.sessions[0], &v3.sessions[0]));
    assert!(Arc::ptr_eq(&v2.sessions[1], &v3.sessions[1]));
}

#[test]
fn aggregate_reused_only_when_all_fields_equal() {
    let v1 = merge(None, snapshot(vec![session("bob")]));
    let v2 = merge(Some(&v1), snapshot(vec![session("bob")]));
    assert!(Arc::ptr_eq(&v1.aggregate, &v2.aggregate));

    let mut changed = snapshot(vec![session("bob")]);
    changed.aggregate = aggregate(1, 12.0);
    let v3 = merge(Some(&v2), changed);
    assert!(!Arc::ptr_eq(&v2.aggregate, &v3.aggregate));
    assert_eq!(v3.aggregate.total_cpu_percent, 12.0);
}

#[test]
fn job_elapsed_change_replaces_row() {
    let v1 = merge(None, snapshot(vec![session_with_jobs("bob", vec![job(42, "x", 3)])]));
    let v2 = merge(Some(&v1), snapshot(vec![session_with_jobs("bob", vec![job(42, "x", 5)])]));
    assert!(!Arc::ptr_eq(&v1.sessions[0], &v2.sessions[0]));
    assert_eq!(v2.sessions[0].jobs[0].elapsed_seconds, 5);
}

#[test]
fn job_reordering_alone_keeps_identity() {
    let v1 = merge(
        None,
        snapshot(vec![session_with_jobs("bob", vec![job(1, "a", 3), job(2, "b", 4)])]),
    );
    let v2 = merge(
        Some(&v1),
        snapshot(vec![session_with_jobs("bob", vec![job(2, "b", 4), job(1, "a", 3)])]),
    );
    assert!(Arc::ptr_eq(&v1.sessions[0], &v2.sessions[0]));
}

#[test]
fn sessions_absent_from_new_snapshot_are_dropped() {
    let v1 = merge(None, snapshot(vec![session("bob"), session("amy"), session("cat")]));
    let (v2, stats) = merge_with_stats(Some(&v1), snapshot(vec![session("cat"), session("bob")]));
    assert_eq!(names(&v2.sessions), vec!["cat", "bob"], "order follows the new snapshot");
    assert!(v2.session("amy").is_none());
    assert_eq!(stats.dropped, 1);
    assert_eq!(stats.reused, 2);
    assert!(stats.changed());
}

#[test]
fn merge_leaves_previous_view_untouched() {
    let v1 = merge(None, snapshot(vec![session("bob")]));
    let _v2 = merge(Some(&v1), snapshot(vec![session_with_cpu("bob", 50.0)]));
    assert_eq!(v1.sessions[0].cpu_percent, 0.0);
    assert_eq!(v1.len(), 1);
}

#[test]
fn identical_snapshot_reports_no_change() {
    let v1 = merge(None, snapshot(vec![session("bob")]));
    let (_v2, stats) = merge_with_stats(Some(&v1), snapshot(vec![session("bob")]));
    assert!(!stats.changed());
}
