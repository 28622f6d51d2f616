/*
 * SPDX-FileCopyrightText: 2020 Stalwart Labs Ltd <hello@stalw.art>
 *
 * SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-SEL
 */

mod common;

use backup_restore::{Filter, FilterCriteria, Status, TickOutcome, TrackingReport};
use cluster_management::{LeaseLock, NodeInfo};
use common::{backup_request, classifier, database, Calls, Harness, MockAdapter, Script};
use std::{sync::Arc, time::Duration};

async fn pending_backup(track_delay: Duration) -> Harness {
    let harness = Harness::new(vec![MockAdapter::scripted(
        "pg-a",
        Script {
            backup_start_status: Status::InProgress,
            backup_track_status: Status::Completed,
            track_delay,
            ..Default::default()
        },
    )])
    .await;
    harness
        .register(database("orders", "pg-a", &[classifier("prod", "orders")]))
        .await;
    harness
        .service
        .backup(
            backup_request(
                "nightly",
                FilterCriteria::including(Filter::namespaces(&["prod"])),
            ),
            false,
        )
        .await
        .unwrap();
    harness
}

#[tokio::test]
async fn test_replicas_poll_once_per_interval() {
    let harness = pending_backup(Duration::from_millis(100)).await;
    let lock = Arc::new(LeaseLock::new());
    let first = harness
        .service
        .scheduler(lock.clone(), NodeInfo::with_id("replica-1"))
        .unwrap();
    let second = harness
        .service
        .scheduler(lock.clone(), NodeInfo::with_id("replica-2"))
        .unwrap();

    let (a, b) = tokio::join!(first.tick(), second.tick());
    let mut outcomes = vec![a.unwrap(), b.unwrap()];
    outcomes.sort_by_key(|outcome| matches!(outcome, TickOutcome::SkippedLockHeld));

    assert_eq!(
        outcomes,
        vec![
            TickOutcome::Executed(TrackingReport {
                backups: 1,
                restores: 0
            }),
            TickOutcome::SkippedLockHeld,
        ]
    );
    assert_eq!(Calls::get(&harness.adapter("pg-a").calls.backup_track), 1);
    assert_eq!(
        harness.service.get_backup("nightly").await.unwrap().status,
        Status::Completed
    );

    // Released, but still leased for the minimum hold time
    assert_eq!(second.tick().await.unwrap(), TickOutcome::SkippedLockHeld);
    let lease = lock.lease("backup-restore-tracking").await.unwrap();
    assert!(lease.released);

    let metrics = harness.service.get_metrics().await;
    assert_eq!(metrics.tracking_stats.executed_ticks, 1);
    assert_eq!(metrics.tracking_stats.skipped_ticks, 2);
    assert_eq!(metrics.backup_stats.successful_backups, 1);
}

#[tokio::test]
async fn test_overlapping_local_ticks_are_skipped() {
    let harness = pending_backup(Duration::from_millis(100)).await;
    let scheduler = harness
        .service
        .scheduler(Arc::new(LeaseLock::new()), NodeInfo::with_id("replica-1"))
        .unwrap();

    let (a, b) = tokio::join!(scheduler.tick(), scheduler.tick());
    assert!(matches!(a.unwrap(), TickOutcome::Executed(_)));
    assert_eq!(b.unwrap(), TickOutcome::SkippedLocalRun);
    assert_eq!(Calls::get(&harness.adapter("pg-a").calls.backup_track), 1);
}

#[tokio::test]
async fn test_scheduler_loop_start_stop() {
    let harness = pending_backup(Duration::ZERO).await;
    let scheduler = harness
        .service
        .scheduler(Arc::new(LeaseLock::new()), NodeInfo::local())
        .unwrap();

    scheduler.start().await.unwrap();
    assert!(scheduler.is_running().await);
    tokio::time::sleep(Duration::from_millis(100)).await;
    scheduler.stop().await.unwrap();
    assert!(!scheduler.is_running().await);

    assert_eq!(Calls::get(&harness.adapter("pg-a").calls.backup_track), 1);
    assert_eq!(
        harness.service.get_backup("nightly").await.unwrap().status,
        Status::Completed
    );
}
