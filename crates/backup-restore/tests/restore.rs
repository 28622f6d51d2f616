/*
 * SPDX-FileCopyrightText: 2020 Stalwart Labs Ltd <hello@stalw.art>
 *
 * SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-SEL
 */

mod common;

use backup_restore::{
    model::{ClassifierType, ExternalDatabaseStrategy, Mapping, RestoreRequest},
    BackupError, DatabaseRegistry, Filter, FilterCriteria, InMemoryStore, Status,
};
use common::{
    backup_request, classifier, database, tenant_classifier, Calls, FlakyRegistry, Harness,
    MockAdapter, Script, SlowRepository,
};
use std::{sync::Arc, time::Duration};

fn namespaces(ns: &[&str]) -> FilterCriteria {
    FilterCriteria::including(Filter::namespaces(ns))
}

fn restore_request(name: &str, mapping: Mapping) -> RestoreRequest {
    RestoreRequest {
        restore_name: name.to_string(),
        storage_name: "s3-main".to_string(),
        blob_path: "/backups/nightly".to_string(),
        filter_criteria: None,
        mapping,
        external_database_strategy: ExternalDatabaseStrategy::Fail,
    }
}

fn map_namespace(from: &str, to: &str) -> Mapping {
    Mapping {
        namespaces: [(from.to_string(), to.to_string())].into(),
        ..Default::default()
    }
}

#[tokio::test]
async fn test_restore_supersedes_colliding_database() {
    let harness = Harness::new(vec![MockAdapter::new("pg-a")]).await;
    let original = harness
        .register(database(
            "orders",
            "pg-a",
            &[classifier("prod", "orders"), classifier("analytics", "orders")],
        ))
        .await;
    harness
        .service
        .backup(backup_request("nightly", namespaces(&["prod"])), false)
        .await
        .unwrap();

    let restore = harness
        .service
        .restore("nightly", restore_request("rollback", Mapping::default()), false)
        .await
        .unwrap();
    assert_eq!(restore.status, Status::Completed);
    assert_eq!(restore.total, 1);
    assert_eq!(restore.completed, 1);

    let restored = &restore.logical_restores[0].databases[0];
    assert!(restored.registered);
    assert_eq!(restored.classifiers[0].classifier_type, ClassifierType::Replaced);
    assert_eq!(restored.classifiers[0].previous_database.as_deref(), Some("orders"));
    assert_eq!(restored.classifiers[1].classifier_type, ClassifierType::Transient);

    let databases = harness.store.list_databases().await.unwrap();
    assert_eq!(databases.len(), 2);

    let old = databases.iter().find(|db| db.id == original.id).unwrap();
    assert!(old.marked_for_drop);
    assert!(old.registrations.iter().all(|r| r.marked_for_drop));

    let new = databases.iter().find(|db| db.id != original.id).unwrap();
    assert!(!new.marked_for_drop);
    assert_eq!(new.name, "prod-orders");
    assert_eq!(new.users.len(), 1);
    assert_eq!(new.users[0].password, "generated");
    assert_eq!(new.registrations.len(), 2);
    assert!(new.registrations.iter().all(|r| !r.marked_for_drop));
    assert!(new
        .registrations
        .iter()
        .any(|r| r.classifier == classifier("analytics", "orders")));

    let live = harness
        .store
        .find_by_classifier(&classifier("analytics", "orders"))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(live.id, new.id);
}

#[tokio::test]
async fn test_namespace_mapping_creates_new_database() {
    let harness = Harness::new(vec![MockAdapter::new("pg-a")]).await;
    let original = harness
        .register(database("orders", "pg-a", &[classifier("prod", "orders")]))
        .await;
    harness
        .service
        .backup(backup_request("nightly", namespaces(&["prod"])), false)
        .await
        .unwrap();

    let restore = harness
        .service
        .restore("nightly", restore_request("clone", map_namespace("prod", "staging")), false)
        .await
        .unwrap();
    assert_eq!(restore.status, Status::Completed);
    assert_eq!(restore.logical_restores[0].target_namespace, "staging");
    assert_eq!(
        restore.logical_restores[0].databases[0].classifiers[0].classifier_type,
        ClassifierType::New
    );

    let staging = harness
        .store
        .find_by_classifier(&classifier("staging", "orders"))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(staging.name, "staging-orders");
    assert_eq!(staging.physical_database_id.as_deref(), Some("phys-pg-a"));

    let untouched = harness.store.database(original.id).await.unwrap();
    assert!(!untouched.marked_for_drop);
}

#[tokio::test]
async fn test_mapping_collision_is_rejected() {
    let harness = Harness::new(vec![MockAdapter::new("pg-a")]).await;
    harness
        .register(database("a-orders", "pg-a", &[classifier("a", "orders")]))
        .await;
    harness
        .register(database("b-orders", "pg-a", &[classifier("b", "orders")]))
        .await;
    harness
        .service
        .backup(backup_request("nightly", namespaces(&["a", "b"])), false)
        .await
        .unwrap();

    let mapping = Mapping {
        namespaces: [
            ("a".to_string(), "c".to_string()),
            ("b".to_string(), "c".to_string()),
        ]
        .into(),
        ..Default::default()
    };
    let err = harness
        .service
        .restore("nightly", restore_request("merge", mapping), false)
        .await
        .unwrap_err();

    match err {
        BackupError::ValidationConflict(message) => {
            assert!(message.contains(&classifier("c", "orders").to_string()), "{}", message)
        }
        other => panic!("unexpected error {:?}", other),
    }
    assert_eq!(Calls::get(&harness.adapter("pg-a").calls.restore_start), 0);
    assert!(matches!(
        harness.service.get_restore("merge").await,
        Err(BackupError::NotFound(_))
    ));
}

#[tokio::test]
async fn test_tenant_mapping_dry_run() {
    let harness = Harness::new(vec![MockAdapter::new("pg-a")]).await;
    harness
        .register(database(
            "orders",
            "pg-a",
            &[tenant_classifier("prod", "orders", "t1")],
        ))
        .await;
    harness
        .service
        .backup(backup_request("nightly", namespaces(&["prod"])), false)
        .await
        .unwrap();

    let mapping = Mapping {
        tenants: [("t1".to_string(), "t2".to_string())].into(),
        ..Default::default()
    };
    let preview = harness
        .service
        .restore("nightly", restore_request("preview", mapping), true)
        .await
        .unwrap();

    let details = &preview.logical_restores[0].databases[0].classifiers[0];
    assert_eq!(details.classifier.tenant_id(), Some("t2"));
    assert_eq!(details.classifier.namespace(), Some("prod"));
    assert_eq!(details.classifier.microservice_name(), Some("orders"));
    assert_eq!(details.classifier_before_mapper.tenant_id(), Some("t1"));
    assert_eq!(details.classifier_type, ClassifierType::New);

    assert_eq!(Calls::get(&harness.adapter("pg-a").calls.restore_start), 0);
    assert!(harness.service.get_restore("preview").await.is_err());
}

#[tokio::test]
async fn test_restore_preconditions() {
    let harness = Harness::new(vec![MockAdapter::scripted(
        "pg-a",
        Script {
            backup_start_status: Status::InProgress,
            backup_track_status: Status::Completed,
            ..Default::default()
        },
    )])
    .await;
    harness
        .register(database("orders", "pg-a", &[classifier("prod", "orders")]))
        .await;
    harness
        .service
        .backup(backup_request("nightly", namespaces(&["prod"])), false)
        .await
        .unwrap();

    let err = harness
        .service
        .restore("nightly", restore_request("early", Mapping::default()), false)
        .await
        .unwrap_err();
    assert!(matches!(err, BackupError::IllegalState(_)));

    let err = harness
        .service
        .restore("missing", restore_request("r", Mapping::default()), false)
        .await
        .unwrap_err();
    assert!(matches!(err, BackupError::NotFound(_)));

    harness.service.track_pending().await.unwrap();
    harness.service.delete_backup("nightly", false).await.unwrap();
    let err = harness
        .service
        .restore("nightly", restore_request("late", Mapping::default()), false)
        .await
        .unwrap_err();
    assert!(matches!(err, BackupError::IllegalState(_)));
}

#[tokio::test]
async fn test_restore_from_imported_metadata() {
    let harness = Harness::new(vec![MockAdapter::new("pg-a")]).await;
    harness
        .register(database("orders", "pg-a", &[classifier("prod", "orders")]))
        .await;
    harness
        .service
        .backup(backup_request("nightly", namespaces(&["prod"])), false)
        .await
        .unwrap();
    let metadata = harness.service.backup_metadata("nightly").await.unwrap();
    harness.service.delete_backup("nightly", false).await.unwrap();
    harness.service.upload_backup_metadata(metadata).await.unwrap();
    harness.service.delete_backup("nightly", false).await.unwrap();

    let restore = harness
        .service
        .restore("nightly", restore_request("from-import", Mapping::default()), false)
        .await
        .unwrap();
    assert_eq!(restore.status, Status::Completed);
}

#[tokio::test]
async fn test_failed_restore_can_be_retried() {
    let harness = Harness::new(vec![MockAdapter::new("pg-a")]).await;
    harness
        .register(database("orders", "pg-a", &[classifier("prod", "orders")]))
        .await;
    harness
        .service
        .backup(backup_request("nightly", namespaces(&["prod"])), false)
        .await
        .unwrap();

    harness
        .adapter("pg-a")
        .update(|script| script.restore_start_error = Some("storage timeout".to_string()));
    let failed = harness
        .service
        .restore("nightly", restore_request("rollback", Mapping::default()), false)
        .await
        .unwrap();
    assert_eq!(failed.status, Status::Failed);
    assert!(failed.error_message.unwrap().contains("storage timeout"));

    harness
        .adapter("pg-a")
        .update(|script| script.restore_start_error = None);
    let preview = harness.service.retry_restore("rollback", true).await.unwrap();
    assert_eq!(preview.status, Status::NotStarted);
    assert_eq!(
        harness.service.restore_status("rollback").await.unwrap().status,
        Status::Failed
    );

    let retried = harness.service.retry_restore("rollback", false).await.unwrap();
    assert_eq!(retried.status, Status::Completed);
    assert!(retried.logical_restores[0].databases[0].registered);
    assert_eq!(Calls::get(&harness.adapter("pg-a").calls.restore_start), 2);
}

#[tokio::test]
async fn test_tracking_registers_completed_restore() {
    let harness = Harness::new(vec![MockAdapter::scripted(
        "pg-a",
        Script {
            restore_start_status: Status::InProgress,
            restore_track_status: Status::Completed,
            ..Default::default()
        },
    )])
    .await;
    harness
        .register(database("orders", "pg-a", &[classifier("prod", "orders")]))
        .await;
    harness
        .service
        .backup(backup_request("nightly", namespaces(&["prod"])), false)
        .await
        .unwrap();

    let started = harness
        .service
        .restore("nightly", restore_request("clone", map_namespace("prod", "qa")), false)
        .await
        .unwrap();
    assert_eq!(started.status, Status::InProgress);
    assert!(harness
        .store
        .find_by_classifier(&classifier("qa", "orders"))
        .await
        .unwrap()
        .is_none());

    let report = harness.service.track_pending().await.unwrap();
    assert_eq!(report.restores, 1);

    let done = harness.service.get_restore("clone").await.unwrap();
    assert_eq!(done.status, Status::Completed);
    assert_eq!(done.attempt_count, 1);
    assert!(harness
        .store
        .find_by_classifier(&classifier("qa", "orders"))
        .await
        .unwrap()
        .is_some());
}

#[tokio::test]
async fn test_external_databases_on_restore() {
    let harness = Harness::new(vec![MockAdapter::new("pg-a")]).await;
    harness
        .register(database("orders", "pg-a", &[classifier("prod", "orders")]))
        .await;
    let mut external = database("legacy", "pg-a", &[classifier("prod", "legacy")]);
    external.adapter_id = None;
    external.externally_manageable = true;
    harness.register(external).await;

    let mut request = backup_request("nightly", namespaces(&["prod"]));
    request.external_database_strategy = ExternalDatabaseStrategy::Include;
    harness.service.backup(request, false).await.unwrap();

    let err = harness
        .service
        .restore("nightly", restore_request("strict", map_namespace("prod", "dr")), false)
        .await
        .unwrap_err();
    assert!(matches!(err, BackupError::ValidationConflict(_)));

    let mut request = restore_request("lenient", map_namespace("prod", "dr"));
    request.external_database_strategy = ExternalDatabaseStrategy::Include;
    let restore = harness.service.restore("nightly", request, false).await.unwrap();
    assert_eq!(restore.status, Status::Completed);
    assert!(restore.external_databases[0].registered);

    let registered = harness
        .store
        .find_by_classifier(&classifier("dr", "legacy"))
        .await
        .unwrap()
        .unwrap();
    assert!(registered.externally_manageable);
    assert_eq!(registered.name, "legacy");
}

async fn flaky_harness(adapters: Vec<MockAdapter>) -> (Harness, Arc<FlakyRegistry>) {
    let store = InMemoryStore::new();
    let registry = Arc::new(FlakyRegistry::new(store.clone()));
    let harness = Harness::with_stores(
        adapters,
        store.clone(),
        Arc::new(store),
        registry.clone(),
    )
    .await;
    (harness, registry)
}

#[tokio::test]
async fn test_failed_registration_keeps_previous_database_live() {
    let (harness, registry) = flaky_harness(vec![MockAdapter::new("pg-a")]).await;
    let original = harness
        .register(database(
            "orders",
            "pg-a",
            &[classifier("prod", "orders"), classifier("analytics", "orders")],
        ))
        .await;
    harness
        .service
        .backup(backup_request("nightly", namespaces(&["prod"])), false)
        .await
        .unwrap();

    registry.fail_for("prod-orders");
    let failed = harness
        .service
        .restore("nightly", restore_request("rollback", Mapping::default()), false)
        .await
        .unwrap();
    assert_eq!(failed.status, Status::Failed);
    assert!(!failed.logical_restores[0].databases[0].registered);
    let message = failed.error_message.unwrap();
    assert!(message.contains("Registration failed"), "{}", message);
    assert!(!message.contains("unknown error"), "{}", message);

    let live = harness
        .store
        .find_by_classifier(&classifier("analytics", "orders"))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(live.id, original.id);
    assert!(!harness.store.database(original.id).await.unwrap().marked_for_drop);

    registry.heal();
    let retried = harness.service.retry_restore("rollback", false).await.unwrap();
    assert_eq!(retried.status, Status::Completed);
    let restored_id = retried.logical_restores[0].databases[0].database_id.unwrap();

    let carried = harness
        .store
        .find_by_classifier(&classifier("analytics", "orders"))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(carried.id, restored_id);
    assert!(harness.store.database(original.id).await.unwrap().marked_for_drop);
}

#[tokio::test]
async fn test_shared_database_is_restored_per_namespace() {
    let harness = Harness::new(vec![MockAdapter::new("pg-a")]).await;
    let original = harness
        .register(database(
            "orders",
            "pg-a",
            &[classifier("prod", "orders"), classifier("analytics", "orders")],
        ))
        .await;
    harness
        .service
        .backup(backup_request("nightly", namespaces(&["prod", "analytics"])), false)
        .await
        .unwrap();

    let restore = harness
        .service
        .restore("nightly", restore_request("split", Mapping::default()), false)
        .await
        .unwrap();
    assert_eq!(restore.status, Status::Completed);
    assert_eq!(restore.logical_restores.len(), 2);
    assert_eq!(restore.total, 2);

    let prod = harness
        .store
        .find_by_classifier(&classifier("prod", "orders"))
        .await
        .unwrap()
        .unwrap();
    let analytics = harness
        .store
        .find_by_classifier(&classifier("analytics", "orders"))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(prod.name, "prod-orders");
    assert_eq!(analytics.name, "analytics-orders");
    assert!(!prod.marked_for_drop);
    assert!(!analytics.marked_for_drop);
    assert_eq!(prod.live_registrations().count(), 1);
    assert_eq!(analytics.live_registrations().count(), 1);

    assert!(harness.store.database(original.id).await.unwrap().marked_for_drop);
    assert_eq!(harness.store.list_databases().await.unwrap().len(), 3);
}

#[tokio::test]
async fn test_retry_leaves_completed_groups_untouched() {
    let harness = Harness::new(vec![MockAdapter::new("pg-a")]).await;
    harness
        .register(database("orders", "pg-a", &[classifier("prod", "orders")]))
        .await;
    harness
        .register(database("billing", "pg-a", &[classifier("analytics", "billing")]))
        .await;
    harness
        .service
        .backup(backup_request("nightly", namespaces(&["prod", "analytics"])), false)
        .await
        .unwrap();

    let adapter = harness.adapter("pg-a");
    adapter.update(|script| script.failing_namespaces = vec!["prod".to_string()]);
    let failed = harness
        .service
        .restore("nightly", restore_request("partial", Mapping::default()), false)
        .await
        .unwrap();
    assert_eq!(failed.status, Status::Failed);
    assert_eq!(Calls::get(&adapter.calls.restore_start), 2);

    let completed = failed
        .logical_restores
        .iter()
        .find(|lr| lr.target_namespace == "analytics")
        .unwrap()
        .clone();
    assert_eq!(completed.status, Status::Completed);
    assert_eq!(completed.databases[0].name, "analytics-billing");
    assert!(completed.databases[0].registered);
    let users_before = Calls::get(&adapter.calls.ensure_user);

    adapter.update(|script| script.failing_namespaces.clear());
    let retried = harness.service.retry_restore("partial", false).await.unwrap();
    assert_eq!(retried.status, Status::Completed);
    assert_eq!(Calls::get(&adapter.calls.restore_start), 3);
    assert_eq!(Calls::get(&adapter.calls.ensure_user), users_before + 1);

    let untouched = retried
        .logical_restores
        .iter()
        .find(|lr| lr.target_namespace == "analytics")
        .unwrap();
    assert_eq!(untouched, &completed);
}

#[tokio::test]
async fn test_failed_external_registration_fails_restore() {
    let (harness, registry) = flaky_harness(vec![MockAdapter::new("pg-a")]).await;
    harness
        .register(database("orders", "pg-a", &[classifier("prod", "orders")]))
        .await;
    let mut external = database("legacy", "pg-a", &[classifier("prod", "legacy")]);
    external.adapter_id = None;
    external.externally_manageable = true;
    harness.register(external).await;

    let mut request = backup_request("nightly", namespaces(&["prod"]));
    request.external_database_strategy = ExternalDatabaseStrategy::Include;
    harness.service.backup(request, false).await.unwrap();

    registry.fail_for("legacy");
    let mut request = restore_request("dr", map_namespace("prod", "dr"));
    request.external_database_strategy = ExternalDatabaseStrategy::Include;
    let failed = harness.service.restore("nightly", request, false).await.unwrap();
    assert_eq!(failed.status, Status::Failed);
    assert_eq!(failed.logical_restores[0].status, Status::Completed);
    assert!(!failed.external_databases[0].registered);
    let message = failed.error_message.unwrap();
    assert!(message.contains("External database legacy failed"), "{}", message);
    assert!(harness
        .store
        .find_by_classifier(&classifier("dr", "legacy"))
        .await
        .unwrap()
        .is_none());

    registry.heal();
    let retried = harness.service.retry_restore("dr", false).await.unwrap();
    assert_eq!(retried.status, Status::Completed);
    assert!(retried.external_databases[0].registered);
    assert_eq!(Calls::get(&harness.adapter("pg-a").calls.restore_start), 1);
    assert!(harness
        .store
        .find_by_classifier(&classifier("dr", "legacy"))
        .await
        .unwrap()
        .is_some());
}

#[tokio::test]
async fn test_concurrent_restores_with_same_name() {
    let store = InMemoryStore::new();
    let harness = Harness::with_stores(
        vec![MockAdapter::new("pg-a")],
        store.clone(),
        Arc::new(SlowRepository {
            store: store.clone(),
            delay: Duration::from_millis(20),
        }),
        Arc::new(store),
    )
    .await;
    harness
        .register(database("orders", "pg-a", &[classifier("prod", "orders")]))
        .await;
    harness
        .service
        .backup(backup_request("nightly", namespaces(&["prod"])), false)
        .await
        .unwrap();

    let (a, b) = tokio::join!(
        harness
            .service
            .restore("nightly", restore_request("twin", Mapping::default()), false),
        harness
            .service
            .restore("nightly", restore_request("twin", Mapping::default()), false),
    );
    let results = [a, b];
    assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
    assert!(results
        .iter()
        .any(|r| matches!(r, Err(BackupError::AlreadyExists { .. }))));
    assert_eq!(Calls::get(&harness.adapter("pg-a").calls.restore_start), 1);
}
