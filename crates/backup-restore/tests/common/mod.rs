/*
 * SPDX-FileCopyrightText: 2020 Stalwart Labs Ltd <hello@stalw.art>
 *
 * SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-SEL
 */

//! Scripted adapters and a service harness shared by the integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use backup_restore::{
    adapter::{
        BackupDatabaseStatus, LogicalBackupStatus, LogicalRestoreStatus, RestoreDatabaseStatus,
        RestoreTarget,
    },
    config::{BackupRestoreConfig, RetryConfig},
    model::{
        classifier::{MICROSERVICE_NAME, NAMESPACE, TENANT_ID},
        Backup, BackupRequest, Classifier, Credentials, Database, ExternalDatabaseStrategy,
        Restore,
    },
    Adapter, AdapterDirectory, BackupError, BackupRestoreService, BalancingRules, Collaborators,
    BackupRepository, DatabaseRegistry, FilterCriteria, InMemoryStore, PhysicalDatabaseRef, Result,
    Status,
};
use std::{
    collections::{BTreeMap, HashMap},
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Mutex,
    },
    time::Duration,
};

/// How a mock adapter answers
#[derive(Debug, Clone)]
pub struct Script {
    pub supports_backup: bool,
    pub backup_start_error: Option<String>,
    pub backup_start_status: Status,
    pub backup_track_status: Status,
    pub track_delay: Duration,
    pub delete_error: Option<String>,
    pub restore_start_error: Option<String>,
    pub restore_start_status: Status,
    pub restore_track_status: Status,
    /// Restore starts targeting these namespaces are rejected
    pub failing_namespaces: Vec<String>,
}

impl Default for Script {
    fn default() -> Self {
        Self {
            supports_backup: true,
            backup_start_error: None,
            backup_start_status: Status::Completed,
            backup_track_status: Status::Completed,
            track_delay: Duration::ZERO,
            delete_error: None,
            restore_start_error: None,
            restore_start_status: Status::Completed,
            restore_track_status: Status::Completed,
            failing_namespaces: Vec::new(),
        }
    }
}

#[derive(Debug, Default)]
pub struct Calls {
    pub backup_start: AtomicUsize,
    pub backup_track: AtomicUsize,
    pub backup_delete: AtomicUsize,
    pub restore_start: AtomicUsize,
    pub restore_track: AtomicUsize,
    pub ensure_user: AtomicUsize,
}

impl Calls {
    pub fn get(counter: &AtomicUsize) -> usize {
        counter.load(Ordering::SeqCst)
    }
}

#[derive(Debug)]
pub struct MockAdapter {
    id: String,
    script: Mutex<Script>,
    backups: Mutex<HashMap<String, Vec<String>>>,
    restores: Mutex<HashMap<String, Vec<(String, String)>>>,
    pub calls: Calls,
}

impl MockAdapter {
    pub fn new(id: &str) -> Self {
        Self::scripted(id, Script::default())
    }

    pub fn scripted(id: &str, script: Script) -> Self {
        Self {
            id: id.to_string(),
            script: Mutex::new(script),
            backups: Mutex::new(HashMap::new()),
            restores: Mutex::new(HashMap::new()),
            calls: Calls::default(),
        }
    }

    pub fn script(&self) -> Script {
        self.script.lock().unwrap().clone()
    }

    pub fn update(&self, change: impl FnOnce(&mut Script)) {
        change(&mut self.script.lock().unwrap());
    }

    fn backup_report(&self, backup_id: &str, status: Status) -> LogicalBackupStatus {
        let names = self
            .backups
            .lock()
            .unwrap()
            .get(backup_id)
            .cloned()
            .unwrap_or_default();
        LogicalBackupStatus {
            backup_id: backup_id.to_string(),
            status,
            error_message: None,
            creation_time: None,
            completion_time: None,
            databases: names
                .into_iter()
                .map(|name| BackupDatabaseStatus {
                    path: Some(format!("/{}/{}", backup_id, name)),
                    database_name: name,
                    status,
                    size: 10,
                    duration_ms: 5,
                    error_message: None,
                })
                .collect(),
        }
    }

    fn restore_report(&self, restore_id: &str, status: Status) -> LogicalRestoreStatus {
        let names = self
            .restores
            .lock()
            .unwrap()
            .get(restore_id)
            .cloned()
            .unwrap_or_default();
        LogicalRestoreStatus {
            restore_id: restore_id.to_string(),
            status,
            error_message: None,
            creation_time: None,
            completion_time: None,
            databases: names
                .into_iter()
                .map(|(previous, restored)| RestoreDatabaseStatus {
                    previous_database_name: previous,
                    database_name: Some(restored),
                    status,
                    duration_ms: 5,
                    path: None,
                    error_message: None,
                })
                .collect(),
        }
    }
}

#[async_trait]
impl Adapter for MockAdapter {
    fn id(&self) -> &str {
        &self.id
    }

    async fn supports_backup_restore(&self) -> Result<bool> {
        Ok(self.script().supports_backup)
    }

    async fn backup_start(
        &self,
        _storage_name: &str,
        _blob_path: &str,
        database_names: &[String],
    ) -> Result<Option<LogicalBackupStatus>> {
        let call = self.calls.backup_start.fetch_add(1, Ordering::SeqCst);
        let script = self.script();
        if let Some(message) = script.backup_start_error {
            return Err(BackupError::rejected(&self.id, message));
        }

        let backup_id = format!("{}-backup-{}", self.id, call);
        self.backups
            .lock()
            .unwrap()
            .insert(backup_id.clone(), database_names.to_vec());
        Ok(Some(self.backup_report(&backup_id, script.backup_start_status)))
    }

    async fn backup_track(&self, backup_id: &str) -> Result<Option<LogicalBackupStatus>> {
        self.calls.backup_track.fetch_add(1, Ordering::SeqCst);
        let script = self.script();
        if !script.track_delay.is_zero() {
            tokio::time::sleep(script.track_delay).await;
        }
        Ok(Some(self.backup_report(backup_id, script.backup_track_status)))
    }

    async fn backup_delete(&self, _backup_id: &str) -> Result<()> {
        self.calls.backup_delete.fetch_add(1, Ordering::SeqCst);
        match self.script().delete_error {
            Some(message) => Err(BackupError::rejected(&self.id, message)),
            None => Ok(()),
        }
    }

    async fn restore_start(
        &self,
        _backup_id: &str,
        _storage_name: &str,
        _blob_path: &str,
        targets: &[RestoreTarget],
    ) -> Result<Option<LogicalRestoreStatus>> {
        let call = self.calls.restore_start.fetch_add(1, Ordering::SeqCst);
        let script = self.script();
        if let Some(message) = script.restore_start_error {
            return Err(BackupError::rejected(&self.id, message));
        }
        if let Some(target) = targets
            .iter()
            .find(|t| script.failing_namespaces.contains(&t.namespace))
        {
            return Err(BackupError::rejected(
                &self.id,
                format!("namespace {} unavailable", target.namespace),
            ));
        }

        let restore_id = format!("{}-restore-{}", self.id, call);
        self.restores.lock().unwrap().insert(
            restore_id.clone(),
            targets
                .iter()
                .map(|t| {
                    (
                        t.previous_database_name.clone(),
                        format!("{}-{}", t.namespace, t.previous_database_name),
                    )
                })
                .collect(),
        );
        Ok(Some(self.restore_report(&restore_id, script.restore_start_status)))
    }

    async fn restore_track(&self, restore_id: &str) -> Result<Option<LogicalRestoreStatus>> {
        self.calls.restore_track.fetch_add(1, Ordering::SeqCst);
        let status = self.script().restore_track_status;
        Ok(Some(self.restore_report(restore_id, status)))
    }

    async fn ensure_user(
        &self,
        _username: Option<&str>,
        _password: Option<&str>,
        database_name: &str,
        role: &str,
    ) -> Result<Credentials> {
        let call = self.calls.ensure_user.fetch_add(1, Ordering::SeqCst);
        Ok(Credentials {
            username: format!("{}-{}-{}", database_name, role, call),
            password: "generated".to_string(),
            role: role.to_string(),
            connection_properties: BTreeMap::new(),
        })
    }
}

#[derive(Debug, Default)]
pub struct MockDirectory {
    adapters: HashMap<String, Arc<MockAdapter>>,
}

#[async_trait]
impl AdapterDirectory for MockDirectory {
    async fn get_adapter(&self, adapter_id: &str) -> Result<Arc<dyn Adapter>> {
        self.adapters
            .get(adapter_id)
            .cloned()
            .map(|adapter| adapter as Arc<dyn Adapter>)
            .ok_or_else(|| BackupError::NotFound(format!("Adapter {} not found", adapter_id)))
    }
}

/// Places every restored database on one adapter
#[derive(Debug)]
pub struct FixedBalancing {
    pub adapter_id: String,
}

#[async_trait]
impl BalancingRules for FixedBalancing {
    async fn choose_adapter(
        &self,
        _db_type: &str,
        _namespace: &str,
        _microservice_name: Option<&str>,
    ) -> Result<PhysicalDatabaseRef> {
        Ok(PhysicalDatabaseRef {
            physical_database_id: format!("phys-{}", self.adapter_id),
            adapter_id: self.adapter_id.clone(),
        })
    }
}

/// Registry whose replacements fail for the listed database names
#[derive(Debug, Default)]
pub struct FlakyRegistry {
    pub store: InMemoryStore,
    failing: Mutex<Vec<String>>,
}

impl FlakyRegistry {
    pub fn new(store: InMemoryStore) -> Self {
        Self {
            store,
            failing: Mutex::new(Vec::new()),
        }
    }

    pub fn fail_for(&self, name: &str) {
        self.failing.lock().unwrap().push(name.to_string());
    }

    pub fn heal(&self) {
        self.failing.lock().unwrap().clear();
    }
}

#[async_trait]
impl DatabaseRegistry for FlakyRegistry {
    async fn list_databases(&self) -> Result<Vec<Database>> {
        self.store.list_databases().await
    }

    async fn find_by_classifier(&self, classifier: &Classifier) -> Result<Option<Database>> {
        self.store.find_by_classifier(classifier).await
    }

    async fn find_by_name(&self, name: &str, adapter_id: &str) -> Result<Option<Database>> {
        self.store.find_by_name(name, adapter_id).await
    }

    async fn save_database(&self, database: &Database) -> Result<()> {
        self.store.save_database(database).await
    }

    async fn replace_databases(&self, database: &Database, superseded: &[Database]) -> Result<()> {
        if self.failing.lock().unwrap().contains(&database.name) {
            return Err(BackupError::transport("registry", "connection reset"));
        }
        self.store.replace_databases(database, superseded).await
    }
}

/// Repository that answers name lookups slowly
#[derive(Debug)]
pub struct SlowRepository {
    pub store: InMemoryStore,
    pub delay: Duration,
}

#[async_trait]
impl BackupRepository for SlowRepository {
    async fn get_backup(&self, name: &str) -> Result<Option<Backup>> {
        tokio::time::sleep(self.delay).await;
        self.store.get_backup(name).await
    }

    async fn create_backup(&self, backup: &Backup) -> Result<()> {
        self.store.create_backup(backup).await
    }

    async fn save_backup(&self, backup: &Backup) -> Result<()> {
        self.store.save_backup(backup).await
    }

    async fn delete_backup(&self, name: &str) -> Result<bool> {
        self.store.delete_backup(name).await
    }

    async fn find_pending_backups(&self) -> Result<Vec<Backup>> {
        self.store.find_pending_backups().await
    }

    async fn get_restore(&self, name: &str) -> Result<Option<Restore>> {
        tokio::time::sleep(self.delay).await;
        self.store.get_restore(name).await
    }

    async fn create_restore(&self, restore: &Restore) -> Result<()> {
        self.store.create_restore(restore).await
    }

    async fn save_restore(&self, restore: &Restore) -> Result<()> {
        self.store.save_restore(restore).await
    }

    async fn find_pending_restores(&self) -> Result<Vec<Restore>> {
        self.store.find_pending_restores().await
    }
}

pub struct Harness {
    pub service: BackupRestoreService,
    pub store: InMemoryStore,
    pub adapters: HashMap<String, Arc<MockAdapter>>,
}

impl Harness {
    /// Service over the given adapters; restores are placed on the first one
    pub async fn new(adapters: Vec<MockAdapter>) -> Self {
        let store = InMemoryStore::new();
        Self::build(adapters, store.clone(), |directory, balancing| {
            Collaborators::in_memory(store, directory, balancing)
        })
        .await
    }

    /// Like `new`, with the repository and registry wrapping `store`
    pub async fn with_stores(
        adapters: Vec<MockAdapter>,
        store: InMemoryStore,
        repository: Arc<dyn BackupRepository>,
        registry: Arc<dyn DatabaseRegistry>,
    ) -> Self {
        Self::build(adapters, store, |directory, balancing| {
            Collaborators::new(repository, registry, directory, balancing)
        })
        .await
    }

    async fn build<F>(
        adapters: Vec<MockAdapter>,
        store: InMemoryStore,
        collaborators: F,
    ) -> Self
    where
        F: FnOnce(Arc<dyn AdapterDirectory>, Arc<dyn BalancingRules>) -> Collaborators,
    {
        let adapters: HashMap<String, Arc<MockAdapter>> = adapters
            .into_iter()
            .map(|adapter| (adapter.id.clone(), Arc::new(adapter)))
            .collect();
        let mut ids: Vec<&String> = adapters.keys().collect();
        ids.sort();
        let balancing = FixedBalancing {
            adapter_id: ids.first().map(|id| id.to_string()).unwrap_or_default(),
        };

        let collaborators = collaborators(
            Arc::new(MockDirectory {
                adapters: adapters.clone(),
            }),
            Arc::new(balancing),
        );
        let service = BackupRestoreService::new(test_config(), collaborators)
            .await
            .unwrap();

        Self {
            service,
            store,
            adapters,
        }
    }

    pub fn adapter(&self, id: &str) -> &MockAdapter {
        self.adapters.get(id).unwrap()
    }

    pub async fn register(&self, database: Database) -> Database {
        self.store.save_database(&database).await.unwrap();
        database
    }
}

pub fn test_config() -> BackupRestoreConfig {
    let mut config = BackupRestoreConfig::default();
    config.executor.retry = RetryConfig {
        max_attempts: 2,
        delay_ms: 1,
    };
    config
}

pub fn classifier(namespace: &str, microservice: &str) -> Classifier {
    Classifier::new()
        .with(NAMESPACE, namespace)
        .with(MICROSERVICE_NAME, microservice)
}

pub fn tenant_classifier(namespace: &str, microservice: &str, tenant: &str) -> Classifier {
    classifier(namespace, microservice).with(TENANT_ID, tenant)
}

pub fn database(name: &str, adapter_id: &str, classifiers: &[Classifier]) -> Database {
    let mut database = Database::new(name, "postgresql").on_adapter(adapter_id);
    database.physical_database_id = Some(format!("phys-{}", adapter_id));
    database.users = vec![Credentials {
        username: format!("{}-owner", name),
        password: "secret".to_string(),
        role: "admin".to_string(),
        connection_properties: BTreeMap::new(),
    }];
    for classifier in classifiers {
        database = database.registered_as(classifier.clone());
    }
    database
}

pub fn backup_request(name: &str, criteria: FilterCriteria) -> BackupRequest {
    BackupRequest {
        backup_name: name.to_string(),
        storage_name: "s3-main".to_string(),
        blob_path: format!("/backups/{}", name),
        filter_criteria: criteria,
        external_database_strategy: ExternalDatabaseStrategy::Fail,
        ignore_not_backupable_databases: false,
    }
}
