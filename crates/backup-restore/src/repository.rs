/*
 * SPDX-FileCopyrightText: 2020 Stalwart Labs Ltd <hello@stalw.art>
 *
 * SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-SEL
 */

//! Persistence abstraction for aggregates and the logical database registry

use crate::{
    error::{BackupError, Result},
    model::{Backup, Classifier, Database, Restore},
    status::Status,
};
use async_trait::async_trait;
use std::{
    collections::{hash_map::Entry, HashMap},
    sync::Arc,
};
use tokio::sync::RwLock;
use uuid::Uuid;

/// Storage of backup and restore aggregates. Saves replace the whole aggregate.
#[async_trait]
pub trait BackupRepository: Send + Sync + std::fmt::Debug {
    async fn get_backup(&self, name: &str) -> Result<Option<Backup>>;

    /// Insert a new backup, failing with `AlreadyExists` if the name is taken
    async fn create_backup(&self, backup: &Backup) -> Result<()>;

    async fn save_backup(&self, backup: &Backup) -> Result<()>;

    async fn delete_backup(&self, name: &str) -> Result<bool>;

    /// Backups that have not reached a terminal status
    async fn find_pending_backups(&self) -> Result<Vec<Backup>>;

    async fn get_restore(&self, name: &str) -> Result<Option<Restore>>;

    /// Insert a new restore, failing with `AlreadyExists` if the name is taken
    async fn create_restore(&self, restore: &Restore) -> Result<()>;

    async fn save_restore(&self, restore: &Restore) -> Result<()>;

    /// Restores that have not reached a terminal status
    async fn find_pending_restores(&self) -> Result<Vec<Restore>>;
}

/// Registry of live logical databases
#[async_trait]
pub trait DatabaseRegistry: Send + Sync + std::fmt::Debug {
    /// Every database, including ones marked for drop
    async fn list_databases(&self) -> Result<Vec<Database>>;

    /// Live database holding the classifier, if any
    async fn find_by_classifier(&self, classifier: &Classifier) -> Result<Option<Database>>;

    /// Live database with that name on that adapter, if any
    async fn find_by_name(&self, name: &str, adapter_id: &str) -> Result<Option<Database>>;

    async fn save_database(&self, database: &Database) -> Result<()>;

    /// Save a new database together with the rows it supersedes, all or nothing
    async fn replace_databases(&self, database: &Database, superseded: &[Database]) -> Result<()>;
}

/// Process-local store implementing both repositories
#[derive(Debug, Clone, Default)]
pub struct InMemoryStore {
    backups: Arc<RwLock<HashMap<String, Backup>>>,
    restores: Arc<RwLock<HashMap<String, Restore>>>,
    databases: Arc<RwLock<Vec<Database>>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn database(&self, id: Uuid) -> Option<Database> {
        self.databases.read().await.iter().find(|db| db.id == id).cloned()
    }
}

#[async_trait]
impl BackupRepository for InMemoryStore {
    async fn get_backup(&self, name: &str) -> Result<Option<Backup>> {
        Ok(self.backups.read().await.get(name).cloned())
    }

    async fn create_backup(&self, backup: &Backup) -> Result<()> {
        match self.backups.write().await.entry(backup.name.clone()) {
            Entry::Occupied(_) => Err(BackupError::AlreadyExists {
                entity: "Backup",
                name: backup.name.clone(),
            }),
            Entry::Vacant(entry) => {
                entry.insert(backup.clone());
                Ok(())
            }
        }
    }

    async fn save_backup(&self, backup: &Backup) -> Result<()> {
        self.backups
            .write()
            .await
            .insert(backup.name.clone(), backup.clone());
        Ok(())
    }

    async fn delete_backup(&self, name: &str) -> Result<bool> {
        Ok(self.backups.write().await.remove(name).is_some())
    }

    async fn find_pending_backups(&self) -> Result<Vec<Backup>> {
        let mut pending: Vec<Backup> = self
            .backups
            .read()
            .await
            .values()
            .filter(|b| !b.status.is_terminal() && b.status != Status::DeleteInProgress)
            .cloned()
            .collect();
        pending.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(pending)
    }

    async fn get_restore(&self, name: &str) -> Result<Option<Restore>> {
        Ok(self.restores.read().await.get(name).cloned())
    }

    async fn create_restore(&self, restore: &Restore) -> Result<()> {
        match self.restores.write().await.entry(restore.name.clone()) {
            Entry::Occupied(_) => Err(BackupError::AlreadyExists {
                entity: "Restore",
                name: restore.name.clone(),
            }),
            Entry::Vacant(entry) => {
                entry.insert(restore.clone());
                Ok(())
            }
        }
    }

    async fn save_restore(&self, restore: &Restore) -> Result<()> {
        self.restores
            .write()
            .await
            .insert(restore.name.clone(), restore.clone());
        Ok(())
    }

    async fn find_pending_restores(&self) -> Result<Vec<Restore>> {
        let mut pending: Vec<Restore> = self
            .restores
            .read()
            .await
            .values()
            .filter(|r| !r.status.is_terminal())
            .cloned()
            .collect();
        pending.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(pending)
    }
}

#[async_trait]
impl DatabaseRegistry for InMemoryStore {
    async fn list_databases(&self) -> Result<Vec<Database>> {
        Ok(self.databases.read().await.clone())
    }

    async fn find_by_classifier(&self, classifier: &Classifier) -> Result<Option<Database>> {
        Ok(self
            .databases
            .read()
            .await
            .iter()
            .find(|db| db.holds(classifier))
            .cloned())
    }

    async fn find_by_name(&self, name: &str, adapter_id: &str) -> Result<Option<Database>> {
        Ok(self
            .databases
            .read()
            .await
            .iter()
            .find(|db| {
                !db.marked_for_drop
                    && db.name == name
                    && db.adapter_id.as_deref() == Some(adapter_id)
            })
            .cloned())
    }

    async fn save_database(&self, database: &Database) -> Result<()> {
        upsert(&mut *self.databases.write().await, database);
        Ok(())
    }

    async fn replace_databases(&self, database: &Database, superseded: &[Database]) -> Result<()> {
        let mut databases = self.databases.write().await;
        for old in superseded {
            upsert(&mut databases, old);
        }
        upsert(&mut databases, database);
        Ok(())
    }
}

fn upsert(databases: &mut Vec<Database>, database: &Database) {
    match databases.iter_mut().find(|db| db.id == database.id) {
        Some(existing) => *existing = database.clone(),
        None => databases.push(database.clone()),
    }
}

/// Load a backup or fail with `NotFound`
pub(crate) async fn require_backup(
    repository: &dyn BackupRepository,
    name: &str,
) -> Result<Backup> {
    repository
        .get_backup(name)
        .await?
        .ok_or_else(|| BackupError::NotFound(format!("Backup with name {} not found", name)))
}

/// Load a restore or fail with `NotFound`
pub(crate) async fn require_restore(
    repository: &dyn BackupRepository,
    name: &str,
) -> Result<Restore> {
    repository
        .get_restore(name)
        .await?
        .ok_or_else(|| BackupError::NotFound(format!("Restore with name {} not found", name)))
}
