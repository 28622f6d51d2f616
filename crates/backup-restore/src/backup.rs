/*
 * SPDX-FileCopyrightText: 2020 Stalwart Labs Ltd <hello@stalw.art>
 *
 * SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-SEL
 */

//! Backup management module

use crate::{
    adapter::LogicalBackupStatus,
    error::{BackupError, Result},
    executor::FanOutExecutor,
    model::{
        Backup, BackupDatabase, BackupExternalDatabase, BackupRequest, BackupStatusView,
        ExternalDatabaseStrategy, LogicalBackup,
    },
    repository::require_backup,
    selector::{select_databases, DatabaseSelection},
    status::Status,
    Collaborators,
};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, HashMap};
use tracing::{debug, error, info, warn};

/// Backup manager responsible for creating, tracking and deleting backups
#[derive(Debug)]
pub struct BackupManager {
    ctx: Collaborators,
    executor: FanOutExecutor,
}

/// Exported backup description with an integrity digest
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackupMetadata {
    pub backup: Backup,
    pub digest: String,
}

/// One adapter call on behalf of a logical backup
#[derive(Debug, Clone)]
struct AdapterUnit {
    index: usize,
    adapter_id: String,
    operation: Option<String>,
    databases: Vec<String>,
}

impl BackupManager {
    pub fn new(ctx: Collaborators, executor: FanOutExecutor) -> Self {
        Self { ctx, executor }
    }

    /// Back up every database matching the request filter.
    ///
    /// A dry run builds the same aggregate without persisting it and without
    /// starting anything on the adapters.
    pub async fn backup(&self, request: BackupRequest, dry_run: bool) -> Result<Backup> {
        info!(
            "Starting backup {} (dry run: {})",
            request.backup_name, dry_run
        );

        if self.ctx.repository.get_backup(&request.backup_name).await?.is_some() {
            return Err(BackupError::AlreadyExists {
                entity: "Backup",
                name: request.backup_name,
            });
        }

        let databases = self.ctx.registry.list_databases().await?;
        let selected = select_databases(&databases, &request.filter_criteria);
        if selected.is_empty() {
            return Err(BackupError::NotFound(format!(
                "No databases match the filter of backup {}",
                request.backup_name
            )));
        }

        let mut backup = Backup::new(&request);
        let internal = self.split_external(&mut backup, selected)?;
        let internal = self
            .filter_backupable(&request, internal, !backup.external_databases.is_empty())
            .await?;
        backup.logical_backups = group_by_adapter(internal);
        backup.rollup();

        if dry_run {
            info!(
                "Dry run of backup {} would cover {} databases on {} adapters",
                backup.name,
                backup.total,
                backup.logical_backups.len()
            );
            return Ok(backup);
        }

        self.ctx.repository.create_backup(&backup).await?;
        self.start(&mut backup).await;
        backup.rollup();
        self.ctx.repository.save_backup(&backup).await?;

        info!(
            "Backup {} started with status {:?} ({}/{} databases completed)",
            backup.name, backup.status, backup.completed, backup.total
        );
        Ok(backup)
    }

    /// Poll adapters for logical backups still in flight and persist the result
    pub async fn track(&self, mut backup: Backup) -> Result<Backup> {
        if backup.attempts_exceeded() {
            warn!(
                "Backup {} exceeded the attempt limit and is marked failed",
                backup.name
            );
            backup.rollup();
            self.ctx.repository.save_backup(&backup).await?;
            return Ok(backup);
        }

        let units: Vec<AdapterUnit> = backup
            .logical_backups
            .iter()
            .enumerate()
            .filter(|(_, lb)| lb.status.is_trackable())
            .filter_map(|(index, lb)| {
                lb.logical_backup_name.as_ref().map(|name| AdapterUnit {
                    index,
                    adapter_id: lb.adapter_id.clone(),
                    operation: Some(name.clone()),
                    databases: Vec::new(),
                })
            })
            .collect();
        debug!(
            "Tracking {} logical backups of backup {}",
            units.len(),
            backup.name
        );

        let adapters = self.ctx.adapters.clone();
        let results = self
            .executor
            .execute(units, move |unit| {
                let adapters = adapters.clone();
                async move {
                    let adapter = adapters.get_adapter(&unit.adapter_id).await?;
                    let operation = unit.operation.as_deref().unwrap_or_default();
                    adapter.backup_track(operation).await?.ok_or_else(|| {
                        BackupError::rejected(&unit.adapter_id, "Empty response on backup track")
                    })
                }
            })
            .await;
        apply_results(&mut backup, results);

        backup.attempt_count += 1;
        backup.rollup();
        self.ctx.repository.save_backup(&backup).await?;
        Ok(backup)
    }

    /// Delete backup artifacts on every adapter, then soft-delete the backup.
    ///
    /// Without `force`, any adapter failure aborts and leaves the backup as is.
    pub async fn delete_backup(&self, name: &str, force: bool) -> Result<Backup> {
        let mut backup = require_backup(self.ctx.repository.as_ref(), name).await?;
        if backup.status == Status::Deleted {
            debug!("Backup {} is already deleted", name);
            return Ok(backup);
        }
        if backup.status.is_trackable() && !force {
            return Err(BackupError::IllegalState(format!(
                "Backup {} is still in progress",
                name
            )));
        }
        info!("Deleting backup {} (force: {})", name, force);

        let units: Vec<AdapterUnit> = backup
            .logical_backups
            .iter()
            .enumerate()
            .filter_map(|(index, lb)| {
                lb.logical_backup_name.as_ref().map(|operation| AdapterUnit {
                    index,
                    adapter_id: lb.adapter_id.clone(),
                    operation: Some(operation.clone()),
                    databases: Vec::new(),
                })
            })
            .collect();

        let adapters = self.ctx.adapters.clone();
        let results = self
            .executor
            .execute(units, move |unit| {
                let adapters = adapters.clone();
                async move {
                    let adapter = adapters.get_adapter(&unit.adapter_id).await?;
                    adapter
                        .backup_delete(unit.operation.as_deref().unwrap_or_default())
                        .await
                }
            })
            .await;

        let failures: BTreeMap<String, String> = results
            .into_iter()
            .filter_map(|(unit, result)| {
                result
                    .err()
                    .map(|err| (unit.adapter_id, err.status_message()))
            })
            .collect();

        if failures.is_empty() {
            backup.status = Status::Deleted;
        } else {
            let summary = failures
                .iter()
                .map(|(adapter, message)| format!("{}: {}", adapter, message))
                .collect::<Vec<_>>()
                .join("; ");
            if !force {
                error!("Deletion of backup {} failed: {}", name, summary);
                return Err(BackupError::rejected(
                    failures.keys().cloned().collect::<Vec<_>>().join(", "),
                    format!("Failed to delete backup {}: {}", name, summary),
                ));
            }
            warn!(
                "Forced deletion of backup {} left artifacts behind: {}",
                name, summary
            );
            backup.status = Status::DeleteInProgress;
            backup.error_message = Some(summary);
        }

        self.ctx.repository.save_backup(&backup).await?;
        Ok(backup)
    }

    /// Remove the backup row entirely
    pub async fn remove_backup(&self, name: &str) -> Result<()> {
        let backup = require_backup(self.ctx.repository.as_ref(), name).await?;
        if backup.status.is_trackable() {
            return Err(BackupError::IllegalState(format!(
                "Backup {} is still in progress",
                name
            )));
        }
        self.ctx.repository.delete_backup(name).await?;
        info!("Backup {} removed", name);
        Ok(())
    }

    pub async fn get_backup(&self, name: &str) -> Result<Backup> {
        require_backup(self.ctx.repository.as_ref(), name).await
    }

    pub async fn backup_status(&self, name: &str) -> Result<BackupStatusView> {
        Ok(self.get_backup(name).await?.status_view())
    }

    /// Export a completed backup with its digest
    pub async fn backup_metadata(&self, name: &str) -> Result<BackupMetadata> {
        let mut backup = self.get_backup(name).await?;
        if backup.status != Status::Completed {
            return Err(BackupError::IllegalState(format!(
                "Backup {} is {:?}; only completed backups can be exported",
                name, backup.status
            )));
        }

        let digest = compute_digest(&backup)?;
        if backup.digest.as_deref() != Some(digest.as_str()) {
            backup.digest = Some(digest.clone());
            self.ctx.repository.save_backup(&backup).await?;
        }
        Ok(BackupMetadata { backup, digest })
    }

    /// Import exported metadata so that the backup can be restored here
    pub async fn upload_backup_metadata(&self, metadata: BackupMetadata) -> Result<Backup> {
        let actual = compute_digest(&metadata.backup)?;
        if actual != metadata.digest {
            return Err(BackupError::IntegrityViolation(format!(
                "Digest mismatch for backup {}: expected {}, got {}",
                metadata.backup.name, metadata.digest, actual
            )));
        }

        let mut backup = metadata.backup;
        if let Some(existing) = self.ctx.repository.get_backup(&backup.name).await? {
            if existing.status != Status::Deleted {
                return Err(BackupError::AlreadyExists {
                    entity: "Backup",
                    name: backup.name,
                });
            }
        }

        backup.imported = true;
        backup.digest = Some(actual);
        self.ctx.repository.save_backup(&backup).await?;
        info!("Imported metadata of backup {}", backup.name);
        Ok(backup)
    }

    /// Start every logical backup in parallel and fold the responses back
    async fn start(&self, backup: &mut Backup) {
        let units: Vec<AdapterUnit> = backup
            .logical_backups
            .iter()
            .enumerate()
            .map(|(index, lb)| AdapterUnit {
                index,
                adapter_id: lb.adapter_id.clone(),
                operation: None,
                databases: lb.database_names(),
            })
            .collect();

        let adapters = self.ctx.adapters.clone();
        let storage_name = backup.storage_name.clone();
        let blob_path = backup.blob_path.clone();
        let results = self
            .executor
            .execute(units, move |unit| {
                let adapters = adapters.clone();
                let storage_name = storage_name.clone();
                let blob_path = blob_path.clone();
                async move {
                    let adapter = adapters.get_adapter(&unit.adapter_id).await?;
                    adapter
                        .backup_start(&storage_name, &blob_path, &unit.databases)
                        .await?
                        .ok_or_else(|| {
                            BackupError::rejected(
                                &unit.adapter_id,
                                "Empty response on backup start",
                            )
                        })
                }
            })
            .await;
        apply_results(backup, results);
    }

    /// Separate externally managed databases according to the strategy
    fn split_external(
        &self,
        backup: &mut Backup,
        selected: Vec<DatabaseSelection>,
    ) -> Result<Vec<DatabaseSelection>> {
        let (external, internal): (Vec<_>, Vec<_>) = selected
            .into_iter()
            .partition(|s| s.database.externally_manageable);
        if external.is_empty() {
            return Ok(internal);
        }

        let names: Vec<&str> = external.iter().map(|s| s.database.name.as_str()).collect();
        match backup.external_database_strategy {
            ExternalDatabaseStrategy::Fail => {
                return Err(BackupError::ValidationConflict(format!(
                    "External databases are not allowed in backup {}: {}",
                    backup.name,
                    names.join(", ")
                )));
            }
            ExternalDatabaseStrategy::Skip => {
                info!("Skipping external databases: {}", names.join(", "));
            }
            ExternalDatabaseStrategy::Include => {
                backup.external_databases = external
                    .iter()
                    .map(|s| BackupExternalDatabase {
                        name: s.database.name.clone(),
                        db_type: s.database.db_type.clone(),
                        classifiers: s
                            .database
                            .live_registrations()
                            .map(|r| r.classifier.clone())
                            .collect(),
                    })
                    .collect();
            }
        }
        Ok(internal)
    }

    /// Drop or reject databases that cannot be backed up
    async fn filter_backupable(
        &self,
        request: &BackupRequest,
        internal: Vec<DatabaseSelection>,
        has_external: bool,
    ) -> Result<Vec<DatabaseSelection>> {
        let mut support: HashMap<String, bool> = HashMap::new();
        let mut backupable = Vec::with_capacity(internal.len());
        let mut rejected = Vec::new();

        for selection in internal {
            let database = &selection.database;
            let supported = match (&database.adapter_id, database.backup_disabled) {
                (Some(adapter_id), false) => match support.get(adapter_id) {
                    Some(supported) => *supported,
                    None => {
                        let adapter = self.ctx.adapters.get_adapter(adapter_id).await?;
                        let supported = adapter.supports_backup_restore().await?;
                        support.insert(adapter_id.clone(), supported);
                        supported
                    }
                },
                _ => false,
            };

            if supported {
                backupable.push(selection);
            } else {
                rejected.push(selection.database.name);
            }
        }

        if !rejected.is_empty() {
            if !request.ignore_not_backupable_databases {
                return Err(BackupError::ValidationConflict(format!(
                    "Backup is not supported for databases: {}",
                    rejected.join(", ")
                )));
            }
            warn!(
                "Ignoring databases that cannot be backed up: {}",
                rejected.join(", ")
            );
        }
        if backupable.is_empty() && !has_external {
            return Err(BackupError::NotFound(format!(
                "No backupable databases match the filter of backup {}",
                request.backup_name
            )));
        }
        Ok(backupable)
    }
}

/// One logical backup per adapter, one backup database per selected database
fn group_by_adapter(selected: Vec<DatabaseSelection>) -> Vec<LogicalBackup> {
    let mut groups: BTreeMap<String, LogicalBackup> = BTreeMap::new();
    for DatabaseSelection { database, .. } in selected {
        let adapter_id = database.adapter_id.clone().unwrap_or_default();
        let logical = groups
            .entry(adapter_id.clone())
            .or_insert_with(|| LogicalBackup::new(adapter_id, database.db_type.clone()));

        let mut entry = BackupDatabase::new(database.name.clone());
        entry.classifiers = database
            .live_registrations()
            .map(|r| r.classifier.clone())
            .collect();
        entry.users = database.user_refs();
        entry.settings = database.settings.clone();
        entry.configurational = database.configurational;
        logical.databases.push(entry);
    }
    groups.into_values().collect()
}

fn apply_results(
    backup: &mut Backup,
    results: Vec<(AdapterUnit, Result<LogicalBackupStatus>)>,
) {
    for (unit, result) in results {
        let Some(logical) = backup.logical_backups.get_mut(unit.index) else {
            continue;
        };
        match result {
            Ok(report) => logical.apply(report),
            Err(err) => {
                error!(
                    "Logical backup on adapter {} failed: {}",
                    unit.adapter_id, err
                );
                metrics::counter!("backup_restore_adapter_failures_total", "operation" => "backup")
                    .increment(1);
                logical.fail(err.status_message());
            }
        }
    }
}

/// SHA-256 over the canonical JSON of a backup, excluding local-only fields
pub fn compute_digest(backup: &Backup) -> Result<String> {
    let mut canonical = backup.clone();
    canonical.digest = None;
    canonical.imported = false;
    let bytes = serde_json::to_vec(&canonical)?;

    let mut hasher = Sha256::new();
    hasher.update(&bytes);
    Ok(format!("{:x}", hasher.finalize()))
}
