/*
 * SPDX-FileCopyrightText: 2020 Stalwart Labs Ltd <hello@stalw.art>
 *
 * SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-SEL
 */

use super::{classifier::Classifier, database::DbUser};
use crate::{
    adapter::LogicalBackupStatus,
    filter::FilterCriteria,
    status::{aggregate, Status, ATTEMPTS_EXCEEDED_MESSAGE, MAX_ATTEMPTS},
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// What to do with externally managed databases matched by a filter
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExternalDatabaseStrategy {
    #[default]
    Fail,
    Skip,
    Include,
}

/// Request to back up the databases matching a filter
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackupRequest {
    pub backup_name: String,
    pub storage_name: String,
    pub blob_path: String,
    pub filter_criteria: FilterCriteria,
    #[serde(default)]
    pub external_database_strategy: ExternalDatabaseStrategy,
    #[serde(default)]
    pub ignore_not_backupable_databases: bool,
}

/// Backup aggregate; owns one logical backup per participating adapter
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Backup {
    pub name: String,
    pub storage_name: String,
    pub blob_path: String,
    pub filter_criteria: FilterCriteria,
    pub external_database_strategy: ExternalDatabaseStrategy,
    pub ignore_not_backupable_databases: bool,
    pub status: Status,
    pub total: usize,
    pub completed: usize,
    pub size: u64,
    pub error_message: Option<String>,
    pub attempt_count: u32,
    #[serde(default)]
    pub imported: bool,
    pub digest: Option<String>,
    pub created_at: DateTime<Utc>,
    pub logical_backups: Vec<LogicalBackup>,
    #[serde(default)]
    pub external_databases: Vec<BackupExternalDatabase>,
}

/// Unit of work sent to one adapter
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogicalBackup {
    pub adapter_id: String,
    pub db_type: String,
    /// Operation name assigned by the adapter once it acknowledges the start
    pub logical_backup_name: Option<String>,
    pub status: Status,
    pub error_message: Option<String>,
    pub creation_time: Option<DateTime<Utc>>,
    pub completion_time: Option<DateTime<Utc>>,
    pub databases: Vec<BackupDatabase>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackupDatabase {
    pub name: String,
    pub classifiers: Vec<Classifier>,
    pub users: Vec<DbUser>,
    pub settings: BTreeMap<String, String>,
    pub configurational: bool,
    pub status: Status,
    pub size: u64,
    pub duration_ms: u64,
    pub path: Option<String>,
    pub error_message: Option<String>,
}

/// Externally managed database carried as metadata only
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackupExternalDatabase {
    pub name: String,
    pub db_type: String,
    pub classifiers: Vec<Classifier>,
}

/// Status projection of a backup
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackupStatusView {
    pub status: Status,
    pub total: usize,
    pub completed: usize,
    pub size: u64,
    pub error_message: Option<String>,
}

impl Backup {
    pub fn new(request: &BackupRequest) -> Self {
        Self {
            name: request.backup_name.clone(),
            storage_name: request.storage_name.clone(),
            blob_path: request.blob_path.clone(),
            filter_criteria: request.filter_criteria.clone(),
            external_database_strategy: request.external_database_strategy,
            ignore_not_backupable_databases: request.ignore_not_backupable_databases,
            status: Status::NotStarted,
            total: 0,
            completed: 0,
            size: 0,
            error_message: None,
            attempt_count: 0,
            imported: false,
            digest: None,
            created_at: Utc::now(),
            logical_backups: Vec::new(),
            external_databases: Vec::new(),
        }
    }

    pub fn attempts_exceeded(&self) -> bool {
        self.attempt_count > MAX_ATTEMPTS
    }

    /// Recompute status, counters and the error summary from the children
    pub fn rollup(&mut self) {
        for logical in &mut self.logical_backups {
            logical.rollup();
        }

        self.total = self.databases().count();
        self.completed = self
            .databases()
            .filter(|db| db.status == Status::Completed)
            .count();
        self.size = self.databases().map(|db| db.size).sum();

        if self.attempts_exceeded() {
            self.status = Status::Failed;
            self.error_message = Some(ATTEMPTS_EXCEEDED_MESSAGE.to_string());
            return;
        }

        self.status = aggregate(self.logical_backups.iter().map(|lb| lb.status));
        let errors: Vec<String> = self
            .logical_backups
            .iter()
            .filter(|lb| lb.status == Status::Failed)
            .map(|lb| {
                format!(
                    "LogicalBackup {} failed: {}",
                    lb.display_name(),
                    lb.error_message.as_deref().unwrap_or("unknown error")
                )
            })
            .collect();
        self.error_message = (!errors.is_empty()).then(|| errors.join("; "));
    }

    pub fn databases(&self) -> impl Iterator<Item = &BackupDatabase> {
        self.logical_backups.iter().flat_map(|lb| lb.databases.iter())
    }

    pub fn status_view(&self) -> BackupStatusView {
        BackupStatusView {
            status: self.status,
            total: self.total,
            completed: self.completed,
            size: self.size,
            error_message: self.error_message.clone(),
        }
    }
}

impl LogicalBackup {
    pub fn new(adapter_id: impl Into<String>, db_type: impl Into<String>) -> Self {
        Self {
            adapter_id: adapter_id.into(),
            db_type: db_type.into(),
            logical_backup_name: None,
            status: Status::NotStarted,
            error_message: None,
            creation_time: None,
            completion_time: None,
            databases: Vec::new(),
        }
    }

    pub fn display_name(&self) -> &str {
        self.logical_backup_name.as_deref().unwrap_or(&self.adapter_id)
    }

    pub fn database_names(&self) -> Vec<String> {
        self.databases.iter().map(|db| db.name.clone()).collect()
    }

    /// Fold an adapter status report into this logical backup
    pub fn apply(&mut self, report: LogicalBackupStatus) {
        self.logical_backup_name = Some(report.backup_id);
        self.error_message = report.error_message;
        self.creation_time = report.creation_time.or(self.creation_time);
        self.completion_time = report.completion_time;

        for db in &mut self.databases {
            match report.databases.iter().find(|r| r.database_name == db.name) {
                Some(reported) => {
                    db.status = reported.status;
                    db.size = reported.size;
                    db.duration_ms = reported.duration_ms;
                    db.path = reported.path.clone();
                    db.error_message = reported.error_message.clone();
                }
                None => db.status = report.status,
            }
        }
        self.status = report.status;
        self.rollup();
    }

    /// Record a failure that happened before or instead of an adapter report
    pub fn fail(&mut self, message: String) {
        for db in &mut self.databases {
            if db.status != Status::Completed {
                db.status = Status::Failed;
            }
        }
        self.status = Status::Failed;
        self.error_message = Some(message);
    }

    fn rollup(&mut self) {
        if !self.databases.is_empty() {
            self.status = aggregate(self.databases.iter().map(|db| db.status));
        }
    }
}

impl BackupDatabase {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            classifiers: Vec::new(),
            users: Vec::new(),
            settings: BTreeMap::new(),
            configurational: false,
            status: Status::NotStarted,
            size: 0,
            duration_ms: 0,
            path: None,
            error_message: None,
        }
    }
}
