/*
 * SPDX-FileCopyrightText: 2020 Stalwart Labs Ltd <hello@stalw.art>
 *
 * SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-SEL
 */

use super::{
    backup::ExternalDatabaseStrategy,
    classifier::{Classifier, ClassifierDetails},
    database::DbUser,
};
use crate::{
    adapter::LogicalRestoreStatus,
    filter::FilterCriteria,
    status::{aggregate, Status, ATTEMPTS_EXCEEDED_MESSAGE, MAX_ATTEMPTS},
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

/// Namespace and tenant rewrites applied to restored classifiers
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Mapping {
    #[serde(default)]
    pub namespaces: BTreeMap<String, String>,
    #[serde(default)]
    pub tenants: BTreeMap<String, String>,
}

/// Request to restore (part of) a completed backup
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RestoreRequest {
    pub restore_name: String,
    pub storage_name: String,
    pub blob_path: String,
    /// Defaults to the source backup's filter
    #[serde(default)]
    pub filter_criteria: Option<FilterCriteria>,
    #[serde(default)]
    pub mapping: Mapping,
    #[serde(default)]
    pub external_database_strategy: ExternalDatabaseStrategy,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Restore {
    pub name: String,
    pub backup_name: String,
    pub storage_name: String,
    pub blob_path: String,
    pub filter_criteria: FilterCriteria,
    pub mapping: Mapping,
    pub external_database_strategy: ExternalDatabaseStrategy,
    pub status: Status,
    pub total: usize,
    pub completed: usize,
    pub error_message: Option<String>,
    pub attempt_count: u32,
    pub created_at: DateTime<Utc>,
    pub logical_restores: Vec<LogicalRestore>,
    #[serde(default)]
    pub external_databases: Vec<RestoreExternalDatabase>,
}

/// Unit of work sent to the adapter chosen for one target group
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogicalRestore {
    pub adapter_id: String,
    pub physical_database_id: String,
    pub db_type: String,
    pub target_namespace: String,
    /// Adapter operation name of the backup being restored
    pub source_logical_backup_name: String,
    pub logical_restore_name: Option<String>,
    pub status: Status,
    pub error_message: Option<String>,
    pub creation_time: Option<DateTime<Utc>>,
    pub completion_time: Option<DateTime<Utc>>,
    pub databases: Vec<RestoreDatabase>,
}

/// Position of the originating database inside the source backup
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackupDatabaseRef {
    pub logical_backup: usize,
    pub database: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RestoreDatabase {
    pub backup_database: BackupDatabaseRef,
    /// Name of the database in the backup
    pub source_name: String,
    /// Name of the restored database, as reported by the adapter
    pub name: String,
    pub namespace: String,
    pub microservice_name: Option<String>,
    pub classifiers: Vec<ClassifierDetails>,
    pub users: Vec<DbUser>,
    pub settings: BTreeMap<String, String>,
    #[serde(default)]
    pub resources: BTreeMap<String, String>,
    pub configurational: bool,
    pub status: Status,
    pub duration_ms: u64,
    pub path: Option<String>,
    pub error_message: Option<String>,
    /// Registry reconciliation already ran for this database
    #[serde(default)]
    pub registered: bool,
    /// Registry row created for the restored database
    #[serde(default)]
    pub database_id: Option<Uuid>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RestoreExternalDatabase {
    pub name: String,
    pub db_type: String,
    pub classifiers: Vec<ClassifierDetails>,
    #[serde(default)]
    pub registered: bool,
    #[serde(default)]
    pub database_id: Option<Uuid>,
    pub error_message: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RestoreStatusView {
    pub status: Status,
    pub total: usize,
    pub completed: usize,
    pub error_message: Option<String>,
}

impl Restore {
    pub fn new(backup_name: &str, request: &RestoreRequest, filter: FilterCriteria) -> Self {
        Self {
            name: request.restore_name.clone(),
            backup_name: backup_name.to_string(),
            storage_name: request.storage_name.clone(),
            blob_path: request.blob_path.clone(),
            filter_criteria: filter,
            mapping: request.mapping.clone(),
            external_database_strategy: request.external_database_strategy,
            status: Status::NotStarted,
            total: 0,
            completed: 0,
            error_message: None,
            attempt_count: 0,
            created_at: Utc::now(),
            logical_restores: Vec::new(),
            external_databases: Vec::new(),
        }
    }

    pub fn attempts_exceeded(&self) -> bool {
        self.attempt_count > MAX_ATTEMPTS
    }

    pub fn databases(&self) -> impl Iterator<Item = &RestoreDatabase> {
        self.logical_restores.iter().flat_map(|lr| lr.databases.iter())
    }

    /// Recompute status, counters and the error summary from the children
    pub fn rollup(&mut self) {
        for logical in &mut self.logical_restores {
            logical.rollup();
        }

        self.total = self.databases().count();
        self.completed = self
            .databases()
            .filter(|db| db.status == Status::Completed)
            .count();

        if self.attempts_exceeded() {
            self.status = Status::Failed;
            self.error_message = Some(ATTEMPTS_EXCEEDED_MESSAGE.to_string());
            return;
        }

        self.status = aggregate(
            self.logical_restores
                .iter()
                .map(|lr| lr.status)
                .chain(self.external_databases.iter().map(|e| e.status())),
        );
        let mut errors = Vec::new();
        for logical in self.logical_restores.iter().filter(|lr| lr.status == Status::Failed) {
            errors.push(format!(
                "LogicalRestore {} failed: {}",
                logical.display_name(),
                logical.error_message.as_deref().unwrap_or("unknown error")
            ));
            for db in logical.databases.iter().filter(|db| db.status == Status::Failed) {
                if let Some(message) = &db.error_message {
                    errors.push(format!("Database {} failed: {}", db.name, message));
                }
            }
        }
        for external in &self.external_databases {
            if let Some(message) = &external.error_message {
                errors.push(format!("External database {} failed: {}", external.name, message));
            }
        }
        self.error_message = (!errors.is_empty()).then(|| errors.join("; "));
    }

    pub fn status_view(&self) -> RestoreStatusView {
        RestoreStatusView {
            status: self.status,
            total: self.total,
            completed: self.completed,
            error_message: self.error_message.clone(),
        }
    }
}

impl LogicalRestore {
    pub fn display_name(&self) -> &str {
        self.logical_restore_name.as_deref().unwrap_or(&self.adapter_id)
    }

    /// Fold an adapter status report into this logical restore
    pub fn apply(&mut self, report: LogicalRestoreStatus) {
        self.logical_restore_name = Some(report.restore_id);
        self.error_message = report.error_message;
        self.creation_time = report.creation_time.or(self.creation_time);
        self.completion_time = report.completion_time;

        for db in &mut self.databases {
            if db.status == Status::Completed {
                continue;
            }
            match report
                .databases
                .iter()
                .find(|r| r.previous_database_name == db.source_name)
            {
                Some(reported) => {
                    if let Some(name) = &reported.database_name {
                        db.name = name.clone();
                    }
                    db.status = reported.status;
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

    pub fn fail(&mut self, message: String) {
        for db in &mut self.databases {
            if db.status != Status::Completed {
                db.status = Status::Failed;
            }
        }
        self.status = Status::Failed;
        self.error_message = Some(message);
    }

    /// Reset entries that did not complete so they can be started again
    pub fn reset_incomplete(&mut self) {
        for db in &mut self.databases {
            if db.status != Status::Completed {
                db.status = Status::NotStarted;
                db.error_message = None;
            }
        }
        self.status = Status::NotStarted;
        self.error_message = None;
        self.logical_restore_name = None;
        self.completion_time = None;
    }

    pub fn rollup(&mut self) {
        if !self.databases.is_empty() {
            self.status = aggregate(self.databases.iter().map(|db| db.status));
        }
    }
}

impl RestoreExternalDatabase {
    /// Registration is the only work an external database gets
    pub fn status(&self) -> Status {
        if self.error_message.is_some() {
            Status::Failed
        } else if self.registered {
            Status::Completed
        } else {
            Status::NotStarted
        }
    }
}

impl RestoreDatabase {
    /// Classifiers that get registered for the restored database
    pub fn scoped_classifiers(&self) -> impl Iterator<Item = &Classifier> {
        self.classifiers
            .iter()
            .filter(|c| c.is_in_scope())
            .map(|c| &c.classifier)
    }
}
