/*
 * SPDX-FileCopyrightText: 2020 Stalwart Labs Ltd <hello@stalw.art>
 *
 * SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-SEL
 */

//! Collaborator contracts for physical database adapters and placement rules

use crate::{error::Result, model::Credentials, status::Status};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Adapter report on a logical backup operation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogicalBackupStatus {
    pub backup_id: String,
    pub status: Status,
    pub error_message: Option<String>,
    pub creation_time: Option<DateTime<Utc>>,
    pub completion_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub databases: Vec<BackupDatabaseStatus>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackupDatabaseStatus {
    pub database_name: String,
    pub status: Status,
    #[serde(default)]
    pub size: u64,
    #[serde(default)]
    pub duration_ms: u64,
    pub path: Option<String>,
    pub error_message: Option<String>,
}

/// Adapter report on a logical restore operation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogicalRestoreStatus {
    pub restore_id: String,
    pub status: Status,
    pub error_message: Option<String>,
    pub creation_time: Option<DateTime<Utc>>,
    pub completion_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub databases: Vec<RestoreDatabaseStatus>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RestoreDatabaseStatus {
    /// Name of the database in the backup
    pub previous_database_name: String,
    /// Name the adapter restored it under
    pub database_name: Option<String>,
    pub status: Status,
    #[serde(default)]
    pub duration_ms: u64,
    pub path: Option<String>,
    pub error_message: Option<String>,
}

/// Description of one database an adapter must restore
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RestoreTarget {
    pub previous_database_name: String,
    pub namespace: String,
    pub microservice_name: Option<String>,
    pub db_type: String,
}

/// Remote service performing backup, restore and provisioning for one
/// physical database cluster.
///
/// Calls returning `Ok(None)` model an empty response body; callers treat it as
/// a hard failure.
#[async_trait]
pub trait Adapter: Send + Sync + std::fmt::Debug {
    fn id(&self) -> &str;

    async fn supports_backup_restore(&self) -> Result<bool>;

    async fn backup_start(
        &self,
        storage_name: &str,
        blob_path: &str,
        database_names: &[String],
    ) -> Result<Option<LogicalBackupStatus>>;

    async fn backup_track(&self, backup_id: &str) -> Result<Option<LogicalBackupStatus>>;

    async fn backup_delete(&self, backup_id: &str) -> Result<()>;

    async fn restore_start(
        &self,
        backup_id: &str,
        storage_name: &str,
        blob_path: &str,
        targets: &[RestoreTarget],
    ) -> Result<Option<LogicalRestoreStatus>>;

    async fn restore_track(&self, restore_id: &str) -> Result<Option<LogicalRestoreStatus>>;

    /// Create or refresh a user; a `None` password lets the adapter generate one
    async fn ensure_user(
        &self,
        username: Option<&str>,
        password: Option<&str>,
        database_name: &str,
        role: &str,
    ) -> Result<Credentials>;
}

/// Lookup of adapters by identifier
#[async_trait]
pub trait AdapterDirectory: Send + Sync + std::fmt::Debug {
    async fn get_adapter(&self, adapter_id: &str) -> Result<Arc<dyn Adapter>>;
}

/// Physical placement chosen for a restored database
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PhysicalDatabaseRef {
    pub physical_database_id: String,
    pub adapter_id: String,
}

/// Placement rules deciding which physical database hosts a namespace
#[async_trait]
pub trait BalancingRules: Send + Sync + std::fmt::Debug {
    async fn choose_adapter(
        &self,
        db_type: &str,
        namespace: &str,
        microservice_name: Option<&str>,
    ) -> Result<PhysicalDatabaseRef>;
}
