/*
 * SPDX-FileCopyrightText: 2020 Stalwart Labs Ltd <hello@stalw.art>
 *
 * SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-SEL
 */

//! # Backup and Restore Orchestration
//!
//! Control plane for backing up and restoring the logical databases of a
//! multi-tenant fleet spread over many physical database adapters:
//!
//! - Filter-based selection of logical databases
//! - Parallel per-adapter backup and restore with bounded retry
//! - Status aggregation across logical operations and databases
//! - Namespace and tenant remapping with collision detection
//! - Registry reconciliation that supersedes colliding databases
//! - Cluster-exclusive tracking of long-running adapter operations

pub mod adapter;
pub mod backup;
pub mod config;
pub mod error;
pub mod executor;
pub mod filter;
pub mod mapping;
pub mod metrics;
pub mod model;
pub mod reconcile;
pub mod repository;
pub mod restore;
pub mod scheduler;
pub mod selector;
pub mod status;

pub use adapter::{Adapter, AdapterDirectory, BalancingRules, PhysicalDatabaseRef};
pub use backup::{BackupManager, BackupMetadata};
pub use config::BackupRestoreConfig;
pub use error::{BackupError, ErrorKind, Result};
pub use executor::{FanOutExecutor, RetryPolicy};
pub use filter::{Filter, FilterCriteria};
pub use repository::{BackupRepository, DatabaseRegistry, InMemoryStore};
pub use restore::RestoreManager;
pub use scheduler::{TickOutcome, TrackingScheduler};
pub use status::Status;

use cluster_management::{DistributedLock, NodeInfo};
use model::{Backup, BackupRequest, BackupStatusView, Restore, RestoreRequest, RestoreStatusView};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{error, info, warn};

/// External services the orchestrators depend on
#[derive(Debug, Clone)]
pub struct Collaborators {
    pub repository: Arc<dyn BackupRepository>,
    pub registry: Arc<dyn DatabaseRegistry>,
    pub adapters: Arc<dyn AdapterDirectory>,
    pub balancing: Arc<dyn BalancingRules>,
}

impl Collaborators {
    pub fn new(
        repository: Arc<dyn BackupRepository>,
        registry: Arc<dyn DatabaseRegistry>,
        adapters: Arc<dyn AdapterDirectory>,
        balancing: Arc<dyn BalancingRules>,
    ) -> Self {
        Self {
            repository,
            registry,
            adapters,
            balancing,
        }
    }

    /// Use one in-memory store as both repository and registry
    pub fn in_memory(
        store: InMemoryStore,
        adapters: Arc<dyn AdapterDirectory>,
        balancing: Arc<dyn BalancingRules>,
    ) -> Self {
        Self::new(Arc::new(store.clone()), Arc::new(store), adapters, balancing)
    }
}

/// Aggregates polled by one tracking pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackingReport {
    pub backups: usize,
    pub restores: usize,
}

/// Main backup and restore service
#[derive(Debug, Clone)]
pub struct BackupRestoreService {
    inner: Arc<BackupRestoreServiceInner>,
}

#[derive(Debug)]
struct BackupRestoreServiceInner {
    config: BackupRestoreConfig,
    collaborators: Collaborators,
    backup_manager: BackupManager,
    restore_manager: RestoreManager,
    metrics: Arc<RwLock<metrics::BackupMetrics>>,
}

impl BackupRestoreService {
    /// Create a new backup and restore service
    pub async fn new(config: BackupRestoreConfig, collaborators: Collaborators) -> Result<Self> {
        info!("Initializing backup and restore service");
        config.validate()?;

        let executor =
            FanOutExecutor::new(config.executor.max_workers, config.executor.retry.policy());
        let backup_manager = BackupManager::new(collaborators.clone(), executor.clone());
        let restore_manager = RestoreManager::new(collaborators.clone(), executor);
        let metrics = Arc::new(RwLock::new(metrics::BackupMetrics::new()));

        Ok(Self {
            inner: Arc::new(BackupRestoreServiceInner {
                config,
                collaborators,
                backup_manager,
                restore_manager,
                metrics,
            }),
        })
    }

    pub fn config(&self) -> &BackupRestoreConfig {
        &self.inner.config
    }

    /// Build the tracking scheduler for this replica
    pub fn scheduler(
        &self,
        lock: Arc<dyn DistributedLock>,
        node: NodeInfo,
    ) -> Result<TrackingScheduler> {
        TrackingScheduler::new(self.clone(), lock, self.inner.config.tracking.clone(), node)
    }

    /// Back up the databases matching the request
    pub async fn backup(&self, request: BackupRequest, dry_run: bool) -> Result<Backup> {
        let backup = self.inner.backup_manager.backup(request, dry_run).await?;
        if !dry_run {
            self.inner.metrics.write().await.record_backup(&backup);
        }
        Ok(backup)
    }

    pub async fn get_backup(&self, name: &str) -> Result<Backup> {
        self.inner.backup_manager.get_backup(name).await
    }

    pub async fn backup_status(&self, name: &str) -> Result<BackupStatusView> {
        self.inner.backup_manager.backup_status(name).await
    }

    pub async fn delete_backup(&self, name: &str, force: bool) -> Result<Backup> {
        self.inner.backup_manager.delete_backup(name, force).await
    }

    pub async fn remove_backup(&self, name: &str) -> Result<()> {
        self.inner.backup_manager.remove_backup(name).await
    }

    pub async fn backup_metadata(&self, name: &str) -> Result<BackupMetadata> {
        self.inner.backup_manager.backup_metadata(name).await
    }

    pub async fn upload_backup_metadata(&self, metadata: BackupMetadata) -> Result<Backup> {
        self.inner.backup_manager.upload_backup_metadata(metadata).await
    }

    /// Restore the databases of a backup
    pub async fn restore(
        &self,
        backup_name: &str,
        request: RestoreRequest,
        dry_run: bool,
    ) -> Result<Restore> {
        warn!(
            "Starting restore {} from backup {}",
            request.restore_name, backup_name
        );
        let restore = self
            .inner
            .restore_manager
            .restore(backup_name, request, dry_run)
            .await?;
        if !dry_run {
            self.inner.metrics.write().await.record_restore(&restore);
        }
        Ok(restore)
    }

    pub async fn retry_restore(&self, name: &str, dry_run: bool) -> Result<Restore> {
        let restore = self.inner.restore_manager.retry_restore(name, dry_run).await?;
        if !dry_run && restore.status.is_terminal() {
            self.inner.metrics.write().await.record_restore_outcome(&restore);
        }
        Ok(restore)
    }

    pub async fn get_restore(&self, name: &str) -> Result<Restore> {
        self.inner.restore_manager.get_restore(name).await
    }

    pub async fn restore_status(&self, name: &str) -> Result<RestoreStatusView> {
        self.inner.restore_manager.restore_status(name).await
    }

    /// Poll every pending backup and restore once
    pub async fn track_pending(&self) -> Result<TrackingReport> {
        let mut report = TrackingReport::default();
        let repository = &self.inner.collaborators.repository;

        for backup in repository.find_pending_backups().await? {
            let name = backup.name.clone();
            match self.inner.backup_manager.track(backup).await {
                Ok(tracked) => {
                    report.backups += 1;
                    if tracked.status.is_terminal() {
                        info!("Backup {} finished with status {:?}", name, tracked.status);
                        self.inner.metrics.write().await.record_backup_outcome(&tracked);
                    }
                }
                Err(err) => error!("Failed to track backup {}: {}", name, err),
            }
        }

        for restore in repository.find_pending_restores().await? {
            let name = restore.name.clone();
            match self.inner.restore_manager.track(restore).await {
                Ok(tracked) => {
                    report.restores += 1;
                    if tracked.status.is_terminal() {
                        info!("Restore {} finished with status {:?}", name, tracked.status);
                        self.inner.metrics.write().await.record_restore_outcome(&tracked);
                    }
                }
                Err(err) => error!("Failed to track restore {}: {}", name, err),
            }
        }

        self.inner
            .metrics
            .write()
            .await
            .record_tick(report.backups, report.restores);
        Ok(report)
    }

    /// Get backup metrics
    pub async fn get_metrics(&self) -> metrics::BackupMetrics {
        self.inner.metrics.read().await.clone()
    }

    pub(crate) async fn record_skipped_tick(&self) {
        self.inner.metrics.write().await.record_skipped_tick();
    }
}
