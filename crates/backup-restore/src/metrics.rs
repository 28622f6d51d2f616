/*
 * SPDX-FileCopyrightText: 2020 Stalwart Labs Ltd <hello@stalw.art>
 *
 * SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-SEL
 */

//! Metrics collection for backup and restore operations

use crate::{
    model::{Backup, Restore},
    status::Status,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Backup and restore metrics
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BackupMetrics {
    pub backup_stats: BackupStats,
    pub restore_stats: RestoreStats,
    pub tracking_stats: TrackingStats,
}

/// Backup operation statistics
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BackupStats {
    pub total_backups: u64,
    pub successful_backups: u64,
    pub failed_backups: u64,
    pub total_databases: u64,
    pub total_bytes_backed_up: u64,
    pub last_backup_time: Option<DateTime<Utc>>,
    /// Backups started per adapter
    pub adapters: BTreeMap<String, u64>,
}

/// Restore operation statistics
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RestoreStats {
    pub total_restores: u64,
    pub successful_restores: u64,
    pub failed_restores: u64,
    pub total_databases: u64,
    pub last_restore_time: Option<DateTime<Utc>>,
}

/// Tracking loop statistics
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TrackingStats {
    pub executed_ticks: u64,
    pub skipped_ticks: u64,
    pub backups_tracked: u64,
    pub restores_tracked: u64,
    pub last_tick_time: Option<DateTime<Utc>>,
}

impl BackupMetrics {
    /// Create new metrics instance
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a started backup
    pub fn record_backup(&mut self, backup: &Backup) {
        self.backup_stats.total_backups += 1;
        self.backup_stats.total_databases += backup.total as u64;
        self.backup_stats.last_backup_time = Some(backup.created_at);
        for logical in &backup.logical_backups {
            *self
                .backup_stats
                .adapters
                .entry(logical.adapter_id.clone())
                .or_insert(0) += 1;
        }
        metrics::counter!("backup_restore_backups_total").increment(1);
        self.record_backup_outcome(backup);
    }

    /// Record a backup reaching a terminal status
    pub fn record_backup_outcome(&mut self, backup: &Backup) {
        match backup.status {
            Status::Completed => {
                self.backup_stats.successful_backups += 1;
                self.backup_stats.total_bytes_backed_up += backup.size;
            }
            Status::Failed => self.backup_stats.failed_backups += 1,
            _ => {}
        }
    }

    /// Record a started restore
    pub fn record_restore(&mut self, restore: &Restore) {
        self.restore_stats.total_restores += 1;
        self.restore_stats.total_databases += restore.total as u64;
        self.restore_stats.last_restore_time = Some(restore.created_at);
        metrics::counter!("backup_restore_restores_total").increment(1);
        self.record_restore_outcome(restore);
    }

    /// Record a restore reaching a terminal status
    pub fn record_restore_outcome(&mut self, restore: &Restore) {
        match restore.status {
            Status::Completed => self.restore_stats.successful_restores += 1,
            Status::Failed => self.restore_stats.failed_restores += 1,
            _ => {}
        }
    }

    /// Record one executed tracking pass
    pub fn record_tick(&mut self, backups: usize, restores: usize) {
        self.tracking_stats.executed_ticks += 1;
        self.tracking_stats.backups_tracked += backups as u64;
        self.tracking_stats.restores_tracked += restores as u64;
        self.tracking_stats.last_tick_time = Some(Utc::now());
        metrics::counter!("backup_restore_tracking_ticks_total", "outcome" => "executed")
            .increment(1);
    }

    /// Record a tick skipped because another run holds the job
    pub fn record_skipped_tick(&mut self) {
        self.tracking_stats.skipped_ticks += 1;
        metrics::counter!("backup_restore_tracking_ticks_total", "outcome" => "skipped")
            .increment(1);
    }
}
