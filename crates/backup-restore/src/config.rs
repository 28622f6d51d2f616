/*
 * SPDX-FileCopyrightText: 2020 Stalwart Labs Ltd <hello@stalw.art>
 *
 * SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-SEL
 */

//! Configuration for backup and restore system

use crate::{
    error::{BackupError, Result},
    executor::RetryPolicy,
};
use cluster_management::LockConfig;
use serde::{Deserialize, Serialize};
use std::{path::Path, time::Duration};

/// Main configuration for backup and restore system
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct BackupRestoreConfig {
    pub executor: ExecutorConfig,
    pub tracking: TrackingConfig,
}

/// Worker pool and retry settings for adapter calls
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutorConfig {
    pub max_workers: usize,
    pub retry: RetryConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub delay_ms: u64,
}

/// Settings of the recurring tracking job
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackingConfig {
    pub enabled: bool,
    pub interval_secs: u64,
    pub job_name: String,
    pub lock_at_most_for_secs: u64,
    pub lock_at_least_for_secs: u64,
}

impl BackupRestoreConfig {
    /// Parse a TOML document
    pub fn from_toml(source: &str) -> Result<Self> {
        let config: Self = toml::from_str(source)
            .map_err(|e| BackupError::Config(format!("Invalid configuration: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Load a TOML configuration file
    pub fn load(path: &Path) -> Result<Self> {
        let source = std::fs::read_to_string(path).map_err(|e| {
            BackupError::Config(format!("Failed to read {}: {}", path.display(), e))
        })?;
        Self::from_toml(&source)
    }

    pub fn validate(&self) -> Result<()> {
        if self.executor.max_workers == 0 {
            return Err(BackupError::Config(
                "executor.max_workers must be at least 1".to_string(),
            ));
        }
        if self.executor.retry.max_attempts == 0 {
            return Err(BackupError::Config(
                "executor.retry.max_attempts must be at least 1".to_string(),
            ));
        }
        if self.tracking.interval_secs == 0 {
            return Err(BackupError::Config(
                "tracking.interval_secs must be at least 1".to_string(),
            ));
        }
        self.tracking.lock_config()?;
        Ok(())
    }
}

impl RetryConfig {
    pub fn policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.max_attempts, Duration::from_millis(self.delay_ms))
    }
}

impl TrackingConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    pub fn lock_config(&self) -> Result<LockConfig> {
        Ok(LockConfig::new(
            Duration::from_secs(self.lock_at_most_for_secs),
            Duration::from_secs(self.lock_at_least_for_secs),
        )?)
    }
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            max_workers: 8,
            retry: RetryConfig::default(),
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            delay_ms: 1000,
        }
    }
}

impl Default for TrackingConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_secs: 60,
            job_name: "backup-restore-tracking".to_string(),
            lock_at_most_for_secs: 300,
            lock_at_least_for_secs: 30,
        }
    }
}
