//! Lock configuration

use crate::error::{ClusterError, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Lease settings for a cluster-wide job lock
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LockConfig {
    /// Upper bound on how long a holder may keep the lock if it never releases it
    pub lock_at_most_for: Duration,
    /// Minimum time the lock stays taken after acquisition, even if released earlier
    pub lock_at_least_for: Duration,
}

impl LockConfig {
    pub fn new(lock_at_most_for: Duration, lock_at_least_for: Duration) -> Result<Self> {
        let config = Self {
            lock_at_most_for,
            lock_at_least_for,
        };
        config.validate()?;
        Ok(config)
    }

    /// Check lease bounds are consistent
    pub fn validate(&self) -> Result<()> {
        if self.lock_at_most_for.is_zero() {
            return Err(ClusterError::Configuration(
                "lock_at_most_for must be greater than zero".to_string(),
            ));
        }
        if self.lock_at_least_for > self.lock_at_most_for {
            return Err(ClusterError::Configuration(format!(
                "lock_at_least_for ({:?}) exceeds lock_at_most_for ({:?})",
                self.lock_at_least_for, self.lock_at_most_for
            )));
        }
        Ok(())
    }
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            lock_at_most_for: Duration::from_secs(300),
            lock_at_least_for: Duration::from_secs(30),
        }
    }
}
