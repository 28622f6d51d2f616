//! Cluster-wide Job Lock Module
//!
//! This module provides the mutual exclusion primitive used by recurring jobs,
//! ensuring that only one replica executes a given job invocation at a time.

use crate::{config::LockConfig, error::ClusterError, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, warn};

/// Acquire-or-skip lock scoped to a named job
///
/// Implementations must make `try_acquire` atomic across every replica that
/// shares the backend.
#[async_trait]
pub trait DistributedLock: Send + Sync + std::fmt::Debug {
    /// Try to take the named lock; `Ok(false)` means somebody else holds it
    async fn try_acquire(&self, name: &str, holder: &str, config: &LockConfig) -> Result<bool>;

    /// Verify the lock is currently held by `holder`
    async fn is_held_by(&self, name: &str, holder: &str) -> Result<bool>;

    /// Give the lock up. The lease still lasts at least `lock_at_least_for`.
    async fn release(&self, name: &str, holder: &str) -> Result<()>;
}

/// Lease record for one named lock
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LockLease {
    /// Current or last holder
    pub holder: String,
    /// Acquisition time
    pub locked_at: DateTime<Utc>,
    /// The lock is taken until this instant
    pub lock_until: DateTime<Utc>,
    /// Release never shortens the lease below this instant
    pub min_lock_until: DateTime<Utc>,
    /// Whether the holder released the lock
    pub released: bool,
}

impl LockLease {
    fn is_active(&self, now: DateTime<Utc>) -> bool {
        now < self.lock_until
    }
}

/// Lease-based lock table shared by every handle cloned from it
///
/// Clones share state, so replicas running in one process (or tests) contend
/// on the same table the way separate processes contend on a shared database row.
#[derive(Debug, Clone, Default)]
pub struct LeaseLock {
    leases: Arc<RwLock<HashMap<String, LockLease>>>,
}

impl LeaseLock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of the lease for a lock name
    pub async fn lease(&self, name: &str) -> Option<LockLease> {
        self.leases.read().await.get(name).cloned()
    }

    fn to_chrono(duration: std::time::Duration) -> Result<chrono::Duration> {
        chrono::Duration::from_std(duration)
            .map_err(|e| ClusterError::Configuration(format!("Lease duration out of range: {}", e)))
    }
}

#[async_trait]
impl DistributedLock for LeaseLock {
    async fn try_acquire(&self, name: &str, holder: &str, config: &LockConfig) -> Result<bool> {
        config.validate()?;
        let now = Utc::now();
        let mut leases = self.leases.write().await;

        if let Some(lease) = leases.get(name) {
            if lease.is_active(now) {
                debug!(
                    "Lock {} is taken by {} until {}, {} skips",
                    name, lease.holder, lease.lock_until, holder
                );
                return Ok(false);
            }
        }

        leases.insert(
            name.to_string(),
            LockLease {
                holder: holder.to_string(),
                locked_at: now,
                lock_until: now + Self::to_chrono(config.lock_at_most_for)?,
                min_lock_until: now + Self::to_chrono(config.lock_at_least_for)?,
                released: false,
            },
        );
        debug!("Lock {} acquired by {}", name, holder);

        Ok(true)
    }

    async fn is_held_by(&self, name: &str, holder: &str) -> Result<bool> {
        let now = Utc::now();
        Ok(self
            .leases
            .read()
            .await
            .get(name)
            .map(|lease| !lease.released && lease.holder == holder && lease.is_active(now))
            .unwrap_or(false))
    }

    async fn release(&self, name: &str, holder: &str) -> Result<()> {
        let now = Utc::now();
        let mut leases = self.leases.write().await;

        let lease = match leases.get_mut(name) {
            Some(lease) if lease.holder == holder && !lease.released => lease,
            _ => {
                warn!("{} tried to release lock {} it does not hold", holder, name);
                return Err(ClusterError::LockNotHeld {
                    name: name.to_string(),
                    holder: holder.to_string(),
                });
            }
        };

        if now < lease.min_lock_until {
            lease.lock_until = lease.min_lock_until;
            lease.released = true;
        } else {
            leases.remove(name);
        }
        debug!("Lock {} released by {}", name, holder);

        Ok(())
    }
}
