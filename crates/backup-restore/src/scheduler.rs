/*
 * SPDX-FileCopyrightText: 2020 Stalwart Labs Ltd <hello@stalw.art>
 *
 * SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-SEL
 */

//! Tracking scheduler
//!
//! Every replica runs the same interval loop. A tick only does work when the
//! previous local tick has finished and the cluster-wide job lock could be
//! taken, so a pending aggregate is polled by at most one replica per interval.

use crate::{config::TrackingConfig, error::Result, BackupRestoreService, TrackingReport};
use cluster_management::{DistributedLock, LockConfig, NodeInfo};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::{
    sync::{Mutex, RwLock},
    task::JoinHandle,
    time::MissedTickBehavior,
};
use tracing::{debug, error, info, warn};

/// Tracking scheduler
#[derive(Debug, Clone)]
pub struct TrackingScheduler {
    inner: Arc<TrackingSchedulerInner>,
}

#[derive(Debug)]
struct TrackingSchedulerInner {
    service: BackupRestoreService,
    lock: Arc<dyn DistributedLock>,
    config: TrackingConfig,
    lock_config: LockConfig,
    node: NodeInfo,
    local_run: Mutex<()>,
    running: RwLock<bool>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

/// What a single tick did
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TickOutcome {
    Executed(TrackingReport),
    /// The previous tick on this replica is still running
    SkippedLocalRun,
    /// Another replica holds the job lock
    SkippedLockHeld,
}

impl TrackingScheduler {
    pub fn new(
        service: BackupRestoreService,
        lock: Arc<dyn DistributedLock>,
        config: TrackingConfig,
        node: NodeInfo,
    ) -> Result<Self> {
        let lock_config = config.lock_config()?;
        info!(
            "Initializing tracking scheduler {} on node {} (every {:?})",
            config.job_name,
            node.id,
            config.interval()
        );

        Ok(Self {
            inner: Arc::new(TrackingSchedulerInner {
                service,
                lock,
                config,
                lock_config,
                node,
                local_run: Mutex::new(()),
                running: RwLock::new(false),
                handle: Mutex::new(None),
            }),
        })
    }

    /// Run one tracking pass if this replica may
    pub async fn tick(&self) -> Result<TickOutcome> {
        let inner = &self.inner;
        let Ok(_local) = inner.local_run.try_lock() else {
            debug!("Previous tracking pass still running, skipping tick");
            inner.service.record_skipped_tick().await;
            return Ok(TickOutcome::SkippedLocalRun);
        };

        let job = inner.config.job_name.as_str();
        if !inner
            .lock
            .try_acquire(job, &inner.node.id, &inner.lock_config)
            .await?
        {
            debug!("Job lock {} held elsewhere, skipping tick", job);
            inner.service.record_skipped_tick().await;
            return Ok(TickOutcome::SkippedLockHeld);
        }

        let result = inner.service.track_pending().await;

        match inner.lock.is_held_by(job, &inner.node.id).await {
            Ok(true) => {}
            Ok(false) => warn!(
                "Job lock {} expired before the tracking pass on {} finished",
                job, inner.node.id
            ),
            Err(err) => warn!("Failed to verify job lock {}: {}", job, err),
        }
        if let Err(err) = inner.lock.release(job, &inner.node.id).await {
            warn!("Failed to release job lock {}: {}", job, err);
        }

        Ok(TickOutcome::Executed(result?))
    }

    /// Start the scheduler loop
    pub async fn start(&self) -> Result<()> {
        let mut running = self.inner.running.write().await;
        if *running {
            warn!("Tracking scheduler is already running");
            return Ok(());
        }
        if !self.inner.config.enabled {
            info!("Tracking scheduler is disabled");
            return Ok(());
        }

        *running = true;
        info!("Starting tracking scheduler");

        let scheduler = self.clone();
        let period = self.inner.config.interval();
        let handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                interval.tick().await;
                if let Err(err) = scheduler.tick().await {
                    error!("Tracking pass failed: {}", err);
                }
            }
        });
        *self.inner.handle.lock().await = Some(handle);

        Ok(())
    }

    /// Stop the scheduler loop
    pub async fn stop(&self) -> Result<()> {
        let mut running = self.inner.running.write().await;
        if !*running {
            warn!("Tracking scheduler is not running");
            return Ok(());
        }

        *running = false;
        info!("Stopping tracking scheduler");

        if let Some(handle) = self.inner.handle.lock().await.take() {
            handle.abort();
        }

        Ok(())
    }

    pub async fn is_running(&self) -> bool {
        *self.inner.running.read().await
    }
}
