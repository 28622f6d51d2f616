/*
 * SPDX-FileCopyrightText: 2020 Stalwart Labs Ltd <hello@stalw.art>
 *
 * SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-SEL
 */

//! Bounded parallel execution of per-adapter units of work

use crate::error::{BackupError, Result};
use futures::future::join_all;
use std::{fmt::Debug, future::Future, sync::Arc, time::Duration};
use tokio::sync::Semaphore;
use tracing::{debug, warn};

/// Bounded retry with a fixed delay, applied to retryable remote failures only
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub delay: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            delay,
        }
    }

    /// Single attempt, no delay
    pub fn none() -> Self {
        Self::new(1, Duration::ZERO)
    }

    pub async fn run<T, F, Fut>(&self, label: &str, mut operation: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut attempt = 1;
        loop {
            match operation().await {
                Err(err) if err.is_retryable() && attempt < self.max_attempts => {
                    warn!(
                        "{} failed (attempt {}/{}), retrying in {:?}: {}",
                        label, attempt, self.max_attempts, self.delay, err
                    );
                    attempt += 1;
                    tokio::time::sleep(self.delay).await;
                }
                result => return result,
            }
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(3, Duration::from_secs(1))
    }
}

/// Runs one unit per adapter group on a bounded worker pool and joins them all.
///
/// A failing unit never affects its siblings: every unit yields its own
/// `Result`, including units that panicked.
#[derive(Debug, Clone)]
pub struct FanOutExecutor {
    permits: Arc<Semaphore>,
    retry: RetryPolicy,
}

impl FanOutExecutor {
    pub fn new(max_workers: usize, retry: RetryPolicy) -> Self {
        Self {
            permits: Arc::new(Semaphore::new(max_workers.max(1))),
            retry,
        }
    }

    /// Execute `work` once per unit, returning each unit with its outcome in
    /// submission order.
    pub async fn execute<K, T, F, Fut>(&self, units: Vec<K>, work: F) -> Vec<(K, Result<T>)>
    where
        K: Clone + Debug + Send + Sync + 'static,
        T: Send + 'static,
        F: Fn(K) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T>> + Send + 'static,
    {
        if units.is_empty() {
            return Vec::new();
        }
        debug!("Submitting {} units to the worker pool", units.len());

        let work = Arc::new(work);
        let handles: Vec<_> = units
            .iter()
            .cloned()
            .map(|unit| {
                let permits = self.permits.clone();
                let work = work.clone();
                let retry = self.retry;
                tokio::spawn(async move {
                    let _permit = permits.acquire_owned().await.map_err(|_| {
                        BackupError::IllegalState("Worker pool is closed".to_string())
                    })?;
                    let label = format!("{:?}", unit);
                    retry.run(&label, || (*work)(unit.clone())).await
                })
            })
            .collect();

        let joined = join_all(handles).await;

        units
            .into_iter()
            .zip(joined)
            .map(|(unit, outcome)| {
                let result = outcome.unwrap_or_else(|err| {
                    Err(BackupError::rejected(
                        format!("{:?}", unit),
                        format!("Unit of work aborted: {}", err),
                    ))
                });
                (unit, result)
            })
            .collect()
    }
}
