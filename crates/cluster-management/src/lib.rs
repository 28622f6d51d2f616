/*
 * SPDX-FileCopyrightText: 2020 Stalwart Labs Ltd <hello@stalw.art>
 *
 * SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-SEL
 */

//! # Cluster Management
//!
//! Coordination primitives shared by the replicas of the control plane:
//!
//! - Node identity for each running replica
//! - Cluster-wide, lease-based job locks with acquire-or-skip semantics

pub mod config;
pub mod error;
pub mod lock;
pub mod node;

pub use config::LockConfig;
pub use error::{ClusterError, Result};
pub use lock::{DistributedLock, LeaseLock, LockLease};
pub use node::NodeInfo;
