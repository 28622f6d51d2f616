/*
 * SPDX-FileCopyrightText: 2020 Stalwart Labs Ltd <hello@stalw.art>
 *
 * SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-SEL
 */

//! Operation status and the parent status rollup shared by backups and restores

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Attempts after which an aggregate stops being tracked
pub const MAX_ATTEMPTS: u32 = 20;

/// Error message of an aggregate forced to FAILED by the attempt ceiling
pub const ATTEMPTS_EXCEEDED_MESSAGE: &str = "The number of attempts exceeded 20";

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Status {
    NotStarted,
    Pending,
    InProgress,
    Failed,
    Completed,
    DeleteInProgress,
    Deleted,
}

impl Status {
    /// No further adapter work will change this status
    pub fn is_terminal(self) -> bool {
        matches!(self, Status::Completed | Status::Failed | Status::Deleted)
    }

    /// Adapter-side work was started and is awaiting completion
    pub fn is_trackable(self) -> bool {
        matches!(self, Status::Pending | Status::InProgress)
    }
}

/// Roll a set of child statuses up into the parent status.
///
/// Rows are checked in order and the first match wins:
///
/// | children                              | parent        |
/// |---------------------------------------|---------------|
/// | exactly `{NOT_STARTED}`               | `NOT_STARTED` |
/// | exactly `{PENDING}`                   | `PENDING`     |
/// | `NOT_STARTED` plus anything else      | `IN_PROGRESS` |
/// | any `IN_PROGRESS`                     | `IN_PROGRESS` |
/// | `PENDING` plus anything else          | `IN_PROGRESS` |
/// | any `FAILED`                          | `FAILED`      |
/// | otherwise                             | `COMPLETED`   |
///
/// An empty set has nothing left to do and rolls up to `COMPLETED`.
pub fn aggregate<I>(children: I) -> Status
where
    I: IntoIterator<Item = Status>,
{
    let set: BTreeSet<Status> = children.into_iter().collect();
    let only = |status: Status| set.len() == 1 && set.contains(&status);

    if only(Status::NotStarted) {
        Status::NotStarted
    } else if only(Status::Pending) {
        Status::Pending
    } else if set.contains(&Status::NotStarted) || set.contains(&Status::InProgress) {
        Status::InProgress
    } else if set.contains(&Status::Pending) {
        Status::InProgress
    } else if set.contains(&Status::Failed) {
        Status::Failed
    } else {
        Status::Completed
    }
}
