/*
 * SPDX-FileCopyrightText: 2020 Stalwart Labs Ltd <hello@stalw.art>
 *
 * SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-SEL
 */

//! Data model: live registry rows and the backup/restore aggregates.
//!
//! Aggregates own their children by value; children refer to each other by
//! index, and a whole aggregate is persisted at once.

pub mod backup;
pub mod classifier;
pub mod database;
pub mod restore;

pub use backup::{
    Backup, BackupDatabase, BackupExternalDatabase, BackupRequest, BackupStatusView,
    ExternalDatabaseStrategy, LogicalBackup,
};
pub use classifier::{Classifier, ClassifierDetails, ClassifierType};
pub use database::{Credentials, Database, DatabaseKind, DatabaseRegistration, DbUser};
pub use restore::{
    BackupDatabaseRef, LogicalRestore, Mapping, Restore, RestoreDatabase,
    RestoreExternalDatabase, RestoreRequest, RestoreStatusView,
};
