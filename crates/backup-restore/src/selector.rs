/*
 * SPDX-FileCopyrightText: 2020 Stalwart Labs Ltd <hello@stalw.art>
 *
 * SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-SEL
 */

//! Database selection by filter criteria

use crate::{
    filter::{Candidate, FilterCriteria},
    model::{
        Backup, BackupDatabaseRef, Classifier, Database, DatabaseKind, DatabaseRegistration,
    },
};
use tracing::debug;

/// A database together with the registrations that matched the criteria
#[derive(Debug, Clone, PartialEq)]
pub struct DatabaseSelection {
    pub database: Database,
    pub registrations: Vec<DatabaseRegistration>,
}

/// One backup-time classifier that matched restore criteria
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackupClassifierMatch {
    pub database: BackupDatabaseRef,
    pub classifier: Classifier,
}

/// Select live databases. Each registration is tested on its own; results are
/// grouped back by owning database keeping only the matching registrations.
pub fn select_databases(
    databases: &[Database],
    criteria: &FilterCriteria,
) -> Vec<DatabaseSelection> {
    let selected: Vec<DatabaseSelection> = databases
        .iter()
        .filter(|db| !db.marked_for_drop)
        .filter_map(|db| {
            let registrations: Vec<DatabaseRegistration> = db
                .live_registrations()
                .filter(|r| {
                    criteria.matches(&Candidate {
                        classifier: &r.classifier,
                        database_type: &db.db_type,
                        database_kind: db.kind(),
                    })
                })
                .cloned()
                .collect();
            (!registrations.is_empty()).then(|| DatabaseSelection {
                database: db.clone(),
                registrations,
            })
        })
        .collect();

    debug!(
        "Selected {} of {} databases by filter",
        selected.len(),
        databases.len()
    );
    selected
}

/// Select backup-time classifiers of internal databases. A database with N
/// matching classifiers yields N entries.
pub fn select_backup_classifiers(
    backup: &Backup,
    criteria: &FilterCriteria,
) -> Vec<BackupClassifierMatch> {
    let mut matches = Vec::new();
    for (lb_index, logical) in backup.logical_backups.iter().enumerate() {
        for (db_index, database) in logical.databases.iter().enumerate() {
            let kind = if database.configurational {
                DatabaseKind::Configuration
            } else {
                DatabaseKind::Transactional
            };
            for classifier in &database.classifiers {
                let candidate = Candidate {
                    classifier,
                    database_type: &logical.db_type,
                    database_kind: kind,
                };
                if criteria.matches(&candidate) {
                    matches.push(BackupClassifierMatch {
                        database: BackupDatabaseRef {
                            logical_backup: lb_index,
                            database: db_index,
                        },
                        classifier: classifier.clone(),
                    });
                }
            }
        }
    }
    matches
}

/// Select backup-time classifiers of external databases as
/// `(external database index, classifier)` pairs.
pub fn select_external_classifiers(
    backup: &Backup,
    criteria: &FilterCriteria,
) -> Vec<(usize, Classifier)> {
    backup
        .external_databases
        .iter()
        .enumerate()
        .flat_map(|(index, external)| {
            external
                .classifiers
                .iter()
                .filter(move |classifier| {
                    criteria.matches(&Candidate {
                        classifier: *classifier,
                        database_type: &external.db_type,
                        database_kind: DatabaseKind::Transactional,
                    })
                })
                .map(move |classifier| (index, classifier.clone()))
        })
        .collect()
}
