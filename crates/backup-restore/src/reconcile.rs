/*
 * SPDX-FileCopyrightText: 2020 Stalwart Labs Ltd <hello@stalw.art>
 *
 * SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-SEL
 */

//! Registry reconciliation after a database has been restored.
//!
//! A restored database always gets a fresh registry row. Live rows that
//! already occupy one of its classifiers, or its name on the same adapter, are
//! superseded: they are flagged for drop together with all of their
//! registrations, and registrations they held outside the restored scope are
//! re-created against the new row. The new row and the superseded rows are
//! written in one registry call.
//!
//! Rows created earlier by the same restore are never superseded. When one of
//! them holds a classifier the new row claims, only that registration moves.

use crate::{
    adapter::{Adapter, AdapterDirectory},
    error::Result,
    model::{
        Classifier, Credentials, Database, DatabaseRegistration, LogicalRestore, Restore,
        RestoreDatabase, RestoreExternalDatabase,
    },
    repository::DatabaseRegistry,
    status::Status,
};
use std::{collections::HashSet, sync::Arc};
use tracing::{debug, error, info};
use uuid::Uuid;

pub const DEFAULT_ROLE: &str = "admin";

#[derive(Debug, Clone)]
pub struct Reconciler {
    registry: Arc<dyn DatabaseRegistry>,
    adapters: Arc<dyn AdapterDirectory>,
}

impl Reconciler {
    pub fn new(registry: Arc<dyn DatabaseRegistry>, adapters: Arc<dyn AdapterDirectory>) -> Self {
        Self { registry, adapters }
    }

    /// Register every completed, not yet registered database of the restore.
    /// Returns the number of databases registered.
    pub async fn reconcile(&self, restore: &mut Restore) -> usize {
        let mut owned = owned_rows(restore);
        let mut registered = 0;

        for logical in &mut restore.logical_restores {
            let pending: Vec<usize> = logical
                .databases
                .iter()
                .enumerate()
                .filter(|(_, db)| db.status == Status::Completed && !db.registered)
                .map(|(index, _)| index)
                .collect();

            let mut failures = Vec::new();
            for index in pending {
                let outcome = self
                    .register_database(logical, &logical.databases[index], &owned)
                    .await;
                let db = &mut logical.databases[index];
                match outcome {
                    Ok(database) => {
                        owned.insert(database.id);
                        db.database_id = Some(database.id);
                        db.registered = true;
                        registered += 1;
                    }
                    Err(err) => {
                        error!("Failed to register restored database {}: {}", db.name, err);
                        db.status = Status::Failed;
                        db.error_message = Some(format!("Registration failed: {}", err));
                        failures.push(db.name.clone());
                    }
                }
            }
            if !failures.is_empty() {
                logical.error_message = Some(format!(
                    "Registration failed for databases: {}",
                    failures.join(", ")
                ));
            }
            logical.rollup();
        }

        for external in restore.external_databases.iter_mut().filter(|e| !e.registered) {
            match self.register_external(external, &owned).await {
                Ok(database) => {
                    owned.insert(database.id);
                    external.database_id = Some(database.id);
                    external.registered = true;
                    external.error_message = None;
                    registered += 1;
                }
                Err(err) => {
                    error!("Failed to register external database {}: {}", external.name, err);
                    external.error_message = Some(err.to_string());
                }
            }
        }

        registered
    }

    /// Provision users for the restored database and register it. Rows in
    /// `owned` were created by the same restore and are not superseded.
    pub async fn register_database(
        &self,
        logical: &LogicalRestore,
        restored: &RestoreDatabase,
        owned: &HashSet<Uuid>,
    ) -> Result<Database> {
        let adapter = self.adapters.get_adapter(&logical.adapter_id).await?;
        let users = provision_users(adapter.as_ref(), restored).await?;

        let mut database = Database::new(restored.name.clone(), logical.db_type.clone())
            .on_adapter(logical.adapter_id.clone());
        database.physical_database_id = Some(logical.physical_database_id.clone());
        database.settings = restored.settings.clone();
        database.configurational = restored.configurational;
        database.users = users;
        database.registrations = restored
            .scoped_classifiers()
            .cloned()
            .map(DatabaseRegistration::new)
            .collect();

        let superseded = self.supersede(&mut database, Some(&logical.adapter_id), owned).await?;
        self.registry.replace_databases(&database, &superseded).await?;
        info!(
            "Registered restored database {} with {} classifiers",
            database.name,
            database.registrations.len()
        );
        Ok(database)
    }

    /// Re-register an externally managed database under its mapped classifiers
    pub async fn register_external(
        &self,
        external: &RestoreExternalDatabase,
        owned: &HashSet<Uuid>,
    ) -> Result<Database> {
        let mut database = Database::new(external.name.clone(), external.db_type.clone());
        database.externally_manageable = true;
        database.registrations = external
            .classifiers
            .iter()
            .filter(|c| c.is_in_scope())
            .map(|c| DatabaseRegistration::new(c.classifier.clone()))
            .collect();

        let superseded = self.supersede(&mut database, None, owned).await?;
        self.registry.replace_databases(&database, &superseded).await?;
        info!("Registered external database {}", database.name);
        Ok(database)
    }

    /// Find live rows occupying the new database's identity and carry their
    /// other registrations over to it. Returns the rows to save alongside it;
    /// nothing is written here.
    async fn supersede(
        &self,
        database: &mut Database,
        adapter_id: Option<&str>,
        owned: &HashSet<Uuid>,
    ) -> Result<Vec<Database>> {
        let mut existing: Vec<Database> = Vec::new();
        let classifiers: Vec<Classifier> = database
            .registrations
            .iter()
            .map(|r| r.classifier.clone())
            .collect();

        for classifier in &classifiers {
            if let Some(found) = self.registry.find_by_classifier(classifier).await? {
                if !existing.iter().any(|db| db.id == found.id) {
                    existing.push(found);
                }
            }
        }
        if let Some(adapter_id) = adapter_id {
            if let Some(found) = self.registry.find_by_name(&database.name, adapter_id).await? {
                if !existing.iter().any(|db| db.id == found.id) {
                    existing.push(found);
                }
            }
        }

        let mut changed = Vec::with_capacity(existing.len());
        for mut old in existing {
            if owned.contains(&old.id) {
                let mut released = false;
                for classifier in &classifiers {
                    released |= old.release(classifier);
                }
                if released {
                    debug!("Moving registrations of {} ({}) to {}", old.name, old.id, database.id);
                    changed.push(old);
                }
                continue;
            }

            for registration in old.live_registrations() {
                if !database
                    .registrations
                    .iter()
                    .any(|r| r.classifier == registration.classifier)
                {
                    debug!(
                        "Carrying registration {} from {} to {}",
                        registration.classifier, old.id, database.id
                    );
                    database
                        .registrations
                        .push(DatabaseRegistration::new(registration.classifier.clone()));
                }
            }

            old.mark_for_drop();
            info!("Database {} ({}) superseded by {}", old.name, old.id, database.id);
            changed.push(old);
        }
        Ok(changed)
    }
}

/// Registry rows already created by this restore
fn owned_rows(restore: &Restore) -> HashSet<Uuid> {
    restore
        .databases()
        .filter_map(|db| db.database_id)
        .chain(restore.external_databases.iter().filter_map(|e| e.database_id))
        .collect()
}

async fn provision_users(
    adapter: &dyn Adapter,
    restored: &RestoreDatabase,
) -> Result<Vec<Credentials>> {
    let mut credentials = Vec::new();
    if restored.users.is_empty() {
        credentials.push(
            adapter
                .ensure_user(None, None, &restored.name, DEFAULT_ROLE)
                .await?,
        );
    }
    for user in &restored.users {
        credentials.push(
            adapter
                .ensure_user(None, None, &restored.name, &user.role)
                .await?,
        );
    }
    Ok(credentials)
}
