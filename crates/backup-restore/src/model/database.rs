/*
 * SPDX-FileCopyrightText: 2020 Stalwart Labs Ltd <hello@stalw.art>
 *
 * SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-SEL
 */

use super::classifier::Classifier;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DatabaseKind {
    Configuration,
    Transactional,
}

/// User reference captured in a backup
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DbUser {
    pub name: String,
    pub role: String,
}

/// Credentials returned by an adapter's user provisioning
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Credentials {
    pub username: String,
    pub password: String,
    pub role: String,
    #[serde(default)]
    pub connection_properties: BTreeMap<String, String>,
}

/// A live logical database known to the registry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Database {
    pub id: Uuid,
    pub name: String,
    pub db_type: String,
    /// `None` for externally managed databases
    pub adapter_id: Option<String>,
    pub physical_database_id: Option<String>,
    #[serde(default)]
    pub settings: BTreeMap<String, String>,
    #[serde(default)]
    pub users: Vec<Credentials>,
    #[serde(default)]
    pub backup_disabled: bool,
    #[serde(default)]
    pub externally_manageable: bool,
    #[serde(default)]
    pub configurational: bool,
    #[serde(default)]
    pub marked_for_drop: bool,
    pub created_at: DateTime<Utc>,
    pub registrations: Vec<DatabaseRegistration>,
}

/// One classifier under which a database is registered
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DatabaseRegistration {
    pub id: Uuid,
    pub classifier: Classifier,
    pub namespace: String,
    #[serde(default)]
    pub marked_for_drop: bool,
}

impl Database {
    pub fn new(name: impl Into<String>, db_type: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            db_type: db_type.into(),
            adapter_id: None,
            physical_database_id: None,
            settings: BTreeMap::new(),
            users: Vec::new(),
            backup_disabled: false,
            externally_manageable: false,
            configurational: false,
            marked_for_drop: false,
            created_at: Utc::now(),
            registrations: Vec::new(),
        }
    }

    pub fn on_adapter(mut self, adapter_id: impl Into<String>) -> Self {
        self.adapter_id = Some(adapter_id.into());
        self
    }

    pub fn registered_as(mut self, classifier: Classifier) -> Self {
        self.registrations.push(DatabaseRegistration::new(classifier));
        self
    }

    pub fn kind(&self) -> DatabaseKind {
        if self.configurational {
            DatabaseKind::Configuration
        } else {
            DatabaseKind::Transactional
        }
    }

    pub fn live_registrations(&self) -> impl Iterator<Item = &DatabaseRegistration> {
        self.registrations.iter().filter(|r| !r.marked_for_drop)
    }

    pub fn holds(&self, classifier: &Classifier) -> bool {
        !self.marked_for_drop && self.live_registrations().any(|r| &r.classifier == classifier)
    }

    /// User references without secrets, as captured into a backup
    pub fn user_refs(&self) -> Vec<DbUser> {
        self.users
            .iter()
            .map(|u| DbUser {
                name: u.username.clone(),
                role: u.role.clone(),
            })
            .collect()
    }

    /// Flag the database and all of its registrations as superseded
    pub fn mark_for_drop(&mut self) {
        self.marked_for_drop = true;
        for registration in &mut self.registrations {
            registration.marked_for_drop = true;
        }
    }

    /// Flag the registrations under `classifier` without dropping the database.
    /// Returns whether anything changed.
    pub fn release(&mut self, classifier: &Classifier) -> bool {
        let mut released = false;
        for registration in self
            .registrations
            .iter_mut()
            .filter(|r| !r.marked_for_drop && &r.classifier == classifier)
        {
            registration.marked_for_drop = true;
            released = true;
        }
        released
    }
}

impl DatabaseRegistration {
    pub fn new(classifier: Classifier) -> Self {
        Self {
            id: Uuid::new_v4(),
            namespace: classifier.namespace().unwrap_or_default().to_string(),
            classifier,
            marked_for_drop: false,
        }
    }
}
