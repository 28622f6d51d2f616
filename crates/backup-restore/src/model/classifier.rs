/*
 * SPDX-FileCopyrightText: 2020 Stalwart Labs Ltd <hello@stalw.art>
 *
 * SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-SEL
 */

use serde::{Deserialize, Serialize};
use std::{collections::BTreeMap, fmt};

pub const NAMESPACE: &str = "namespace";
pub const MICROSERVICE_NAME: &str = "microserviceName";
pub const TENANT_ID: &str = "tenantId";

/// Ordered key/value identity of one logical database registration
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Classifier(BTreeMap<String, String>);

impl Classifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert
    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.0.insert(key.into(), value.into());
        self
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) -> Option<String> {
        self.0.insert(key.into(), value.into())
    }

    pub fn namespace(&self) -> Option<&str> {
        self.get(NAMESPACE)
    }

    pub fn microservice_name(&self) -> Option<&str> {
        self.get(MICROSERVICE_NAME)
    }

    pub fn tenant_id(&self) -> Option<&str> {
        self.get(TENANT_ID)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for Classifier {
    fn from_iter<T: IntoIterator<Item = (K, V)>>(iter: T) -> Self {
        Self(iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect())
    }
}

impl fmt::Display for Classifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("{")?;
        for (i, (key, value)) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{}={}", key, value)?;
        }
        f.write_str("}")
    }
}

/// How a restored classifier relates to the live registry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ClassifierType {
    /// No live registration holds the mapped classifier
    New,
    /// A live registration holds the mapped classifier and gets superseded
    Replaced,
    /// Registration outside the restore scope, carried for information
    Transient,
}

/// A restored classifier in its pre- and post-mapping form
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClassifierDetails {
    pub classifier_type: ClassifierType,
    pub classifier: Classifier,
    pub classifier_before_mapper: Classifier,
    /// Live database currently holding `classifier`, when replaced
    pub previous_database: Option<String>,
}

impl ClassifierDetails {
    pub fn is_in_scope(&self) -> bool {
        self.classifier_type != ClassifierType::Transient
    }
}
