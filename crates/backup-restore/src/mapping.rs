/*
 * SPDX-FileCopyrightText: 2020 Stalwart Labs Ltd <hello@stalw.art>
 *
 * SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-SEL
 */

//! Namespace and tenant remapping of restored classifiers

use crate::{
    error::{BackupError, Result},
    model::{
        classifier::{NAMESPACE, TENANT_ID},
        Classifier, ClassifierDetails, Mapping,
    },
};
use std::collections::HashMap;

impl Mapping {
    /// Rewrite `namespace` and `tenantId` independently; other keys pass through
    pub fn apply(&self, classifier: &Classifier) -> Classifier {
        let mut mapped = classifier.clone();
        if let Some(target) = classifier.namespace().and_then(|ns| self.namespaces.get(ns)) {
            mapped.insert(NAMESPACE, target.clone());
        }
        if let Some(target) = classifier.tenant_id().and_then(|t| self.tenants.get(t)) {
            mapped.insert(TENANT_ID, target.clone());
        }
        mapped
    }
}

/// Fail when two different source classifiers end up as the same classifier
pub fn check_collisions<'a, I>(details: I) -> Result<()>
where
    I: IntoIterator<Item = &'a ClassifierDetails>,
{
    let mut origins: HashMap<&Classifier, &Classifier> = HashMap::new();
    for detail in details {
        match origins.get(&detail.classifier) {
            Some(origin) if *origin != &detail.classifier_before_mapper => {
                return Err(BackupError::ValidationConflict(format!(
                    "Classifier {} is produced by both {} and {}",
                    detail.classifier, origin, detail.classifier_before_mapper
                )));
            }
            Some(_) => {}
            None => {
                origins.insert(&detail.classifier, &detail.classifier_before_mapper);
            }
        }
    }
    Ok(())
}
