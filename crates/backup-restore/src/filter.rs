/*
 * SPDX-FileCopyrightText: 2020 Stalwart Labs Ltd <hello@stalw.art>
 *
 * SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-SEL
 */

//! Declarative include/exclude criteria over database registrations

use crate::model::{Classifier, DatabaseKind};
use serde::{Deserialize, Serialize};

/// Constraint on registrations; lists are OR'd, fields present are AND'ed.
/// An empty list leaves that field unconstrained.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Filter {
    pub namespace: Vec<String>,
    pub microservice_name: Vec<String>,
    pub database_type: Vec<String>,
    pub database_kind: Vec<DatabaseKind>,
}

/// Include filters OR'd together, minus anything matching an exclude filter
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct FilterCriteria {
    pub include: Vec<Filter>,
    pub exclude: Vec<Filter>,
}

/// The attributes of one registration a filter is evaluated against
#[derive(Debug, Clone, Copy)]
pub struct Candidate<'a> {
    pub classifier: &'a Classifier,
    pub database_type: &'a str,
    pub database_kind: DatabaseKind,
}

impl Filter {
    pub fn namespaces(namespaces: &[&str]) -> Self {
        Self {
            namespace: namespaces.iter().map(|n| n.to_string()).collect(),
            ..Default::default()
        }
    }

    pub fn matches(&self, candidate: &Candidate<'_>) -> bool {
        field_matches(&self.namespace, candidate.classifier.namespace())
            && field_matches(
                &self.microservice_name,
                candidate.classifier.microservice_name(),
            )
            && field_matches(&self.database_type, Some(candidate.database_type))
            && (self.database_kind.is_empty()
                || self.database_kind.contains(&candidate.database_kind))
    }
}

fn field_matches(allowed: &[String], value: Option<&str>) -> bool {
    allowed.is_empty() || value.is_some_and(|v| allowed.iter().any(|a| a == v))
}

impl FilterCriteria {
    pub fn including(filter: Filter) -> Self {
        Self {
            include: vec![filter],
            exclude: Vec::new(),
        }
    }

    pub fn excluding(mut self, filter: Filter) -> Self {
        self.exclude.push(filter);
        self
    }

    pub fn matches(&self, candidate: &Candidate<'_>) -> bool {
        self.include.iter().any(|f| f.matches(candidate))
            && !self.exclude.iter().any(|f| f.matches(candidate))
    }
}
