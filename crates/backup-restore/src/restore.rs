/*
 * SPDX-FileCopyrightText: 2020 Stalwart Labs Ltd <hello@stalw.art>
 *
 * SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-SEL
 */

//! Restore management module

use crate::{
    adapter::{LogicalRestoreStatus, RestoreTarget},
    error::{BackupError, Result},
    executor::FanOutExecutor,
    mapping::check_collisions,
    model::{
        Backup, BackupDatabaseRef, Classifier, ClassifierDetails, ClassifierType,
        ExternalDatabaseStrategy, LogicalRestore, Mapping, Restore, RestoreDatabase,
        RestoreExternalDatabase, RestoreRequest, RestoreStatusView,
    },
    reconcile::Reconciler,
    repository::{require_backup, require_restore},
    selector::{select_backup_classifiers, select_external_classifiers},
    status::Status,
    Collaborators,
};
use std::collections::{BTreeMap, HashSet};
use tracing::{debug, error, info, warn};

/// Restore manager responsible for restoring backups into the registry
#[derive(Debug)]
pub struct RestoreManager {
    ctx: Collaborators,
    executor: FanOutExecutor,
    reconciler: Reconciler,
}

/// One adapter call on behalf of a logical restore
#[derive(Debug, Clone)]
struct RestoreUnit {
    index: usize,
    adapter_id: String,
    operation: String,
    targets: Vec<RestoreTarget>,
}

/// Classifiers of one backup database headed for one target namespace
type TargetKey = (BackupDatabaseRef, String);

impl RestoreManager {
    pub fn new(ctx: Collaborators, executor: FanOutExecutor) -> Self {
        let reconciler = Reconciler::new(ctx.registry.clone(), ctx.adapters.clone());
        Self {
            ctx,
            executor,
            reconciler,
        }
    }

    /// Restore the databases of a backup that match the request filter.
    ///
    /// A dry run returns the planned aggregate, with classifier mapping and
    /// collision checks applied, without persisting it or calling adapters.
    pub async fn restore(
        &self,
        backup_name: &str,
        request: RestoreRequest,
        dry_run: bool,
    ) -> Result<Restore> {
        info!(
            "Starting restore {} of backup {} (dry run: {})",
            request.restore_name, backup_name, dry_run
        );

        if self.ctx.repository.get_restore(&request.restore_name).await?.is_some() {
            return Err(BackupError::AlreadyExists {
                entity: "Restore",
                name: request.restore_name,
            });
        }

        let backup = require_backup(self.ctx.repository.as_ref(), backup_name).await?;
        match backup.status {
            Status::Completed => {}
            Status::Deleted if backup.imported => {
                debug!("Restoring imported backup {} from storage", backup_name);
            }
            status => {
                return Err(BackupError::IllegalState(format!(
                    "Backup {} is {:?} and cannot be restored",
                    backup_name, status
                )));
            }
        }

        let filter = request
            .filter_criteria
            .clone()
            .unwrap_or_else(|| backup.filter_criteria.clone());
        let mut restore = Restore::new(backup_name, &request, filter);

        let targets = plan_targets(&backup, &restore);
        restore.external_databases = self.plan_external(&backup, &restore)?;
        if targets.is_empty() && restore.external_databases.is_empty() {
            return Err(BackupError::NotFound(format!(
                "No databases in backup {} match the filter of restore {}",
                backup_name, restore.name
            )));
        }

        check_collisions(
            targets
                .values()
                .flatten()
                .chain(restore.external_databases.iter().flat_map(|e| e.classifiers.iter())),
        )?;

        let mut targets = targets;
        for details in targets.values_mut() {
            self.tag_classifiers(details).await?;
        }
        for external in &mut restore.external_databases {
            self.tag_classifiers(&mut external.classifiers).await?;
        }

        restore.logical_restores = self.group_targets(&backup, targets).await?;
        restore.rollup();

        if dry_run {
            info!(
                "Dry run of restore {} would cover {} databases on {} adapters",
                restore.name,
                restore.total,
                restore.logical_restores.len()
            );
            return Ok(restore);
        }

        self.ctx.repository.create_restore(&restore).await?;
        self.run(&mut restore).await;
        self.ctx.repository.save_restore(&restore).await?;

        info!(
            "Restore {} started with status {:?} ({}/{} databases completed)",
            restore.name, restore.status, restore.completed, restore.total
        );
        Ok(restore)
    }

    /// Start again every part of a finished restore that did not complete
    pub async fn retry_restore(&self, name: &str, dry_run: bool) -> Result<Restore> {
        let mut restore = require_restore(self.ctx.repository.as_ref(), name).await?;
        if restore.status.is_trackable() {
            return Err(BackupError::IllegalState(format!(
                "Restore {} is still in progress",
                name
            )));
        }
        if restore.attempts_exceeded() {
            return Err(BackupError::IllegalState(format!(
                "Restore {} exceeded the attempt limit",
                name
            )));
        }

        for logical in restore
            .logical_restores
            .iter_mut()
            .filter(|lr| lr.databases.iter().any(|db| db.status != Status::Completed))
        {
            logical.reset_incomplete();
        }
        for external in &mut restore.external_databases {
            external.error_message = None;
        }
        restore.rollup();

        if dry_run {
            return Ok(restore);
        }

        info!("Retrying restore {}", name);
        self.ctx.repository.save_restore(&restore).await?;
        self.run(&mut restore).await;
        self.ctx.repository.save_restore(&restore).await?;
        Ok(restore)
    }

    /// Poll adapters for logical restores still in flight, register whatever
    /// completed and persist the result
    pub async fn track(&self, mut restore: Restore) -> Result<Restore> {
        if restore.attempts_exceeded() {
            warn!(
                "Restore {} exceeded the attempt limit and is marked failed",
                restore.name
            );
            restore.rollup();
            self.ctx.repository.save_restore(&restore).await?;
            return Ok(restore);
        }

        let units: Vec<RestoreUnit> = restore
            .logical_restores
            .iter()
            .enumerate()
            .filter(|(_, lr)| lr.status.is_trackable())
            .filter_map(|(index, lr)| {
                lr.logical_restore_name.as_ref().map(|operation| RestoreUnit {
                    index,
                    adapter_id: lr.adapter_id.clone(),
                    operation: operation.clone(),
                    targets: Vec::new(),
                })
            })
            .collect();
        debug!(
            "Tracking {} logical restores of restore {}",
            units.len(),
            restore.name
        );

        let adapters = self.ctx.adapters.clone();
        let results = self
            .executor
            .execute(units, move |unit| {
                let adapters = adapters.clone();
                async move {
                    let adapter = adapters.get_adapter(&unit.adapter_id).await?;
                    adapter.restore_track(&unit.operation).await?.ok_or_else(|| {
                        BackupError::rejected(&unit.adapter_id, "Empty response on restore track")
                    })
                }
            })
            .await;
        apply_results(&mut restore, results);
        self.reconciler.reconcile(&mut restore).await;

        restore.attempt_count += 1;
        restore.rollup();
        self.ctx.repository.save_restore(&restore).await?;
        Ok(restore)
    }

    pub async fn get_restore(&self, name: &str) -> Result<Restore> {
        require_restore(self.ctx.repository.as_ref(), name).await
    }

    pub async fn restore_status(&self, name: &str) -> Result<RestoreStatusView> {
        Ok(self.get_restore(name).await?.status_view())
    }

    /// Start pending logical restores, then register anything already done
    async fn run(&self, restore: &mut Restore) {
        self.start(restore).await;
        self.reconciler.reconcile(restore).await;
        restore.rollup();
    }

    async fn start(&self, restore: &mut Restore) {
        let units: Vec<RestoreUnit> = restore
            .logical_restores
            .iter()
            .enumerate()
            .filter(|(_, lr)| lr.status == Status::NotStarted)
            .map(|(index, lr)| RestoreUnit {
                index,
                adapter_id: lr.adapter_id.clone(),
                operation: lr.source_logical_backup_name.clone(),
                targets: lr
                    .databases
                    .iter()
                    .filter(|db| db.status != Status::Completed)
                    .map(|db| RestoreTarget {
                        previous_database_name: db.source_name.clone(),
                        namespace: lr.target_namespace.clone(),
                        microservice_name: db.microservice_name.clone(),
                        db_type: lr.db_type.clone(),
                    })
                    .collect(),
            })
            .collect();

        let adapters = self.ctx.adapters.clone();
        let storage_name = restore.storage_name.clone();
        let blob_path = restore.blob_path.clone();
        let results = self
            .executor
            .execute(units, move |unit| {
                let adapters = adapters.clone();
                let storage_name = storage_name.clone();
                let blob_path = blob_path.clone();
                async move {
                    let adapter = adapters.get_adapter(&unit.adapter_id).await?;
                    adapter
                        .restore_start(&unit.operation, &storage_name, &blob_path, &unit.targets)
                        .await?
                        .ok_or_else(|| {
                            BackupError::rejected(
                                &unit.adapter_id,
                                "Empty response on restore start",
                            )
                        })
                }
            })
            .await;
        apply_results(restore, results);
    }

    /// Matched external classifiers, subject to the external strategy
    fn plan_external(
        &self,
        backup: &Backup,
        restore: &Restore,
    ) -> Result<Vec<RestoreExternalDatabase>> {
        let matches = select_external_classifiers(backup, &restore.filter_criteria);
        if matches.is_empty() {
            return Ok(Vec::new());
        }

        let mut grouped: BTreeMap<usize, Vec<Classifier>> = BTreeMap::new();
        for (index, classifier) in matches {
            grouped.entry(index).or_default().push(classifier);
        }
        let names: Vec<&str> = grouped
            .keys()
            .filter_map(|index| backup.external_databases.get(*index))
            .map(|e| e.name.as_str())
            .collect();

        match restore.external_database_strategy {
            ExternalDatabaseStrategy::Fail => Err(BackupError::ValidationConflict(format!(
                "External databases are not allowed in restore {}: {}",
                restore.name,
                names.join(", ")
            ))),
            ExternalDatabaseStrategy::Skip => {
                info!("Skipping external databases: {}", names.join(", "));
                Ok(Vec::new())
            }
            ExternalDatabaseStrategy::Include => Ok(grouped
                .into_iter()
                .filter_map(|(index, matched)| {
                    backup.external_databases.get(index).map(|external| {
                        RestoreExternalDatabase {
                            name: external.name.clone(),
                            db_type: external.db_type.clone(),
                            classifiers: classifier_details(
                                &restore.mapping,
                                &matched,
                                &external.classifiers,
                            ),
                            registered: false,
                            database_id: None,
                            error_message: None,
                        }
                    })
                })
                .collect()),
        }
    }

    /// Tag in-scope classifiers as new or replacing a live registration
    async fn tag_classifiers(&self, details: &mut [ClassifierDetails]) -> Result<()> {
        for detail in details.iter_mut().filter(|d| d.is_in_scope()) {
            match self.ctx.registry.find_by_classifier(&detail.classifier).await? {
                Some(existing) => {
                    debug!(
                        "Classifier {} replaces live database {}",
                        detail.classifier, existing.name
                    );
                    detail.classifier_type = ClassifierType::Replaced;
                    detail.previous_database = Some(existing.name);
                }
                None => {
                    detail.classifier_type = ClassifierType::New;
                    detail.previous_database = None;
                }
            }
        }
        Ok(())
    }

    /// One logical restore per source logical backup, chosen adapter and
    /// target namespace
    async fn group_targets(
        &self,
        backup: &Backup,
        targets: BTreeMap<TargetKey, Vec<ClassifierDetails>>,
    ) -> Result<Vec<LogicalRestore>> {
        let mut groups: BTreeMap<(usize, String, String), LogicalRestore> = BTreeMap::new();

        for ((reference, namespace), details) in targets {
            let (source, database) = backup
                .logical_backups
                .get(reference.logical_backup)
                .and_then(|lb| lb.databases.get(reference.database).map(|db| (lb, db)))
                .ok_or_else(|| {
                    BackupError::IllegalState(format!(
                        "Backup {} has no database at {:?}",
                        backup.name, reference
                    ))
                })?;
            let operation = source.logical_backup_name.clone().ok_or_else(|| {
                BackupError::IllegalState(format!(
                    "Logical backup on adapter {} of backup {} has no operation name",
                    source.adapter_id, backup.name
                ))
            })?;

            let microservice_name = details
                .iter()
                .filter(|d| d.is_in_scope())
                .find_map(|d| d.classifier.microservice_name().map(str::to_string));
            let placement = self
                .ctx
                .balancing
                .choose_adapter(&source.db_type, &namespace, microservice_name.as_deref())
                .await?;

            let logical = groups
                .entry((
                    reference.logical_backup,
                    placement.adapter_id.clone(),
                    namespace.clone(),
                ))
                .or_insert_with(|| LogicalRestore {
                    adapter_id: placement.adapter_id,
                    physical_database_id: placement.physical_database_id,
                    db_type: source.db_type.clone(),
                    target_namespace: namespace.clone(),
                    source_logical_backup_name: operation,
                    logical_restore_name: None,
                    status: Status::NotStarted,
                    error_message: None,
                    creation_time: None,
                    completion_time: None,
                    databases: Vec::new(),
                });

            logical.databases.push(RestoreDatabase {
                backup_database: reference,
                source_name: database.name.clone(),
                name: database.name.clone(),
                namespace,
                microservice_name,
                classifiers: details,
                users: database.users.clone(),
                settings: database.settings.clone(),
                resources: BTreeMap::new(),
                configurational: database.configurational,
                status: Status::NotStarted,
                duration_ms: 0,
                path: None,
                error_message: None,
                registered: false,
                database_id: None,
            });
        }

        Ok(groups.into_values().collect())
    }
}

/// Matched backup classifiers grouped by source database and mapped target
/// namespace, each group followed by the database's out-of-scope classifiers
fn plan_targets(
    backup: &Backup,
    restore: &Restore,
) -> BTreeMap<TargetKey, Vec<ClassifierDetails>> {
    let matches = select_backup_classifiers(backup, &restore.filter_criteria);

    let mut matched: BTreeMap<BackupDatabaseRef, Vec<Classifier>> = BTreeMap::new();
    for m in matches {
        matched.entry(m.database).or_default().push(m.classifier);
    }

    let mut targets: BTreeMap<TargetKey, Vec<ClassifierDetails>> = BTreeMap::new();
    for (reference, classifiers) in matched {
        let captured = backup
            .logical_backups
            .get(reference.logical_backup)
            .and_then(|lb| lb.databases.get(reference.database))
            .map(|db| db.classifiers.as_slice())
            .unwrap_or_default();

        let details = classifier_details(&restore.mapping, &classifiers, captured);
        let namespaces: HashSet<String> = details
            .iter()
            .filter(|d| d.is_in_scope())
            .map(|d| d.classifier.namespace().unwrap_or_default().to_string())
            .collect();

        for namespace in namespaces {
            let group = details
                .iter()
                .filter(|d| {
                    !d.is_in_scope() || d.classifier.namespace().unwrap_or_default() == namespace
                })
                .cloned()
                .collect();
            targets.insert((reference, namespace), group);
        }
    }
    targets
}

/// Mapped details for the matched classifiers, followed by transient details
/// for the captured classifiers that did not match
fn classifier_details(
    mapping: &Mapping,
    matched: &[Classifier],
    captured: &[Classifier],
) -> Vec<ClassifierDetails> {
    let mut details: Vec<ClassifierDetails> = matched
        .iter()
        .map(|classifier| ClassifierDetails {
            classifier_type: ClassifierType::New,
            classifier: mapping.apply(classifier),
            classifier_before_mapper: classifier.clone(),
            previous_database: None,
        })
        .collect();

    details.extend(
        captured
            .iter()
            .filter(|classifier| !matched.contains(classifier))
            .map(|classifier| ClassifierDetails {
                classifier_type: ClassifierType::Transient,
                classifier: classifier.clone(),
                classifier_before_mapper: classifier.clone(),
                previous_database: None,
            }),
    );
    details
}

fn apply_results(
    restore: &mut Restore,
    results: Vec<(RestoreUnit, Result<LogicalRestoreStatus>)>,
) {
    for (unit, result) in results {
        let Some(logical) = restore.logical_restores.get_mut(unit.index) else {
            continue;
        };
        match result {
            Ok(report) => logical.apply(report),
            Err(err) => {
                error!(
                    "Logical restore on adapter {} failed: {}",
                    unit.adapter_id, err
                );
                metrics::counter!("backup_restore_adapter_failures_total", "operation" => "restore")
                    .increment(1);
                logical.fail(err.status_message());
            }
        }
    }
}
