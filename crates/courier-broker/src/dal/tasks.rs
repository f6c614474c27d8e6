/*
 * Copyright (c) 2025 Dylan Storey
 * Licensed under the Elastic License 2.0.
 * See LICENSE file in the project root for full license text.
 */

//! Data Access Layer for deployment tasks.
//!
//! Claims and status reports are the two hot paths. Both lock the rows they
//! touch (`SELECT ... FOR UPDATE`) inside one transaction, compute the
//! transition with [`crate::rollout::state`], and persist task, deployment
//! counters and machine status together.
//!
//! Lock order is machine, deployment, task everywhere (cancellation starts at
//! the deployment), which keeps concurrent claims, reports and cancellations
//! free of deadlocks.

use std::collections::HashMap;

use crate::dal::DAL;
use crate::metrics;
use crate::rollout::aggregator::{self, Bucket};
use crate::rollout::ports::MachineRegistry;
use crate::rollout::scheduler;
use crate::rollout::state::{self, ReportOutcome};
use crate::rollout::RolloutError;
use crate::utils::event_bus::{self, RolloutEvent};
use chrono::{DateTime, Utc};
use courier_models::models::applications::Application;
use courier_models::models::client_machines::{ClientMachine, MachineStatus};
use courier_models::models::deployment_histories::{DeploymentHistory, DeploymentStatus};
use courier_models::models::deployment_tasks::{DeploymentTask, TaskStatus};
use courier_models::models::failure::FailureKind;
use courier_models::models::manifests::{ApplicationManifest, UpdatePolicy};
use courier_models::models::package_versions::PackageVersion;
use courier_models::schema::{
    application_manifests, applications, client_machines, deployment_histories, deployment_tasks,
    package_versions,
};
use courier_models::wire::{PendingTask, StatusReportResponse, TaskStatusReport};
use courier_utils::logging::prelude::*;
use diesel::pg::PgConnection;
use diesel::prelude::*;

/// Result of applying one status report.
#[derive(Debug, Clone)]
pub struct ReportResult {
    pub task: DeploymentTask,
    pub response: StatusReportResponse,
    /// Set when this report settled the owning deployment.
    pub settled: Option<DeploymentHistory>,
}

/// Data Access Layer for DeploymentTask operations.
pub struct TasksDAL<'a> {
    pub dal: &'a DAL,
}

impl TasksDAL<'_> {
    pub fn get(&self, task_id: i64) -> Result<Option<DeploymentTask>, RolloutError> {
        let conn = &mut self.dal.conn()?;
        Ok(deployment_tasks::table
            .find(task_id)
            .first(conn)
            .optional()?)
    }

    /// The machine's eligible tasks in execution order: priority descending,
    /// then creation order. Retrying tasks appear once their backoff expired
    /// and scheduled tasks once their start time passed.
    pub fn pending_for_machine(&self, machine_key: &str) -> Result<Vec<PendingTask>, RolloutError> {
        self.pending_for_machine_at(machine_key, Utc::now())
    }

    pub fn pending_for_machine_at(
        &self,
        machine_key: &str,
        now: DateTime<Utc>,
    ) -> Result<Vec<PendingTask>, RolloutError> {
        let machine = self.dal.machines().require_by_key(machine_key)?;
        let conn = &mut self.dal.conn()?;

        let candidates: Vec<DeploymentTask> = deployment_tasks::table
            .filter(deployment_tasks::machine_id.eq(machine.id))
            .filter(
                deployment_tasks::status
                    .eq(TaskStatus::Queued)
                    .or(deployment_tasks::status.eq(TaskStatus::Retrying)),
            )
            .load(conn)?;
        let queue = scheduler::pending_queue(&candidates, now);
        if queue.is_empty() {
            return Ok(Vec::new());
        }

        let version_ids: Vec<i64> = queue.iter().map(|t| t.package_version_id).collect();
        let versions: HashMap<i64, PackageVersion> = package_versions::table
            .filter(package_versions::id.eq_any(&version_ids))
            .load::<PackageVersion>(conn)?
            .into_iter()
            .map(|v| (v.id, v))
            .collect();
        let app_ids: Vec<i64> = versions.values().map(|v| v.application_id).collect();
        let apps: HashMap<i64, Application> = applications::table
            .filter(applications::id.eq_any(&app_ids))
            .load::<Application>(conn)?
            .into_iter()
            .map(|a| (a.id, a))
            .collect();
        let manifests: HashMap<i64, ApplicationManifest> = application_manifests::table
            .filter(application_manifests::application_id.eq_any(&app_ids))
            .filter(application_manifests::is_active.eq(true))
            .load::<ApplicationManifest>(conn)?
            .into_iter()
            .map(|m| (m.application_id, m))
            .collect();
        let deployment_ids: Vec<i64> = queue.iter().map(|t| t.deployment_id).collect();
        let deployment_types: HashMap<i64, _> = deployment_histories::table
            .filter(deployment_histories::id.eq_any(&deployment_ids))
            .select((deployment_histories::id, deployment_histories::deployment_type))
            .load::<(i64, courier_models::models::deployment_histories::DeploymentType)>(conn)?
            .into_iter()
            .collect();

        queue
            .into_iter()
            .map(|task| {
                let version = versions
                    .get(&task.package_version_id)
                    .ok_or(RolloutError::InvalidPackageVersion(task.package_version_id))?;
                let app = apps.get(&version.application_id).ok_or_else(|| {
                    RolloutError::not_found(format!("application {}", version.application_id))
                })?;
                let deployment_type = deployment_types.get(&task.deployment_id).ok_or_else(|| {
                    RolloutError::not_found(format!("deployment {}", task.deployment_id))
                })?;
                let manifest = manifests.get(&app.id);
                Ok(PendingTask {
                    task_id: task.id,
                    deployment_id: task.deployment_id,
                    app_code: app.code.clone(),
                    version: version.version.clone(),
                    package_version_id: version.id,
                    content_hash: version.content_hash.clone(),
                    size_bytes: version.size_bytes,
                    priority: task.priority,
                    scheduled_for: task.scheduled_for,
                    deployment_type: *deployment_type,
                    update_policy: manifest.map(|m| m.update_policy).unwrap_or_default(),
                    preserved_paths: manifest
                        .filter(|m| m.update_policy == UpdatePolicy::Selective)
                        .map(|m| m.preserved_paths())
                        .unwrap_or_default(),
                    retry_count: task.retry_count,
                })
            })
            .collect()
    }

    /// Atomically moves an eligible task to in-progress for `machine_key`.
    ///
    /// Refused with a conflict when the task belongs to another machine, is
    /// not eligible yet, was already claimed, or the machine is already
    /// running a different task. Of two concurrent claims on one task exactly
    /// one wins.
    pub fn claim(&self, task_id: i64, machine_key: &str) -> Result<DeploymentTask, RolloutError> {
        let now = Utc::now();
        let conn = &mut self.dal.conn()?;
        let result = conn.transaction::<_, RolloutError, _>(|conn| {
            let machine: ClientMachine = client_machines::table
                .filter(client_machines::machine_key.eq(machine_key))
                .for_update()
                .first(conn)
                .optional()?
                .ok_or_else(|| RolloutError::not_found(format!("machine '{}'", machine_key)))?;
            lock_deployment_of(conn, task_id)?;
            let task = lock_task(conn, task_id)?;

            let running: Option<i64> = deployment_tasks::table
                .filter(deployment_tasks::machine_id.eq(machine.id))
                .filter(deployment_tasks::status.eq(TaskStatus::InProgress))
                .filter(deployment_tasks::id.ne(task.id))
                .select(deployment_tasks::id)
                .first(conn)
                .optional()?;
            if let Some(running) = running {
                return Err(RolloutError::conflict(format!(
                    "machine '{}' is already executing task {}",
                    machine_key, running
                )));
            }

            let changes = state::claim(&task, machine.id, now)?;
            let claimed: DeploymentTask = diesel::update(deployment_tasks::table.find(task.id))
                .set(&changes)
                .get_result(conn)?;

            let started: Option<DeploymentHistory> = diesel::update(
                deployment_histories::table
                    .find(task.deployment_id)
                    .filter(deployment_histories::status.eq(DeploymentStatus::Pending)),
            )
            .set((
                deployment_histories::status.eq(DeploymentStatus::InProgress),
                deployment_histories::started_at.eq(Some(now)),
            ))
            .get_result(conn)
            .optional()?;

            diesel::update(client_machines::table.find(machine.id))
                .set(client_machines::status.eq(MachineStatus::Busy))
                .execute(conn)?;
            Ok((claimed, started))
        });

        match result {
            Ok((claimed, started)) => {
                info!(
                    "Task {} of deployment {} claimed by machine '{}'",
                    claimed.id, claimed.deployment_id, machine_key
                );
                metrics::record_task_transition("claimed");
                event_bus::emit(
                    RolloutEvent::new(event_bus::TASK_CLAIMED)
                        .deployment(claimed.deployment_id)
                        .task(claimed.id)
                        .machine(claimed.machine_id)
                        .data(serde_json::json!({ "retry_count": claimed.retry_count })),
                );
                if let Some(deployment) = started {
                    info!("Deployment {} in progress", deployment.id);
                    emit_status_changed(&deployment, DeploymentStatus::Pending);
                }
                Ok(claimed)
            }
            Err(e) => {
                if matches!(e, RolloutError::Conflict(_)) {
                    metrics::CLAIM_CONFLICTS_TOTAL.inc();
                    debug!("Claim of task {} by '{}' refused: {}", task_id, machine_key, e);
                }
                Err(e)
            }
        }
    }

    /// Applies a progress or outcome report to a claimed task.
    ///
    /// A terminal outcome moves exactly one unit of the deployment's
    /// `pending_count` into `success_count` or `failed_count` in the same
    /// transaction, and settles the deployment once nothing is pending.
    pub fn report(
        &self,
        task_id: i64,
        report: &TaskStatusReport,
    ) -> Result<ReportResult, RolloutError> {
        let now = Utc::now();
        let policy = self.dal.settings.retry;
        let conn = &mut self.dal.conn()?;
        let (task, outcome, settled) = conn.transaction::<_, RolloutError, _>(|conn| {
            let machine_id: i64 = deployment_tasks::table
                .find(task_id)
                .select(deployment_tasks::machine_id)
                .first(conn)
                .optional()?
                .ok_or_else(|| RolloutError::not_found(format!("task {}", task_id)))?;
            client_machines::table
                .find(machine_id)
                .for_update()
                .first::<ClientMachine>(conn)?;
            let deployment = lock_deployment_of(conn, task_id)?;
            let task = lock_task(conn, task_id)?;

            let transition =
                state::apply_report(&task, report, deployment.status, &policy, now)?;
            let task = match &transition.changes {
                Some(changes) => diesel::update(deployment_tasks::table.find(task.id))
                    .set(changes)
                    .get_result::<DeploymentTask>(conn)?,
                None => task,
            };

            let mut settled = None;
            if let ReportOutcome::Finished(status) = transition.outcome {
                let bucket = Bucket::for_status(status).ok_or_else(|| {
                    RolloutError::FatalConfiguration(format!(
                        "finished task {} has non-terminal status {:?}",
                        task.id, status
                    ))
                })?;
                let counted = account(conn, deployment.id, bucket)?;
                if let Some(final_status) = aggregator::settle(&counted) {
                    settled = Some(
                        diesel::update(deployment_histories::table.find(deployment.id))
                            .set((
                                deployment_histories::status.eq(final_status),
                                deployment_histories::completed_at.eq(Some(now)),
                            ))
                            .get_result::<DeploymentHistory>(conn)?,
                    );
                }
            }

            if matches!(
                transition.outcome,
                ReportOutcome::Finished(_) | ReportOutcome::RetryScheduled { .. }
            ) {
                diesel::update(
                    client_machines::table
                        .find(machine_id)
                        .filter(client_machines::status.eq(MachineStatus::Busy)),
                )
                .set(client_machines::status.eq(MachineStatus::Online))
                .execute(conn)?;
            }
            Ok((task, transition.outcome, settled))
        })?;

        self.after_report(&task, &outcome, settled.as_ref());

        let response = match &outcome {
            ReportOutcome::CancelRequested => StatusReportResponse {
                accepted: false,
                task_status: task.status,
                cancel_requested: true,
                message: Some("deployment cancelled; abort and roll back".to_string()),
            },
            ReportOutcome::RetryScheduled { next_retry_at, .. } => StatusReportResponse {
                accepted: true,
                task_status: task.status,
                cancel_requested: false,
                message: Some(format!("retry scheduled at {}", next_retry_at.to_rfc3339())),
            },
            ReportOutcome::Progress | ReportOutcome::Finished(_) => StatusReportResponse {
                accepted: true,
                task_status: task.status,
                cancel_requested: false,
                message: None,
            },
        };
        Ok(ReportResult {
            task,
            response,
            settled,
        })
    }

    /// Closes in-progress tasks whose machine has gone offline.
    ///
    /// The agent that claimed such a task stopped reporting, and until the
    /// task leaves `InProgress` its machine cannot claim again and its
    /// deployment cannot settle. Each task is failed through [`Self::report`]
    /// as a transient network failure: it is retried when retries remain and
    /// counted as cancelled when its deployment was cancelled. A task that
    /// finished in the meantime is skipped.
    pub fn fail_abandoned(&self) -> Result<Vec<ReportResult>, RolloutError> {
        let running: Vec<DeploymentTask> = {
            let conn = &mut self.dal.conn()?;
            deployment_tasks::table
                .filter(deployment_tasks::status.eq(TaskStatus::InProgress))
                .order(deployment_tasks::id.asc())
                .load(conn)?
        };

        let machines = self.dal.machines();
        let mut closed = Vec::new();
        for task in running {
            if machines.is_online(task.machine_id)? {
                continue;
            }
            let report = TaskStatusReport::failed(
                FailureKind::TransientNetwork,
                format!("machine {} went offline while running the task", task.machine_id),
                task.progress_percentage,
            );
            match self.report(task.id, &report) {
                Ok(result) => {
                    warn!(
                        "Task {} abandoned by offline machine {}; now {:?}",
                        task.id, task.machine_id, result.task.status
                    );
                    closed.push(result);
                }
                Err(RolloutError::Conflict(_)) => {
                    debug!("Task {} finished before it could be closed", task.id);
                }
                Err(e) => return Err(e),
            }
        }
        Ok(closed)
    }

    fn after_report(
        &self,
        task: &DeploymentTask,
        outcome: &ReportOutcome,
        settled: Option<&DeploymentHistory>,
    ) {
        match outcome {
            ReportOutcome::Progress => {
                debug!(
                    "Task {} at {}% ({})",
                    task.id,
                    task.progress_percentage,
                    task.current_step.as_deref().unwrap_or("-")
                );
                metrics::record_task_transition("progress");
                event_bus::emit(
                    RolloutEvent::new(event_bus::TASK_PROGRESS)
                        .deployment(task.deployment_id)
                        .task(task.id)
                        .machine(task.machine_id)
                        .data(serde_json::json!({
                            "progress_percentage": task.progress_percentage,
                            "current_step": task.current_step,
                        })),
                );
            }
            ReportOutcome::CancelRequested => {
                info!(
                    "Task {} asked to abort: deployment {} was cancelled",
                    task.id, task.deployment_id
                );
            }
            ReportOutcome::RetryScheduled {
                retry_count,
                next_retry_at,
            } => {
                warn!(
                    "Task {} failed ({}); retry {}/{} at {}",
                    task.id,
                    task.error_message.as_deref().unwrap_or("unknown error"),
                    retry_count,
                    task.max_retries,
                    next_retry_at
                );
                metrics::record_task_transition("retry_scheduled");
                event_bus::emit(
                    RolloutEvent::new(event_bus::TASK_RETRY_SCHEDULED)
                        .deployment(task.deployment_id)
                        .task(task.id)
                        .machine(task.machine_id)
                        .data(serde_json::json!({
                            "retry_count": retry_count,
                            "next_retry_at": next_retry_at,
                            "failure_kind": task.failure_kind,
                        })),
                );
            }
            ReportOutcome::Finished(status) => {
                let (outcome, event_type) = match status {
                    TaskStatus::Completed => ("completed", event_bus::TASK_COMPLETED),
                    TaskStatus::Cancelled => ("cancelled", event_bus::TASK_CANCELLED),
                    _ => ("failed", event_bus::TASK_FAILED),
                };
                info!("Task {} finished: {}", task.id, outcome);
                metrics::record_task_transition(outcome);
                event_bus::emit(
                    RolloutEvent::new(event_type)
                        .deployment(task.deployment_id)
                        .task(task.id)
                        .machine(task.machine_id)
                        .data(serde_json::json!({
                            "status": status,
                            "failure_kind": task.failure_kind,
                            "error_message": task.error_message,
                        })),
                );
            }
        }

        if let Some(deployment) = settled {
            let status = serde_json::to_value(deployment.status)
                .ok()
                .and_then(|v| v.as_str().map(str::to_string))
                .unwrap_or_else(|| format!("{:?}", deployment.status));
            info!(
                "Deployment {} finished as {} ({} succeeded, {} failed)",
                deployment.id, status, deployment.success_count, deployment.failed_count
            );
            metrics::record_deployment_finalized(&status);
            emit_status_changed(deployment, DeploymentStatus::InProgress);
        }
    }
}

fn emit_status_changed(deployment: &DeploymentHistory, from: DeploymentStatus) {
    event_bus::emit(
        RolloutEvent::new(event_bus::DEPLOYMENT_STATUS_CHANGED)
            .deployment(deployment.id)
            .data(serde_json::json!({
                "from": from,
                "to": deployment.status,
                "success_count": deployment.success_count,
                "failed_count": deployment.failed_count,
                "pending_count": deployment.pending_count,
            })),
    );
}

fn lock_deployment_of(
    conn: &mut PgConnection,
    task_id: i64,
) -> Result<DeploymentHistory, RolloutError> {
    let deployment_id: i64 = deployment_tasks::table
        .find(task_id)
        .select(deployment_tasks::deployment_id)
        .first(conn)
        .optional()?
        .ok_or_else(|| RolloutError::not_found(format!("task {}", task_id)))?;
    Ok(deployment_histories::table
        .find(deployment_id)
        .for_update()
        .first(conn)?)
}

fn lock_task(conn: &mut PgConnection, task_id: i64) -> Result<DeploymentTask, RolloutError> {
    deployment_tasks::table
        .find(task_id)
        .for_update()
        .first(conn)
        .optional()?
        .ok_or_else(|| RolloutError::not_found(format!("task {}", task_id)))
}

/// Moves one unit of `pending_count` into the bucket's counter.
fn account(
    conn: &mut PgConnection,
    deployment_id: i64,
    bucket: Bucket,
) -> Result<DeploymentHistory, RolloutError> {
    let target = deployment_histories::table
        .find(deployment_id)
        .filter(deployment_histories::pending_count.gt(0));
    let counted = match bucket {
        Bucket::Success => diesel::update(target)
            .set((
                deployment_histories::success_count.eq(deployment_histories::success_count + 1),
                deployment_histories::pending_count.eq(deployment_histories::pending_count - 1),
            ))
            .get_result::<DeploymentHistory>(conn)
            .optional()?,
        Bucket::Failed => diesel::update(target)
            .set((
                deployment_histories::failed_count.eq(deployment_histories::failed_count + 1),
                deployment_histories::pending_count.eq(deployment_histories::pending_count - 1),
            ))
            .get_result::<DeploymentHistory>(conn)
            .optional()?,
    };
    counted.ok_or_else(|| {
        RolloutError::conflict(format!(
            "deployment {} has no pending tasks left to account",
            deployment_id
        ))
    })
}
