/*
 * Copyright (c) 2025 Dylan Storey
 * Licensed under the Elastic License 2.0.
 * See LICENSE file in the project root for full license text.
 */

//! Data Access Layer for deployments.
//!
//! Creating, approving and cancelling a deployment each run in one
//! transaction. The deployment row is locked with `SELECT ... FOR UPDATE`
//! before any status or counter change so these operations serialize with
//! the status reports that account task outcomes.

use crate::dal::DAL;
use crate::metrics;
use crate::rollout::planner::{self, DeploymentPlan, DeploymentRequest};
use crate::rollout::ports::PackageStore;
use crate::rollout::RolloutError;
use crate::utils::event_bus::{self, RolloutEvent};
use chrono::Utc;
use courier_models::models::deployment_histories::{DeploymentHistory, DeploymentStatus};
use courier_models::models::deployment_tasks::{DeploymentTask, TaskStatus};
use courier_models::models::failure::FailureKind;
use courier_models::models::package_versions::PackageVersion;
use courier_models::schema::{deployment_histories, deployment_tasks, package_versions};
use courier_utils::logging::prelude::*;
use diesel::pg::PgConnection;
use diesel::prelude::*;

/// Data Access Layer for DeploymentHistory operations.
pub struct DeploymentsDAL<'a> {
    pub dal: &'a DAL,
}

impl DeploymentsDAL<'_> {
    /// Plans `request` against the current package store and machine registry
    /// and persists the result.
    pub fn plan_and_create(
        &self,
        request: &DeploymentRequest,
    ) -> Result<DeploymentHistory, RolloutError> {
        let plan = planner::plan(
            request,
            &self.dal.packages(),
            &self.dal.machines(),
            self.dal.settings.plan_defaults,
        )?;
        self.create(&plan)
    }

    /// Inserts the deployment and, unless it awaits approval, one queued task
    /// per planned machine.
    ///
    /// The package version is re-read under a share lock, so a removal racing
    /// with planning either completes first and fails the deployment or sees
    /// the deployment and only deactivates the version.
    pub fn create(&self, plan: &DeploymentPlan) -> Result<DeploymentHistory, RolloutError> {
        let conn = &mut self.dal.conn()?;
        let (history, tasks) = conn.transaction::<_, RolloutError, _>(|conn| {
            lock_active_version(conn, plan.history.package_version_id)?;
            let history: DeploymentHistory = diesel::insert_into(deployment_histories::table)
                .values(&plan.history)
                .get_result(conn)?;
            let tasks = if history.status == DeploymentStatus::PendingApproval {
                Vec::new()
            } else {
                insert_tasks(conn, &history)?
            };
            Ok((history, tasks))
        })?;

        info!(
            "Deployment {} created for package version {} ({} targets, {} tasks, {} skipped)",
            history.id,
            history.package_version_id,
            history.total_targets,
            tasks.len(),
            plan.skipped.len()
        );
        event_bus::emit(
            RolloutEvent::new(event_bus::DEPLOYMENT_CREATED)
                .deployment(history.id)
                .data(serde_json::json!({
                    "package_version_id": history.package_version_id,
                    "deployment_type": history.deployment_type,
                    "total_targets": history.total_targets,
                    "skipped_targets": plan.skipped,
                    "status": history.status,
                })),
        );
        emit_tasks_created(&tasks);
        Ok(history)
    }

    pub fn get(&self, deployment_id: i64) -> Result<Option<DeploymentHistory>, RolloutError> {
        let conn = &mut self.dal.conn()?;
        Ok(deployment_histories::table
            .find(deployment_id)
            .first(conn)
            .optional()?)
    }

    pub fn require(&self, deployment_id: i64) -> Result<DeploymentHistory, RolloutError> {
        self.get(deployment_id)?
            .ok_or_else(|| RolloutError::not_found(format!("deployment {}", deployment_id)))
    }

    /// Newest first, optionally narrowed to one application or status.
    pub fn list(
        &self,
        application_id: Option<i64>,
        status: Option<DeploymentStatus>,
    ) -> Result<Vec<DeploymentHistory>, RolloutError> {
        let conn = &mut self.dal.conn()?;
        let mut query = deployment_histories::table.into_boxed();
        if let Some(application_id) = application_id {
            query = query.filter(deployment_histories::application_id.eq(application_id));
        }
        if let Some(status) = status {
            query = query.filter(deployment_histories::status.eq(status));
        }
        Ok(query
            .order((
                deployment_histories::created_at.desc(),
                deployment_histories::id.desc(),
            ))
            .load(conn)?)
    }

    pub fn list_tasks(&self, deployment_id: i64) -> Result<Vec<DeploymentTask>, RolloutError> {
        let conn = &mut self.dal.conn()?;
        Ok(deployment_tasks::table
            .filter(deployment_tasks::deployment_id.eq(deployment_id))
            .order(deployment_tasks::id.asc())
            .load(conn)?)
    }

    /// Releases a deployment held for approval: its tasks are created from
    /// the machine set captured at planning time.
    pub fn approve(
        &self,
        deployment_id: i64,
        approved_by: &str,
    ) -> Result<DeploymentHistory, RolloutError> {
        let approved_by = approved_by.trim();
        if approved_by.is_empty() {
            return Err(RolloutError::validation("approved_by cannot be empty"));
        }
        let conn = &mut self.dal.conn()?;
        let (history, tasks) = conn.transaction::<_, RolloutError, _>(|conn| {
            let history = lock(conn, deployment_id)?;
            if history.status != DeploymentStatus::PendingApproval {
                return Err(RolloutError::conflict(format!(
                    "deployment {} is {:?}, not awaiting approval",
                    deployment_id, history.status
                )));
            }
            lock_active_version(conn, history.package_version_id)?;
            let tasks = insert_tasks(conn, &history)?;
            let history = diesel::update(deployment_histories::table.find(deployment_id))
                .set((
                    deployment_histories::status.eq(DeploymentStatus::Pending),
                    deployment_histories::approved_by.eq(Some(approved_by)),
                    deployment_histories::approved_at.eq(Some(Utc::now())),
                ))
                .get_result::<DeploymentHistory>(conn)?;
            Ok((history, tasks))
        })?;

        info!(
            "Deployment {} approved by {} ({} tasks queued)",
            deployment_id,
            approved_by,
            tasks.len()
        );
        emit_status_changed(
            &history,
            DeploymentStatus::PendingApproval,
            serde_json::json!({ "approved_by": approved_by }),
        );
        emit_tasks_created(&tasks);
        Ok(history)
    }

    /// Cancels a non-terminal deployment.
    ///
    /// Tasks not yet started are cancelled and accounted as failed. Tasks
    /// already in progress keep running; their agents learn about the
    /// cancellation from the next status report and are accounted when they
    /// report a terminal status. The deployment itself is cancelled at once
    /// and never changes status again.
    pub fn cancel(&self, deployment_id: i64) -> Result<DeploymentHistory, RolloutError> {
        let conn = &mut self.dal.conn()?;
        let now = Utc::now();
        let (previous, history, cancelled) = conn.transaction::<_, RolloutError, _>(|conn| {
            let history = lock(conn, deployment_id)?;
            if !history.status.is_cancellable() {
                return Err(RolloutError::conflict(format!(
                    "deployment {} is already {:?}",
                    deployment_id, history.status
                )));
            }

            let cancelled_tasks: Vec<DeploymentTask> =
                if history.status == DeploymentStatus::PendingApproval {
                    Vec::new()
                } else {
                    diesel::update(
                        deployment_tasks::table
                            .filter(deployment_tasks::deployment_id.eq(deployment_id))
                            .filter(
                                deployment_tasks::status
                                    .eq(TaskStatus::Queued)
                                    .or(deployment_tasks::status.eq(TaskStatus::Retrying)),
                            ),
                    )
                    .set((
                        deployment_tasks::status.eq(TaskStatus::Cancelled),
                        deployment_tasks::failure_kind.eq(Some(FailureKind::Cancelled)),
                        deployment_tasks::error_message.eq(Some("deployment cancelled")),
                        deployment_tasks::next_retry_at.eq(None::<chrono::DateTime<Utc>>),
                        deployment_tasks::completed_at.eq(Some(now)),
                    ))
                    .get_results(conn)?
                };
            let cancelled = if history.status == DeploymentStatus::PendingApproval {
                history.pending_count
            } else {
                i32::try_from(cancelled_tasks.len()).map_err(|_| {
                    RolloutError::FatalConfiguration("cancelled task count overflow".into())
                })?
            };
            let previous = history.status;

            let history = diesel::update(deployment_histories::table.find(deployment_id))
                .set((
                    deployment_histories::failed_count
                        .eq(deployment_histories::failed_count + cancelled),
                    deployment_histories::pending_count
                        .eq(deployment_histories::pending_count - cancelled),
                    deployment_histories::status.eq(DeploymentStatus::Cancelled),
                    deployment_histories::completed_at.eq(Some(now)),
                ))
                .get_result::<DeploymentHistory>(conn)?;
            Ok((previous, history, cancelled_tasks))
        })?;

        warn!(
            "Deployment {} cancelled ({} queued tasks cancelled, {} still running)",
            deployment_id,
            cancelled.len(),
            history.pending_count
        );
        metrics::record_deployment_finalized("cancelled");
        for task in &cancelled {
            event_bus::emit(
                RolloutEvent::new(event_bus::TASK_CANCELLED)
                    .deployment(deployment_id)
                    .task(task.id)
                    .machine(task.machine_id),
            );
        }
        emit_status_changed(
            &history,
            previous,
            serde_json::json!({ "still_running": history.pending_count }),
        );
        Ok(history)
    }

    /// Creates a rollback deployment re-installing the version the original
    /// deployment's version replaced, on the original's machines.
    pub fn rollback(
        &self,
        deployment_id: i64,
        initiated_by: &str,
    ) -> Result<DeploymentHistory, RolloutError> {
        let original = self.require(deployment_id)?;
        let packages = self.dal.packages();
        let version = packages
            .get_version_by_id(original.package_version_id)?
            .ok_or(RolloutError::InvalidPackageVersion(original.package_version_id))?;
        let predecessor = version.replaces_version_id.ok_or_else(|| {
            RolloutError::validation(format!(
                "version '{}' has no predecessor to roll back to",
                version.version
            ))
        })?;

        let mut machine_ids: Vec<i64> = self
            .list_tasks(deployment_id)?
            .into_iter()
            .map(|t| t.machine_id)
            .collect();
        if machine_ids.is_empty() {
            machine_ids = original.planned_machine_ids();
        }

        let request =
            planner::rollback_request(&original, predecessor, machine_ids, initiated_by.to_string());
        let history = self.plan_and_create(&request)?;
        info!(
            "Deployment {} rolls back deployment {} to package version {}",
            history.id, deployment_id, predecessor
        );
        Ok(history)
    }
}

/// Share-locks a package version and checks it can still be deployed.
fn lock_active_version(
    conn: &mut PgConnection,
    version_id: i64,
) -> Result<PackageVersion, RolloutError> {
    package_versions::table
        .find(version_id)
        .for_share()
        .first::<PackageVersion>(conn)
        .optional()?
        .filter(|version| version.is_active)
        .ok_or(RolloutError::InvalidPackageVersion(version_id))
}

fn lock(conn: &mut PgConnection, deployment_id: i64) -> Result<DeploymentHistory, RolloutError> {
    deployment_histories::table
        .find(deployment_id)
        .for_update()
        .first(conn)
        .optional()?
        .ok_or_else(|| RolloutError::not_found(format!("deployment {}", deployment_id)))
}

fn insert_tasks(
    conn: &mut PgConnection,
    history: &DeploymentHistory,
) -> Result<Vec<DeploymentTask>, RolloutError> {
    let tasks = planner::expand_tasks(history)?;
    Ok(diesel::insert_into(deployment_tasks::table)
        .values(&tasks)
        .get_results(conn)?)
}

fn emit_tasks_created(tasks: &[DeploymentTask]) {
    for task in tasks {
        event_bus::emit(
            RolloutEvent::new(event_bus::TASK_CREATED)
                .deployment(task.deployment_id)
                .task(task.id)
                .machine(task.machine_id)
                .data(serde_json::json!({
                    "priority": task.priority,
                    "scheduled_for": task.scheduled_for,
                })),
        );
    }
}

fn emit_status_changed(
    history: &DeploymentHistory,
    from: DeploymentStatus,
    data: serde_json::Value,
) {
    event_bus::emit(
        RolloutEvent::new(event_bus::DEPLOYMENT_STATUS_CHANGED)
            .deployment(history.id)
            .data(serde_json::json!({
                "from": from,
                "to": history.status,
                "success_count": history.success_count,
                "failed_count": history.failed_count,
                "pending_count": history.pending_count,
                "detail": data,
            })),
    );
}
