/*
 * Copyright (c) 2025 Dylan Storey
 * Licensed under the Elastic License 2.0.
 * See LICENSE file in the project root for full license text.
 */

//! Deployment planning.
//!
//! A request is expanded into a [`DeploymentPlan`]: the history row to insert
//! and the concrete machine set. Global requests snapshot every machine known
//! at planning time. Targeted requests resolve identifiers and record the
//! ones that matched nothing. Tasks are derived from the persisted history
//! by [`expand_tasks`], both at creation and later on approval, so an
//! approved deployment targets exactly the machines that were planned.

use chrono::{DateTime, Utc};
use courier_models::models::deployment_histories::{
    DeploymentHistory, DeploymentStatus, DeploymentType, NewDeploymentHistory,
};
use courier_models::models::deployment_tasks::NewDeploymentTask;
use courier_utils::config::Scheduler;

use super::error::RolloutError;
use super::ports::{MachineRegistry, PackageStore};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TargetSpec {
    /// Every machine known at planning time.
    Global,
    /// Machine keys, host names or user names.
    Identifiers(Vec<String>),
    /// Machine ids taken from an earlier deployment.
    Machines(Vec<i64>),
}

#[derive(Debug, Clone)]
pub struct DeploymentRequest {
    pub package_version_id: i64,
    pub environment: String,
    pub deployment_type: DeploymentType,
    pub targets: TargetSpec,
    pub requires_approval: bool,
    pub initiated_by: String,
    pub priority: Option<i32>,
    pub scheduled_for: Option<DateTime<Utc>>,
    pub max_retries: Option<i32>,
}

#[derive(Debug, Clone, Copy)]
pub struct PlanDefaults {
    pub max_retries: i32,
    pub priority: i32,
}

impl Default for PlanDefaults {
    fn default() -> Self {
        PlanDefaults {
            max_retries: 3,
            priority: 0,
        }
    }
}

impl From<&Scheduler> for PlanDefaults {
    fn from(cfg: &Scheduler) -> Self {
        PlanDefaults {
            max_retries: cfg.max_retries,
            priority: cfg.default_priority,
        }
    }
}

#[derive(Debug, Clone)]
pub struct DeploymentPlan {
    pub history: NewDeploymentHistory,
    pub machine_ids: Vec<i64>,
    pub skipped: Vec<String>,
}

pub fn plan(
    request: &DeploymentRequest,
    store: &dyn PackageStore,
    registry: &dyn MachineRegistry,
    defaults: PlanDefaults,
) -> Result<DeploymentPlan, RolloutError> {
    let version = store
        .get_version_by_id(request.package_version_id)?
        .filter(|v| v.is_active)
        .ok_or(RolloutError::InvalidPackageVersion(request.package_version_id))?;

    let max_retries = request.max_retries.unwrap_or(defaults.max_retries);
    if max_retries < 0 {
        return Err(RolloutError::validation("max_retries must be non-negative"));
    }

    let (requested, machine_ids, skipped) = match &request.targets {
        TargetSpec::Global => (Vec::new(), registry.list_known_machines()?, Vec::new()),
        TargetSpec::Identifiers(identifiers) => {
            let identifiers: Vec<String> = identifiers
                .iter()
                .map(|i| i.trim().to_string())
                .filter(|i| !i.is_empty())
                .collect();
            if identifiers.is_empty() {
                return Err(RolloutError::validation(
                    "a targeted deployment needs at least one target",
                ));
            }
            let resolution = registry.resolve_machines(&identifiers)?;
            (identifiers, resolution.machine_ids, resolution.unresolved)
        }
        TargetSpec::Machines(ids) => (Vec::new(), dedup(ids), Vec::new()),
    };

    if machine_ids.is_empty() {
        let why = if skipped.is_empty() {
            "no machines are registered".to_string()
        } else {
            format!("none of {:?} matched a known machine", skipped)
        };
        return Err(RolloutError::NoEligibleTargets(why));
    }

    let total = i32::try_from(machine_ids.len())
        .map_err(|_| RolloutError::validation("too many targets"))?;
    let status = if request.requires_approval {
        DeploymentStatus::PendingApproval
    } else {
        DeploymentStatus::Pending
    };

    let history = NewDeploymentHistory {
        package_version_id: version.id,
        application_id: version.application_id,
        environment: request.environment.trim().to_string(),
        deployment_type: request.deployment_type,
        is_global: request.targets == TargetSpec::Global,
        requested_targets: serde_json::json!(requested),
        planned_machine_ids: serde_json::json!(machine_ids),
        skipped_targets: serde_json::json!(skipped),
        total_targets: total,
        success_count: 0,
        failed_count: 0,
        pending_count: total,
        status,
        requires_approval: request.requires_approval,
        initiated_by: request.initiated_by.trim().to_string(),
        priority: request.priority.unwrap_or(defaults.priority),
        scheduled_for: request.scheduled_for,
        max_retries,
    };
    history.validate().map_err(RolloutError::Validation)?;

    Ok(DeploymentPlan {
        history,
        machine_ids,
        skipped,
    })
}

/// One queued task per planned machine of a persisted deployment.
pub fn expand_tasks(history: &DeploymentHistory) -> Result<Vec<NewDeploymentTask>, RolloutError> {
    let machine_ids = history.planned_machine_ids();
    if machine_ids.len() != history.total_targets as usize {
        return Err(RolloutError::FatalConfiguration(format!(
            "deployment {} plans {} machines but counts {} targets",
            history.id,
            machine_ids.len(),
            history.total_targets
        )));
    }
    machine_ids
        .into_iter()
        .map(|machine_id| {
            NewDeploymentTask::new(
                history.id,
                machine_id,
                history.package_version_id,
                history.priority,
                history.max_retries,
                history.scheduled_for,
            )
            .map_err(RolloutError::Validation)
        })
        .collect()
}

/// Request that re-deploys the predecessor of `original`'s version to `machine_ids`.
pub fn rollback_request(
    original: &DeploymentHistory,
    predecessor_version_id: i64,
    machine_ids: Vec<i64>,
    initiated_by: String,
) -> DeploymentRequest {
    DeploymentRequest {
        package_version_id: predecessor_version_id,
        environment: original.environment.clone(),
        deployment_type: DeploymentType::Rollback,
        targets: TargetSpec::Machines(machine_ids),
        requires_approval: false,
        initiated_by,
        priority: Some(original.priority.saturating_add(1)),
        scheduled_for: None,
        max_retries: Some(original.max_retries),
    }
}

fn dedup(ids: &[i64]) -> Vec<i64> {
    let mut seen = std::collections::HashSet::new();
    ids.iter().copied().filter(|id| seen.insert(*id)).collect()
}
