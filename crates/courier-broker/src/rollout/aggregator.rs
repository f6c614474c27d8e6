/*
 * Copyright (c) 2025 Dylan Storey
 * Licensed under the Elastic License 2.0.
 * See LICENSE file in the project root for full license text.
 */

//! Deployment-level accounting of task outcomes.
//!
//! Every terminal task moves exactly one unit from `pending_count` into either
//! `success_count` or `failed_count`, so the counters always sum to
//! `total_targets`. Cancelled tasks land in the failed bucket. Once nothing is
//! pending the deployment settles on its final status. The counters are
//! moved by a single `UPDATE` guarded on `pending_count > 0` when a task
//! report is applied.

use courier_models::models::deployment_histories::{DeploymentHistory, DeploymentStatus};
use courier_models::models::deployment_tasks::TaskStatus;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Bucket {
    Success,
    Failed,
}

impl Bucket {
    /// The counter a terminal task status is accounted in.
    pub fn for_status(status: TaskStatus) -> Option<Bucket> {
        match status {
            TaskStatus::Completed => Some(Bucket::Success),
            TaskStatus::Failed | TaskStatus::Cancelled => Some(Bucket::Failed),
            TaskStatus::Queued | TaskStatus::InProgress | TaskStatus::Retrying => None,
        }
    }
}

/// Final status once every task is terminal.
pub fn final_status(success_count: i32, failed_count: i32) -> DeploymentStatus {
    if failed_count == 0 {
        DeploymentStatus::Success
    } else if success_count > 0 {
        DeploymentStatus::PartialFailure
    } else {
        DeploymentStatus::Failed
    }
}

/// The status a deployment should settle on, if it is ready to settle.
///
/// Deployments that are already terminal (including cancelled ones still
/// receiving late reports) never change status again.
pub fn settle(history: &DeploymentHistory) -> Option<DeploymentStatus> {
    if history.pending_count > 0 || history.status.is_terminal() {
        return None;
    }
    if history.status == DeploymentStatus::PendingApproval {
        return None;
    }
    Some(final_status(history.success_count, history.failed_count))
}
