/*
 * Copyright (c) 2025 Dylan Storey
 * Licensed under the Elastic License 2.0.
 * See LICENSE file in the project root for full license text.
 */

//! Task state machine.
//!
//! ```text
//! Queued ──claim──▶ InProgress ──report──▶ Completed
//!   ▲                   │   │
//!   │                   │   └──report──▶ Cancelled
//!   └── Retrying ◀──────┴──failed, retries left
//!                       └──failed, exhausted──▶ Failed
//! ```
//!
//! Transitions are computed here from the locked task row and the incoming
//! report; the DAL persists the resulting [`TaskChanges`] in the same
//! transaction that took the lock.

use chrono::{DateTime, Utc};
use courier_models::models::deployment_histories::DeploymentStatus;
use courier_models::models::deployment_tasks::{DeploymentTask, TaskStatus};
use courier_models::models::failure::FailureKind;
use courier_models::wire::TaskStatusReport;
use diesel::AsChangeset;

use super::error::RolloutError;
use super::scheduler::{RetryDecision, RetryPolicy};

/// Column updates for one task transition. `None` leaves a column untouched;
/// `Some(None)` clears it.
#[derive(AsChangeset, Debug, Clone, PartialEq)]
#[diesel(table_name = courier_models::schema::deployment_tasks)]
pub struct TaskChanges {
    pub status: TaskStatus,
    pub progress_percentage: i32,
    pub retry_count: i32,
    pub current_step: Option<Option<String>>,
    pub next_retry_at: Option<Option<DateTime<Utc>>>,
    pub error_message: Option<Option<String>>,
    pub failure_kind: Option<Option<FailureKind>>,
    pub download_size_bytes: Option<Option<i64>>,
    pub started_at: Option<Option<DateTime<Utc>>>,
    pub completed_at: Option<Option<DateTime<Utc>>>,
}

impl TaskChanges {
    fn keep(task: &DeploymentTask) -> Self {
        TaskChanges {
            status: task.status,
            progress_percentage: task.progress_percentage,
            retry_count: task.retry_count,
            current_step: None,
            next_retry_at: None,
            error_message: None,
            failure_kind: None,
            download_size_bytes: None,
            started_at: None,
            completed_at: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ReportOutcome {
    /// Progress recorded; the task is still running.
    Progress,
    /// The deployment was cancelled; nothing recorded, the agent must abort.
    CancelRequested,
    RetryScheduled {
        retry_count: i32,
        next_retry_at: DateTime<Utc>,
    },
    /// The task reached a terminal status and must be counted.
    Finished(TaskStatus),
}

#[derive(Debug, Clone, PartialEq)]
pub struct TaskTransition {
    pub changes: Option<TaskChanges>,
    pub outcome: ReportOutcome,
}

impl TaskTransition {
    pub fn resulting_status(&self, task: &DeploymentTask) -> TaskStatus {
        self.changes.as_ref().map_or(task.status, |c| c.status)
    }
}

/// Claims `task` for `machine_id`. A claim starts a fresh attempt, so progress
/// restarts at zero.
pub fn claim(
    task: &DeploymentTask,
    machine_id: i64,
    now: DateTime<Utc>,
) -> Result<TaskChanges, RolloutError> {
    if task.machine_id != machine_id {
        return Err(RolloutError::conflict(format!(
            "task {} is assigned to another machine",
            task.id
        )));
    }
    if !task.is_eligible_at(now) {
        return Err(RolloutError::conflict(format!(
            "task {} is {:?} and cannot be claimed now",
            task.id, task.status
        )));
    }

    Ok(TaskChanges {
        status: TaskStatus::InProgress,
        progress_percentage: 0,
        current_step: Some(Some("claimed".to_string())),
        started_at: Some(Some(now)),
        next_retry_at: Some(None),
        ..TaskChanges::keep(task)
    })
}

/// Validates a status report against the locked task and computes the transition.
pub fn apply_report(
    task: &DeploymentTask,
    report: &TaskStatusReport,
    deployment_status: DeploymentStatus,
    policy: &RetryPolicy,
    now: DateTime<Utc>,
) -> Result<TaskTransition, RolloutError> {
    if task.status.is_terminal() {
        return Err(RolloutError::conflict(format!(
            "task {} is already {:?}",
            task.id, task.status
        )));
    }
    if task.status != TaskStatus::InProgress {
        return Err(RolloutError::conflict(format!(
            "task {} has not been claimed",
            task.id
        )));
    }
    if !(0..=100).contains(&report.progress_percentage) {
        return Err(RolloutError::validation(format!(
            "progress {} is outside 0..=100",
            report.progress_percentage
        )));
    }
    if report.is_success != (report.status == TaskStatus::Completed) {
        return Err(RolloutError::validation(
            "is_success must be true exactly when status is completed",
        ));
    }

    let cancelled = deployment_status == DeploymentStatus::Cancelled;
    let base = TaskChanges::keep(task);

    match report.status {
        TaskStatus::InProgress => {
            if report.progress_percentage < task.progress_percentage {
                return Err(RolloutError::ProgressRegression {
                    current: task.progress_percentage,
                    reported: report.progress_percentage,
                });
            }
            if cancelled {
                return Ok(TaskTransition {
                    changes: None,
                    outcome: ReportOutcome::CancelRequested,
                });
            }
            Ok(TaskTransition {
                changes: Some(TaskChanges {
                    progress_percentage: report.progress_percentage,
                    current_step: report.current_step.clone().map(Some),
                    download_size_bytes: report.download_size_bytes.map(Some),
                    ..base
                }),
                outcome: ReportOutcome::Progress,
            })
        }
        TaskStatus::Completed => Ok(TaskTransition {
            changes: Some(TaskChanges {
                status: TaskStatus::Completed,
                progress_percentage: 100,
                current_step: Some(Some(
                    report
                        .current_step
                        .clone()
                        .unwrap_or_else(|| "completed".to_string()),
                )),
                download_size_bytes: report.download_size_bytes.map(Some),
                error_message: Some(None),
                failure_kind: Some(None),
                completed_at: Some(Some(now)),
                ..base
            }),
            outcome: ReportOutcome::Finished(TaskStatus::Completed),
        }),
        TaskStatus::Failed | TaskStatus::Cancelled => {
            let kind = report.error_kind.unwrap_or(if report.status == TaskStatus::Cancelled {
                FailureKind::Cancelled
            } else {
                FailureKind::InstallExecution
            });
            let message = report
                .error_message
                .clone()
                .filter(|m| !m.trim().is_empty())
                .unwrap_or_else(|| format!("task reported {}", kind));
            let progress = report.progress_percentage.max(task.progress_percentage);
            let failed = TaskChanges {
                progress_percentage: progress,
                current_step: report.current_step.clone().map(Some),
                error_message: Some(Some(message)),
                failure_kind: Some(Some(kind)),
                download_size_bytes: report.download_size_bytes.map(Some),
                ..base
            };

            let retryable = report.status == TaskStatus::Failed && report.retryable && !cancelled;
            let decision = policy.decide(task, retryable, now);
            match decision {
                RetryDecision::Retry {
                    retry_count,
                    next_retry_at,
                } => Ok(TaskTransition {
                    changes: Some(TaskChanges {
                        status: TaskStatus::Retrying,
                        retry_count,
                        next_retry_at: Some(Some(next_retry_at)),
                        ..failed
                    }),
                    outcome: ReportOutcome::RetryScheduled {
                        retry_count,
                        next_retry_at,
                    },
                }),
                RetryDecision::Exhausted => {
                    let terminal = if report.status == TaskStatus::Cancelled || cancelled {
                        TaskStatus::Cancelled
                    } else {
                        TaskStatus::Failed
                    };
                    Ok(TaskTransition {
                        changes: Some(TaskChanges {
                            status: terminal,
                            completed_at: Some(Some(now)),
                            ..failed
                        }),
                        outcome: ReportOutcome::Finished(terminal),
                    })
                }
            }
        }
        TaskStatus::Queued | TaskStatus::Retrying => Err(RolloutError::validation(format!(
            "agents cannot report status {:?}",
            report.status
        ))),
    }
}
