/*
 * Copyright (c) 2025 Dylan Storey
 * Licensed under the Elastic License 2.0.
 * See LICENSE file in the project root for full license text.
 */

//! # Deployment Tasks Module
//!
//! A task is the unit of work for one machine within one deployment.
//!
//! ## Status Flow
//!
//! - `queued`: waiting for the machine to claim it
//! - `in_progress`: claimed; the agent is reporting progress
//! - `retrying`: failed with retries left, eligible again after `next_retry_at`
//! - `completed` / `failed` / `cancelled`: terminal, immutable
//!
//! `retry_count` never exceeds `max_retries`, and progress never moves backwards
//! while a task is in progress.

use chrono::{DateTime, Utc};
use diesel::prelude::*;
use diesel_derive_enum::DbEnum;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

use super::failure::FailureKind;

#[derive(Serialize, Deserialize, Debug, Clone, Copy, Eq, PartialEq, Hash, DbEnum)]
#[ExistingTypePath = "crate::schema::sql_types::TaskStatus"]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Queued,
    InProgress,
    Retrying,
    Completed,
    Failed,
    Cancelled,
}

impl TaskStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Cancelled
        )
    }

    /// Statuses a machine may claim from.
    pub fn is_claimable(self) -> bool {
        matches!(self, TaskStatus::Queued | TaskStatus::Retrying)
    }
}

#[derive(
    Queryable, Selectable, Identifiable, AsChangeset, Debug, Clone, Serialize, Deserialize, PartialEq,
)]
#[diesel(table_name = crate::schema::deployment_tasks)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct DeploymentTask {
    pub id: i64,
    pub deployment_id: i64,
    pub machine_id: i64,
    pub package_version_id: i64,
    pub status: TaskStatus,
    pub priority: i32,
    pub progress_percentage: i32,
    pub current_step: Option<String>,
    pub retry_count: i32,
    pub max_retries: i32,
    pub next_retry_at: Option<DateTime<Utc>>,
    pub scheduled_for: Option<DateTime<Utc>>,
    pub error_message: Option<String>,
    pub failure_kind: Option<FailureKind>,
    pub download_size_bytes: Option<i64>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

impl DeploymentTask {
    /// Whether the machine should see this task when polling at `now`.
    pub fn is_eligible_at(&self, now: DateTime<Utc>) -> bool {
        self.status.is_claimable()
            && self.scheduled_for.map_or(true, |at| at <= now)
            && self.next_retry_at.map_or(true, |at| at <= now)
    }

    /// Queue order: higher priority first, then oldest, then lowest id.
    pub fn queue_order(a: &DeploymentTask, b: &DeploymentTask) -> Ordering {
        b.priority
            .cmp(&a.priority)
            .then(a.created_at.cmp(&b.created_at))
            .then(a.id.cmp(&b.id))
    }

    pub fn has_retries_left(&self) -> bool {
        self.retry_count < self.max_retries
    }
}

#[derive(Insertable, Debug, Clone, Serialize, Deserialize)]
#[diesel(table_name = crate::schema::deployment_tasks)]
pub struct NewDeploymentTask {
    pub deployment_id: i64,
    pub machine_id: i64,
    pub package_version_id: i64,
    pub status: TaskStatus,
    pub priority: i32,
    pub max_retries: i32,
    pub scheduled_for: Option<DateTime<Utc>>,
}

impl NewDeploymentTask {
    pub fn new(
        deployment_id: i64,
        machine_id: i64,
        package_version_id: i64,
        priority: i32,
        max_retries: i32,
        scheduled_for: Option<DateTime<Utc>>,
    ) -> Result<Self, String> {
        if max_retries < 0 {
            return Err("max_retries must be non-negative".to_string());
        }
        Ok(NewDeploymentTask {
            deployment_id,
            machine_id,
            package_version_id,
            status: TaskStatus::Queued,
            priority,
            max_retries,
            scheduled_for,
        })
    }
}
