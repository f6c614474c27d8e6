/*
 * Copyright (c) 2025 Dylan Storey
 * Licensed under the Elastic License 2.0.
 * See LICENSE file in the project root for full license text.
 */

//! # Deployment Histories Module
//!
//! A deployment history is one rollout campaign of a package version to a set
//! of machines. Its counters always balance:
//! `total_targets == success_count + failed_count + pending_count`.
//!
//! ## Status Flow
//!
//! - `pending_approval`: planned, waiting for an approver; no tasks exist yet
//! - `pending`: tasks exist, none has started
//! - `in_progress`: at least one task was claimed
//! - `success` / `partial_failure` / `failed`: every task reached a terminal state
//! - `cancelled`: an operator stopped the rollout
//!
//! Terminal statuses never change again.

use chrono::{DateTime, Utc};
use diesel::prelude::*;
use diesel_derive_enum::DbEnum;
use serde::{Deserialize, Serialize};

#[derive(Serialize, Deserialize, Debug, Clone, Copy, Eq, PartialEq, Hash, DbEnum)]
#[ExistingTypePath = "crate::schema::sql_types::DeploymentType"]
#[serde(rename_all = "snake_case")]
pub enum DeploymentType {
    Release,
    Hotfix,
    Rollback,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, Eq, PartialEq, Hash, DbEnum)]
#[ExistingTypePath = "crate::schema::sql_types::DeploymentStatus"]
#[serde(rename_all = "snake_case")]
pub enum DeploymentStatus {
    Pending,
    PendingApproval,
    InProgress,
    Success,
    Failed,
    PartialFailure,
    Cancelled,
}

impl DeploymentStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            DeploymentStatus::Success
                | DeploymentStatus::Failed
                | DeploymentStatus::PartialFailure
                | DeploymentStatus::Cancelled
        )
    }

    /// Statuses a deployment can still be cancelled from.
    pub fn is_cancellable(self) -> bool {
        !self.is_terminal()
    }
}

#[derive(
    Queryable, Selectable, Identifiable, AsChangeset, Debug, Clone, Serialize, Deserialize, PartialEq,
)]
#[diesel(table_name = crate::schema::deployment_histories)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct DeploymentHistory {
    pub id: i64,
    pub package_version_id: i64,
    pub application_id: i64,
    pub environment: String,
    pub deployment_type: DeploymentType,
    pub is_global: bool,
    /// Identifiers exactly as requested, for targeted deployments.
    pub requested_targets: serde_json::Value,
    /// Machine ids resolved at planning time.
    pub planned_machine_ids: serde_json::Value,
    /// Requested identifiers that matched no known machine.
    pub skipped_targets: serde_json::Value,
    pub total_targets: i32,
    pub success_count: i32,
    pub failed_count: i32,
    pub pending_count: i32,
    pub status: DeploymentStatus,
    pub requires_approval: bool,
    pub approved_by: Option<String>,
    pub approved_at: Option<DateTime<Utc>>,
    pub initiated_by: String,
    /// Priority stamped on every task of this deployment.
    pub priority: i32,
    pub scheduled_for: Option<DateTime<Utc>>,
    pub max_retries: i32,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

impl DeploymentHistory {
    pub fn planned_machine_ids(&self) -> Vec<i64> {
        serde_json::from_value(self.planned_machine_ids.clone()).unwrap_or_default()
    }

    pub fn skipped_targets(&self) -> Vec<String> {
        serde_json::from_value(self.skipped_targets.clone()).unwrap_or_default()
    }

    pub fn counters_balance(&self) -> bool {
        self.success_count + self.failed_count + self.pending_count == self.total_targets
    }
}

#[derive(Insertable, Debug, Clone, Serialize, Deserialize)]
#[diesel(table_name = crate::schema::deployment_histories)]
pub struct NewDeploymentHistory {
    pub package_version_id: i64,
    pub application_id: i64,
    pub environment: String,
    pub deployment_type: DeploymentType,
    pub is_global: bool,
    pub requested_targets: serde_json::Value,
    pub planned_machine_ids: serde_json::Value,
    pub skipped_targets: serde_json::Value,
    pub total_targets: i32,
    pub success_count: i32,
    pub failed_count: i32,
    pub pending_count: i32,
    pub status: DeploymentStatus,
    pub requires_approval: bool,
    pub initiated_by: String,
    pub priority: i32,
    pub scheduled_for: Option<DateTime<Utc>>,
    pub max_retries: i32,
}

impl NewDeploymentHistory {
    /// Checks the invariants a freshly planned deployment must satisfy.
    pub fn validate(&self) -> Result<(), String> {
        if self.environment.trim().is_empty() {
            return Err("Environment cannot be empty".to_string());
        }
        if self.initiated_by.trim().is_empty() {
            return Err("Initiator cannot be empty".to_string());
        }
        if self.max_retries < 0 {
            return Err("max_retries must be non-negative".to_string());
        }
        if self.total_targets <= 0 {
            return Err("A deployment needs at least one target".to_string());
        }
        if self.success_count + self.failed_count + self.pending_count != self.total_targets {
            return Err("Deployment counters must sum to the total".to_string());
        }
        match (self.requires_approval, self.status) {
            (true, DeploymentStatus::PendingApproval) | (false, DeploymentStatus::Pending) => Ok(()),
            _ => Err(format!(
                "A new deployment cannot start in status {:?}",
                self.status
            )),
        }
    }
}
