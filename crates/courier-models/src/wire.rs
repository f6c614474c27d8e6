/*
 * Copyright (c) 2025 Dylan Storey
 * Licensed under the Elastic License 2.0.
 * See LICENSE file in the project root for full license text.
 */

//! Request and response bodies exchanged between agents and the broker.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::deployment_histories::DeploymentType;
use crate::models::deployment_tasks::TaskStatus;
use crate::models::failure::FailureKind;
use crate::models::manifests::UpdatePolicy;

/// Response header carrying the SHA-256 of a downloaded bundle.
pub const CONTENT_HASH_HEADER: &str = "x-courier-content-sha256";

/// An application as currently installed on a machine.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct InstalledApplication {
    pub code: String,
    pub version: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisterMachineRequest {
    pub machine_key: String,
    pub host_name: String,
    pub user_name: String,
    pub mac_address: String,
    pub ip_address: Option<String>,
    pub os_version: Option<String>,
    pub agent_version: Option<String>,
    #[serde(default)]
    pub installed_applications: Vec<InstalledApplication>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HeartbeatRequest {
    /// True while the agent executes a task.
    #[serde(default)]
    pub busy: bool,
    /// Replaces the stored snapshot when present.
    pub installed_applications: Option<Vec<InstalledApplication>>,
}

/// One entry of a machine's pending queue, in execution order.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PendingTask {
    pub task_id: i64,
    pub deployment_id: i64,
    pub app_code: String,
    pub version: String,
    pub package_version_id: i64,
    pub content_hash: String,
    pub size_bytes: i64,
    pub priority: i32,
    pub scheduled_for: Option<DateTime<Utc>>,
    pub deployment_type: DeploymentType,
    pub update_policy: UpdatePolicy,
    #[serde(default)]
    pub preserved_paths: Vec<String>,
    pub retry_count: i32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClaimTaskRequest {
    pub machine_key: String,
}

fn default_retryable() -> bool {
    true
}

/// Progress or outcome of a claimed task.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TaskStatusReport {
    pub status: TaskStatus,
    pub progress_percentage: i32,
    pub current_step: Option<String>,
    #[serde(default)]
    pub is_success: bool,
    pub error_message: Option<String>,
    pub error_kind: Option<FailureKind>,
    /// A failed report with `retryable = false` is terminal regardless of retries left.
    #[serde(default = "default_retryable")]
    pub retryable: bool,
    pub download_size_bytes: Option<i64>,
}

impl TaskStatusReport {
    pub fn progress(percentage: i32, step: &str) -> Self {
        TaskStatusReport {
            status: TaskStatus::InProgress,
            progress_percentage: percentage,
            current_step: Some(step.to_string()),
            is_success: false,
            error_message: None,
            error_kind: None,
            retryable: true,
            download_size_bytes: None,
        }
    }

    pub fn completed(download_size_bytes: Option<i64>) -> Self {
        TaskStatusReport {
            status: TaskStatus::Completed,
            progress_percentage: 100,
            current_step: Some("completed".to_string()),
            is_success: true,
            error_message: None,
            error_kind: None,
            retryable: false,
            download_size_bytes,
        }
    }

    pub fn failed(kind: FailureKind, message: String, progress_percentage: i32) -> Self {
        let status = if kind == FailureKind::Cancelled {
            TaskStatus::Cancelled
        } else {
            TaskStatus::Failed
        };
        TaskStatusReport {
            status,
            progress_percentage,
            current_step: Some("rolled back".to_string()),
            is_success: false,
            error_message: Some(message),
            error_kind: Some(kind),
            retryable: kind.is_retryable(),
            download_size_bytes: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StatusReportResponse {
    pub accepted: bool,
    pub task_status: TaskStatus,
    /// The owning deployment was cancelled; the agent should abort and roll back.
    pub cancel_requested: bool,
    pub message: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecordDownloadRequest {
    pub machine_key: String,
    pub bytes: i64,
    pub success: bool,
}
