/*
 * Copyright (c) 2025 Dylan Storey
 * Licensed under the Elastic License 2.0.
 * See LICENSE file in the project root for full license text.
 */

//! Task claim and status endpoints.
//!
//! - `POST /api/v1/tasks/:id/claim` - Claim an eligible task for a machine
//! - `POST /api/v1/tasks/:id/status` - Report progress or the outcome
//! - `GET /api/v1/tasks/:id` - Inspect a task

use crate::api::{error_response, ApiResult, AppState};
use crate::rollout::RolloutError;
use axum::{
    extract::{Path, State},
    routing::{get, post},
    Json, Router,
};
use courier_models::models::deployment_tasks::DeploymentTask;
use courier_models::wire::{ClaimTaskRequest, StatusReportResponse, TaskStatusReport};
use courier_utils::logging::prelude::*;

pub fn routes() -> Router<AppState> {
    info!("Setting up task routes");
    Router::new()
        .route("/tasks/:id", get(get_task))
        .route("/tasks/:id/claim", post(claim_task))
        .route("/tasks/:id/status", post(report_status))
}

async fn get_task(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> ApiResult<Json<DeploymentTask>> {
    state
        .dal
        .tasks()
        .get(id)
        .map_err(error_response)?
        .map(Json)
        .ok_or_else(|| error_response(RolloutError::not_found(format!("task {}", id))))
}

async fn claim_task(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(request): Json<ClaimTaskRequest>,
) -> ApiResult<Json<DeploymentTask>> {
    info!("Machine '{}' claims task {}", request.machine_key, id);
    state
        .dal
        .tasks()
        .claim(id, &request.machine_key)
        .map(Json)
        .map_err(error_response)
}

async fn report_status(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(report): Json<TaskStatusReport>,
) -> ApiResult<Json<StatusReportResponse>> {
    debug!(
        "Status report for task {}: {:?} at {}%",
        id, report.status, report.progress_percentage
    );
    state
        .dal
        .tasks()
        .report(id, &report)
        .map(|result| Json(result.response))
        .map_err(error_response)
}
