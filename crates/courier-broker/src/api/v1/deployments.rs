/*
 * Copyright (c) 2025 Dylan Storey
 * Licensed under the Elastic License 2.0.
 * See LICENSE file in the project root for full license text.
 */

//! Deployment endpoints.
//!
//! ## Endpoints
//!
//! - `POST /api/v1/deployments` - Plan and create a deployment
//! - `GET /api/v1/deployments` - List, filtered by `application` and `status`
//! - `GET /api/v1/deployments/:id` - Get one deployment
//! - `GET /api/v1/deployments/:id/tasks` - Tasks of a deployment
//! - `POST /api/v1/deployments/:id/approve` - Release a deployment held for approval
//! - `POST /api/v1/deployments/:id/cancel` - Stop a deployment
//! - `POST /api/v1/deployments/:id/rollback` - Re-deploy the predecessor version

use crate::api::{bad_request, error_response, ApiResult, AppState};
use crate::rollout::planner::{DeploymentRequest, TargetSpec};
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use courier_models::models::deployment_histories::{
    DeploymentHistory, DeploymentStatus, DeploymentType,
};
use courier_models::models::deployment_tasks::DeploymentTask;
use courier_utils::logging::prelude::*;
use serde::{Deserialize, Serialize};

pub fn routes() -> Router<AppState> {
    info!("Setting up deployment routes");
    Router::new()
        .route("/deployments", get(list_deployments).post(create_deployment))
        .route("/deployments/:id", get(get_deployment))
        .route("/deployments/:id/tasks", get(list_tasks))
        .route("/deployments/:id/approve", post(approve_deployment))
        .route("/deployments/:id/cancel", post(cancel_deployment))
        .route("/deployments/:id/rollback", post(rollback_deployment))
}

fn default_deployment_type() -> DeploymentType {
    DeploymentType::Release
}

#[derive(Debug, Deserialize, Serialize)]
pub struct CreateDeploymentRequest {
    pub package_version_id: i64,
    pub environment: String,
    #[serde(default = "default_deployment_type")]
    pub deployment_type: DeploymentType,
    #[serde(default)]
    pub is_global: bool,
    #[serde(default)]
    pub targets: Vec<String>,
    #[serde(default)]
    pub requires_approval: bool,
    pub initiated_by: String,
    pub priority: Option<i32>,
    pub scheduled_for: Option<DateTime<Utc>>,
    pub max_retries: Option<i32>,
}

impl CreateDeploymentRequest {
    /// Checks the request shape and converts it into a planner request.
    pub fn into_request(self) -> Result<DeploymentRequest, String> {
        if self.environment.trim().is_empty() {
            return Err("Environment cannot be empty".to_string());
        }
        if self.initiated_by.trim().is_empty() {
            return Err("Initiator cannot be empty".to_string());
        }
        let targets = match (self.is_global, self.targets.is_empty()) {
            (true, true) => TargetSpec::Global,
            (false, false) => TargetSpec::Identifiers(self.targets),
            (true, false) => {
                return Err("A global deployment cannot list targets".to_string());
            }
            (false, true) => {
                return Err("A targeted deployment needs at least one target".to_string());
            }
        };
        Ok(DeploymentRequest {
            package_version_id: self.package_version_id,
            environment: self.environment,
            deployment_type: self.deployment_type,
            targets,
            requires_approval: self.requires_approval,
            initiated_by: self.initiated_by,
            priority: self.priority,
            scheduled_for: self.scheduled_for,
            max_retries: self.max_retries,
        })
    }
}

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    /// Application code.
    pub application: Option<String>,
    pub status: Option<DeploymentStatus>,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct ApproveRequest {
    pub approved_by: String,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct RollbackRequest {
    pub initiated_by: String,
}

async fn create_deployment(
    State(state): State<AppState>,
    Json(body): Json<CreateDeploymentRequest>,
) -> ApiResult<(StatusCode, Json<DeploymentHistory>)> {
    info!(
        "Handling request to deploy package version {} to '{}' by '{}'",
        body.package_version_id, body.environment, body.initiated_by
    );
    let request = body.into_request().map_err(bad_request)?;
    let history = state
        .dal
        .deployments()
        .plan_and_create(&request)
        .map_err(error_response)?;
    Ok((StatusCode::CREATED, Json(history)))
}

async fn list_deployments(
    State(state): State<AppState>,
    Query(query): Query<ListQuery>,
) -> ApiResult<Json<Vec<DeploymentHistory>>> {
    let application_id = match query.application.as_deref() {
        Some(code) => Some(
            state
                .dal
                .applications()
                .require(code)
                .map_err(error_response)?
                .id,
        ),
        None => None,
    };
    state
        .dal
        .deployments()
        .list(application_id, query.status)
        .map(Json)
        .map_err(error_response)
}

async fn get_deployment(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> ApiResult<Json<DeploymentHistory>> {
    state
        .dal
        .deployments()
        .require(id)
        .map(Json)
        .map_err(error_response)
}

async fn list_tasks(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> ApiResult<Json<Vec<DeploymentTask>>> {
    let deployments = state.dal.deployments();
    deployments.require(id).map_err(error_response)?;
    deployments.list_tasks(id).map(Json).map_err(error_response)
}

async fn approve_deployment(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(body): Json<ApproveRequest>,
) -> ApiResult<Json<DeploymentHistory>> {
    info!("Handling approval of deployment {} by '{}'", id, body.approved_by);
    state
        .dal
        .deployments()
        .approve(id, &body.approved_by)
        .map(Json)
        .map_err(error_response)
}

async fn cancel_deployment(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> ApiResult<Json<DeploymentHistory>> {
    info!("Handling request to cancel deployment {}", id);
    state
        .dal
        .deployments()
        .cancel(id)
        .map(Json)
        .map_err(error_response)
}

async fn rollback_deployment(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(body): Json<RollbackRequest>,
) -> ApiResult<(StatusCode, Json<DeploymentHistory>)> {
    info!("Handling rollback of deployment {} by '{}'", id, body.initiated_by);
    if body.initiated_by.trim().is_empty() {
        return Err(bad_request("Initiator cannot be empty"));
    }
    let history = state
        .dal
        .deployments()
        .rollback(id, &body.initiated_by)
        .map_err(error_response)?;
    Ok((StatusCode::CREATED, Json(history)))
}
