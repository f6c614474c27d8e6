/*
 * Copyright (c) 2025 Dylan Storey
 * Licensed under the Elastic License 2.0.
 * See LICENSE file in the project root for full license text.
 */

//! Application manifest endpoints.
//!
//! - `POST /api/v1/applications/:code/manifests` - Create an inactive manifest
//! - `GET /api/v1/applications/:code/manifests` - List manifests
//! - `GET /api/v1/applications/:code/manifest` - The active manifest
//! - `POST /api/v1/manifests/:id/activate` - Make a manifest the active one

use crate::api::{bad_request, error_response, ApiResult, AppState};
use crate::rollout::ports::ManifestResolver;
use crate::rollout::RolloutError;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use courier_models::models::manifests::{ApplicationManifest, NewApplicationManifest, UpdatePolicy};
use courier_utils::logging::prelude::*;
use serde::{Deserialize, Serialize};

pub fn routes() -> Router<AppState> {
    info!("Setting up manifest routes");
    Router::new()
        .route(
            "/applications/:code/manifests",
            get(list_manifests).post(create_manifest),
        )
        .route("/applications/:code/manifest", get(active_manifest))
        .route("/manifests/:id/activate", post(activate_manifest))
}

#[derive(Debug, Deserialize, Serialize)]
pub struct CreateManifestRequest {
    pub version: String,
    pub binary_package_id: Option<i64>,
    pub config_package_id: Option<i64>,
    #[serde(default)]
    pub update_policy: UpdatePolicy,
    #[serde(default)]
    pub force_update: bool,
    #[serde(default)]
    pub notify_user: bool,
    #[serde(default)]
    pub allow_skip: bool,
    #[serde(default)]
    pub preserved_paths: Vec<String>,
}

async fn create_manifest(
    State(state): State<AppState>,
    Path(code): Path<String>,
    Json(request): Json<CreateManifestRequest>,
) -> ApiResult<(StatusCode, Json<ApplicationManifest>)> {
    info!("Handling request to create manifest '{}' for '{}'", request.version, code);
    let application = state.dal.applications().require(&code).map_err(error_response)?;
    let new_manifest = NewApplicationManifest::new(
        application.id,
        request.version,
        request.binary_package_id,
        request.config_package_id,
        request.update_policy,
        request.force_update,
        request.notify_user,
        request.allow_skip,
        request.preserved_paths,
    )
    .map_err(bad_request)?;
    let manifest = state
        .dal
        .manifests()
        .create(&new_manifest)
        .map_err(error_response)?;
    Ok((StatusCode::CREATED, Json(manifest)))
}

async fn list_manifests(
    State(state): State<AppState>,
    Path(code): Path<String>,
) -> ApiResult<Json<Vec<ApplicationManifest>>> {
    let application = state.dal.applications().require(&code).map_err(error_response)?;
    state
        .dal
        .manifests()
        .list_for_application(application.id)
        .map(Json)
        .map_err(error_response)
}

async fn active_manifest(
    State(state): State<AppState>,
    Path(code): Path<String>,
) -> ApiResult<Json<ApplicationManifest>> {
    let application = state.dal.applications().require(&code).map_err(error_response)?;
    state
        .dal
        .manifests()
        .get_active_manifest(application.id)
        .map_err(error_response)?
        .map(Json)
        .ok_or_else(|| {
            error_response(RolloutError::not_found(format!(
                "an active manifest for '{}'",
                code
            )))
        })
}

async fn activate_manifest(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> ApiResult<Json<ApplicationManifest>> {
    info!("Handling request to activate manifest {}", id);
    state
        .dal
        .manifests()
        .activate(id)
        .map(Json)
        .map_err(error_response)
}
