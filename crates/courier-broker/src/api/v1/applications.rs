/*
 * Copyright (c) 2025 Dylan Storey
 * Licensed under the Elastic License 2.0.
 * See LICENSE file in the project root for full license text.
 */

//! Application registry endpoints.
//!
//! - `POST /api/v1/applications` - Register an application
//! - `GET /api/v1/applications` - List applications
//! - `GET /api/v1/applications/:code` - Get one application

use crate::api::{bad_request, error_response, ApiResult, AppState};
use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::get,
    Json, Router,
};
use courier_models::models::applications::{Application, NewApplication};
use courier_utils::logging::prelude::*;
use serde::{Deserialize, Serialize};

pub fn routes() -> Router<AppState> {
    info!("Setting up application routes");
    Router::new()
        .route("/applications", get(list_applications).post(create_application))
        .route("/applications/:code", get(get_application))
}

#[derive(Debug, Deserialize, Serialize)]
pub struct CreateApplicationRequest {
    pub code: String,
    /// Display name; defaults to the code.
    #[serde(default)]
    pub name: Option<String>,
}

async fn create_application(
    State(state): State<AppState>,
    Json(request): Json<CreateApplicationRequest>,
) -> ApiResult<(StatusCode, Json<Application>)> {
    info!("Handling request to create application '{}'", request.code);
    let new_application =
        NewApplication::new(request.code, request.name.unwrap_or_default()).map_err(bad_request)?;
    let application = state
        .dal
        .applications()
        .create(&new_application)
        .map_err(error_response)?;
    Ok((StatusCode::CREATED, Json(application)))
}

async fn list_applications(State(state): State<AppState>) -> ApiResult<Json<Vec<Application>>> {
    state
        .dal
        .applications()
        .list()
        .map(Json)
        .map_err(error_response)
}

async fn get_application(
    State(state): State<AppState>,
    Path(code): Path<String>,
) -> ApiResult<Json<Application>> {
    state
        .dal
        .applications()
        .require(&code)
        .map(Json)
        .map_err(error_response)
}
