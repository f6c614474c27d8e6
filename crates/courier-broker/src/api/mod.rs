/*
 * Copyright (c) 2025 Dylan Storey
 * Licensed under the Elastic License 2.0.
 * See LICENSE file in the project root for full license text.
 */

//! # API Routes Aggregator Module
//!
//! Aggregates the versioned API with the operational endpoints and maps
//! [`RolloutError`] onto HTTP responses.

pub mod v1;

use crate::dal::DAL;
use crate::metrics;
use crate::rollout::RolloutError;
use crate::storage::PackageStorage;
use axum::{extract::State, response::IntoResponse, routing::get, Json, Router};
use courier_utils::logging::prelude::*;
use hyper::StatusCode;

/// Shared state handed to every handler.
#[derive(Clone)]
pub struct AppState {
    pub dal: DAL,
    pub storage: PackageStorage,
}

/// Error half of every handler result: a status code and `{"error": ..}` body.
pub type ApiError = (StatusCode, Json<serde_json::Value>);

pub type ApiResult<T> = Result<T, ApiError>;

/// Maps a rollout error onto its HTTP status and JSON body.
///
/// Database, pool and I/O failures are logged and reported without detail.
pub fn error_response(e: RolloutError) -> ApiError {
    let status = match &e {
        RolloutError::Validation(_) => StatusCode::BAD_REQUEST,
        RolloutError::NotFound(_) => StatusCode::NOT_FOUND,
        RolloutError::Conflict(_) | RolloutError::ProgressRegression { .. } => StatusCode::CONFLICT,
        RolloutError::InvalidPackageVersion(_) | RolloutError::NoEligibleTargets(_) => {
            StatusCode::UNPROCESSABLE_ENTITY
        }
        RolloutError::Pool(_) => StatusCode::SERVICE_UNAVAILABLE,
        RolloutError::FatalConfiguration(_) | RolloutError::Database(_) | RolloutError::Io(_) => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    };
    let kind = e.failure_kind().map(|k| k.as_str()).unwrap_or("internal");
    let message = if status.is_server_error() {
        error!("Request failed: {}", e);
        match e {
            RolloutError::FatalConfiguration(_) => e.to_string(),
            RolloutError::Pool(_) => "Database unavailable".to_string(),
            _ => "Internal server error".to_string(),
        }
    } else {
        debug!("Request rejected ({}): {}", status, e);
        e.to_string()
    };
    (
        status,
        Json(serde_json::json!({ "error": message, "kind": kind })),
    )
}

/// Validation error built directly from a message.
pub fn bad_request(message: impl Into<String>) -> ApiError {
    error_response(RolloutError::Validation(message.into()))
}

/// Configures the router: `/api/v1` plus health, readiness and metrics.
pub fn configure_api_routes(state: AppState) -> Router {
    Router::new()
        .nest("/api/v1", v1::routes())
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/metrics", get(metrics_handler))
        .with_state(state)
}

/// Health check endpoint handler
///
/// Returns a 200 OK status code with "OK" in the body.
async fn healthz() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}

/// Ready check endpoint handler
///
/// Ready once a database connection can be checked out of the pool.
async fn readyz(State(state): State<AppState>) -> impl IntoResponse {
    match state.dal.pool.get() {
        Ok(_) => (StatusCode::OK, "Ready"),
        Err(e) => {
            warn!("Readiness check failed: {}", e);
            (StatusCode::SERVICE_UNAVAILABLE, "Database unavailable")
        }
    }
}

/// Metrics endpoint handler
///
/// Returns Prometheus metrics in text exposition format.
async fn metrics_handler() -> impl IntoResponse {
    (
        StatusCode::OK,
        [("Content-Type", "text/plain; version=0.0.4")],
        metrics::encode_metrics(),
    )
}
