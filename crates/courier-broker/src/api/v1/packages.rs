/*
 * Copyright (c) 2025 Dylan Storey
 * Licensed under the Elastic License 2.0.
 * See LICENSE file in the project root for full license text.
 */

//! Package store endpoints.
//!
//! ## Endpoints
//!
//! ### Publishing (operators)
//! - `PUT /api/v1/applications/:code/packages/:version` - Upload a bundle
//! - `GET /api/v1/applications/:code/packages` - List versions, newest first
//! - `GET /api/v1/applications/:code/packages/latest` - Latest active version
//! - `GET /api/v1/packages/:id` - Version metadata
//! - `DELETE /api/v1/packages/:id` - Delete, or deactivate when referenced
//!
//! ### Agent Operations
//! - `GET /api/v1/packages/:id/content` - Download the bundle bytes
//! - `POST /api/v1/packages/:id/downloads` - Record a download attempt

use crate::api::{bad_request, error_response, ApiResult, AppState};
use crate::dal::PackageRemoval;
use crate::rollout::ports::PackageStore;
use crate::rollout::RolloutError;
use crate::storage::PackageStorage;
use crate::utils::event_bus::{self, RolloutEvent};
use axum::{
    body::{Body, Bytes},
    extract::{DefaultBodyLimit, Path, Query, State},
    http::{header, StatusCode},
    response::IntoResponse,
    routing::{get, post, put},
    Json, Router,
};
use courier_models::models::package_versions::{sha256_hex, NewPackageVersion, PackageVersion};
use courier_models::wire::RecordDownloadRequest;
use courier_utils::logging::prelude::*;
use serde::Deserialize;
use tokio_util::io::ReaderStream;

/// Largest bundle accepted by the upload endpoint.
const MAX_PACKAGE_BYTES: usize = 1024 * 1024 * 1024;

pub use courier_models::wire::CONTENT_HASH_HEADER;

pub fn routes() -> Router<AppState> {
    info!("Setting up package routes");
    Router::new()
        .route(
            "/applications/:code/packages/:version",
            put(upload_package).layer(DefaultBodyLimit::max(MAX_PACKAGE_BYTES)),
        )
        .route("/applications/:code/packages", get(list_packages))
        .route("/applications/:code/packages/latest", get(latest_package))
        .route("/packages/:id", get(get_package).delete(delete_package))
        .route("/packages/:id/content", get(download_content))
        .route("/packages/:id/downloads", post(record_download))
}

#[derive(Debug, Deserialize)]
pub struct UploadQuery {
    #[serde(default = "default_stable")]
    pub stable: bool,
    /// Version string this upload supersedes; defaults to the current latest.
    pub replaces: Option<String>,
    pub release_notes: Option<String>,
}

fn default_stable() -> bool {
    true
}

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    #[serde(default)]
    pub include_inactive: bool,
}

#[derive(Debug, Deserialize)]
pub struct LatestQuery {
    #[serde(default)]
    pub stable_only: bool,
}

async fn upload_package(
    State(state): State<AppState>,
    Path((code, version)): Path<(String, String)>,
    Query(query): Query<UploadQuery>,
    body: Bytes,
) -> ApiResult<(StatusCode, Json<PackageVersion>)> {
    info!(
        "Handling upload of '{}' version '{}' ({} bytes)",
        code,
        version,
        body.len()
    );
    if body.is_empty() {
        return Err(bad_request("package body cannot be empty"));
    }
    let application = state.dal.applications().require(&code).map_err(error_response)?;
    let packages = state.dal.packages();
    if packages
        .get_by_version(application.id, &version)
        .map_err(error_response)?
        .is_some()
    {
        return Err(error_response(RolloutError::conflict(format!(
            "version '{}' of '{}' already exists",
            version, code
        ))));
    }
    let replaces_version_id = match query.replaces.as_deref() {
        Some(replaced) => Some(
            packages
                .get_by_version(application.id, replaced)
                .map_err(error_response)?
                .ok_or_else(|| {
                    error_response(RolloutError::not_found(format!(
                        "version '{}' of '{}'",
                        replaced, code
                    )))
                })?
                .id,
        ),
        None => None,
    };

    let storage_path = PackageStorage::new_path(&application.code, version.trim());
    let new_version = NewPackageVersion::new(
        application.id,
        version,
        sha256_hex(&body),
        body.len() as i64,
        storage_path.clone(),
        query.stable,
        replaces_version_id,
        query.release_notes,
    )
    .map_err(bad_request)?;

    state
        .storage
        .write(&storage_path, &body)
        .await
        .map_err(|e| error_response(RolloutError::Io(e)))?;
    let created = match packages.create(&new_version) {
        Ok(created) => created,
        Err(e) => {
            // Only this upload's own file; a concurrent winner stored its
            // bundle elsewhere.
            if let Err(cleanup) = state.storage.remove(&storage_path).await {
                warn!("Failed to remove orphaned bundle {}: {}", storage_path, cleanup);
            }
            return Err(error_response(e));
        }
    };

    info!(
        "Published '{}' version '{}' as package version {} (sha256 {})",
        code, created.version, created.id, created.content_hash
    );
    event_bus::emit(RolloutEvent::new(event_bus::PACKAGE_PUBLISHED).data(serde_json::json!({
        "package_version_id": created.id,
        "application": code,
        "version": created.version,
        "replaces_version_id": created.replaces_version_id,
        "size_bytes": created.size_bytes,
    })));
    Ok((StatusCode::CREATED, Json(created)))
}

async fn list_packages(
    State(state): State<AppState>,
    Path(code): Path<String>,
    Query(query): Query<ListQuery>,
) -> ApiResult<Json<Vec<PackageVersion>>> {
    let application = state.dal.applications().require(&code).map_err(error_response)?;
    state
        .dal
        .packages()
        .list_for_application(application.id, query.include_inactive)
        .map(Json)
        .map_err(error_response)
}

async fn latest_package(
    State(state): State<AppState>,
    Path(code): Path<String>,
    Query(query): Query<LatestQuery>,
) -> ApiResult<Json<PackageVersion>> {
    let application = state.dal.applications().require(&code).map_err(error_response)?;
    state
        .dal
        .packages()
        .get_latest(application.id, query.stable_only)
        .map_err(error_response)?
        .map(Json)
        .ok_or_else(|| {
            error_response(RolloutError::not_found(format!(
                "an active version of '{}'",
                code
            )))
        })
}

async fn get_package(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> ApiResult<Json<PackageVersion>> {
    state
        .dal
        .packages()
        .get(id)
        .map_err(error_response)?
        .map(Json)
        .ok_or_else(|| error_response(RolloutError::not_found(format!("package version {}", id))))
}

async fn delete_package(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> ApiResult<Json<serde_json::Value>> {
    info!("Handling request to remove package version {}", id);
    match state.dal.packages().remove(id).map_err(error_response)? {
        PackageRemoval::Deleted(version) => {
            if let Err(e) = state.storage.remove(&version.storage_path).await {
                warn!("Failed to remove bundle {}: {}", version.storage_path, e);
            }
            Ok(Json(serde_json::json!({ "id": id, "outcome": "deleted" })))
        }
        PackageRemoval::Deactivated(version) => {
            info!(
                "Package version {} is referenced and was deactivated instead of deleted",
                version.id
            );
            Ok(Json(serde_json::json!({ "id": id, "outcome": "deactivated" })))
        }
    }
}

async fn download_content(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> ApiResult<impl IntoResponse> {
    let version = state
        .dal
        .packages()
        .get(id)
        .map_err(error_response)?
        .ok_or_else(|| error_response(RolloutError::not_found(format!("package version {}", id))))?;
    let (file, len) = state.storage.open(&version.storage_path).await.map_err(|e| {
        error_response(RolloutError::FatalConfiguration(format!(
            "content of package version {} is unavailable at '{}': {}",
            id, version.storage_path, e
        )))
    })?;
    debug!("Streaming {} bytes of package version {}", len, id);
    Ok((
        [
            (header::CONTENT_TYPE, "application/octet-stream".to_string()),
            (header::CONTENT_LENGTH, len.to_string()),
            (header::HeaderName::from_static(CONTENT_HASH_HEADER), version.content_hash),
        ],
        Body::from_stream(ReaderStream::new(file)),
    ))
}

async fn record_download(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(request): Json<RecordDownloadRequest>,
) -> ApiResult<StatusCode> {
    let machine = state
        .dal
        .machines()
        .require_by_key(&request.machine_key)
        .map_err(error_response)?;
    let packages = state.dal.packages();
    if packages.get(id).map_err(error_response)?.is_none() {
        return Err(error_response(RolloutError::not_found(format!(
            "package version {}",
            id
        ))));
    }
    packages
        .record_download(id, machine.id, request.bytes, request.success)
        .map_err(error_response)?;
    Ok(StatusCode::CREATED)
}
