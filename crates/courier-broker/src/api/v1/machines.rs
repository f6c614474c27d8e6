/*
 * Copyright (c) 2025 Dylan Storey
 * Licensed under the Elastic License 2.0.
 * See LICENSE file in the project root for full license text.
 */

//! Machine registry endpoints used by agents.
//!
//! - `POST /api/v1/machines/register` - Register or refresh a machine
//! - `POST /api/v1/machines/:key/heartbeat` - Liveness and busy flag
//! - `GET /api/v1/machines/:key/tasks/pending` - Eligible tasks in execution order
//! - `GET /api/v1/machines` - List machines

use crate::api::{bad_request, error_response, ApiResult, AppState};
use axum::{
    extract::{Path, State},
    routing::{get, post},
    Json, Router,
};
use courier_models::models::client_machines::{ClientMachine, NewClientMachine};
use courier_models::wire::{HeartbeatRequest, PendingTask, RegisterMachineRequest};
use courier_utils::logging::prelude::*;

pub fn routes() -> Router<AppState> {
    info!("Setting up machine routes");
    Router::new()
        .route("/machines", get(list_machines))
        .route("/machines/register", post(register_machine))
        .route("/machines/:key/heartbeat", post(heartbeat))
        .route("/machines/:key/tasks/pending", get(pending_tasks))
}

async fn register_machine(
    State(state): State<AppState>,
    Json(request): Json<RegisterMachineRequest>,
) -> ApiResult<Json<ClientMachine>> {
    info!(
        "Handling registration of machine '{}' ({}@{})",
        request.machine_key, request.user_name, request.host_name
    );
    let installed = serde_json::to_value(&request.installed_applications)
        .map_err(|e| bad_request(e.to_string()))?;
    let new_machine = NewClientMachine::new(
        request.machine_key,
        request.host_name,
        request.user_name,
        request.mac_address,
        request.ip_address,
        request.os_version,
        request.agent_version,
        installed,
    )
    .map_err(bad_request)?;
    state
        .dal
        .machines()
        .register(&new_machine)
        .map(Json)
        .map_err(error_response)
}

async fn heartbeat(
    State(state): State<AppState>,
    Path(key): Path<String>,
    Json(request): Json<HeartbeatRequest>,
) -> ApiResult<Json<ClientMachine>> {
    debug!("Heartbeat from machine '{}' (busy: {})", key, request.busy);
    let installed = request
        .installed_applications
        .map(|apps| serde_json::to_value(apps).map_err(|e| bad_request(e.to_string())))
        .transpose()?;
    state
        .dal
        .machines()
        .heartbeat(&key, request.busy, installed)
        .map(Json)
        .map_err(error_response)
}

async fn pending_tasks(
    State(state): State<AppState>,
    Path(key): Path<String>,
) -> ApiResult<Json<Vec<PendingTask>>> {
    let tasks = state
        .dal
        .tasks()
        .pending_for_machine(&key)
        .map_err(error_response)?;
    debug!("Machine '{}' has {} pending tasks", key, tasks.len());
    Ok(Json(tasks))
}

async fn list_machines(State(state): State<AppState>) -> ApiResult<Json<Vec<ClientMachine>>> {
    state
        .dal
        .machines()
        .list()
        .map(Json)
        .map_err(error_response)
}
