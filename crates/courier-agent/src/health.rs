/*
 * Copyright (c) 2025 Dylan Storey
 * Licensed under the Elastic License 2.0.
 * See LICENSE file in the project root for full license text.
 */

//! # Health Check Module
//!
//! Local HTTP endpoints for supervising the agent:
//!
//! - `GET /healthz` - liveness, always `OK`
//! - `GET /readyz` - 200 while the last heartbeat reached the broker, 503 otherwise
//! - `GET /health` - JSON status with broker connectivity, busy flag and uptime
//! - `GET /metrics` - Prometheus metrics

use crate::metrics;
use axum::{extract::State, http::StatusCode, response::IntoResponse, routing::get, Json, Router};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::RwLock;

/// Shared state for health endpoints
#[derive(Clone)]
pub struct HealthState {
    pub machine_key: String,
    pub broker_status: Arc<RwLock<BrokerStatus>>,
    pub busy: Arc<AtomicBool>,
    pub start_time: Instant,
}

/// Broker connection status, updated by the heartbeat loop
#[derive(Clone, Debug, Default)]
pub struct BrokerStatus {
    pub connected: bool,
    pub last_heartbeat: Option<String>,
}

#[derive(Serialize)]
struct HealthStatus {
    status: &'static str,
    machine_key: String,
    broker_connected: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    last_heartbeat: Option<String>,
    busy: bool,
    uptime_seconds: u64,
    version: &'static str,
}

/// Configures and returns the health check router
pub fn configure_health_routes(state: HealthState) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/health", get(health))
        .route("/metrics", get(metrics_handler))
        .with_state(state)
}

async fn healthz() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}

async fn readyz(State(state): State<HealthState>) -> impl IntoResponse {
    if state.broker_status.read().await.connected {
        (StatusCode::OK, "Ready")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "Broker unreachable")
    }
}

async fn health(State(state): State<HealthState>) -> impl IntoResponse {
    let broker = state.broker_status.read().await.clone();
    let status_code = if broker.connected {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    let body = HealthStatus {
        status: if broker.connected { "healthy" } else { "unhealthy" },
        machine_key: state.machine_key.clone(),
        broker_connected: broker.connected,
        last_heartbeat: broker.last_heartbeat,
        busy: state.busy.load(Ordering::SeqCst),
        uptime_seconds: state.start_time.elapsed().as_secs(),
        version: env!("CARGO_PKG_VERSION"),
    };
    (status_code, Json(body))
}

async fn metrics_handler() -> impl IntoResponse {
    (
        StatusCode::OK,
        [("Content-Type", "text/plain; version=0.0.4")],
        metrics::encode_metrics(),
    )
}
