/*
 * Copyright (c) 2025 Dylan Storey
 * Licensed under the Elastic License 2.0.
 * See LICENSE file in the project root for full license text.
 */

//! # Metrics Module
//!
//! Prometheus metrics for the rollout engine, exposed on `/metrics`.

use once_cell::sync::Lazy;
use prometheus::{Encoder, IntCounter, IntCounterVec, IntGauge, Opts, Registry, TextEncoder};

/// Global Prometheus registry for all broker metrics
pub static REGISTRY: Lazy<Registry> = Lazy::new(Registry::new);

/// Task transitions applied by claims and status reports
/// Labels: outcome (claimed, progress, retry_scheduled, completed, failed, cancelled)
pub static TASK_TRANSITIONS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    let opts = Opts::new(
        "courier_task_transitions_total",
        "Total number of task state transitions by outcome",
    );
    let counter = IntCounterVec::new(opts, &["outcome"])
        .expect("Failed to create task transitions counter");
    REGISTRY
        .register(Box::new(counter.clone()))
        .expect("Failed to register task transitions counter");
    counter
});

/// Deployments that reached a terminal status
/// Labels: status
pub static DEPLOYMENTS_FINALIZED_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    let opts = Opts::new(
        "courier_deployments_finalized_total",
        "Total number of deployments that reached a terminal status",
    );
    let counter = IntCounterVec::new(opts, &["status"])
        .expect("Failed to create finalized deployments counter");
    REGISTRY
        .register(Box::new(counter.clone()))
        .expect("Failed to register finalized deployments counter");
    counter
});

/// Claims refused because the task or machine was not available
pub static CLAIM_CONFLICTS_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    let counter = IntCounter::new(
        "courier_claim_conflicts_total",
        "Total number of refused task claims",
    )
    .expect("Failed to create claim conflicts counter");
    REGISTRY
        .register(Box::new(counter.clone()))
        .expect("Failed to register claim conflicts counter");
    counter
});

/// Machines currently considered online
pub static MACHINES_ONLINE: Lazy<IntGauge> = Lazy::new(|| {
    let gauge = IntGauge::new(
        "courier_machines_online",
        "Number of machines with a recent heartbeat",
    )
    .expect("Failed to create online machines gauge");
    REGISTRY
        .register(Box::new(gauge.clone()))
        .expect("Failed to register online machines gauge");
    gauge
});

pub fn record_task_transition(outcome: &str) {
    TASK_TRANSITIONS_TOTAL.with_label_values(&[outcome]).inc();
}

pub fn record_deployment_finalized(status: &str) {
    DEPLOYMENTS_FINALIZED_TOTAL.with_label_values(&[status]).inc();
}

/// Encodes all registered metrics in Prometheus text format.
pub fn encode_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();
    let mut buffer = vec![];
    encoder
        .encode(&metric_families, &mut buffer)
        .expect("Failed to encode metrics");
    String::from_utf8(buffer).expect("Failed to convert metrics to UTF-8")
}
