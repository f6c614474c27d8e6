/*
 * Copyright (c) 2025 Dylan Storey
 * Licensed under the Elastic License 2.0.
 * See LICENSE file in the project root for full license text.
 */

//! # Metrics Module
//!
//! Prometheus metrics for the Courier Agent: broker polling, heartbeats and
//! task execution outcomes.

use prometheus::{CounterVec, Encoder, IntCounter, Opts, Registry, TextEncoder};
use std::sync::OnceLock;

/// Global Prometheus registry for all agent metrics
static REGISTRY: OnceLock<Registry> = OnceLock::new();

fn registry() -> &'static Registry {
    REGISTRY.get_or_init(Registry::new)
}

/// Broker poll request counter
/// Labels: status (success/error)
pub fn poll_requests_total() -> &'static CounterVec {
    static COUNTER: OnceLock<CounterVec> = OnceLock::new();
    COUNTER.get_or_init(|| {
        let opts = Opts::new(
            "courier_agent_poll_requests_total",
            "Total number of pending-task polls sent to the broker",
        );
        let counter =
            CounterVec::new(opts, &["status"]).expect("Failed to create poll requests counter");
        registry()
            .register(Box::new(counter.clone()))
            .expect("Failed to register poll requests counter");
        counter
    })
}

/// Heartbeats the broker accepted
pub fn heartbeat_sent_total() -> &'static IntCounter {
    static COUNTER: OnceLock<IntCounter> = OnceLock::new();
    COUNTER.get_or_init(|| {
        let counter = IntCounter::new(
            "courier_agent_heartbeat_sent_total",
            "Total number of heartbeats delivered to the broker",
        )
        .expect("Failed to create heartbeat counter");
        registry()
            .register(Box::new(counter.clone()))
            .expect("Failed to register heartbeat counter");
        counter
    })
}

/// Executed tasks
/// Labels: outcome (completed/failed/cancelled)
pub fn tasks_executed_total() -> &'static CounterVec {
    static COUNTER: OnceLock<CounterVec> = OnceLock::new();
    COUNTER.get_or_init(|| {
        let opts = Opts::new(
            "courier_agent_tasks_executed_total",
            "Total number of tasks executed by outcome",
        );
        let counter =
            CounterVec::new(opts, &["outcome"]).expect("Failed to create tasks counter");
        registry()
            .register(Box::new(counter.clone()))
            .expect("Failed to register tasks counter");
        counter
    })
}

/// Rollbacks performed after a failed or cancelled install
pub fn rollbacks_total() -> &'static IntCounter {
    static COUNTER: OnceLock<IntCounter> = OnceLock::new();
    COUNTER.get_or_init(|| {
        let counter = IntCounter::new(
            "courier_agent_rollbacks_total",
            "Total number of install rollbacks",
        )
        .expect("Failed to create rollback counter");
        registry()
            .register(Box::new(counter.clone()))
            .expect("Failed to register rollback counter");
        counter
    })
}

/// Renders all agent metrics in the Prometheus text format.
pub fn encode_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = registry().gather();
    let mut buffer = Vec::new();
    encoder
        .encode(&metric_families, &mut buffer)
        .expect("Failed to encode metrics");
    String::from_utf8(buffer).expect("Metrics are not valid UTF-8")
}
