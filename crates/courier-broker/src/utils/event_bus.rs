/*
 * Copyright (c) 2025 Dylan Storey
 * Licensed under the Elastic License 2.0.
 * See LICENSE file in the project root for full license text.
 */

//! Event Bus for rollout audit events.
//!
//! State changes (task claimed, task finished, deployment settled, ...) are
//! emitted after their transaction commits and handed to an [`AuditSink`] by a
//! single dispatcher task. Emitting never blocks a request: when the channel
//! is full the event is dropped and logged.

use chrono::{DateTime, Utc};
use courier_utils::logging::prelude::*;
use once_cell::sync::OnceCell;
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::mpsc;
use uuid::Uuid;

pub const DEPLOYMENT_CREATED: &str = "deployment.created";
pub const DEPLOYMENT_STATUS_CHANGED: &str = "deployment.status_changed";
pub const TASK_CREATED: &str = "task.created";
pub const TASK_CLAIMED: &str = "task.claimed";
pub const TASK_PROGRESS: &str = "task.progress";
pub const TASK_COMPLETED: &str = "task.completed";
pub const TASK_FAILED: &str = "task.failed";
pub const TASK_RETRY_SCHEDULED: &str = "task.retry_scheduled";
pub const TASK_CANCELLED: &str = "task.cancelled";
pub const MACHINE_REGISTERED: &str = "machine.registered";
pub const MACHINE_OFFLINE: &str = "machine.offline";
pub const PACKAGE_PUBLISHED: &str = "package.published";
pub const MANIFEST_ACTIVATED: &str = "manifest.activated";

/// Global event bus storage.
static EVENT_BUS: OnceCell<Arc<EventBus>> = OnceCell::new();

#[derive(Debug, Clone, Serialize)]
pub struct RolloutEvent {
    pub id: Uuid,
    pub event_type: &'static str,
    pub occurred_at: DateTime<Utc>,
    pub deployment_id: Option<i64>,
    pub task_id: Option<i64>,
    pub machine_id: Option<i64>,
    pub data: serde_json::Value,
}

impl RolloutEvent {
    pub fn new(event_type: &'static str) -> Self {
        RolloutEvent {
            id: Uuid::new_v4(),
            event_type,
            occurred_at: Utc::now(),
            deployment_id: None,
            task_id: None,
            machine_id: None,
            data: serde_json::Value::Null,
        }
    }

    pub fn deployment(mut self, deployment_id: i64) -> Self {
        self.deployment_id = Some(deployment_id);
        self
    }

    pub fn task(mut self, task_id: i64) -> Self {
        self.task_id = Some(task_id);
        self
    }

    pub fn machine(mut self, machine_id: i64) -> Self {
        self.machine_id = Some(machine_id);
        self
    }

    pub fn data(mut self, data: serde_json::Value) -> Self {
        self.data = data;
        self
    }
}

/// Destination for dispatched events.
pub trait AuditSink: Send + Sync + 'static {
    fn record(&self, event: &RolloutEvent);
}

/// Writes each event as one JSON log line under the `courier::audit` target.
pub struct LogAuditSink;

impl AuditSink for LogAuditSink {
    fn record(&self, event: &RolloutEvent) {
        match serde_json::to_string(event) {
            Ok(line) => info!(target: "courier::audit", "{}", line),
            Err(e) => error!("Failed to serialize audit event {}: {}", event.id, e),
        }
    }
}

#[derive(Clone)]
pub struct EventBus {
    sender: mpsc::Sender<RolloutEvent>,
}

impl EventBus {
    /// Creates a new event bus and starts its dispatcher.
    ///
    /// Must be called from within a tokio runtime.
    pub fn with_capacity(sink: Arc<dyn AuditSink>, capacity: usize) -> Self {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        start_event_dispatcher(sink, receiver);
        info!("Event bus started with capacity {}", capacity);
        Self { sender }
    }

    pub fn emit(&self, event: RolloutEvent) {
        let event_type = event.event_type;
        let event_id = event.id;
        match self.sender.try_send(event) {
            Ok(()) => debug!("Event emitted: {} (id: {})", event_type, event_id),
            Err(e) => error!(
                "Failed to emit event {} (id: {}): channel full or closed - {}",
                event_type, event_id, e
            ),
        }
    }
}

/// Initializes the global event bus.
///
/// # Returns
/// Ok(()) if initialization succeeded, Err if already initialized.
pub fn init_event_bus(sink: Arc<dyn AuditSink>, capacity: usize) -> Result<(), String> {
    let bus = EventBus::with_capacity(sink, capacity);
    EVENT_BUS
        .set(Arc::new(bus))
        .map_err(|_| "Event bus already initialized".to_string())
}

pub fn get_event_bus() -> Option<Arc<EventBus>> {
    EVENT_BUS.get().cloned()
}

/// Emits an event to the global event bus, if one is running.
pub fn emit(event: RolloutEvent) {
    if let Some(bus) = get_event_bus() {
        bus.emit(event);
    } else {
        debug!("Event bus not initialized, event dropped: {}", event.event_type);
    }
}

fn start_event_dispatcher(sink: Arc<dyn AuditSink>, mut receiver: mpsc::Receiver<RolloutEvent>) {
    tokio::spawn(async move {
        while let Some(event) = receiver.recv().await {
            sink.record(&event);
        }
        warn!("Event dispatcher stopped: channel closed");
    });
}
