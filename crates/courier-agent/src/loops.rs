/*
 * Copyright (c) 2025 Dylan Storey
 * Licensed under the Elastic License 2.0.
 * See LICENSE file in the project root for full license text.
 */

//! The agent's two periodic loops.
//!
//! Heartbeats and task polling run as separate tokio tasks so that a long
//! install never delays a heartbeat. They share only the broker client, the
//! installer's state file and an atomic busy flag. Broker failures are logged
//! and the loop waits for its next tick.

use crate::broker::BrokerClient;
use crate::error::AgentError;
use crate::executor::{Executor, TaskOutcome};
use crate::health::BrokerStatus;
use crate::identity::MachineIdentity;
use crate::installer::Installer;
use crate::metrics;
use courier_utils::logging::prelude::*;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::select;
use tokio::sync::{broadcast, RwLock};
use tokio::time::{interval, MissedTickBehavior};

/// Everything the heartbeat loop needs.
pub struct HeartbeatContext {
    pub client: BrokerClient,
    pub identity: MachineIdentity,
    pub installer: Arc<Installer>,
    pub busy: Arc<AtomicBool>,
    pub broker_status: Arc<RwLock<BrokerStatus>>,
}

impl HeartbeatContext {
    /// Sends one heartbeat, re-registering if the broker no longer knows us.
    ///
    /// An unreadable state file does not stop the heartbeat; it is sent
    /// without the installed-application snapshot.
    pub async fn beat(&self) -> Result<(), AgentError> {
        let installed = match self.installer.load_state() {
            Ok(state) => Some(state.installed_applications()),
            Err(e) => {
                error!("Cannot read installed applications for the heartbeat: {}", e);
                None
            }
        };
        let busy = self.busy.load(Ordering::SeqCst);
        match self.client.heartbeat(busy, installed.clone()).await {
            Err(AgentError::Rejected { status: 404, .. }) => {
                warn!(
                    "Broker does not know machine '{}'; registering again",
                    self.identity.machine_key
                );
                self.client
                    .register(&self.identity.register_request(installed.unwrap_or_default()))
                    .await
                    .map(|_| ())
            }
            other => other,
        }
    }
}

pub async fn heartbeat_loop(
    context: HeartbeatContext,
    period: Duration,
    mut shutdown: broadcast::Receiver<()>,
) {
    let mut ticker = interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        select! {
            _ = ticker.tick() => {
                match context.beat().await {
                    Ok(()) => {
                        metrics::heartbeat_sent_total().inc();
                        debug!("Sent heartbeat for machine '{}'", context.identity.machine_key);
                        let mut status = context.broker_status.write().await;
                        status.connected = true;
                        status.last_heartbeat = Some(chrono::Utc::now().to_rfc3339());
                    }
                    Err(e) => {
                        if e.is_transient() {
                            warn!("Heartbeat for machine '{}' not delivered: {}", context.identity.machine_key, e);
                        } else {
                            error!("Heartbeat for machine '{}' failed: {}", context.identity.machine_key, e);
                        }
                        context.broker_status.write().await.connected = false;
                    }
                }
            }
            _ = shutdown.recv() => {
                info!("Heartbeat loop stopping");
                break;
            }
        }
    }
}

/// Polls once and executes the first eligible task, if any.
///
/// A task left in flight by an earlier run is finished first; nothing new is
/// claimed until the broker has its outcome. A task another poll already
/// claimed is skipped silently.
pub async fn run_task_cycle(
    client: &BrokerClient,
    executor: &Executor<BrokerClient>,
    busy: &AtomicBool,
) -> Result<Option<TaskOutcome>, AgentError> {
    if !executor.recover().await {
        return Ok(None);
    }

    let pending = match client.pending_tasks().await {
        Ok(pending) => {
            metrics::poll_requests_total()
                .with_label_values(&["success"])
                .inc();
            pending
        }
        Err(e) => {
            metrics::poll_requests_total()
                .with_label_values(&["error"])
                .inc();
            return Err(e);
        }
    };
    let Some(task) = pending.into_iter().next() else {
        return Ok(None);
    };

    executor.begin(&task).await?;
    match client.claim(task.task_id).await {
        Ok(_) => {}
        Err(AgentError::Rejected { status: 409, message }) => {
            debug!("Task {} could not be claimed: {}", task.task_id, message);
            executor.abandon(task.task_id).await;
            return Ok(None);
        }
        Err(e) if e.is_transient() => {
            // The claim may have landed; recovery settles it next cycle.
            return Err(e);
        }
        Err(e) => {
            executor.abandon(task.task_id).await;
            return Err(e);
        }
    }

    busy.store(true, Ordering::SeqCst);
    let outcome = executor.execute(&task).await;
    busy.store(false, Ordering::SeqCst);
    Ok(Some(outcome))
}

pub async fn task_loop(
    client: BrokerClient,
    executor: Arc<Executor<BrokerClient>>,
    busy: Arc<AtomicBool>,
    period: Duration,
    mut shutdown: broadcast::Receiver<()>,
) {
    let mut ticker = interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        select! {
            _ = ticker.tick() => {
                match run_task_cycle(&client, &executor, &busy).await {
                    Ok(Some(outcome)) => info!("Task cycle finished with outcome '{}'", outcome.label()),
                    Ok(None) => debug!("No eligible tasks for machine '{}'", client.machine_key()),
                    Err(e) if e.is_transient() => warn!("Task poll failed: {}", e),
                    Err(e) => error!("Task cycle failed: {}", e),
                }
            }
            _ = shutdown.recv() => {
                info!("Task loop stopping");
                break;
            }
        }
    }
}
