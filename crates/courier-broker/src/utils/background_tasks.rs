/*
 * Copyright (c) 2025 Dylan Storey
 * Licensed under the Elastic License 2.0.
 * See LICENSE file in the project root for full license text.
 */

//! Background tasks for the courier broker.

use crate::dal::DAL;
use crate::metrics;
use crate::utils::event_bus::{self, RolloutEvent};
use courier_utils::logging::prelude::*;
use std::time::Duration;
use tokio::time::interval;

/// Configuration for the machine maintenance task.
pub struct MaintenanceConfig {
    /// How often to sweep.
    pub interval: Duration,
}

impl Default for MaintenanceConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(30),
        }
    }
}

/// One maintenance pass: machines whose heartbeat aged past the offline
/// threshold are marked offline, tasks they left in progress are closed, and
/// the online gauge is refreshed.
///
/// # Returns
/// The number of machines that went offline.
pub fn run_maintenance(dal: &DAL) -> usize {
    let mut went_offline = 0;
    match dal.machines().mark_offline_stale() {
        Ok(machines) => {
            went_offline = machines.len();
            for machine in machines {
                warn!(
                    "Machine '{}' ({}) marked offline: last heartbeat {:?}",
                    machine.machine_key, machine.host_name, machine.last_heartbeat
                );
                event_bus::emit(
                    RolloutEvent::new(event_bus::MACHINE_OFFLINE)
                        .machine(machine.id)
                        .data(serde_json::json!({ "last_heartbeat": machine.last_heartbeat })),
                );
            }
        }
        Err(e) => error!("Failed to mark stale machines offline: {}", e),
    }
    match dal.tasks().fail_abandoned() {
        Ok(closed) if !closed.is_empty() => {
            info!("Closed {} tasks abandoned by offline machines", closed.len())
        }
        Ok(_) => {}
        Err(e) => error!("Failed to close abandoned tasks: {}", e),
    }
    match dal.machines().count_online() {
        Ok(online) => metrics::MACHINES_ONLINE.set(online),
        Err(e) => error!("Failed to count online machines: {}", e),
    }
    went_offline
}

/// Starts the machine maintenance background task.
pub fn start_maintenance_task(dal: DAL, config: MaintenanceConfig) {
    info!(
        "Starting machine maintenance task (interval: {}s)",
        config.interval.as_secs()
    );

    tokio::spawn(async move {
        let mut ticker = interval(config.interval);
        loop {
            ticker.tick().await;
            let sweep_dal = dal.clone();
            match tokio::task::spawn_blocking(move || run_maintenance(&sweep_dal)).await {
                Ok(n) if n > 0 => info!("Maintenance marked {} machines offline", n),
                Ok(_) => debug!("Maintenance pass found no stale machines"),
                Err(e) => error!("Maintenance pass panicked: {}", e),
            }
        }
    });
}
