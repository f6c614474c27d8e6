/*
 * Copyright (c) 2025 Dylan Storey
 * Licensed under the Elastic License 2.0.
 * See LICENSE file in the project root for full license text.
 */

//! # CLI Commands Module
//!
//! ## Startup Sequence
//!
//! 1. Load configuration and initialize logging
//! 2. Compute the machine key
//! 3. Wait for the broker's readiness probe
//! 4. Register with the installed-application snapshot
//! 5. Spawn the heartbeat loop, the task loop and the health server
//! 6. Run until ctrl-c, then let both loops finish their current iteration

use crate::broker::{self, BrokerClient};
use crate::bundle::Bundle;
use crate::executor::{Executor, ExecutorConfig};
use crate::health::{self, BrokerStatus, HealthState};
use crate::identity::MachineIdentity;
use crate::installer::Installer;
use crate::loops::{self, HeartbeatContext};
use crate::process::SystemProcessController;
use courier_models::models::package_versions::sha256_hex;
use courier_utils::config::Settings;
use courier_utils::logging::prelude::*;
use std::path::Path;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::Instant;
use tokio::signal::ctrl_c;
use tokio::sync::{broadcast, RwLock};

pub async fn start(config_file: Option<String>) -> Result<(), Box<dyn std::error::Error>> {
    let config = Settings::new(config_file)?;
    courier_utils::logging::init_with_format(&config.log.level, &config.log.format)
        .expect("Failed to initialize logger");
    info!("Starting Courier Agent");

    let identity = MachineIdentity::detect(config.agent.machine_key.as_deref());
    info!(
        "Machine key {} ({}@{})",
        identity.machine_key, identity.user_name, identity.host_name
    );

    info!("Waiting for broker to be ready");
    broker::wait_for_broker_ready(&config).await?;

    let client = BrokerClient::new(&config.agent, identity.machine_key.clone())?;
    info!("HTTP client created");

    let installer = Arc::new(Installer::new(
        &config.agent.install_root,
        &config.agent.work_dir,
    ));
    let installed = installer.load_state()?.installed_applications();
    info!("{} application(s) installed locally", installed.len());
    client
        .register(&identity.register_request(installed))
        .await?;

    let busy = Arc::new(AtomicBool::new(false));
    let broker_status = Arc::new(RwLock::new(BrokerStatus {
        connected: true,
        last_heartbeat: None,
    }));

    if let Some(port) = config.agent.health_port {
        info!("Starting health check server on port {}", port);
        let router = health::configure_health_routes(HealthState {
            machine_key: identity.machine_key.clone(),
            broker_status: broker_status.clone(),
            busy: busy.clone(),
            start_time: Instant::now(),
        });
        let listener = tokio::net::TcpListener::bind(("0.0.0.0", port)).await?;
        tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, router).await {
                error!("Health check server failed: {}", e);
            }
        });
    }

    let executor = Arc::new(Executor::new(
        client.clone(),
        installer.clone(),
        Arc::new(SystemProcessController),
        ExecutorConfig::from(&config.agent),
    ));

    let (shutdown_tx, _) = broadcast::channel(1);
    let heartbeat = tokio::spawn(loops::heartbeat_loop(
        HeartbeatContext {
            client: client.clone(),
            identity: identity.clone(),
            installer,
            busy: busy.clone(),
            broker_status,
        },
        config.agent.heartbeat_period(),
        shutdown_tx.subscribe(),
    ));
    let tasks = tokio::spawn(loops::task_loop(
        client,
        executor,
        busy,
        config.agent.polling_period(),
        shutdown_tx.subscribe(),
    ));

    tokio::spawn(async move {
        if let Ok(()) = ctrl_c().await {
            info!("Received shutdown signal");
            let _ = shutdown_tx.send(());
        }
    });

    let (heartbeat, tasks) = tokio::join!(heartbeat, tasks);
    heartbeat?;
    tasks?;

    info!("Shutdown complete for machine '{}'", identity.machine_key);
    Ok(())
}

/// Prints the key this machine registers under.
pub fn identity(config_file: Option<String>) -> Result<(), Box<dyn std::error::Error>> {
    let config = Settings::new(config_file)?;
    let identity = MachineIdentity::detect(config.agent.machine_key.as_deref());
    println!("{}", identity.machine_key);
    Ok(())
}

/// Packs `source` into a bundle at `output` and prints its content hash.
pub fn bundle(source: &Path, output: &Path) -> Result<(), Box<dyn std::error::Error>> {
    let bytes = Bundle::from_directory(source)?.encode()?;
    crate::tree::write_atomic(output, &bytes)?;
    println!("{}  {} ({} bytes)", sha256_hex(&bytes), output.display(), bytes.len());
    Ok(())
}
