/*
 * Copyright (c) 2025 Dylan Storey
 * Licensed under the Elastic License 2.0.
 * See LICENSE file in the project root for full license text.
 */

//! Courier Broker CLI application
//!
//! `serve` runs migrations and starts the HTTP API together with the machine
//! maintenance sweep; `migrate` only brings the schema up to date.

use courier_broker::api::{self, AppState};
use courier_broker::dal::{RolloutSettings, DAL};
use courier_broker::db::{create_shared_connection_pool, ConnectionPool};
use courier_broker::storage::PackageStorage;
use courier_broker::utils::{self, background_tasks, event_bus};
use courier_utils::config::Settings;
use courier_utils::logging::prelude::*;
use clap::{Parser, Subcommand};
use diesel_migrations::{embed_migrations, EmbeddedMigrations, MigrationHarness};
use std::sync::Arc;

/// Embedded migrations for the database
pub const MIGRATIONS: EmbeddedMigrations = embed_migrations!("../courier-models/migrations");

/// Command-line interface structure
#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Optional configuration file layered over the built-in defaults
    #[arg(long, global = true, env = "COURIER_CONFIG")]
    config: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

/// Subcommands for the CLI
#[derive(Subcommand)]
enum Commands {
    /// Start the Courier Broker server
    Serve,
    /// Apply pending database migrations and exit
    Migrate,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenv::dotenv().ok();
    let cli = Cli::parse();

    let config = Settings::new(cli.config.clone())?;
    courier_utils::logging::init_with_format(&config.log.level, &config.log.format)
        .expect("Failed to initialize logger");

    match cli.command {
        Commands::Serve => serve(&config).await?,
        Commands::Migrate => {
            let pool = create_shared_connection_pool(&config.database.url, 1)?;
            run_migrations(&pool)?;
        }
    }
    Ok(())
}

fn run_migrations(pool: &ConnectionPool) -> Result<(), Box<dyn std::error::Error>> {
    info!("Running pending database migrations");
    let mut conn = pool.get()?;
    let applied = conn
        .run_pending_migrations(MIGRATIONS)
        .map_err(|e| format!("failed to run migrations: {}", e))?;
    info!("Database migrations completed ({} applied)", applied.len());
    Ok(())
}

async fn serve(config: &Settings) -> Result<(), Box<dyn std::error::Error>> {
    info!("Starting Courier Broker application");

    info!("Creating database connection pool");
    let pool = create_shared_connection_pool(&config.database.url, config.database.pool_size)?;
    run_migrations(&pool)?;

    event_bus::init_event_bus(
        Arc::new(event_bus::LogAuditSink),
        config.broker.event_channel_size,
    )?;

    let dal = DAL::new(pool, RolloutSettings::from(config));
    background_tasks::start_maintenance_task(
        dal.clone(),
        background_tasks::MaintenanceConfig {
            interval: config.broker.maintenance_interval(),
        },
    );

    let storage = PackageStorage::new(&config.broker.package_storage_path);
    info!("Package content is stored under {}", storage.root().display());
    let app = api::configure_api_routes(AppState { dal, storage });

    let addr = config.broker.listen_address.as_str();
    info!("Starting server on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;

    let (_shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel::<()>();
    info!("Courier Broker is now running");
    axum::serve(listener, app)
        .with_graceful_shutdown(utils::shutdown_signal(shutdown_rx))
        .await?;

    info!("Courier Broker stopped");
    Ok(())
}
