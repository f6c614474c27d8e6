/*
 * Copyright (c) 2025 Dylan Storey
 * Licensed under the Elastic License 2.0.
 * See LICENSE file in the project root for full license text.
 */

//! Utility functions and structures for the courier broker.

use courier_utils::logging::prelude::*;
use tokio::sync::oneshot;

pub mod background_tasks;
pub mod event_bus;

/// Resolves once ctrl-c is received or `shutdown_rx` fires, whichever is first.
pub async fn shutdown_signal(shutdown_rx: oneshot::Receiver<()>) {
    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            if let Err(e) = result {
                error!("Failed to listen for ctrl-c: {}", e);
            }
        }
        _ = shutdown_rx => {}
    }
    info!("Shutdown signal received");
}
