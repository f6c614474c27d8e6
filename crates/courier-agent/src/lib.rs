/*
 * Copyright (c) 2025 Dylan Storey
 * Licensed under the Elastic License 2.0.
 * See LICENSE file in the project root for full license text.
 */

//! # Courier Agent
//!
//! Runs on each client machine. It registers the machine with the broker,
//! sends heartbeats, polls for pending deployment tasks and installs them,
//! restoring the previous install whenever an update fails or is cancelled.
//!
//! ## Configuration
//!
//! ```toml
//! [agent]
//! broker_url = "http://broker:3000"
//! heartbeat_interval = 30
//! polling_interval = 30
//! install_root = "/opt/courier/apps"
//! work_dir = "/var/lib/courier/agent"
//! process_stop_timeout_seconds = 5
//! ```
//!
//! Every key can be overridden with `COURIER__AGENT__<KEY>`.

pub mod broker;
pub mod bundle;
pub mod cli;
pub mod error;
pub mod executor;
pub mod health;
pub mod identity;
pub mod installer;
pub mod loops;
pub mod merge;
pub mod metrics;
pub mod process;
pub mod state;
pub mod tree;
