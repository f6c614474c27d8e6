/*
 * Copyright (c) 2025 Dylan Storey
 * Licensed under the Elastic License 2.0.
 * See LICENSE file in the project root for full license text.
 */

//! # Courier Broker
//!
//! Central service of the courier package distribution system. It stores
//! package versions and manifests, plans deployments into per-machine tasks,
//! serves each machine its ordered queue, and folds task outcomes into
//! deployment-level status.
//!
//! The rollout rules live in [`rollout`] as plain functions over model types;
//! [`dal`] applies them inside database transactions and [`api`] exposes them
//! over HTTP.

pub mod api;
pub mod dal;
pub mod db;
pub mod metrics;
pub mod rollout;
pub mod storage;
pub mod utils;
