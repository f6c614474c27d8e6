/*
 * Copyright (c) 2025 Dylan Storey
 * Licensed under the Elastic License 2.0.
 * See LICENSE file in the project root for full license text.
 */

//! Rollout engine: planning, queueing, task transitions and accounting.

pub mod aggregator;
pub mod error;
pub mod planner;
pub mod ports;
pub mod scheduler;
pub mod state;

#[cfg(test)]
pub(crate) mod testing;

pub use error::RolloutError;
pub use planner::{DeploymentPlan, DeploymentRequest, PlanDefaults, TargetSpec};
pub use scheduler::RetryPolicy;
