/*
 * Copyright (c) 2025 Dylan Storey
 * Licensed under the Elastic License 2.0.
 * See LICENSE file in the project root for full license text.
 */

//! Data Access Layer.
//!
//! Each aggregate gets a small accessor borrowing the shared [`DAL`]. Every
//! state change that must be serialized (task claims, status reports,
//! deployment counters, manifest activation) runs in one transaction guarded
//! by row locks, never by a process-wide lock, so several broker instances can
//! share one database.

use chrono::Duration;
use courier_utils::Settings;
use diesel::result::{DatabaseErrorKind, Error as DieselError};

use crate::db::{ConnectionPool, PgPooledConnection};
use crate::rollout::{PlanDefaults, RetryPolicy, RolloutError};

mod applications;
mod deployments;
mod machines;
mod manifests;
mod packages;
mod tasks;

pub use applications::ApplicationsDAL;
pub use deployments::DeploymentsDAL;
pub use machines::MachinesDAL;
pub use manifests::ManifestsDAL;
pub use packages::{PackageRemoval, PackagesDAL};
pub use tasks::{ReportResult, TasksDAL};

/// Tunables the DAL applies when it plans, retries or ages out work.
#[derive(Debug, Clone, Copy)]
pub struct RolloutSettings {
    pub retry: RetryPolicy,
    pub plan_defaults: PlanDefaults,
    pub offline_threshold: Duration,
}

impl Default for RolloutSettings {
    fn default() -> Self {
        RolloutSettings {
            retry: RetryPolicy::default(),
            plan_defaults: PlanDefaults::default(),
            offline_threshold: Duration::seconds(120),
        }
    }
}

impl From<&Settings> for RolloutSettings {
    fn from(settings: &Settings) -> Self {
        RolloutSettings {
            retry: RetryPolicy::from(&settings.scheduler),
            plan_defaults: PlanDefaults::from(&settings.scheduler),
            offline_threshold: Duration::seconds(settings.broker.offline_threshold_seconds as i64),
        }
    }
}

#[derive(Clone)]
pub struct DAL {
    pub pool: ConnectionPool,
    pub settings: RolloutSettings,
}

impl DAL {
    pub fn new(pool: ConnectionPool, settings: RolloutSettings) -> Self {
        DAL { pool, settings }
    }

    pub(crate) fn conn(&self) -> Result<PgPooledConnection, RolloutError> {
        Ok(self.pool.get()?)
    }

    pub fn applications(&self) -> ApplicationsDAL {
        ApplicationsDAL { dal: self }
    }

    pub fn packages(&self) -> PackagesDAL {
        PackagesDAL { dal: self }
    }

    pub fn manifests(&self) -> ManifestsDAL {
        ManifestsDAL { dal: self }
    }

    pub fn machines(&self) -> MachinesDAL {
        MachinesDAL { dal: self }
    }

    pub fn deployments(&self) -> DeploymentsDAL {
        DeploymentsDAL { dal: self }
    }

    pub fn tasks(&self) -> TasksDAL {
        TasksDAL { dal: self }
    }
}

/// Turns unique-constraint violations into conflicts; other errors pass through.
pub(crate) fn conflict_on_duplicate(e: DieselError, what: &str) -> RolloutError {
    match e {
        DieselError::DatabaseError(DatabaseErrorKind::UniqueViolation, _) => {
            RolloutError::conflict(format!("{} already exists", what))
        }
        other => RolloutError::Database(other),
    }
}
