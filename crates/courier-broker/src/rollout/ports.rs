/*
 * Copyright (c) 2025 Dylan Storey
 * Licensed under the Elastic License 2.0.
 * See LICENSE file in the project root for full license text.
 */

//! Narrow storage ports the rollout engine consumes.
//!
//! The database-backed implementations live in [`crate::dal`]; the planner and
//! its tests only ever see these traits.

use super::error::RolloutError;
use courier_models::models::manifests::ApplicationManifest;
use courier_models::models::package_versions::PackageVersion;

pub trait PackageStore {
    fn get_version(
        &self,
        application_id: i64,
        version: &str,
    ) -> Result<Option<PackageVersion>, RolloutError>;

    fn get_version_by_id(&self, version_id: i64) -> Result<Option<PackageVersion>, RolloutError>;

    fn get_latest(
        &self,
        application_id: i64,
        stable_only: bool,
    ) -> Result<Option<PackageVersion>, RolloutError>;

    fn record_download(
        &self,
        version_id: i64,
        machine_id: i64,
        bytes: i64,
        success: bool,
    ) -> Result<(), RolloutError>;
}

/// Result of matching operator-supplied identifiers against known machines.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Resolution {
    /// Distinct machine ids, in first-match order.
    pub machine_ids: Vec<i64>,
    /// Identifiers that matched nothing.
    pub unresolved: Vec<String>,
}

pub trait MachineRegistry {
    fn list_known_machines(&self) -> Result<Vec<i64>, RolloutError>;

    fn resolve_machines(&self, identifiers: &[String]) -> Result<Resolution, RolloutError>;

    fn is_online(&self, machine_id: i64) -> Result<bool, RolloutError>;
}

pub trait ManifestResolver {
    fn get_active_manifest(
        &self,
        application_id: i64,
    ) -> Result<Option<ApplicationManifest>, RolloutError>;
}
