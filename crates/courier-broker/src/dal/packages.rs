/*
 * Copyright (c) 2025 Dylan Storey
 * Licensed under the Elastic License 2.0.
 * See LICENSE file in the project root for full license text.
 */

//! Data Access Layer for package versions and download records.

use crate::dal::{conflict_on_duplicate, DAL};
use crate::rollout::ports::PackageStore;
use crate::rollout::RolloutError;
use courier_models::models::package_downloads::{NewPackageDownload, PackageDownload};
use courier_models::models::package_versions::{NewPackageVersion, PackageVersion};
use courier_models::schema::{
    application_manifests, deployment_histories, deployment_tasks, package_downloads,
    package_versions,
};
use diesel::dsl::exists;
use diesel::prelude::*;

/// What happened to a version on removal.
#[derive(Debug, Clone, PartialEq)]
pub enum PackageRemoval {
    /// Nothing referenced the version; the row is gone and its content may be removed.
    Deleted(PackageVersion),
    /// Deployments, manifests or downloads still reference it; it is only deactivated.
    Deactivated(PackageVersion),
}

/// Data Access Layer for PackageVersion operations.
pub struct PackagesDAL<'a> {
    pub dal: &'a DAL,
}

impl PackagesDAL<'_> {
    /// Registers a new version.
    ///
    /// When `replaces_version_id` is not given, the application's current
    /// latest active version becomes the predecessor, which is what a later
    /// rollback re-deploys.
    pub fn create(&self, new_version: &NewPackageVersion) -> Result<PackageVersion, RolloutError> {
        let conn = &mut self.dal.conn()?;
        conn.transaction(|conn| {
            let mut row = new_version.clone();
            match row.replaces_version_id {
                Some(predecessor) => {
                    let owner: Option<i64> = package_versions::table
                        .find(predecessor)
                        .select(package_versions::application_id)
                        .first(conn)
                        .optional()?;
                    if owner != Some(row.application_id) {
                        return Err(RolloutError::validation(format!(
                            "replaced version {} does not belong to this application",
                            predecessor
                        )));
                    }
                }
                None => {
                    let siblings: Vec<PackageVersion> = package_versions::table
                        .filter(package_versions::application_id.eq(row.application_id))
                        .filter(package_versions::is_active.eq(true))
                        .load(conn)?;
                    row.replaces_version_id =
                        PackageVersion::latest(siblings.iter(), false).map(|v| v.id);
                }
            }

            diesel::insert_into(package_versions::table)
                .values(&row)
                .get_result(conn)
                .map_err(|e| conflict_on_duplicate(e, &format!("version '{}'", row.version)))
        })
    }

    pub fn get(&self, version_id: i64) -> Result<Option<PackageVersion>, RolloutError> {
        let conn = &mut self.dal.conn()?;
        Ok(package_versions::table
            .find(version_id)
            .first(conn)
            .optional()?)
    }

    pub fn get_by_version(
        &self,
        application_id: i64,
        version: &str,
    ) -> Result<Option<PackageVersion>, RolloutError> {
        let conn = &mut self.dal.conn()?;
        Ok(package_versions::table
            .filter(package_versions::application_id.eq(application_id))
            .filter(package_versions::version.eq(version))
            .first(conn)
            .optional()?)
    }

    /// All versions of an application, newest version first.
    pub fn list_for_application(
        &self,
        application_id: i64,
        include_inactive: bool,
    ) -> Result<Vec<PackageVersion>, RolloutError> {
        let conn = &mut self.dal.conn()?;
        let mut query = package_versions::table
            .filter(package_versions::application_id.eq(application_id))
            .into_boxed();
        if !include_inactive {
            query = query.filter(package_versions::is_active.eq(true));
        }
        let mut versions: Vec<PackageVersion> = query.load(conn)?;
        versions.sort_by(|a, b| {
            courier_models::models::package_versions::compare_versions(&b.version, &a.version)
        });
        Ok(versions)
    }

    /// Highest active version by version ordering.
    pub fn latest(
        &self,
        application_id: i64,
        stable_only: bool,
    ) -> Result<Option<PackageVersion>, RolloutError> {
        let versions = self.list_for_application(application_id, false)?;
        Ok(PackageVersion::latest(versions.iter(), stable_only).cloned())
    }

    /// Deletes a version nothing refers to, otherwise deactivates it.
    pub fn remove(&self, version_id: i64) -> Result<PackageRemoval, RolloutError> {
        let conn = &mut self.dal.conn()?;
        conn.transaction(|conn| {
            let version: PackageVersion = package_versions::table
                .find(version_id)
                .for_update()
                .first(conn)
                .optional()?
                .ok_or_else(|| RolloutError::not_found(format!("package version {}", version_id)))?;

            let referenced = diesel::select(exists(
                deployment_histories::table
                    .filter(deployment_histories::package_version_id.eq(version_id)),
            ))
            .get_result::<bool>(conn)?
                || diesel::select(exists(
                    deployment_tasks::table
                        .filter(deployment_tasks::package_version_id.eq(version_id)),
                ))
                .get_result::<bool>(conn)?
                || diesel::select(exists(
                    application_manifests::table.filter(
                        application_manifests::binary_package_id
                            .eq(version_id)
                            .or(application_manifests::config_package_id.eq(version_id)),
                    ),
                ))
                .get_result::<bool>(conn)?
                || diesel::select(exists(
                    package_downloads::table
                        .filter(package_downloads::package_version_id.eq(version_id)),
                ))
                .get_result::<bool>(conn)?
                || diesel::select(exists(
                    package_versions::table
                        .filter(package_versions::replaces_version_id.eq(version_id)),
                ))
                .get_result::<bool>(conn)?;

            if referenced {
                let deactivated = diesel::update(package_versions::table.find(version_id))
                    .set(package_versions::is_active.eq(false))
                    .get_result(conn)?;
                Ok(PackageRemoval::Deactivated(deactivated))
            } else {
                diesel::delete(package_versions::table.find(version_id)).execute(conn)?;
                Ok(PackageRemoval::Deleted(version))
            }
        })
    }

    pub fn record_download_row(
        &self,
        download: &NewPackageDownload,
    ) -> Result<PackageDownload, RolloutError> {
        let conn = &mut self.dal.conn()?;
        Ok(diesel::insert_into(package_downloads::table)
            .values(download)
            .get_result(conn)?)
    }

    pub fn list_downloads(&self, version_id: i64) -> Result<Vec<PackageDownload>, RolloutError> {
        let conn = &mut self.dal.conn()?;
        Ok(package_downloads::table
            .filter(package_downloads::package_version_id.eq(version_id))
            .order(package_downloads::created_at.asc())
            .load(conn)?)
    }
}

impl PackageStore for PackagesDAL<'_> {
    fn get_version(
        &self,
        application_id: i64,
        version: &str,
    ) -> Result<Option<PackageVersion>, RolloutError> {
        self.get_by_version(application_id, version)
    }

    fn get_version_by_id(&self, version_id: i64) -> Result<Option<PackageVersion>, RolloutError> {
        self.get(version_id)
    }

    fn get_latest(
        &self,
        application_id: i64,
        stable_only: bool,
    ) -> Result<Option<PackageVersion>, RolloutError> {
        self.latest(application_id, stable_only)
    }

    fn record_download(
        &self,
        version_id: i64,
        machine_id: i64,
        bytes: i64,
        success: bool,
    ) -> Result<(), RolloutError> {
        let download = NewPackageDownload::new(version_id, machine_id, bytes, success)
            .map_err(RolloutError::Validation)?;
        self.record_download_row(&download).map(|_| ())
    }
}
