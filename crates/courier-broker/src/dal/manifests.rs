/*
 * Copyright (c) 2025 Dylan Storey
 * Licensed under the Elastic License 2.0.
 * See LICENSE file in the project root for full license text.
 */

use crate::dal::{conflict_on_duplicate, DAL};
use crate::rollout::ports::ManifestResolver;
use crate::rollout::RolloutError;
use crate::utils::event_bus::{self, RolloutEvent};
use courier_models::models::applications::Application;
use courier_models::models::manifests::{ApplicationManifest, NewApplicationManifest};
use courier_models::schema::{application_manifests, applications, package_versions};
use courier_utils::logging::prelude::*;
use diesel::prelude::*;

/// Data Access Layer for ApplicationManifest operations.
///
/// At most one manifest per application is active. Activation locks the
/// owning application row so concurrent activations serialize, and a partial
/// unique index backs the rule in the database.
pub struct ManifestsDAL<'a> {
    pub dal: &'a DAL,
}

impl ManifestsDAL<'_> {
    /// Creates an inactive manifest after checking that every referenced
    /// package belongs to the manifest's application.
    pub fn create(
        &self,
        new_manifest: &NewApplicationManifest,
    ) -> Result<ApplicationManifest, RolloutError> {
        let conn = &mut self.dal.conn()?;
        for package_id in [new_manifest.binary_package_id, new_manifest.config_package_id]
            .into_iter()
            .flatten()
        {
            let owner: Option<i64> = package_versions::table
                .find(package_id)
                .select(package_versions::application_id)
                .first(conn)
                .optional()?;
            match owner {
                None => return Err(RolloutError::InvalidPackageVersion(package_id)),
                Some(app) if app != new_manifest.application_id => {
                    return Err(RolloutError::validation(format!(
                        "package version {} belongs to another application",
                        package_id
                    )))
                }
                Some(_) => {}
            }
        }

        diesel::insert_into(application_manifests::table)
            .values(new_manifest)
            .get_result(conn)
            .map_err(|e| conflict_on_duplicate(e, &format!("manifest '{}'", new_manifest.version)))
    }

    pub fn get(&self, manifest_id: i64) -> Result<Option<ApplicationManifest>, RolloutError> {
        let conn = &mut self.dal.conn()?;
        Ok(application_manifests::table
            .find(manifest_id)
            .first(conn)
            .optional()?)
    }

    pub fn list_for_application(
        &self,
        application_id: i64,
    ) -> Result<Vec<ApplicationManifest>, RolloutError> {
        let conn = &mut self.dal.conn()?;
        Ok(application_manifests::table
            .filter(application_manifests::application_id.eq(application_id))
            .order(application_manifests::created_at.desc())
            .load(conn)?)
    }

    /// Makes `manifest_id` the active manifest of its application and
    /// deactivates the previous one in the same transaction.
    pub fn activate(&self, manifest_id: i64) -> Result<ApplicationManifest, RolloutError> {
        let conn = &mut self.dal.conn()?;
        let activated = conn.transaction::<_, RolloutError, _>(|conn| {
            let manifest: ApplicationManifest = application_manifests::table
                .find(manifest_id)
                .first(conn)
                .optional()?
                .ok_or_else(|| RolloutError::not_found(format!("manifest {}", manifest_id)))?;

            applications::table
                .find(manifest.application_id)
                .for_update()
                .first::<Application>(conn)?;

            diesel::update(
                application_manifests::table
                    .filter(application_manifests::application_id.eq(manifest.application_id))
                    .filter(application_manifests::id.ne(manifest.id))
                    .filter(application_manifests::is_active.eq(true)),
            )
            .set(application_manifests::is_active.eq(false))
            .execute(conn)?;

            Ok(diesel::update(application_manifests::table.find(manifest.id))
                .set(application_manifests::is_active.eq(true))
                .get_result::<ApplicationManifest>(conn)?)
        })?;

        info!(
            "Manifest {} ('{}') is now active for application {}",
            activated.id, activated.version, activated.application_id
        );
        event_bus::emit(RolloutEvent::new(event_bus::MANIFEST_ACTIVATED).data(serde_json::json!({
            "manifest_id": activated.id,
            "application_id": activated.application_id,
            "version": activated.version,
            "update_policy": activated.update_policy,
        })));
        Ok(activated)
    }
}

impl ManifestResolver for ManifestsDAL<'_> {
    fn get_active_manifest(
        &self,
        application_id: i64,
    ) -> Result<Option<ApplicationManifest>, RolloutError> {
        let conn = &mut self.dal.conn()?;
        Ok(application_manifests::table
            .filter(application_manifests::application_id.eq(application_id))
            .filter(application_manifests::is_active.eq(true))
            .first(conn)
            .optional()?)
    }
}
