/*
 * Copyright (c) 2025 Dylan Storey
 * Licensed under the Elastic License 2.0.
 * See LICENSE file in the project root for full license text.
 */

//! # Application Manifests Module
//!
//! A manifest declares which binary and config packages make up an
//! application's current release and how an update is merged with what is
//! already installed. At most one manifest per application is active; the
//! broker flips activation in a single transaction and a partial unique index
//! backs that up.

use chrono::{DateTime, Utc};
use diesel::prelude::*;
use diesel_derive_enum::DbEnum;
use serde::{Deserialize, Serialize};

use super::package_versions::is_safe_relative_path;

/// How package content is merged with an existing install.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, Eq, PartialEq, Hash, Default, DbEnum)]
#[ExistingTypePath = "crate::schema::sql_types::UpdatePolicy"]
#[serde(rename_all = "snake_case")]
pub enum UpdatePolicy {
    /// Existing local files are never overwritten; new files are added.
    PreserveLocal,
    /// The package replaces the install wholesale.
    #[default]
    ReplaceAll,
    /// The package wins except for the manifest's preserved paths.
    Selective,
    /// The package wins; local-only files are kept.
    Merge,
}

#[derive(
    Queryable, Selectable, Identifiable, AsChangeset, Debug, Clone, Serialize, Deserialize, PartialEq,
)]
#[diesel(table_name = crate::schema::application_manifests)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct ApplicationManifest {
    pub id: i64,
    pub application_id: i64,
    pub version: String,
    pub binary_package_id: Option<i64>,
    pub config_package_id: Option<i64>,
    pub update_policy: UpdatePolicy,
    pub force_update: bool,
    pub notify_user: bool,
    pub allow_skip: bool,
    /// JSON array of install-relative paths kept under `selective`.
    pub preserved_paths: serde_json::Value,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ApplicationManifest {
    pub fn preserved_paths(&self) -> Vec<String> {
        serde_json::from_value(self.preserved_paths.clone()).unwrap_or_default()
    }
}

#[derive(Insertable, Debug, Clone, Serialize, Deserialize)]
#[diesel(table_name = crate::schema::application_manifests)]
pub struct NewApplicationManifest {
    pub application_id: i64,
    pub version: String,
    pub binary_package_id: Option<i64>,
    pub config_package_id: Option<i64>,
    pub update_policy: UpdatePolicy,
    pub force_update: bool,
    pub notify_user: bool,
    pub allow_skip: bool,
    pub preserved_paths: serde_json::Value,
}

impl NewApplicationManifest {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        application_id: i64,
        version: String,
        binary_package_id: Option<i64>,
        config_package_id: Option<i64>,
        update_policy: UpdatePolicy,
        force_update: bool,
        notify_user: bool,
        allow_skip: bool,
        preserved_paths: Vec<String>,
    ) -> Result<Self, String> {
        if version.trim().is_empty() {
            return Err("Manifest version cannot be empty".to_string());
        }
        if binary_package_id.is_none() && config_package_id.is_none() {
            return Err("A manifest must reference a binary or a config package".to_string());
        }
        if force_update && allow_skip {
            return Err("A forced update cannot be skippable".to_string());
        }
        if let Some(bad) = preserved_paths.iter().find(|p| !is_safe_relative_path(p)) {
            return Err(format!("Preserved path '{}' must be install-relative", bad));
        }
        if update_policy != UpdatePolicy::Selective && !preserved_paths.is_empty() {
            return Err("Preserved paths only apply to the selective policy".to_string());
        }

        Ok(NewApplicationManifest {
            application_id,
            version: version.trim().to_string(),
            binary_package_id,
            config_package_id,
            update_policy,
            force_update,
            notify_user,
            allow_skip,
            preserved_paths: serde_json::json!(preserved_paths),
        })
    }
}
