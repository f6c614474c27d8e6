/*
 * Copyright (c) 2025 Dylan Storey
 * Licensed under the Elastic License 2.0.
 * See LICENSE file in the project root for full license text.
 */

use chrono::{DateTime, Utc};
use diesel::prelude::*;
use serde::{Deserialize, Serialize};

/// One download attempt of a package version by a machine.
#[derive(Queryable, Selectable, Identifiable, Debug, Clone, Serialize, Deserialize)]
#[diesel(table_name = crate::schema::package_downloads)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct PackageDownload {
    pub id: i64,
    pub package_version_id: i64,
    pub machine_id: i64,
    pub bytes: i64,
    pub success: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Insertable, Debug, Clone)]
#[diesel(table_name = crate::schema::package_downloads)]
pub struct NewPackageDownload {
    pub package_version_id: i64,
    pub machine_id: i64,
    pub bytes: i64,
    pub success: bool,
}

impl NewPackageDownload {
    pub fn new(
        package_version_id: i64,
        machine_id: i64,
        bytes: i64,
        success: bool,
    ) -> Result<Self, String> {
        if bytes < 0 {
            return Err("Downloaded byte count must be non-negative".to_string());
        }
        Ok(NewPackageDownload {
            package_version_id,
            machine_id,
            bytes,
            success,
        })
    }
}
