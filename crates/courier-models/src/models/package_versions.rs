/*
 * Copyright (c) 2025 Dylan Storey
 * Licensed under the Elastic License 2.0.
 * See LICENSE file in the project root for full license text.
 */

//! # Package Versions Module
//!
//! A package version is one uploaded artifact of an application. Versions are
//! immutable once a deployment references them; deleting such a version only
//! deactivates it so history stays attributable.
//!
//! Version strings compare per dot-separated segment: numeric segments
//! numerically, missing segments as zero, and non-numeric segments lexically,
//! after any numeric segment. `1.10.0 > 1.9.3` and `2.0 == 2.0.0`.

use chrono::{DateTime, Utc};
use diesel::prelude::*;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::cmp::Ordering;

#[derive(
    Queryable, Selectable, Identifiable, AsChangeset, Debug, Clone, Serialize, Deserialize, PartialEq,
)]
#[diesel(table_name = crate::schema::package_versions)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct PackageVersion {
    pub id: i64,
    pub application_id: i64,
    pub version: String,
    /// Lower-case hex SHA-256 of the artifact bytes.
    pub content_hash: String,
    pub size_bytes: i64,
    /// Artifact location relative to the broker's package storage root.
    pub storage_path: String,
    pub is_stable: bool,
    /// Predecessor in the rollback chain.
    pub replaces_version_id: Option<i64>,
    pub release_notes: Option<String>,
    /// False once soft-deactivated; inactive versions are never planned.
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Insertable, Debug, Clone, Serialize, Deserialize)]
#[diesel(table_name = crate::schema::package_versions)]
pub struct NewPackageVersion {
    pub application_id: i64,
    pub version: String,
    pub content_hash: String,
    pub size_bytes: i64,
    pub storage_path: String,
    pub is_stable: bool,
    pub replaces_version_id: Option<i64>,
    pub release_notes: Option<String>,
}

impl NewPackageVersion {
    /// Creates a new `NewPackageVersion` with validation.
    ///
    /// The storage path must be relative and must not climb out of the storage root.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        application_id: i64,
        version: String,
        content_hash: String,
        size_bytes: i64,
        storage_path: String,
        is_stable: bool,
        replaces_version_id: Option<i64>,
        release_notes: Option<String>,
    ) -> Result<Self, String> {
        let version = version.trim().to_string();
        if version.is_empty() {
            return Err("Version cannot be empty".to_string());
        }
        if version.contains('/') || version.contains('\\') || version.contains("..") {
            return Err(format!("Version '{}' contains path characters", version));
        }
        if content_hash.trim().is_empty() {
            return Err("Content hash cannot be empty".to_string());
        }
        if size_bytes < 0 {
            return Err("Package size must be non-negative".to_string());
        }
        if !is_safe_relative_path(&storage_path) {
            return Err(format!(
                "Storage path '{}' must be relative to the storage root",
                storage_path
            ));
        }

        Ok(NewPackageVersion {
            application_id,
            version,
            content_hash: content_hash.to_lowercase(),
            size_bytes,
            storage_path,
            is_stable,
            replaces_version_id,
            release_notes,
        })
    }
}

/// True for non-empty relative paths whose components never leave their root.
pub fn is_safe_relative_path(path: &str) -> bool {
    if path.is_empty() || path.starts_with('/') || path.starts_with('\\') || path.contains(':') {
        return false;
    }
    path.split(['/', '\\'])
        .all(|segment| !segment.is_empty() && segment != ".." && segment != ".")
}

/// Lower-case hex SHA-256 digest, the content hash format used throughout.
pub fn sha256_hex(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

/// Orders two version strings as described in the module docs.
pub fn compare_versions(a: &str, b: &str) -> Ordering {
    let a: Vec<&str> = strip_prefix(a).split('.').collect();
    let b: Vec<&str> = strip_prefix(b).split('.').collect();

    for i in 0..a.len().max(b.len()) {
        let left = a.get(i).copied().unwrap_or("0");
        let right = b.get(i).copied().unwrap_or("0");
        let ord = match (left.parse::<u64>(), right.parse::<u64>()) {
            (Ok(l), Ok(r)) => l.cmp(&r),
            (Ok(_), Err(_)) => Ordering::Less,
            (Err(_), Ok(_)) => Ordering::Greater,
            (Err(_), Err(_)) => left.cmp(right),
        };
        if ord != Ordering::Equal {
            return ord;
        }
    }
    Ordering::Equal
}

fn strip_prefix(version: &str) -> &str {
    let version = version.trim();
    version
        .strip_prefix('v')
        .or_else(|| version.strip_prefix('V'))
        .unwrap_or(version)
}

impl PackageVersion {
    /// Picks the highest active version, optionally restricted to stable ones.
    pub fn latest<'a, I>(versions: I, stable_only: bool) -> Option<&'a PackageVersion>
    where
        I: IntoIterator<Item = &'a PackageVersion>,
    {
        versions
            .into_iter()
            .filter(|v| v.is_active && (!stable_only || v.is_stable))
            .max_by(|a, b| compare_versions(&a.version, &b.version).then(a.id.cmp(&b.id)))
    }
}
