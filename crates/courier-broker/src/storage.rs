/*
 * Copyright (c) 2025 Dylan Storey
 * Licensed under the Elastic License 2.0.
 * See LICENSE file in the project root for full license text.
 */

//! On-disk store for package bundle bytes.
//!
//! Bundles live at `<root>/<application code>/<version>-<upload id>.bundle`.
//! Every upload gets its own path, so two uploads racing for the same version
//! never share a file and the loser can remove its copy without touching the
//! winner's. Writes go to a temporary sibling first and are renamed into
//! place, so a reader never observes a partially written bundle.

use courier_models::models::package_versions::is_safe_relative_path;
use std::io;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;

#[derive(Debug, Clone)]
pub struct PackageStorage {
    root: PathBuf,
}

impl PackageStorage {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        PackageStorage { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// A fresh storage-relative location for one upload of a version.
    pub fn new_path(app_code: &str, version: &str) -> String {
        format!(
            "{}/{}-{}.bundle",
            app_code,
            version,
            uuid::Uuid::new_v4().simple()
        )
    }

    fn resolve(&self, relative: &str) -> io::Result<PathBuf> {
        if !is_safe_relative_path(relative) {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("refusing storage path '{}'", relative),
            ));
        }
        Ok(self.root.join(relative))
    }

    /// Writes `bytes` to `relative`, replacing any existing file atomically.
    pub async fn write(&self, relative: &str, bytes: &[u8]) -> io::Result<()> {
        let target = self.resolve(relative)?;
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent).await?;
        }
        let temp = target.with_extension(format!("partial-{}", uuid::Uuid::new_v4().simple()));
        let mut file = fs::File::create(&temp).await?;
        let written = async {
            file.write_all(bytes).await?;
            file.sync_all().await
        }
        .await;
        drop(file);
        if let Err(e) = written {
            let _ = fs::remove_file(&temp).await;
            return Err(e);
        }
        fs::rename(&temp, &target).await
    }

    /// Opens a bundle for streaming, returning it with its length in bytes.
    pub async fn open(&self, relative: &str) -> io::Result<(fs::File, u64)> {
        let file = fs::File::open(self.resolve(relative)?).await?;
        let len = file.metadata().await?.len();
        Ok((file, len))
    }

    /// Removes a bundle; a missing file is not an error.
    pub async fn remove(&self, relative: &str) -> io::Result<()> {
        match fs::remove_file(self.resolve(relative)?).await {
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            other => other,
        }
    }
}
