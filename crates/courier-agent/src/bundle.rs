/*
 * Copyright (c) 2025 Dylan Storey
 * Licensed under the Elastic License 2.0.
 * See LICENSE file in the project root for full license text.
 */

//! # Package Bundles
//!
//! A bundle is the artifact uploaded to and downloaded from the broker:
//!
//! ```json
//! { "format": 1, "files": [ { "path": "bin/app.exe", "content": "<base64>" } ] }
//! ```
//!
//! Paths are relative and normalized; anything that could escape the install
//! directory makes the whole bundle corrupt, which is a fatal configuration
//! failure rather than a retryable one.

use crate::error::AgentError;
use crate::tree;
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use courier_models::models::package_versions::is_safe_relative_path;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

pub const BUNDLE_FORMAT: u32 = 1;

#[derive(Debug, Serialize, Deserialize)]
struct BundleDocument {
    format: u32,
    files: Vec<BundleEntry>,
}

#[derive(Debug, Serialize, Deserialize)]
struct BundleEntry {
    path: String,
    content: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Bundle {
    files: BTreeMap<String, Vec<u8>>,
}

impl Bundle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a file, rejecting unsafe or duplicate paths.
    pub fn insert(&mut self, path: &str, content: Vec<u8>) -> Result<(), AgentError> {
        let path = path.replace('\\', "/");
        if !is_safe_relative_path(&path) {
            return Err(AgentError::fatal(format!(
                "bundle path '{}' is not a safe relative path",
                path
            )));
        }
        if self.files.insert(path.clone(), content).is_some() {
            return Err(AgentError::fatal(format!(
                "bundle lists '{}' more than once",
                path
            )));
        }
        Ok(())
    }

    pub fn files(&self) -> impl Iterator<Item = (&str, &[u8])> {
        self.files.iter().map(|(p, c)| (p.as_str(), c.as_slice()))
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, AgentError> {
        let document: BundleDocument = serde_json::from_slice(bytes)
            .map_err(|e| AgentError::fatal(format!("package is not a valid bundle: {}", e)))?;
        if document.format != BUNDLE_FORMAT {
            return Err(AgentError::fatal(format!(
                "unsupported bundle format {}",
                document.format
            )));
        }
        let mut bundle = Bundle::new();
        for entry in document.files {
            let content = STANDARD.decode(entry.content.as_bytes()).map_err(|e| {
                AgentError::fatal(format!("content of '{}' is not base64: {}", entry.path, e))
            })?;
            bundle.insert(&entry.path, content)?;
        }
        Ok(bundle)
    }

    pub fn encode(&self) -> Result<Vec<u8>, AgentError> {
        let document = BundleDocument {
            format: BUNDLE_FORMAT,
            files: self
                .files
                .iter()
                .map(|(path, content)| BundleEntry {
                    path: path.clone(),
                    content: STANDARD.encode(content),
                })
                .collect(),
        };
        serde_json::to_vec(&document)
            .map_err(|e| AgentError::fatal(format!("failed to encode bundle: {}", e)))
    }

    /// Packs every regular file below `dir`.
    pub fn from_directory(dir: &Path) -> Result<Self, AgentError> {
        if !dir.is_dir() {
            return Err(AgentError::fatal(format!(
                "'{}' is not a directory",
                dir.display()
            )));
        }
        let mut bundle = Bundle::new();
        for (relative, path) in tree::list_files(dir)? {
            bundle.insert(&relative, fs::read(&path)?)?;
        }
        Ok(bundle)
    }

    /// Writes the bundle's files below `dir`, creating directories as needed.
    pub fn unpack_into(&self, dir: &Path) -> Result<(), AgentError> {
        fs::create_dir_all(dir)?;
        for (relative, content) in &self.files {
            let target = tree::join_relative(dir, relative);
            if let Some(parent) = target.parent() {
                fs::create_dir_all(parent)?;
            }
            fs::write(&target, content)?;
        }
        Ok(())
    }
}
