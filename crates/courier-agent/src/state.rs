/*
 * Copyright (c) 2025 Dylan Storey
 * Licensed under the Elastic License 2.0.
 * See LICENSE file in the project root for full license text.
 */

//! Local record of what this agent has installed, kept in
//! `<work_dir>/state.json` and reported with every registration and heartbeat.

use crate::error::AgentError;
use crate::installer::Snapshot;
use crate::tree;
use chrono::{DateTime, Utc};
use courier_models::wire::{InstalledApplication, TaskStatusReport};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct InstalledRecord {
    pub version: String,
    pub package_version_id: i64,
    pub task_id: i64,
    pub installed_at: DateTime<Utc>,
}

/// A task this agent claimed but whose terminal report the broker has not
/// acknowledged yet. Written before the claim and cleared after delivery, so
/// a restarted agent can finish what its predecessor started.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct InFlightTask {
    pub task_id: i64,
    pub app_code: String,
    /// The live install before the first change; `None` until taken.
    #[serde(default)]
    pub snapshot: Option<Snapshot>,
    /// Terminal report, once decided.
    #[serde(default)]
    pub report: Option<TaskStatusReport>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct LocalState {
    #[serde(default)]
    pub applications: BTreeMap<String, InstalledRecord>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub in_flight: Option<InFlightTask>,
}

impl LocalState {
    pub fn path_in(work_dir: &Path) -> PathBuf {
        work_dir.join("state.json")
    }

    /// Loads the state file; a missing file is an empty state.
    pub fn load(path: &Path) -> Result<Self, AgentError> {
        match std::fs::read(path) {
            Ok(bytes) => serde_json::from_slice(&bytes).map_err(|e| {
                AgentError::fatal(format!("state file '{}' is corrupt: {}", path.display(), e))
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(LocalState::default()),
            Err(e) => Err(e.into()),
        }
    }

    pub fn save(&self, path: &Path) -> Result<(), AgentError> {
        let bytes = serde_json::to_vec_pretty(self)
            .map_err(|e| AgentError::fatal(format!("failed to encode state: {}", e)))?;
        tree::write_atomic(path, &bytes)?;
        Ok(())
    }

    pub fn installed_applications(&self) -> Vec<InstalledApplication> {
        self.applications
            .iter()
            .map(|(code, record)| InstalledApplication {
                code: code.clone(),
                version: record.version.clone(),
            })
            .collect()
    }

    /// Whether `in_flight` reached its commit before the agent stopped.
    pub fn committed(&self, in_flight: &InFlightTask) -> bool {
        self.applications
            .get(&in_flight.app_code)
            .is_some_and(|record| record.task_id == in_flight.task_id)
    }
}
