/*
 * Copyright (c) 2025 Dylan Storey
 * Licensed under the Elastic License 2.0.
 * See LICENSE file in the project root for full license text.
 */

//! # Installer
//!
//! On-disk side of a task: snapshot, stage, swap, commit and rollback.
//!
//! Each application lives in `<install_root>/<code>`. Staged trees and
//! backups are kept in hidden directories under the install root so that
//! every swap is a pair of same-filesystem renames:
//!
//! ```text
//! <install_root>/<code>                      live install
//! <install_root>/.courier-staging/<code>-<task>
//! <install_root>/.courier-backup/<code>-<task>
//! <work_dir>/downloads/task-<task>.bundle
//! <work_dir>/state.json                      installed versions
//! ```
//!
//! Until [`Installer::commit`] returns, [`Installer::rollback`] can put the
//! previous install back exactly as it was.

use crate::bundle::Bundle;
use crate::error::AgentError;
use crate::merge::{self, MergeSummary};
use crate::state::{InFlightTask, InstalledRecord, LocalState};
use crate::tree;
use courier_models::models::manifests::UpdatePolicy;
use courier_models::models::package_versions::is_safe_relative_path;
use courier_models::wire::TaskStatusReport;
use courier_utils::logging::prelude::*;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

const STAGING_DIR: &str = ".courier-staging";
const BACKUP_DIR: &str = ".courier-backup";

/// The live install of one application as it was before a task touched it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snapshot {
    pub app_code: String,
    pub existed: bool,
    pub digest: String,
}

/// A completed swap that can still be undone.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Swap {
    pub app_code: String,
    /// Where the previous install was moved; `None` for a first install.
    pub backup: Option<PathBuf>,
}

#[derive(Debug)]
pub struct Installer {
    install_root: PathBuf,
    work_dir: PathBuf,
    state_lock: Mutex<()>,
}

impl Installer {
    pub fn new(install_root: impl Into<PathBuf>, work_dir: impl Into<PathBuf>) -> Self {
        Installer {
            install_root: install_root.into(),
            work_dir: work_dir.into(),
            state_lock: Mutex::new(()),
        }
    }

    /// Application codes become directory names, so they must be one safe segment.
    pub fn validate_app_code(app_code: &str) -> Result<(), AgentError> {
        if is_safe_relative_path(app_code) && !app_code.contains(['/', '\\']) && !app_code.starts_with('.') {
            Ok(())
        } else {
            Err(AgentError::fatal(format!(
                "application code '{}' cannot be used as a directory name",
                app_code
            )))
        }
    }

    pub fn live_path(&self, app_code: &str) -> PathBuf {
        self.install_root.join(app_code)
    }

    fn staging_path(&self, app_code: &str, task_id: i64) -> PathBuf {
        self.install_root
            .join(STAGING_DIR)
            .join(format!("{}-{}", app_code, task_id))
    }

    fn backup_path(&self, app_code: &str, task_id: i64) -> PathBuf {
        self.install_root
            .join(BACKUP_DIR)
            .join(format!("{}-{}", app_code, task_id))
    }

    pub fn download_path(&self, task_id: i64) -> PathBuf {
        self.work_dir
            .join("downloads")
            .join(format!("task-{}.bundle", task_id))
    }

    pub fn state_path(&self) -> PathBuf {
        LocalState::path_in(&self.work_dir)
    }

    pub fn load_state(&self) -> Result<LocalState, AgentError> {
        let _guard = self.state_lock.lock().unwrap_or_else(PoisonError::into_inner);
        LocalState::load(&self.state_path())
    }

    fn update_state(&self, change: impl FnOnce(&mut LocalState)) -> Result<(), AgentError> {
        let _guard = self.state_lock.lock().unwrap_or_else(PoisonError::into_inner);
        let path = self.state_path();
        let mut state = LocalState::load(&path)?;
        change(&mut state);
        state.save(&path)
    }

    /// Marks `task_id` as in flight. Called before the claim is sent.
    pub fn begin(&self, task_id: i64, app_code: &str) -> Result<(), AgentError> {
        Self::validate_app_code(app_code)?;
        self.update_state(|state| {
            state.in_flight = Some(InFlightTask {
                task_id,
                app_code: app_code.to_string(),
                snapshot: None,
                report: None,
            });
        })
    }

    /// Snapshots the live install and records the snapshot on the in-flight task.
    pub fn prepare(&self, task_id: i64, app_code: &str) -> Result<Snapshot, AgentError> {
        let snapshot = self.snapshot(app_code)?;
        self.update_state(|state| {
            if let Some(in_flight) = state.in_flight.as_mut().filter(|f| f.task_id == task_id) {
                in_flight.snapshot = Some(snapshot.clone());
            }
        })?;
        Ok(snapshot)
    }

    /// Records the terminal report so it can be resent after a restart.
    pub fn settle(&self, task_id: i64, report: &TaskStatusReport) -> Result<(), AgentError> {
        self.update_state(|state| {
            if let Some(in_flight) = state.in_flight.as_mut().filter(|f| f.task_id == task_id) {
                in_flight.report = Some(report.clone());
            }
        })
    }

    /// Forgets `task_id` once the broker has its outcome.
    pub fn finish(&self, task_id: i64) -> Result<(), AgentError> {
        self.update_state(|state| {
            if state.in_flight.as_ref().is_some_and(|f| f.task_id == task_id) {
                state.in_flight = None;
            }
        })
    }

    /// Puts the disk back in order after the agent stopped mid-task.
    ///
    /// A committed install keeps its new tree and only loses the backup. An
    /// uncommitted one gets the backup moved back over whatever is live (or,
    /// for a first install, the live tree removed) and is checked against the
    /// recorded snapshot.
    pub fn restore_interrupted(
        &self,
        in_flight: &InFlightTask,
        committed: bool,
    ) -> Result<(), AgentError> {
        Self::validate_app_code(&in_flight.app_code)?;
        let result = self.restore_tree(in_flight, committed);
        self.cleanup(&in_flight.app_code, in_flight.task_id);
        result
    }

    fn restore_tree(&self, in_flight: &InFlightTask, committed: bool) -> Result<(), AgentError> {
        let live = self.live_path(&in_flight.app_code);
        let backup = self.backup_path(&in_flight.app_code, in_flight.task_id);
        let snapshot = match (&in_flight.snapshot, committed) {
            (_, true) => return Ok(tree::remove_tree(&backup)?),
            (None, false) => return Ok(()),
            (Some(snapshot), false) => snapshot,
        };

        if backup.exists() {
            tree::remove_tree(&live)?;
            fs::rename(&backup, &live).map_err(|e| {
                AgentError::install(format!(
                    "failed to restore {} from {}: {}",
                    live.display(),
                    backup.display(),
                    e
                ))
            })?;
        } else if !snapshot.existed {
            tree::remove_tree(&live)?;
        }

        if self.snapshot(&in_flight.app_code)? != *snapshot {
            return Err(AgentError::install(format!(
                "'{}' does not match its state before task {}",
                in_flight.app_code, in_flight.task_id
            )));
        }
        info!(
            "Restored '{}' after interrupted task {}",
            in_flight.app_code, in_flight.task_id
        );
        Ok(())
    }

    pub fn snapshot(&self, app_code: &str) -> Result<Snapshot, AgentError> {
        Self::validate_app_code(app_code)?;
        let live = self.live_path(app_code);
        Ok(Snapshot {
            app_code: app_code.to_string(),
            existed: live.exists(),
            digest: tree::tree_digest(&live)?,
        })
    }

    /// Unpacks `bundle` into a fresh staging tree and merges the live install
    /// into it according to `policy`.
    pub fn stage(
        &self,
        app_code: &str,
        task_id: i64,
        bundle: &Bundle,
        policy: UpdatePolicy,
        preserved_paths: &[String],
    ) -> Result<(PathBuf, MergeSummary), AgentError> {
        Self::validate_app_code(app_code)?;
        let staged = self.staging_path(app_code, task_id);
        tree::remove_tree(&staged)?;
        bundle.unpack_into(&staged)?;
        let summary =
            merge::apply_policy(policy, preserved_paths, &self.live_path(app_code), &staged)?;
        debug!(
            "Staged {} package files for '{}' under {} ({} local files kept)",
            bundle.len(),
            app_code,
            staged.display(),
            summary.kept_local
        );
        Ok((staged, summary))
    }

    /// Moves the live install aside and the staged tree into its place.
    ///
    /// If the second rename fails the first is undone before returning.
    pub fn swap_in(&self, app_code: &str, task_id: i64, staged: &Path) -> Result<Swap, AgentError> {
        let live = self.live_path(app_code);
        let backup = if live.exists() {
            let backup = self.backup_path(app_code, task_id);
            tree::remove_tree(&backup)?;
            if let Some(parent) = backup.parent() {
                fs::create_dir_all(parent)?;
            }
            fs::rename(&live, &backup).map_err(|e| {
                AgentError::install(format!("failed to move {} aside: {}", live.display(), e))
            })?;
            Some(backup)
        } else {
            fs::create_dir_all(&self.install_root)?;
            None
        };

        if let Err(e) = fs::rename(staged, &live) {
            if let Some(backup) = &backup {
                if let Err(restore) = fs::rename(backup, &live) {
                    error!(
                        "Failed to restore {} after an aborted swap: {}",
                        live.display(),
                        restore
                    );
                }
            }
            return Err(AgentError::install(format!(
                "failed to move staged files into {}: {}",
                live.display(),
                e
            )));
        }

        Ok(Swap {
            app_code: app_code.to_string(),
            backup,
        })
    }

    /// Records the new version and drops the backup. After this the swap is final.
    pub fn commit(&self, swap: &Swap, record: InstalledRecord) -> Result<(), AgentError> {
        self.update_state(|state| {
            state.applications.insert(swap.app_code.clone(), record);
        })?;
        if let Some(backup) = &swap.backup {
            if let Err(e) = tree::remove_tree(backup) {
                warn!("Failed to remove backup {}: {}", backup.display(), e);
            }
        }
        Ok(())
    }

    /// Restores the install captured by `snapshot` and checks that it matches.
    pub fn rollback(&self, snapshot: &Snapshot, swap: Option<&Swap>) -> Result<(), AgentError> {
        let live = self.live_path(&snapshot.app_code);
        if let Some(swap) = swap {
            tree::remove_tree(&live)?;
            if let Some(backup) = &swap.backup {
                fs::rename(backup, &live).map_err(|e| {
                    AgentError::install(format!(
                        "failed to restore {} from {}: {}",
                        live.display(),
                        backup.display(),
                        e
                    ))
                })?;
            }
        }

        let restored = self.snapshot(&snapshot.app_code)?;
        if restored != *snapshot {
            return Err(AgentError::install(format!(
                "rollback of '{}' did not restore the previous install",
                snapshot.app_code
            )));
        }
        info!("Rolled back '{}' to its previous state", snapshot.app_code);
        Ok(())
    }

    /// Removes the task's staging tree and downloaded bundle.
    pub fn cleanup(&self, app_code: &str, task_id: i64) {
        if let Err(e) = tree::remove_tree(&self.staging_path(app_code, task_id)) {
            warn!("Failed to remove staging for task {}: {}", task_id, e);
        }
        match fs::remove_file(self.download_path(task_id)) {
            Err(e) if e.kind() != std::io::ErrorKind::NotFound => {
                warn!("Failed to remove download for task {}: {}", task_id, e);
            }
            _ => {}
        }
    }
}
