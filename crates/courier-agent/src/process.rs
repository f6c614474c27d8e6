/*
 * Copyright (c) 2025 Dylan Storey
 * Licensed under the Elastic License 2.0.
 * See LICENSE file in the project root for full license text.
 */

//! Stopping running instances of an application before its files are swapped.

use crate::error::AgentError;
use courier_utils::logging::prelude::*;
use std::path::Path;
use std::time::{Duration, Instant};
use sysinfo::{Pid, ProcessRefreshKind, ProcessesToUpdate, System, UpdateKind};

const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Stops processes whose executable lives under an install directory.
///
/// Implementations block; callers run them on a blocking thread.
pub trait ProcessController: Send + Sync {
    /// Returns how many processes were stopped. Fails with
    /// [`AgentError::InstallExecution`] if any is still running after `timeout`.
    fn stop_under(&self, install_dir: &Path, timeout: Duration) -> Result<usize, AgentError>;
}

/// [`ProcessController`] backed by the operating system's process table.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemProcessController;

impl SystemProcessController {
    fn running_under(system: &mut System, install_dir: &Path) -> Vec<Pid> {
        system.refresh_processes_specifics(
            ProcessesToUpdate::All,
            true,
            ProcessRefreshKind::nothing().with_exe(UpdateKind::OnlyIfNotSet),
        );
        system
            .processes()
            .iter()
            .filter(|(_, process)| {
                process
                    .exe()
                    .is_some_and(|exe| exe.starts_with(install_dir))
            })
            .map(|(pid, _)| *pid)
            .collect()
    }
}

impl ProcessController for SystemProcessController {
    fn stop_under(&self, install_dir: &Path, timeout: Duration) -> Result<usize, AgentError> {
        let mut system = System::new();
        let targets = Self::running_under(&mut system, install_dir);
        if targets.is_empty() {
            return Ok(0);
        }

        info!(
            "Stopping {} running process(es) under {}",
            targets.len(),
            install_dir.display()
        );
        for pid in &targets {
            if let Some(process) = system.process(*pid) {
                if !process.kill() {
                    warn!("Kill signal to process {} was not delivered", pid);
                }
            }
        }

        let deadline = Instant::now() + timeout;
        loop {
            let remaining = Self::running_under(&mut system, install_dir);
            if remaining.is_empty() {
                return Ok(targets.len());
            }
            if Instant::now() >= deadline {
                return Err(AgentError::install(format!(
                    "{} process(es) under {} did not stop within {:?}",
                    remaining.len(),
                    install_dir.display(),
                    timeout
                )));
            }
            std::thread::sleep(POLL_INTERVAL);
        }
    }
}
