/*
 * Copyright (c) 2025 Dylan Storey
 * Licensed under the Elastic License 2.0.
 * See LICENSE file in the project root for full license text.
 */

//! # Task Executor
//!
//! Runs one claimed task to a terminal report:
//!
//! 1. take the application's install lock
//! 2. snapshot the live install
//! 3. download and verify the bundle (re-downloading on a hash mismatch)
//! 4. unpack it into a staging tree and apply the manifest's merge policy
//! 5. stop running instances of the application
//! 6. swap the staged tree in and record the new version
//!
//! Every step is preceded by a progress report. A report answered with
//! `cancel_requested` aborts the task. Once staging has begun, any failure or
//! cancellation restores the snapshot before the terminal report is sent, so
//! the install is never left half-swapped.
//!
//! The task stays recorded as in flight in `state.json` from before the claim
//! until the broker has its terminal report. [`Executor::recover`] finishes
//! such a task after a restart or a lost report.

use crate::bundle::Bundle;
use crate::error::AgentError;
use crate::installer::{Installer, Snapshot, Swap};
use crate::metrics;
use crate::process::ProcessController;
use crate::state::InstalledRecord;
use chrono::Utc;
use courier_models::models::failure::FailureKind;
use courier_models::wire::{PendingTask, StatusReportResponse, TaskStatusReport};
use courier_utils::config::Agent;
use courier_utils::logging::prelude::*;
use std::collections::HashMap;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::OwnedMutexGuard;

/// Result of streaming a bundle to disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadOutcome {
    pub bytes: u64,
    pub sha256: String,
    /// Hash the broker announced alongside the content, if any.
    pub advertised_hash: Option<String>,
}

impl DownloadOutcome {
    pub fn matches(&self, expected: &str) -> bool {
        self.sha256.eq_ignore_ascii_case(expected)
            && self
                .advertised_hash
                .as_deref()
                .map_or(true, |advertised| advertised.eq_ignore_ascii_case(expected))
    }
}

/// The executor's view of the broker.
pub trait TaskChannel: Send + Sync {
    fn report(
        &self,
        task_id: i64,
        report: &TaskStatusReport,
    ) -> impl Future<Output = Result<StatusReportResponse, AgentError>> + Send;

    fn download(
        &self,
        task: &PendingTask,
        dest: &Path,
    ) -> impl Future<Output = Result<DownloadOutcome, AgentError>> + Send;

    fn record_download(
        &self,
        package_version_id: i64,
        bytes: i64,
        success: bool,
    ) -> impl Future<Output = Result<(), AgentError>> + Send;
}

/// One async lock per application code.
#[derive(Debug, Default)]
pub struct AppLocks {
    locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl AppLocks {
    pub async fn acquire(&self, app_code: &str) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
            locks.entry(app_code.to_string()).or_default().clone()
        };
        lock.lock_owned().await
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskOutcome {
    Completed,
    Failed(FailureKind),
    Cancelled,
}

impl TaskOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            TaskOutcome::Completed => "completed",
            TaskOutcome::Failed(_) => "failed",
            TaskOutcome::Cancelled => "cancelled",
        }
    }
}

#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    pub process_stop_timeout: Duration,
    pub integrity_retries: u32,
}

impl From<&Agent> for ExecutorConfig {
    fn from(agent: &Agent) -> Self {
        ExecutorConfig {
            process_stop_timeout: agent.process_stop_timeout(),
            integrity_retries: agent.integrity_retries,
        }
    }
}

pub struct Executor<C> {
    channel: C,
    installer: Arc<Installer>,
    processes: Arc<dyn ProcessController>,
    locks: AppLocks,
    config: ExecutorConfig,
}

/// Progress of one run; reports never go backwards.
struct Run<'a> {
    task: &'a PendingTask,
    last_progress: i32,
    download_bytes: Option<i64>,
    swap: Option<Swap>,
}

impl<C: TaskChannel> Executor<C> {
    pub fn new(
        channel: C,
        installer: Arc<Installer>,
        processes: Arc<dyn ProcessController>,
        config: ExecutorConfig,
    ) -> Self {
        Executor {
            channel,
            installer,
            processes,
            locks: AppLocks::default(),
            config,
        }
    }

    /// Executes a claimed task and sends its terminal report.
    pub async fn execute(&self, task: &PendingTask) -> TaskOutcome {
        info!(
            "Executing task {}: {} {} ({:?})",
            task.task_id, task.app_code, task.version, task.deployment_type
        );
        let _lock = self.locks.acquire(&task.app_code).await;
        let mut run = Run {
            task,
            last_progress: 0,
            download_bytes: None,
            swap: None,
        };

        let result = match self.prepare(task).await {
            Ok(snapshot) => match self.install(&mut run).await {
                Ok(()) => Ok(()),
                Err(e) => {
                    warn!("Task {} failed: {}; rolling back", task.task_id, e);
                    match self.rollback(&snapshot, run.swap.take()).await {
                        Ok(()) => Err(e),
                        Err(rollback_error) => {
                            error!(
                                "Rollback of '{}' for task {} failed: {}",
                                task.app_code, task.task_id, rollback_error
                            );
                            Err(AgentError::install(format!(
                                "{}; rollback failed: {}",
                                e, rollback_error
                            )))
                        }
                    }
                }
            },
            Err(e) => Err(e),
        };
        self.installer.cleanup(&task.app_code, task.task_id);

        let (outcome, report) = match result {
            Ok(()) => (
                TaskOutcome::Completed,
                TaskStatusReport::completed(run.download_bytes),
            ),
            Err(e) => {
                let kind = e.failure_kind();
                let outcome = if kind == FailureKind::Cancelled {
                    TaskOutcome::Cancelled
                } else {
                    TaskOutcome::Failed(kind)
                };
                let mut report = TaskStatusReport::failed(kind, e.to_string(), run.last_progress);
                report.download_size_bytes = run.download_bytes;
                (outcome, report)
            }
        };

        self.settle(task.task_id, &report).await;
        self.deliver(task.task_id, outcome.label(), &report).await;
        metrics::tasks_executed_total()
            .with_label_values(&[outcome.label()])
            .inc();
        info!("Task {} finished: {}", task.task_id, outcome.label());
        outcome
    }

    /// Records `task` as in flight. Must succeed before the task is claimed.
    pub async fn begin(&self, task: &PendingTask) -> Result<(), AgentError> {
        let installer = self.installer.clone();
        let app_code = task.app_code.clone();
        let task_id = task.task_id;
        blocking(move || installer.begin(task_id, &app_code)).await
    }

    /// Drops the in-flight record of a task that was never claimed.
    pub async fn abandon(&self, task_id: i64) {
        let installer = self.installer.clone();
        if let Err(e) = blocking(move || installer.finish(task_id)).await {
            warn!("Failed to clear in-flight task {}: {}", task_id, e);
        }
    }

    /// Finishes a task left in flight by an earlier run.
    ///
    /// A task interrupted before its outcome was decided is reported completed
    /// if it committed, otherwise its install is restored and it is reported
    /// failed. Returns `false` while the broker still lacks the outcome; no new
    /// task should be claimed until then.
    pub async fn recover(&self) -> bool {
        let installer = self.installer.clone();
        let state = match blocking(move || installer.load_state()).await {
            Ok(state) => state,
            Err(e) => {
                error!("Cannot read local state to recover interrupted tasks: {}", e);
                return true;
            }
        };
        let Some(in_flight) = state.in_flight.clone() else {
            return true;
        };
        let _lock = self.locks.acquire(&in_flight.app_code).await;

        let report = match &in_flight.report {
            Some(report) => {
                info!("Resending the outcome of task {}", in_flight.task_id);
                report.clone()
            }
            None => {
                warn!(
                    "Task {} for '{}' was interrupted; recovering",
                    in_flight.task_id, in_flight.app_code
                );
                let committed = state.committed(&in_flight);
                let installer = self.installer.clone();
                let interrupted = in_flight.clone();
                let restored =
                    blocking(move || installer.restore_interrupted(&interrupted, committed)).await;
                if !committed {
                    metrics::rollbacks_total().inc();
                }
                let report = match (committed, restored) {
                    (true, _) => TaskStatusReport::completed(None),
                    (false, Ok(())) => TaskStatusReport::failed(
                        FailureKind::InstallExecution,
                        "agent stopped during the install; previous install restored".to_string(),
                        0,
                    ),
                    (false, Err(e)) => TaskStatusReport::failed(
                        FailureKind::InstallExecution,
                        format!("agent stopped during the install; restore failed: {}", e),
                        0,
                    ),
                };
                self.settle(in_flight.task_id, &report).await;
                report
            }
        };
        self.deliver(in_flight.task_id, "recovered", &report).await
    }

    async fn settle(&self, task_id: i64, report: &TaskStatusReport) {
        let installer = self.installer.clone();
        let terminal = report.clone();
        if let Err(e) = blocking(move || installer.settle(task_id, &terminal)).await {
            warn!("Failed to record the outcome of task {}: {}", task_id, e);
        }
    }

    /// Sends a terminal report and forgets the task once the broker has it.
    ///
    /// A rejection means the broker already holds a terminal status (or never
    /// saw the claim), so the task is forgotten as well.
    async fn deliver(&self, task_id: i64, label: &str, report: &TaskStatusReport) -> bool {
        let delivered = match self.channel.report(task_id, report).await {
            Ok(response) => {
                if !response.accepted {
                    warn!(
                        "Broker did not accept the {} report for task {}: {}",
                        label,
                        task_id,
                        response.message.unwrap_or_default()
                    );
                }
                true
            }
            Err(AgentError::Rejected { status, message }) => {
                warn!(
                    "Broker rejected the {} report for task {} ({}): {}",
                    label, task_id, status, message
                );
                true
            }
            Err(e) => {
                error!(
                    "Failed to deliver the {} report for task {}: {}; will resend",
                    label, task_id, e
                );
                false
            }
        };
        if delivered {
            let installer = self.installer.clone();
            if let Err(e) = blocking(move || installer.finish(task_id)).await {
                warn!("Failed to clear in-flight task {}: {}", task_id, e);
            }
        }
        delivered
    }

    async fn prepare(&self, task: &PendingTask) -> Result<Snapshot, AgentError> {
        let installer = self.installer.clone();
        let app_code = task.app_code.clone();
        let task_id = task.task_id;
        blocking(move || installer.prepare(task_id, &app_code)).await
    }

    async fn install(&self, run: &mut Run<'_>) -> Result<(), AgentError> {
        let task = run.task;

        self.progress(run, 10, "downloading").await?;
        let download = self.download_verified(run).await?;

        self.progress(run, 40, "staging").await?;
        let staged = {
            let installer = self.installer.clone();
            let app_code = task.app_code.clone();
            let policy = task.update_policy;
            let preserved = task.preserved_paths.clone();
            let task_id = task.task_id;
            blocking(move || {
                let bytes = std::fs::read(&download)?;
                let bundle = Bundle::decode(&bytes)?;
                installer
                    .stage(&app_code, task_id, &bundle, policy, &preserved)
                    .map(|(staged, _)| staged)
            })
            .await?
        };

        self.progress(run, 60, "stopping application").await?;
        {
            let processes = self.processes.clone();
            let live = self.installer.live_path(&task.app_code);
            let timeout = self.config.process_stop_timeout;
            blocking(move || processes.stop_under(&live, timeout)).await?;
        }

        self.progress(run, 75, "swapping").await?;
        let swap = {
            let installer = self.installer.clone();
            let app_code = task.app_code.clone();
            let task_id = task.task_id;
            blocking(move || installer.swap_in(&app_code, task_id, &staged)).await?
        };
        run.swap = Some(swap.clone());

        self.progress(run, 90, "recording version").await?;
        let installer = self.installer.clone();
        let record = InstalledRecord {
            version: task.version.clone(),
            package_version_id: task.package_version_id,
            task_id: task.task_id,
            installed_at: Utc::now(),
        };
        blocking(move || installer.commit(&swap, record)).await?;
        run.swap = None;
        Ok(())
    }

    /// Downloads until the content hash matches, at most `integrity_retries + 1` times.
    async fn download_verified(&self, run: &mut Run<'_>) -> Result<PathBuf, AgentError> {
        let task = run.task;
        let dest = self.installer.download_path(task.task_id);
        let attempts = self.config.integrity_retries + 1;

        for attempt in 1..=attempts {
            let outcome = self.channel.download(task, &dest).await?;
            let bytes = outcome.bytes as i64;
            let verified = outcome.matches(&task.content_hash);
            if let Err(e) = self
                .channel
                .record_download(task.package_version_id, bytes, verified)
                .await
            {
                warn!("Failed to record download of task {}: {}", task.task_id, e);
            }
            if verified {
                debug!(
                    "Downloaded {} bytes for task {} (attempt {}/{})",
                    bytes, task.task_id, attempt, attempts
                );
                run.download_bytes = Some(bytes);
                return Ok(dest);
            }
            warn!(
                "Content hash mismatch for task {} (attempt {}/{}): expected {}, got {}",
                task.task_id, attempt, attempts, task.content_hash, outcome.sha256
            );
        }
        Err(AgentError::Integrity(format!(
            "package version {} did not match hash {} after {} downloads",
            task.package_version_id, task.content_hash, attempts
        )))
    }

    /// Reports progress and surfaces cancellation.
    ///
    /// Transient delivery failures are logged and do not stop the install.
    async fn progress(&self, run: &mut Run<'_>, percentage: i32, step: &str) -> Result<(), AgentError> {
        let percentage = percentage.max(run.last_progress);
        let report = TaskStatusReport::progress(percentage, step);
        match self.channel.report(run.task.task_id, &report).await {
            Ok(response) if response.cancel_requested => Err(AgentError::Cancelled(format!(
                "deployment {} was cancelled",
                run.task.deployment_id
            ))),
            Ok(response) if !response.accepted => Err(AgentError::Rejected {
                status: 409,
                message: response
                    .message
                    .unwrap_or_else(|| "progress report not accepted".to_string()),
            }),
            Ok(_) => {
                run.last_progress = percentage;
                Ok(())
            }
            Err(e) if e.is_transient() => {
                warn!(
                    "Progress report for task {} not delivered: {}",
                    run.task.task_id, e
                );
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    async fn rollback(&self, snapshot: &Snapshot, swap: Option<Swap>) -> Result<(), AgentError> {
        metrics::rollbacks_total().inc();
        let installer = self.installer.clone();
        let snapshot = snapshot.clone();
        blocking(move || installer.rollback(&snapshot, swap.as_ref())).await
    }
}

/// Runs filesystem and process work off the async workers.
async fn blocking<T, F>(f: F) -> Result<T, AgentError>
where
    F: FnOnce() -> Result<T, AgentError> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| AgentError::install(format!("install step aborted: {}", e)))?
}
