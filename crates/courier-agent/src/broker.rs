/*
 * Copyright (c) 2025 Dylan Storey
 * Licensed under the Elastic License 2.0.
 * See LICENSE file in the project root for full license text.
 */

//! # Broker Communication Module
//!
//! Handles all communication between the agent and the Courier broker.
//!
//! ## Communication Flow
//!
//! ```text
//! Agent                                   Broker
//!   | GET  /readyz                          |
//!   | POST /api/v1/machines/register        |
//!   | POST /api/v1/machines/:key/heartbeat  |   every heartbeat interval
//!   | GET  /api/v1/machines/:key/tasks/pending   every polling interval
//!   | POST /api/v1/tasks/:id/claim          |
//!   | GET  /api/v1/packages/:id/content     |
//!   | POST /api/v1/packages/:id/downloads   |
//!   | POST /api/v1/tasks/:id/status         |   progress, then the outcome
//! ```
//!
//! ## Error Handling
//!
//! Connection failures, timeouts and 5xx answers are
//! [`AgentError::TransientNetwork`]-like and absorbed by the loops. Any other
//! refusal is [`AgentError::Rejected`] carrying the broker's `error` message.
//! Status reports are retried with exponential back-off for a bounded time
//! because losing one would leave the task in flight on the broker.

use crate::error::AgentError;
use crate::executor::{DownloadOutcome, TaskChannel};
use backoff::ExponentialBackoffBuilder;
use courier_models::models::client_machines::ClientMachine;
use courier_models::models::deployment_tasks::DeploymentTask;
use courier_models::wire::{
    ClaimTaskRequest, HeartbeatRequest, InstalledApplication, PendingTask, RecordDownloadRequest,
    RegisterMachineRequest, StatusReportResponse, TaskStatusReport, CONTENT_HASH_HEADER,
};
use courier_utils::config::{Agent, Settings};
use courier_utils::logging::prelude::*;
use reqwest::{Client, Response, StatusCode, Url};
use serde::de::DeserializeOwned;
use sha2::{Digest, Sha256};
use std::path::Path;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::time::sleep;

/// Waits for the broker service to become ready.
///
/// Gives up with a fatal error after `agent.broker_ready_retries` attempts.
pub async fn wait_for_broker_ready(config: &Settings) -> Result<(), AgentError> {
    let client = Client::builder()
        .timeout(config.agent.request_timeout())
        .build()
        .map_err(|e| AgentError::fatal(format!("failed to build HTTP client: {}", e)))?;
    let readyz_url = format!("{}/readyz", config.agent.broker_url.trim_end_matches('/'));
    let attempts = config.agent.broker_ready_retries.max(1);

    for attempt in 1..=attempts {
        match client.get(&readyz_url).send().await {
            Ok(response) => {
                if response.status().is_success() {
                    info!("Successfully connected to broker at {}", readyz_url);
                    return Ok(());
                }
                warn!(
                    "Broker at {} returned non-success status: {}",
                    readyz_url,
                    response.status()
                );
            }
            Err(e) => {
                warn!(
                    "Failed to connect to broker at {} (attempt {}/{}): {:?}",
                    readyz_url, attempt, attempts, e
                );
            }
        }
        if attempt < attempts {
            info!(
                "Waiting for broker to be ready at {} (attempt {}/{})",
                readyz_url, attempt, attempts
            );
            sleep(Duration::from_secs(1)).await;
        }
    }
    error!(
        "Failed to connect to broker at {} after {} attempts",
        readyz_url, attempts
    );
    Err(AgentError::fatal(format!(
        "broker at {} is not ready after {} attempts",
        readyz_url, attempts
    )))
}

/// HTTP client for one machine's conversation with the broker.
///
/// Cheap to clone; clones share the connection pool.
#[derive(Clone, Debug)]
pub struct BrokerClient {
    client: Client,
    base_url: Url,
    machine_key: String,
    download_timeout: Duration,
    report_retry_max_elapsed: Duration,
}

impl BrokerClient {
    pub fn new(config: &Agent, machine_key: String) -> Result<Self, AgentError> {
        let base_url = Url::parse(&config.broker_url).map_err(|e| {
            AgentError::fatal(format!("invalid broker url '{}': {}", config.broker_url, e))
        })?;
        if base_url.cannot_be_a_base() {
            return Err(AgentError::fatal(format!(
                "broker url '{}' cannot carry a path",
                config.broker_url
            )));
        }
        let client = Client::builder()
            .timeout(config.request_timeout())
            .build()
            .map_err(|e| AgentError::fatal(format!("failed to build HTTP client: {}", e)))?;
        Ok(BrokerClient {
            client,
            base_url,
            machine_key,
            download_timeout: config.download_timeout(),
            report_retry_max_elapsed: Duration::from_secs(config.report_retry_max_elapsed_seconds),
        })
    }

    pub fn machine_key(&self) -> &str {
        &self.machine_key
    }

    /// `<broker>/api/v1/<segments..>` with each segment percent-encoded.
    fn endpoint(&self, segments: &[&str]) -> Result<Url, AgentError> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| AgentError::fatal("broker url cannot carry a path"))?
            .pop_if_empty()
            .extend(["api", "v1"])
            .extend(segments);
        Ok(url)
    }

    pub async fn register(
        &self,
        request: &RegisterMachineRequest,
    ) -> Result<ClientMachine, AgentError> {
        let url = self.endpoint(&["machines", "register"])?;
        debug!("Registering machine '{}' at {}", request.machine_key, url);
        let response = self.client.post(url).json(request).send().await?;
        let machine: ClientMachine = parse(response).await?;
        info!(
            "Registered machine '{}' as {}@{}",
            machine.machine_key, machine.user_name, machine.host_name
        );
        Ok(machine)
    }

    pub async fn heartbeat(
        &self,
        busy: bool,
        installed_applications: Option<Vec<InstalledApplication>>,
    ) -> Result<(), AgentError> {
        let url = self.endpoint(&["machines", &self.machine_key, "heartbeat"])?;
        let response = self
            .client
            .post(url)
            .json(&HeartbeatRequest {
                busy,
                installed_applications,
            })
            .send()
            .await?;
        let _: ClientMachine = parse(response).await?;
        Ok(())
    }

    pub async fn pending_tasks(&self) -> Result<Vec<PendingTask>, AgentError> {
        let url = self.endpoint(&["machines", &self.machine_key, "tasks", "pending"])?;
        let response = self.client.get(url).send().await?;
        parse(response).await
    }

    pub async fn claim(&self, task_id: i64) -> Result<DeploymentTask, AgentError> {
        let url = self.endpoint(&["tasks", &task_id.to_string(), "claim"])?;
        let response = self
            .client
            .post(url)
            .json(&ClaimTaskRequest {
                machine_key: self.machine_key.clone(),
            })
            .send()
            .await?;
        parse(response).await
    }

    async fn send_report(
        &self,
        task_id: i64,
        report: &TaskStatusReport,
    ) -> Result<StatusReportResponse, AgentError> {
        let url = self.endpoint(&["tasks", &task_id.to_string(), "status"])?;
        let response = self.client.post(url).json(report).send().await?;
        parse(response).await
    }

    /// Sends a status report, retrying transient failures with back-off.
    pub async fn report(
        &self,
        task_id: i64,
        report: &TaskStatusReport,
    ) -> Result<StatusReportResponse, AgentError> {
        let backoff = ExponentialBackoffBuilder::new()
            .with_initial_interval(Duration::from_millis(500))
            .with_max_interval(Duration::from_secs(10))
            .with_max_elapsed_time(Some(self.report_retry_max_elapsed))
            .build();

        let operation_with_backoff = || async {
            match self.send_report(task_id, report).await {
                Ok(response) => Ok(response),
                Err(error) => {
                    if error.is_transient() {
                        warn!("Status report for task {} failed, retrying: {}", task_id, error);
                        Err(backoff::Error::Transient {
                            err: error,
                            retry_after: None,
                        })
                    } else {
                        Err(backoff::Error::Permanent(error))
                    }
                }
            }
        };

        backoff::future::retry(backoff, operation_with_backoff).await
    }

    /// Streams a package's content to `dest`, hashing it on the way.
    pub async fn download_content(
        &self,
        package_version_id: i64,
        dest: &Path,
    ) -> Result<DownloadOutcome, AgentError> {
        let url = self.endpoint(&["packages", &package_version_id.to_string(), "content"])?;
        debug!("Downloading package version {} from {}", package_version_id, url);
        let mut response = self
            .client
            .get(url)
            .timeout(self.download_timeout)
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(rejection(response).await);
        }
        let advertised_hash = response
            .headers()
            .get(CONTENT_HASH_HEADER)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string);

        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let mut file = tokio::fs::File::create(dest).await?;
        let mut hasher = Sha256::new();
        let mut bytes: u64 = 0;
        while let Some(chunk) = response.chunk().await? {
            hasher.update(&chunk);
            bytes += chunk.len() as u64;
            file.write_all(&chunk).await?;
        }
        file.flush().await?;
        file.sync_all().await?;

        Ok(DownloadOutcome {
            bytes,
            sha256: hex::encode(hasher.finalize()),
            advertised_hash,
        })
    }

    pub async fn record_download(
        &self,
        package_version_id: i64,
        bytes: i64,
        success: bool,
    ) -> Result<(), AgentError> {
        let url = self.endpoint(&["packages", &package_version_id.to_string(), "downloads"])?;
        let response = self
            .client
            .post(url)
            .json(&RecordDownloadRequest {
                machine_key: self.machine_key.clone(),
                bytes,
                success,
            })
            .send()
            .await?;
        if response.status().is_success() {
            Ok(())
        } else {
            Err(rejection(response).await)
        }
    }
}

impl TaskChannel for BrokerClient {
    async fn report(
        &self,
        task_id: i64,
        report: &TaskStatusReport,
    ) -> Result<StatusReportResponse, AgentError> {
        BrokerClient::report(self, task_id, report).await
    }

    async fn download(&self, task: &PendingTask, dest: &Path) -> Result<DownloadOutcome, AgentError> {
        self.download_content(task.package_version_id, dest).await
    }

    async fn record_download(
        &self,
        package_version_id: i64,
        bytes: i64,
        success: bool,
    ) -> Result<(), AgentError> {
        BrokerClient::record_download(self, package_version_id, bytes, success).await
    }
}

async fn parse<T: DeserializeOwned>(response: Response) -> Result<T, AgentError> {
    if !response.status().is_success() {
        return Err(rejection(response).await);
    }
    response
        .json::<T>()
        .await
        .map_err(|e| AgentError::TransientNetwork(format!("unreadable broker response: {}", e)))
}

/// Turns a non-success response into an error carrying the broker's message.
async fn rejection(response: Response) -> AgentError {
    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    let message = error_message(&body);
    if status == StatusCode::CONFLICT || status == StatusCode::NOT_FOUND {
        debug!("Broker refused request with {}: {}", status, message);
    } else {
        error!("Broker request failed with status {}: {}", status, message);
    }
    AgentError::Rejected {
        status: status.as_u16(),
        message,
    }
}

/// The `error` field of a broker error body, or the raw body.
fn error_message(body: &str) -> String {
    serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|value| value.get("error").and_then(|e| e.as_str()).map(str::to_string))
        .unwrap_or_else(|| body.to_string())
}
