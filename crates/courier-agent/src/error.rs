/*
 * Copyright (c) 2025 Dylan Storey
 * Licensed under the Elastic License 2.0.
 * See LICENSE file in the project root for full license text.
 */

//! Agent-side failures and their mapping onto [`FailureKind`].

use courier_models::models::failure::FailureKind;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AgentError {
    /// Broker unreachable, timed out, or answered with a server error.
    #[error("broker unreachable: {0}")]
    TransientNetwork(String),
    /// The broker understood the request and refused it.
    #[error("broker rejected the request ({status}): {message}")]
    Rejected { status: u16, message: String },
    #[error("content integrity check failed: {0}")]
    Integrity(String),
    #[error("install failed: {0}")]
    InstallExecution(String),
    #[error("fatal configuration error: {0}")]
    FatalConfiguration(String),
    /// The owning deployment was cancelled while the task ran.
    #[error("task cancelled: {0}")]
    Cancelled(String),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl AgentError {
    pub fn failure_kind(&self) -> FailureKind {
        match self {
            AgentError::TransientNetwork(_) => FailureKind::TransientNetwork,
            AgentError::Rejected { status, .. } => match *status {
                400 | 422 => FailureKind::Validation,
                404 => FailureKind::NotFound,
                409 => FailureKind::Conflict,
                _ => FailureKind::TransientNetwork,
            },
            AgentError::Integrity(_) => FailureKind::Integrity,
            AgentError::InstallExecution(_) | AgentError::Io(_) => FailureKind::InstallExecution,
            AgentError::FatalConfiguration(_) => FailureKind::FatalConfiguration,
            AgentError::Cancelled(_) => FailureKind::Cancelled,
        }
    }

    /// Network-level failures that the loops absorb and retry on the next cycle.
    pub fn is_transient(&self) -> bool {
        self.failure_kind() == FailureKind::TransientNetwork
    }

    pub fn install(message: impl Into<String>) -> Self {
        AgentError::InstallExecution(message.into())
    }

    pub fn fatal(message: impl Into<String>) -> Self {
        AgentError::FatalConfiguration(message.into())
    }
}

impl From<reqwest::Error> for AgentError {
    fn from(e: reqwest::Error) -> Self {
        AgentError::TransientNetwork(e.to_string())
    }
}
