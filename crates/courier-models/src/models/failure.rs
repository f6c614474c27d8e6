/*
 * Copyright (c) 2025 Dylan Storey
 * Licensed under the Elastic License 2.0.
 * See LICENSE file in the project root for full license text.
 */

use diesel_derive_enum::DbEnum;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Classification of a failure, recorded on the task that suffered it.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, Eq, PartialEq, Hash, DbEnum)]
#[ExistingTypePath = "crate::schema::sql_types::FailureKind"]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// Bad request shape; the caller must fix it.
    Validation,
    NotFound,
    /// Illegal state transition; the caller should re-poll.
    Conflict,
    /// Downloaded content did not match the recorded hash.
    Integrity,
    TransientNetwork,
    /// Process-stop, file-lock or disk failures during install.
    InstallExecution,
    /// Missing storage, corrupt package or manifest.
    FatalConfiguration,
    Cancelled,
}

impl FailureKind {
    /// Whether the scheduler may re-queue a task that failed this way.
    ///
    /// Integrity failures are reported only after the agent has exhausted its
    /// own re-downloads, so re-queueing would fetch the same bad artifact.
    pub fn is_retryable(self) -> bool {
        matches!(
            self,
            FailureKind::TransientNetwork | FailureKind::InstallExecution
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            FailureKind::Validation => "validation",
            FailureKind::NotFound => "not_found",
            FailureKind::Conflict => "conflict",
            FailureKind::Integrity => "integrity",
            FailureKind::TransientNetwork => "transient_network",
            FailureKind::InstallExecution => "install_execution",
            FailureKind::FatalConfiguration => "fatal_configuration",
            FailureKind::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
