/*
 * Copyright (c) 2025 Dylan Storey
 * Licensed under the Elastic License 2.0.
 * See LICENSE file in the project root for full license text.
 */

use courier_models::models::failure::FailureKind;
use thiserror::Error;

/// Errors raised while planning, scheduling or settling a rollout.
#[derive(Debug, Error)]
pub enum RolloutError {
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("{0} not found")]
    NotFound(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("package version {0} is missing or inactive")]
    InvalidPackageVersion(i64),

    #[error("no eligible targets: {0}")]
    NoEligibleTargets(String),

    #[error("progress may not decrease from {current}% to {reported}%")]
    ProgressRegression { current: i32, reported: i32 },

    #[error("configuration error: {0}")]
    FatalConfiguration(String),

    #[error("database error: {0}")]
    Database(#[from] diesel::result::Error),

    #[error("connection pool error: {0}")]
    Pool(#[from] r2d2::Error),

    #[error("storage error: {0}")]
    Io(#[from] std::io::Error),
}

impl RolloutError {
    pub fn not_found(what: impl Into<String>) -> Self {
        RolloutError::NotFound(what.into())
    }

    pub fn conflict(why: impl Into<String>) -> Self {
        RolloutError::Conflict(why.into())
    }

    pub fn validation(why: impl Into<String>) -> Self {
        RolloutError::Validation(why.into())
    }

    /// The failure taxonomy entry this error belongs to, where one applies.
    pub fn failure_kind(&self) -> Option<FailureKind> {
        match self {
            RolloutError::Validation(_)
            | RolloutError::NoEligibleTargets(_)
            | RolloutError::InvalidPackageVersion(_) => Some(FailureKind::Validation),
            RolloutError::NotFound(_) => Some(FailureKind::NotFound),
            RolloutError::Conflict(_) | RolloutError::ProgressRegression { .. } => {
                Some(FailureKind::Conflict)
            }
            RolloutError::FatalConfiguration(_) => Some(FailureKind::FatalConfiguration),
            RolloutError::Database(_) | RolloutError::Pool(_) | RolloutError::Io(_) => None,
        }
    }
}
