/*
 * Copyright (c) 2025 Dylan Storey
 * Licensed under the Elastic License 2.0.
 * See LICENSE file in the project root for full license text.
 */

//! Queue ordering and retry policy.
//!
//! A machine's pending list is [`pending_queue`] applied to its queued and
//! retrying tasks.

use chrono::{DateTime, Duration, Utc};
use courier_models::models::deployment_tasks::DeploymentTask;
use courier_utils::config::Scheduler;

/// Exponential back-off applied when a failed task is re-queued.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub base: Duration,
    pub cap: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy {
            base: Duration::seconds(30),
            cap: Duration::hours(1),
        }
    }
}

impl From<&Scheduler> for RetryPolicy {
    fn from(cfg: &Scheduler) -> Self {
        RetryPolicy {
            base: Duration::seconds(cfg.retry_base_seconds as i64),
            cap: Duration::seconds(cfg.retry_max_backoff_seconds as i64),
        }
    }
}

/// What the scheduler does with a task that just failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    Retry {
        retry_count: i32,
        next_retry_at: DateTime<Utc>,
    },
    Exhausted,
}

impl RetryPolicy {
    /// Delay before retry number `retry_count` (already incremented).
    pub fn backoff(&self, retry_count: i32) -> Duration {
        let exponent = retry_count.clamp(0, 30) as u32;
        let factor = 2_i64.saturating_pow(exponent);
        let seconds = self
            .base
            .num_seconds()
            .saturating_mul(factor)
            .min(self.cap.num_seconds());
        Duration::seconds(seconds)
    }

    pub fn decide(&self, task: &DeploymentTask, retryable: bool, now: DateTime<Utc>) -> RetryDecision {
        if !retryable || !task.has_retries_left() {
            return RetryDecision::Exhausted;
        }
        let retry_count = task.retry_count + 1;
        RetryDecision::Retry {
            retry_count,
            next_retry_at: now + self.backoff(retry_count),
        }
    }
}

/// Filters `tasks` down to those eligible at `now`, in execution order.
pub fn pending_queue(tasks: &[DeploymentTask], now: DateTime<Utc>) -> Vec<&DeploymentTask> {
    let mut queue: Vec<&DeploymentTask> = tasks.iter().filter(|t| t.is_eligible_at(now)).collect();
    queue.sort_by(|a, b| DeploymentTask::queue_order(a, b));
    queue
}
