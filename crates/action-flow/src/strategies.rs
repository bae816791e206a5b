//! Failure handling strategies

use agent_bridge::AgentError;
use serde::{Deserialize, Serialize};
use tokio::time::Duration;
use tracing::{info, warn};

/// What a run does once an action has exhausted its attempts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FailureStrategy {
    /// Abort the remainder of the run
    Abort,

    /// Record the failure and continue with the next action
    Continue,
}

impl FailureStrategy {
    pub fn from_stop_on_error(stop_on_error: bool) -> Self {
        if stop_on_error {
            FailureStrategy::Abort
        } else {
            FailureStrategy::Continue
        }
    }
}

/// Decision taken after a failed attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureDecision {
    /// Wait, then make attempt number `attempt`
    Retry { attempt: u32, wait: Duration },

    /// No attempts left
    Exhausted { attempts: u32 },
}

/// Bounded retry with a fixed pause between attempts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first
    pub max_attempts: u32,
    pub interval: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, interval: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            interval,
        }
    }

    pub fn should_retry(&self, attempt: u32) -> bool {
        attempt < self.max_attempts
    }

    /// Decide what follows failed attempt number `attempt` (1-based).
    pub fn decide(&self, task: &str, attempt: u32, error: &AgentError) -> FailureDecision {
        if self.should_retry(attempt) {
            info!(
                "Task '{}' failed (attempt {}/{}), retrying after {}ms: {}",
                task,
                attempt,
                self.max_attempts,
                self.interval.as_millis(),
                error
            );
            FailureDecision::Retry {
                attempt: attempt + 1,
                wait: self.interval,
            }
        } else {
            warn!(
                "Task '{}' failed after {} attempts: {}",
                task, attempt, error
            );
            FailureDecision::Exhausted { attempts: attempt }
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(3, Duration::from_millis(500))
    }
}
