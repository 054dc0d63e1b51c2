/// Retry Policy - Bounded Exponential Backoff Around One Executor Call
///
/// **Rules:**
/// - Success is returned immediately
/// - Timeouts are returned immediately and never retried
/// - Failed outcomes and transport errors are retried while attempts remain
/// - Backoff before retry `n` is `backoff_unit * 2^(n-1)` (1, 2, 4, ... units)
/// - When attempts run out, the last outcome (or last transport error) is
///   handed back unchanged
///
/// The whole sequence counts as a single call from the circuit breaker's
/// point of view.

use codeq_common::types::{ExecutionOutcome, ExecutionRequest};
use std::time::Duration;
use tracing::{debug, warn};

use crate::error::ExecutorError;
use crate::executor::CodeExecutor;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    max_retries: u32,
    backoff_unit: Duration,
}

impl RetryPolicy {
    pub fn new(max_retries: u32, backoff_unit: Duration) -> Self {
        Self {
            max_retries,
            backoff_unit,
        }
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    /// Delay before retry number `retry` (1-based)
    pub fn backoff(&self, retry: u32) -> Duration {
        let factor = 2u32.saturating_pow(retry.saturating_sub(1));
        self.backoff_unit.saturating_mul(factor)
    }

    /// Run the request against `executor`, retrying per policy.
    ///
    /// `request.retry_count` is advanced once per retry.
    pub async fn execute_with_retry(
        &self,
        executor: &dyn CodeExecutor,
        request: &mut ExecutionRequest,
        timeout: Duration,
    ) -> Result<ExecutionOutcome, ExecutorError> {
        loop {
            let attempt = executor
                .execute(&request.source_code, &request.language, &request.stdin, timeout)
                .await;

            let reason = match &attempt {
                Ok(outcome) if !outcome.is_retryable() => {
                    debug!(
                        execution_id = %request.id,
                        success = outcome.success,
                        timed_out = outcome.timed_out,
                        retries = request.retry_count,
                        "Attempt finished"
                    );
                    return attempt;
                }
                Ok(outcome) => failure_reason(outcome),
                Err(e) => e.to_string(),
            };

            if request.retry_count >= self.max_retries {
                warn!(
                    execution_id = %request.id,
                    retries = request.retry_count,
                    reason = %reason,
                    "Retries exhausted"
                );
                return attempt;
            }

            request.retry_count += 1;
            let wait = self.backoff(request.retry_count);
            warn!(
                execution_id = %request.id,
                retry = request.retry_count,
                max_retries = self.max_retries,
                backoff_ms = wait.as_millis() as u64,
                reason = %reason,
                "Retrying execution"
            );
            tokio::time::sleep(wait).await;
        }
    }
}

fn failure_reason(outcome: &ExecutionOutcome) -> String {
    if !outcome.compile_error.is_empty() {
        format!("compile error: {}", first_line(&outcome.compile_error))
    } else if !outcome.runtime_error.is_empty() {
        format!("runtime error: {}", first_line(&outcome.runtime_error))
    } else {
        "non-zero exit status".to_string()
    }
}

fn first_line(text: &str) -> &str {
    text.lines().next().unwrap_or("")
}
