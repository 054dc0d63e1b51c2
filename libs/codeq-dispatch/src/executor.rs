use async_trait::async_trait;
use codeq_common::types::ExecutionOutcome;
use std::time::Duration;

use crate::error::ExecutorError;

/// Narrow contract to the remote code-execution backend.
///
/// Implementations map unsupported languages to a compile-error outcome and
/// report a blown time budget as an outcome with `timed_out` set. Only
/// transport failures come back as `Err`.
#[async_trait]
pub trait CodeExecutor: Send + Sync {
    async fn execute(
        &self,
        code: &str,
        language: &str,
        stdin: &str,
        timeout: Duration,
    ) -> Result<ExecutionOutcome, ExecutorError>;
}
