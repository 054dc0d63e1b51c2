use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use uuid::Uuid;

/// Languages the execution backend knows how to compile and run.
///
/// Requests carry the raw language tag as submitted; resolution to a
/// `Language` happens in the executor client so that an unknown tag becomes
/// a compile-error outcome instead of an admission failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    Python,
    Java,
    Cpp,
}

impl Language {
    /// Case-insensitive lookup of a language tag
    pub fn from_str(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "python" => Some(Language::Python),
            "java" => Some(Language::Java),
            "cpp" => Some(Language::Cpp),
            _ => None,
        }
    }

    pub fn all() -> [Language; 3] {
        [Language::Python, Language::Java, Language::Cpp]
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Language::Python => write!(f, "python"),
            Language::Java => write!(f, "java"),
            Language::Cpp => write!(f, "cpp"),
        }
    }
}

/// A single code execution request travelling through the queue.
///
/// Everything except `retry_count` is fixed at submission. `retry_count` is
/// advanced only by the retry policy while one worker processes the request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionRequest {
    pub id: String,
    pub source_code: String,
    pub language: String,
    pub stdin: String,
    pub retry_count: u32,
}

impl ExecutionRequest {
    pub fn new(
        id: Option<String>,
        source_code: impl Into<String>,
        language: impl Into<String>,
        stdin: impl Into<String>,
    ) -> Self {
        let id = match id {
            Some(id) if !id.is_empty() => id,
            _ => generate_execution_id(),
        };

        Self {
            id,
            source_code: source_code.into(),
            language: language.into(),
            stdin: stdin.into(),
            retry_count: 0,
        }
    }
}

/// Generate an opaque execution identifier (`exec_` + 12 hex chars)
pub fn generate_execution_id() -> String {
    let hex = Uuid::new_v4().simple().to_string();
    format!("exec_{}", &hex[..12])
}

/// Terminal result of one execution request.
///
/// `success` holds only when there is no compile error, no runtime error and
/// the run stage exited with status zero.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionOutcome {
    pub success: bool,
    pub output: String,
    pub compile_error: String,
    pub runtime_error: String,
    pub execution_time_ms: u64,
    pub timed_out: bool,
}

impl ExecutionOutcome {
    pub fn success(output: impl Into<String>, elapsed: Duration) -> Self {
        Self {
            success: true,
            output: output.into(),
            compile_error: String::new(),
            runtime_error: String::new(),
            execution_time_ms: elapsed.as_millis() as u64,
            timed_out: false,
        }
    }

    pub fn compile_failure(message: impl Into<String>) -> Self {
        Self {
            success: false,
            output: String::new(),
            compile_error: message.into(),
            runtime_error: String::new(),
            execution_time_ms: 0,
            timed_out: false,
        }
    }

    pub fn runtime_failure(message: impl Into<String>) -> Self {
        Self {
            success: false,
            output: String::new(),
            compile_error: String::new(),
            runtime_error: message.into(),
            execution_time_ms: 0,
            timed_out: false,
        }
    }

    pub fn timed_out(budget: Duration) -> Self {
        Self {
            success: false,
            output: String::new(),
            compile_error: String::new(),
            runtime_error: String::new(),
            execution_time_ms: budget.as_millis() as u64,
            timed_out: true,
        }
    }

    /// Failed outcomes are worth another attempt; timeouts never are
    pub fn is_retryable(&self) -> bool {
        !self.success && !self.timed_out
    }
}

/// Point-in-time snapshot of the dispatch queue
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueStatus {
    pub pending_count: usize,
    pub active_count: usize,
    pub completed_count: usize,
    pub failed_count: usize,
    pub circuit_breaker_open: bool,
}
