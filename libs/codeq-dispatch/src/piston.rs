/// Piston Executor - HTTP Client for the Piston Code Execution API
///
/// **Responsibility:**
/// Turn one (code, language, stdin) triple into one `ExecutionOutcome`.
///
/// **Classification:**
/// - Unknown language tag → compile-error outcome, no HTTP call
/// - HTTP client timeout → outcome with `timed_out` set
/// - Connection / body errors → `ExecutorError::Transport`
/// - Non-200 status → `ExecutorError::Status`
/// - Anything else → parsed outcome (may still be a failed program)
///
/// Piston reports some Java/C++ compiler diagnostics on the run stage's
/// stderr; those are moved over to `compile_error`.

use async_trait::async_trait;
use codeq_common::types::{ExecutionOutcome, Language};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::error::ExecutorError;
use crate::executor::CodeExecutor;

pub const DEFAULT_PISTON_URL: &str = "https://emkc.org/api/v2/piston";

/// Slack on top of the program budget for the HTTP round-trip itself
const HTTP_TIMEOUT_BUFFER: Duration = Duration::from_secs(2);

/// Piston runtime (language, version) for each supported language
pub fn piston_runtime(language: Language) -> (&'static str, &'static str) {
    match language {
        Language::Python => ("python", "3.10.0"),
        Language::Java => ("java", "15.0.2"),
        Language::Cpp => ("c++", "10.2.0"),
    }
}

pub fn source_file_name(language: Language) -> &'static str {
    match language {
        Language::Python => "main.py",
        Language::Java => "Main.java",
        Language::Cpp => "main.cpp",
    }
}

#[derive(Debug, Serialize)]
struct PistonRequest<'a> {
    language: &'a str,
    version: &'a str,
    files: Vec<PistonFile<'a>>,
    stdin: &'a str,
    compile_timeout: u64,
    run_timeout: u64,
}

#[derive(Debug, Serialize)]
struct PistonFile<'a> {
    name: &'a str,
    content: &'a str,
}

#[derive(Debug, Default, Deserialize)]
struct PistonResponse {
    #[serde(default)]
    compile: Option<PistonStage>,
    #[serde(default)]
    run: Option<PistonStage>,
}

#[derive(Debug, Default, Deserialize)]
struct PistonStage {
    #[serde(default)]
    stdout: String,
    #[serde(default)]
    stderr: String,
    #[serde(default)]
    output: String,
    /// Null when the process was killed by a signal
    #[serde(default)]
    code: Option<i64>,
}

#[derive(Debug, Clone)]
pub struct PistonExecutor {
    client: reqwest::Client,
    base_url: String,
}

impl PistonExecutor {
    pub fn new(base_url: impl Into<String>) -> Result<Self, ExecutorError> {
        let client = reqwest::Client::builder()
            .build()
            .map_err(|e| ExecutorError::Transport(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn execute_url(&self) -> String {
        format!("{}/execute", self.base_url)
    }
}

#[async_trait]
impl CodeExecutor for PistonExecutor {
    async fn execute(
        &self,
        code: &str,
        language: &str,
        stdin: &str,
        timeout: Duration,
    ) -> Result<ExecutionOutcome, ExecutorError> {
        let Some(lang) = Language::from_str(language) else {
            warn!(language = %language, "Unsupported language");
            return Ok(ExecutionOutcome::compile_failure(format!(
                "Unsupported language: {}",
                language
            )));
        };

        let (runtime, version) = piston_runtime(lang);
        let budget_ms = timeout.as_millis() as u64;
        let payload = PistonRequest {
            language: runtime,
            version,
            files: vec![PistonFile {
                name: source_file_name(lang),
                content: code,
            }],
            stdin,
            compile_timeout: budget_ms,
            run_timeout: budget_ms,
        };

        info!(
            language = %lang,
            code_length = code.len(),
            stdin_length = stdin.len(),
            "Calling Piston API"
        );

        let start = Instant::now();
        let sent = self
            .client
            .post(self.execute_url())
            .timeout(timeout + HTTP_TIMEOUT_BUFFER)
            .json(&payload)
            .send()
            .await;

        let response = match sent {
            Ok(response) => response,
            Err(e) if e.is_timeout() => {
                warn!(timeout_ms = budget_ms, "Code execution timed out");
                return Ok(ExecutionOutcome::timed_out(timeout));
            }
            Err(e) => {
                error!(error = %e, "Network error calling Piston API");
                return Err(ExecutorError::Transport(e.to_string()));
            }
        };

        let status = response.status();
        debug!(status = status.as_u16(), "Piston API response status");
        if status != reqwest::StatusCode::OK {
            let body = response.text().await.unwrap_or_default();
            error!(status = status.as_u16(), body = %body, "Piston API error");
            return Err(ExecutorError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let parsed: PistonResponse = match response.json().await {
            Ok(parsed) => parsed,
            Err(e) if e.is_timeout() => {
                warn!(timeout_ms = budget_ms, "Code execution timed out reading response");
                return Ok(ExecutionOutcome::timed_out(timeout));
            }
            Err(e) => {
                error!(error = %e, "Malformed Piston API response");
                return Err(ExecutorError::Transport(format!("invalid response body: {}", e)));
            }
        };

        let outcome = parse_response(parsed, start.elapsed());
        info!(
            success = outcome.success,
            output_length = outcome.output.len(),
            "Parsed Piston result"
        );
        Ok(outcome)
    }
}

fn looks_like_compile_error(stderr: &str) -> bool {
    let lower = stderr.to_lowercase();
    lower.contains("error:") || lower.contains("compilation failed")
}

fn parse_response(response: PistonResponse, elapsed: Duration) -> ExecutionOutcome {
    let (compile_output, mut compile_error) = match response.compile {
        Some(stage) => (stage.output, stage.stderr),
        None => (String::new(), String::new()),
    };

    let run = response.run.unwrap_or(PistonStage {
        code: Some(1),
        ..Default::default()
    });
    let mut runtime_error = run.stderr;
    if !runtime_error.is_empty() && looks_like_compile_error(&runtime_error) {
        compile_error = std::mem::take(&mut runtime_error);
    }

    let success = compile_error.is_empty() && runtime_error.is_empty() && run.code == Some(0);
    let output = if run.stdout.is_empty() {
        compile_output
    } else {
        run.stdout
    };

    ExecutionOutcome {
        success,
        output,
        compile_error,
        runtime_error,
        execution_time_ms: elapsed.as_millis() as u64,
        timed_out: false,
    }
}
