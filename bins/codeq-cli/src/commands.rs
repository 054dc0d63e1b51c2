// CLI commands talking to the Codeq API
use anyhow::{bail, Context, Result};
use codeq_common::types::{ExecutionOutcome, QueueStatus};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::{Duration, Instant};

const POLL_INTERVAL: Duration = Duration::from_millis(500);

#[derive(Debug, Serialize)]
struct SubmitBody<'a> {
    code: &'a str,
    language: &'a str,
    stdin: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    execution_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SubmitReply {
    execution_id: String,
}

#[derive(Debug, Deserialize)]
struct ErrorReply {
    error: String,
}

/// Thin HTTP client for the Codeq API
pub struct ApiClient {
    http: reqwest::Client,
    base_url: String,
}

impl ApiClient {
    pub fn new(base_url: &str) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    pub async fn submit(
        &self,
        code: &str,
        language: &str,
        stdin: &str,
        execution_id: Option<String>,
    ) -> Result<String> {
        let response = self
            .http
            .post(self.url("/execute"))
            .json(&SubmitBody {
                code,
                language,
                stdin,
                execution_id,
            })
            .send()
            .await
            .context("Failed to reach the Codeq API")?;

        let status = response.status();
        if status == reqwest::StatusCode::SERVICE_UNAVAILABLE {
            let reply: ErrorReply = response.json().await.context("Malformed error reply")?;
            bail!("Server busy: {}", reply.error);
        }
        if !status.is_success() {
            bail!("Submit failed with HTTP {}", status);
        }

        let reply: SubmitReply = response.json().await.context("Malformed submit reply")?;
        Ok(reply.execution_id)
    }

    /// `None` while the execution is pending (or its result expired)
    pub async fn fetch_result(&self, execution_id: &str) -> Result<Option<ExecutionOutcome>> {
        let response = self
            .http
            .get(self.url(&format!("/execute/{}", execution_id)))
            .send()
            .await
            .context("Failed to reach the Codeq API")?;

        match response.status() {
            reqwest::StatusCode::OK => {
                let outcome = response.json().await.context("Malformed result reply")?;
                Ok(Some(outcome))
            }
            reqwest::StatusCode::ACCEPTED => Ok(None),
            other => bail!("Result query failed with HTTP {}", other),
        }
    }

    pub async fn status(&self) -> Result<QueueStatus> {
        let response = self
            .http
            .get(self.url("/status"))
            .send()
            .await
            .context("Failed to reach the Codeq API")?;
        if !response.status().is_success() {
            bail!("Status query failed with HTTP {}", response.status());
        }
        response.json().await.context("Malformed status reply")
    }

    pub async fn reset_breaker(&self) -> Result<()> {
        let response = self
            .http
            .post(self.url("/breaker/reset"))
            .send()
            .await
            .context("Failed to reach the Codeq API")?;
        if !response.status().is_success() {
            bail!("Breaker reset failed with HTTP {}", response.status());
        }
        Ok(())
    }
}

/// Submit a source file, optionally waiting for the outcome
pub async fn submit(
    client: &ApiClient,
    file: &Path,
    language: &str,
    stdin: &str,
    execution_id: Option<String>,
    wait: bool,
    timeout_secs: u64,
) -> Result<()> {
    let code = fs::read_to_string(file)
        .with_context(|| format!("Failed to read {}", file.display()))?;

    println!("🚀 Submitting {} ({})", file.display(), language);
    let execution_id = client.submit(&code, language, stdin, execution_id).await?;
    println!("✅ Queued as {}", execution_id);

    if !wait {
        println!("\n📋 Fetch the result with: codeq-cli result {}", execution_id);
        return Ok(());
    }

    println!("⏳ Waiting for result...");
    let deadline = Instant::now() + Duration::from_secs(timeout_secs);
    loop {
        if let Some(outcome) = client.fetch_result(&execution_id).await? {
            println!("{}", format_outcome(&outcome));
            return Ok(());
        }
        if Instant::now() >= deadline {
            bail!("No result for {} after {}s", execution_id, timeout_secs);
        }
        tokio::time::sleep(POLL_INTERVAL).await;
    }
}

pub async fn show_result(client: &ApiClient, execution_id: &str) -> Result<()> {
    match client.fetch_result(execution_id).await? {
        Some(outcome) => println!("{}", format_outcome(&outcome)),
        None => println!("⏳ {} is pending (or its result has expired)", execution_id),
    }
    Ok(())
}

pub async fn show_status(client: &ApiClient) -> Result<()> {
    let status = client.status().await?;
    println!("{}", format_status(&status));
    Ok(())
}

pub async fn reset_breaker(client: &ApiClient) -> Result<()> {
    client.reset_breaker().await?;
    println!("✅ Circuit breaker reset");
    Ok(())
}

fn format_outcome(outcome: &ExecutionOutcome) -> String {
    let mut lines = Vec::new();

    let verdict = if outcome.success {
        "✅ Success"
    } else if outcome.timed_out {
        "⏱️  Timed out"
    } else if !outcome.compile_error.is_empty() {
        "❌ Compilation error"
    } else if !outcome.runtime_error.is_empty() {
        "❌ Runtime error"
    } else {
        "❌ Failed (non-zero exit)"
    };
    lines.push(format!("{} ({}ms)", verdict, outcome.execution_time_ms));

    if !outcome.output.is_empty() {
        lines.push(format!("--- output ---\n{}", outcome.output.trim_end()));
    }
    if !outcome.compile_error.is_empty() {
        lines.push(format!("--- compile error ---\n{}", outcome.compile_error.trim_end()));
    }
    if !outcome.runtime_error.is_empty() {
        lines.push(format!("--- runtime error ---\n{}", outcome.runtime_error.trim_end()));
    }

    lines.join("\n")
}

fn format_status(status: &QueueStatus) -> String {
    let breaker = if status.circuit_breaker_open { "OPEN" } else { "closed" };
    format!(
        "📊 Queue status\n  pending:   {}\n  active:    {}\n  completed: {}\n  failed:    {}\n  breaker:   {}",
        status.pending_count,
        status.active_count,
        status.completed_count,
        status.failed_count,
        breaker
    )
}
