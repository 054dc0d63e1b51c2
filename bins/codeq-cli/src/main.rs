mod commands;

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "codeq-cli")]
#[command(about = "Codeq CLI - Submit code executions and inspect the dispatch queue", long_about = None)]
struct Cli {
    /// Base URL of the Codeq API
    #[arg(long, env = "CODEQ_API_URL", default_value = "http://127.0.0.1:3000", global = true)]
    api_url: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Submit a source file for execution
    Submit {
        /// Source file to run
        #[arg(short, long)]
        file: PathBuf,

        /// Language tag (python, java, cpp)
        #[arg(short, long)]
        language: String,

        /// Text fed to the program's standard input
        #[arg(short, long, default_value = "")]
        stdin: String,

        /// Custom execution id (generated when omitted)
        #[arg(long)]
        id: Option<String>,

        /// Poll until the result is available
        #[arg(short, long, default_value = "false")]
        wait: bool,

        /// Give up waiting after this many seconds
        #[arg(long, default_value = "60")]
        timeout_secs: u64,
    },

    /// Fetch the result of an execution
    Result {
        /// Execution id returned by submit
        id: String,
    },

    /// Show queue statistics
    Status,

    /// Force the circuit breaker closed
    ResetBreaker,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let client = commands::ApiClient::new(&cli.api_url)?;

    match cli.command {
        Commands::Submit {
            file,
            language,
            stdin,
            id,
            wait,
            timeout_secs,
        } => {
            commands::submit(&client, &file, &language, &stdin, id, wait, timeout_secs).await?;
        }
        Commands::Result { id } => {
            commands::show_result(&client, &id).await?;
        }
        Commands::Status => {
            commands::show_status(&client).await?;
        }
        Commands::ResetBreaker => {
            commands::reset_breaker(&client).await?;
        }
    }

    Ok(())
}
