//! Speech job worker binary.
//!
//! Stands in for the serverless transport: jobs arrive as JSON lines on stdin
//! and results leave as JSON lines on stdout.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use log::{error, info, warn};
use serde::Serialize;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;
use tokio::task::JoinSet;

use tts_worker::models::{Job, JobResult};
use tts_worker::utils::logger;
use tts_worker::{FailureKind, HealthReporter, JobHandler};

/// Text-to-speech job worker
#[derive(Debug, Parser)]
#[command(name = "tts-worker")]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Handle jobs read from stdin, one JSON object per line (default)
    Serve,
    /// Print the current health report
    Health,
    /// Initialise the backend once and report the outcome
    Warmup,
}

#[derive(Serialize)]
struct Envelope {
    id: Option<String>,
    output: JobResult,
}

#[tokio::main]
async fn main() -> Result<()> {
    logger::init_logger();
    let cli = Cli::parse();

    let handler = JobHandler::from_env();

    match cli.command.unwrap_or(Command::Serve) {
        Command::Serve => serve(handler).await,
        Command::Health => print_health(&handler),
        Command::Warmup => {
            match handler.worker().ensure_ready().await {
                Ok(snapshot) => info!(
                    "Backend ready at {} on {}",
                    snapshot.backend_location.display(),
                    snapshot.device
                ),
                Err(e) => warn!("Warmup failed: {}", e),
            }
            print_health(&handler)
        }
    }
}

fn print_health(handler: &JobHandler) -> Result<()> {
    let report = HealthReporter::new(handler.worker().clone()).report();
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

async fn serve(handler: JobHandler) -> Result<()> {
    info!("Starting speech job worker, reading jobs from stdin");

    let (tx, mut rx) = mpsc::channel::<String>(64);

    // Single writer so concurrent results never interleave on stdout
    let writer = tokio::spawn(async move {
        let mut stdout = tokio::io::stdout();
        while let Some(line) = rx.recv().await {
            stdout.write_all(line.as_bytes()).await?;
            stdout.write_all(b"\n").await?;
            stdout.flush().await?;
        }
        Ok::<_, std::io::Error>(())
    });

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut jobs = JoinSet::new();

    while let Some(line) = lines
        .next_line()
        .await
        .context("Failed to read job from stdin")?
    {
        if line.trim().is_empty() {
            continue;
        }

        let handler = handler.clone();
        let tx = tx.clone();
        jobs.spawn(async move {
            let envelope = match serde_json::from_str::<Job>(&line) {
                Ok(job) => Envelope {
                    id: job.id.clone(),
                    output: handler.handle(job).await,
                },
                Err(e) => {
                    warn!("Malformed job line: {}", e);
                    Envelope {
                        id: None,
                        output: JobResult::failure(
                            FailureKind::ValidationError,
                            format!("Malformed job: {}", e),
                        )
                        .with_usage_example(),
                    }
                }
            };

            match serde_json::to_string(&envelope) {
                Ok(json) => {
                    if tx.send(json).await.is_err() {
                        error!("Result writer closed before job finished");
                    }
                }
                Err(e) => error!("Failed to serialize job result: {}", e),
            }
        });
    }

    while let Some(joined) = jobs.join_next().await {
        if let Err(e) = joined {
            error!("Job task failed: {}", e);
        }
    }

    drop(tx);
    writer.await.context("Result writer task failed")??;

    info!("Input closed, worker shutting down");
    Ok(())
}
