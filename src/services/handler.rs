// Job handler
// Entry point turning one inbound job into one result value

use log::{error, info, warn};
use serde_json::{Map, Value};
use std::sync::Arc;
use uuid::Uuid;

use crate::config::WorkerConfig;
use crate::errors::{AppError, AppResult, FailureKind};
use crate::models::{GeneratedAudio, Job, JobResult};
use crate::services::tts::GenerationOrchestrator;
use crate::services::validation;
use crate::services::worker::{self, WorkerLifecycle};

const INTERNAL_ERROR_MESSAGE: &str = "Internal error while handling job";

#[derive(Clone)]
pub struct JobHandler {
    worker: Arc<WorkerLifecycle>,
    orchestrator: Arc<GenerationOrchestrator>,
}

impl JobHandler {
    pub fn new(worker: Arc<WorkerLifecycle>, orchestrator: Arc<GenerationOrchestrator>) -> Self {
        Self {
            worker,
            orchestrator,
        }
    }

    /// Handler with its own worker state, for embedding and tests.
    pub fn from_config(config: &WorkerConfig) -> Self {
        Self::new(
            Arc::new(WorkerLifecycle::new(config.backend.clone())),
            Arc::new(GenerationOrchestrator::from_config(config)),
        )
    }

    /// Handler bound to the process-wide worker singleton.
    pub fn from_env() -> Self {
        let config = WorkerConfig::from_env();
        Self::new(
            worker::global(),
            Arc::new(GenerationOrchestrator::from_config(&config)),
        )
    }

    pub fn worker(&self) -> &Arc<WorkerLifecycle> {
        &self.worker
    }

    /// Handle one job. Always returns a result value, whatever goes wrong.
    pub async fn handle(&self, job: Job) -> JobResult {
        let job_id = job
            .id
            .clone()
            .unwrap_or_else(|| format!("local-{}", Uuid::new_v4()));
        info!("Received job: {}", job_id);

        let input = match job.input {
            Some(Value::Object(map)) if !map.is_empty() => map,
            _ => {
                warn!("Job {} has no input", job_id);
                return JobResult::failure(FailureKind::ValidationError, "No input provided")
                    .with_usage_example();
            }
        };

        if !input.contains_key("text") {
            warn!("Job {} is missing the text parameter", job_id);
            return JobResult::failure(
                FailureKind::ValidationError,
                "Missing required 'text' parameter",
            )
            .with_usage_example();
        }

        // A panic inside the pipeline surfaces as a JoinError instead of unwinding into the caller
        let worker = Arc::clone(&self.worker);
        let orchestrator = Arc::clone(&self.orchestrator);
        let task = tokio::spawn(async move { run_pipeline(&worker, &orchestrator, &input).await });

        match task.await {
            Ok(Ok(audio)) => {
                info!(
                    "Job {} completed: {} bytes of {}",
                    job_id,
                    audio.size_bytes(),
                    audio.format
                );
                JobResult::from(audio)
            }
            Ok(Err(err)) => failure_from_error(&job_id, err),
            Err(join_err) => {
                error!("Job {} crashed: {}", job_id, join_err);
                JobResult::failure(FailureKind::InternalError, INTERNAL_ERROR_MESSAGE)
            }
        }
    }
}

async fn run_pipeline(
    worker: &WorkerLifecycle,
    orchestrator: &GenerationOrchestrator,
    input: &Map<String, Value>,
) -> AppResult<GeneratedAudio> {
    let input = validation::validate_input(input)?;
    let snapshot = worker.ensure_ready().await?;
    orchestrator.generate(&input, &snapshot).await
}

fn failure_from_error(job_id: &str, err: AppError) -> JobResult {
    let kind = err.kind();
    match err {
        AppError::Validation(msg) => {
            info!("Job {} rejected: {}", job_id, msg);
            JobResult::failure(kind, format!("Invalid input: {}", msg))
        }
        AppError::Initialization(msg) => {
            JobResult::failure(kind, format!("Model initialization failed: {}", msg))
        }
        AppError::Timeout { secs } => {
            error!("Job {} timed out after {}s", job_id, secs);
            JobResult::failure(
                kind,
                format!("Generation timeout ({} seconds exceeded)", secs),
            )
        }
        AppError::ProcessFailure {
            message,
            stdout,
            stderr,
        }
        | AppError::ArtifactMissing {
            message,
            stdout,
            stderr,
        } => {
            error!("Job {} failed: {}", job_id, message);
            JobResult::failure(kind, message).with_diagnostics(&stdout, &stderr)
        }
        other => {
            error!("Job {} failed with internal error: {:?}", job_id, other);
            JobResult::failure(FailureKind::InternalError, INTERNAL_ERROR_MESSAGE)
        }
    }
}
