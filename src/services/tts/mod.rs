// TTS generation module
// Runs the external synthesis backend for one job and packages its output

use async_trait::async_trait;
use log::{error, info, warn};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime};
use tempfile::NamedTempFile;

pub mod artifacts;
pub mod process;

pub use artifacts::{Artifact, JOB_FILE_PREFIX, find_artifact};
pub use process::ScriptBackend;

use crate::config::WorkerConfig;
use crate::errors::{AppError, AppResult};
use crate::models::{GeneratedAudio, JobInput};
use crate::services::worker::WorkerSnapshot;
use crate::utils::common::output_excerpt;

/// Allowance for coarse filesystem timestamps when filtering stale artifacts.
const MTIME_SLACK: Duration = Duration::from_secs(2);

/// Arguments of one backend run.
#[derive(Debug, Clone)]
pub struct SynthesisInvocation {
    pub model_path: PathBuf,
    pub text_path: PathBuf,
    pub speaker_names: Vec<String>,
    pub deadline: Duration,
}

/// Captured result of a finished backend run.
#[derive(Debug, Clone, Default)]
pub struct ProcessOutput {
    /// `None` when the process was terminated by a signal.
    pub exit_code: Option<i32>,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
}

impl ProcessOutput {
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }
}

/// The opaque synthesis capability.
///
/// Implementations must honour `invocation.deadline` and return
/// [`AppError::Timeout`] once it expires, after stopping the work.
#[async_trait]
pub trait SynthesisBackend: Send + Sync {
    async fn synthesize(&self, invocation: &SynthesisInvocation) -> AppResult<ProcessOutput>;

    /// Directory tree the backend writes its audio into.
    fn working_dir(&self) -> &Path;
}

/// Per-invocation bundle. Dropping it deletes the temporary text file.
pub struct GenerationRequest {
    pub input: JobInput,
    pub worker: WorkerSnapshot,
    pub text_file: NamedTempFile,
    pub output_dir: PathBuf,
}

impl GenerationRequest {
    fn prepare(
        input: &JobInput,
        worker: &WorkerSnapshot,
        output_dir: &Path,
        scratch_dir: Option<&Path>,
    ) -> AppResult<Self> {
        let mut builder = tempfile::Builder::new();
        builder.prefix(JOB_FILE_PREFIX).suffix(".txt");
        let mut text_file = match scratch_dir {
            Some(dir) => builder.tempfile_in(dir)?,
            None => builder.tempfile()?,
        };
        text_file.write_all(input.text.as_bytes())?;
        text_file.flush()?;

        std::fs::create_dir_all(output_dir)?;

        Ok(Self {
            input: input.clone(),
            worker: worker.clone(),
            text_file,
            output_dir: output_dir.to_path_buf(),
        })
    }

    /// `tts_job_XXXX`; the backend names its output after it.
    fn job_tag(&self) -> Option<String> {
        self.text_file
            .path()
            .file_stem()
            .map(|stem| stem.to_string_lossy().into_owned())
    }

    fn invocation(&self, deadline: Duration) -> SynthesisInvocation {
        SynthesisInvocation {
            model_path: self.worker.backend_location.clone(),
            text_path: self.text_file.path().to_path_buf(),
            speaker_names: self.input.speaker_names.clone(),
            deadline,
        }
    }
}

pub struct GenerationOrchestrator {
    backend: Arc<dyn SynthesisBackend>,
    output_dir: PathBuf,
    scratch_dir: Option<PathBuf>,
    deadline: Duration,
}

impl GenerationOrchestrator {
    pub fn new(backend: Arc<dyn SynthesisBackend>, output_dir: impl Into<PathBuf>, deadline: Duration) -> Self {
        Self {
            backend,
            output_dir: output_dir.into(),
            scratch_dir: None,
            deadline,
        }
    }

    /// Orchestrator backed by the inference script described in `config`.
    pub fn from_config(config: &WorkerConfig) -> Self {
        let backend = ScriptBackend::new(config.backend.clone(), config.cache_dir.clone());
        let mut orchestrator =
            Self::new(Arc::new(backend), config.output_dir.clone(), config.generation_timeout());
        orchestrator.scratch_dir = config.temp_dir.clone();
        orchestrator
    }

    /// Put temporary text files in `dir` instead of the system temp directory.
    pub fn with_scratch_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.scratch_dir = Some(dir.into());
        self
    }

    /// Run one generation attempt. Never retried here.
    pub async fn generate(&self, input: &JobInput, worker: &WorkerSnapshot) -> AppResult<GeneratedAudio> {
        let started = Instant::now();
        let request = GenerationRequest::prepare(
            input,
            worker,
            &self.output_dir,
            self.scratch_dir.as_deref(),
        )?;

        info!(
            "Generating audio for {} characters, speakers: {:?}",
            input.text_length(),
            input.speaker_names
        );

        let invoked_at = SystemTime::now();
        let generation_started = Instant::now();
        let output = self.backend.synthesize(&request.invocation(self.deadline)).await?;
        let generation_duration = generation_started.elapsed();

        let stdout = output_excerpt(&output.stdout);
        let stderr = output_excerpt(&output.stderr);

        if !output.success() {
            error!(
                "Generation failed (exit code {:?}): {}",
                output.exit_code,
                String::from_utf8_lossy(&output.stderr)
            );
            return Err(AppError::ProcessFailure {
                message: match output.exit_code {
                    Some(code) => format!("Generation failed: process exited with code {}", code),
                    None => "Generation failed: process terminated by signal".to_string(),
                },
                stdout,
                stderr,
            });
        }

        let working_dir = self.backend.working_dir().to_path_buf();
        let output_dir = request.output_dir.clone();
        let requested = input.output_format;
        let not_before = invoked_at.checked_sub(MTIME_SLACK);
        let job_tag = request.job_tag();
        let artifact = tokio::task::spawn_blocking(move || {
            find_artifact(&working_dir, &output_dir, requested, not_before, job_tag.as_deref())
        })
        .await
        .map_err(|e| AppError::internal(format!("artifact search failed: {}", e)))?;

        let Some(artifact) = artifact else {
            error!("No audio file generated");
            return Err(AppError::ArtifactMissing {
                message: "No audio file generated".to_string(),
                stdout,
                stderr,
            });
        };

        if artifact.format != requested {
            warn!(
                "Requested {} output but only {} was produced, returning it as {}",
                requested,
                artifact.path.display(),
                artifact.format
            );
        }

        let audio = tokio::fs::read(&artifact.path).await?;
        if let Err(e) = tokio::fs::remove_file(&artifact.path).await {
            warn!("Failed to remove {}: {}", artifact.path.display(), e);
        }

        let result = GeneratedAudio {
            audio,
            format: artifact.format,
            speakers: request.input.speaker_names.clone(),
            text_length: request.input.text_length(),
            generation_duration,
            total_duration: started.elapsed(),
        };
        info!(
            "Audio generated in {:.2}s, size: {:.2} MB",
            generation_duration.as_secs_f64(),
            result.size_bytes() as f64 / (1024.0 * 1024.0)
        );
        Ok(result)
    }
}
