use async_trait::async_trait;
use log::{debug, info, warn};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, Command};
use tokio::time::{Instant, timeout_at};

use super::{ProcessOutput, SynthesisBackend, SynthesisInvocation};
use crate::config::BackendConfig;
use crate::errors::{AppError, AppResult};

/// Synthesis backend that runs the inference script as a child process.
///
/// Command line:
/// `<interpreter> <script> --model_path <model> --txt_path <text> --speaker_names <name>...`
pub struct ScriptBackend {
    config: BackendConfig,
    cache_dir: PathBuf,
}

impl ScriptBackend {
    pub fn new(config: BackendConfig, cache_dir: impl Into<PathBuf>) -> Self {
        Self {
            config,
            cache_dir: cache_dir.into(),
        }
    }

    fn build_command(&self, script: &Path, invocation: &SynthesisInvocation) -> Command {
        let mut cmd = Command::new(&self.config.interpreter);
        cmd.arg(script)
            .arg("--model_path")
            .arg(&invocation.model_path)
            .arg("--txt_path")
            .arg(&invocation.text_path)
            .arg("--speaker_names")
            .args(&invocation.speaker_names);

        cmd.current_dir(&self.config.backend_dir)
            .env("HF_HOME", &self.cache_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        // Own process group, so a timeout can stop everything the script started
        #[cfg(unix)]
        cmd.process_group(0);

        cmd
    }
}

#[async_trait]
impl SynthesisBackend for ScriptBackend {
    async fn synthesize(&self, invocation: &SynthesisInvocation) -> AppResult<ProcessOutput> {
        let script = self.config.script_path();
        if !tokio::fs::try_exists(&script).await? {
            return Err(AppError::ProcessFailure {
                message: format!("No inference script found at {}", script.display()),
                stdout: String::new(),
                stderr: String::new(),
            });
        }

        let mut child = self
            .build_command(&script, invocation)
            .spawn()
            .map_err(|e| AppError::ProcessFailure {
                message: format!("Failed to start synthesis process: {}", e),
                stdout: String::new(),
                stderr: String::new(),
            })?;
        let pid = child.id();
        debug!("Synthesis process started (pid {:?})", pid);

        // Drain both pipes while waiting so a chatty child cannot block on a full pipe
        let mut stdout_task = tokio::spawn(read_all(child.stdout.take()));
        let mut stderr_task = tokio::spawn(read_all(child.stderr.take()));

        // One deadline covers the exit and the pipes: a descendant that keeps
        // stdout/stderr open holds the run just like the script itself
        let deadline = Instant::now() + invocation.deadline;
        let finished = timeout_at(deadline, async {
            let status = child.wait().await?;
            let stdout = (&mut stdout_task).await.unwrap_or_default();
            let stderr = (&mut stderr_task).await.unwrap_or_default();
            Ok::<_, std::io::Error>((status, stdout, stderr))
        })
        .await;

        match finished {
            Ok(result) => {
                let (status, stdout, stderr) = result?;
                info!("Synthesis process exited with {}", status);
                Ok(ProcessOutput {
                    exit_code: status.code(),
                    stdout,
                    stderr,
                })
            }
            Err(_) => {
                warn!(
                    "Synthesis process exceeded {:?}, terminating",
                    invocation.deadline
                );
                terminate(&mut child, pid).await;
                stdout_task.abort();
                stderr_task.abort();
                Err(AppError::Timeout {
                    secs: invocation.deadline.as_secs_f64().ceil() as u64,
                })
            }
        }
    }

    fn working_dir(&self) -> &Path {
        self.config.working_dir()
    }
}

/// Kill the script and every process in its group.
async fn terminate(child: &mut Child, pid: Option<u32>) {
    if let Some(pid) = pid {
        kill_process_group(pid);
    }

    // Already reaped when only descendants outlived the deadline
    if let Err(e) = child.kill().await {
        debug!("Failed to kill synthesis process: {}", e);
    }
}

#[cfg(unix)]
fn kill_process_group(pgid: u32) {
    // SAFETY: killpg only sends a signal, no memory is touched
    let rc = unsafe { libc::killpg(pgid as libc::pid_t, libc::SIGKILL) };
    if rc != 0 {
        debug!(
            "Failed to signal process group {}: {}",
            pgid,
            std::io::Error::last_os_error()
        );
    }
}

#[cfg(not(unix))]
fn kill_process_group(_pgid: u32) {}

async fn read_all<R>(reader: Option<R>) -> Vec<u8>
where
    R: AsyncRead + Unpin,
{
    let mut buf = Vec::new();
    if let Some(mut reader) = reader {
        if let Err(e) = reader.read_to_end(&mut buf).await {
            debug!("Failed to read process output: {}", e);
        }
    }
    buf
}
