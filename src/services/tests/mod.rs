//! End-to-end job handling against a real child process.
//!
//! Small `sh` scripts stand in for the inference script; they receive the
//! same command line and write their "audio" into the backend working tree.

#![cfg(unix)]

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use serde_json::json;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tempfile::TempDir;

use crate::config::{BackendConfig, DevicePreference, WorkerConfig};
use crate::errors::FailureKind;
use crate::models::{Job, OutputFormat};
use crate::services::JobHandler;

struct Fixture {
    root: TempDir,
}

impl Fixture {
    /// Backend whose script body is `script`. Argument `$4` is the text file.
    fn new(script: &str) -> Self {
        let root = tempfile::tempdir().unwrap();
        for dir in ["backend", "model", "scratch"] {
            std::fs::create_dir_all(root.path().join(dir)).unwrap();
        }
        std::fs::write(root.path().join("backend/infer.sh"), script).unwrap();
        Self { root }
    }

    fn path(&self, rel: &str) -> PathBuf {
        self.root.path().join(rel)
    }

    fn config(&self) -> WorkerConfig {
        WorkerConfig {
            backend: BackendConfig {
                model_path: self.path("model"),
                backend_dir: self.path("backend"),
                inference_script: PathBuf::from("infer.sh"),
                interpreter: "sh".to_string(),
                manifest_name: "config.json".to_string(),
                device: DevicePreference::Cpu,
            },
            output_dir: self.path("out"),
            cache_dir: self.path("cache"),
            temp_dir: Some(self.path("scratch")),
            generation_timeout_secs: 30,
        }
    }

    fn handler(&self) -> JobHandler {
        JobHandler::from_config(&self.config())
    }

    fn scratch_is_empty(&self) -> bool {
        is_empty_dir(&self.path("scratch"))
    }
}

fn is_empty_dir(dir: &Path) -> bool {
    std::fs::read_dir(dir).unwrap().next().is_none()
}

const COPY_TEXT_TO_WAV: &str = "mkdir -p outputs\ncp \"$4\" outputs/generated.wav\n";

#[tokio::test]
async fn test_default_parameters_end_to_end() {
    let fixture = Fixture::new(COPY_TEXT_TO_WAV);
    let handler = fixture.handler();

    let result = handler
        .handle(Job::new("job-1", json!({"text": "Speaker 1: Hi. Speaker 2: Hello."})))
        .await;

    let body = result.as_success().expect("job should succeed");
    assert!(body.success);
    assert_eq!(body.format, OutputFormat::Wav);
    assert_eq!(body.speakers, vec!["Alice", "Bob"]);
    assert_eq!(body.text_length, 32);
    let audio = STANDARD.decode(&body.audio_base64).unwrap();
    assert_eq!(audio, b"Speaker 1: Hi. Speaker 2: Hello.");

    // Text input and produced audio are both gone.
    assert!(fixture.scratch_is_empty());
    assert!(!fixture.path("backend/outputs/generated.wav").exists());
    assert!(handler.worker().is_ready());
}

#[tokio::test]
async fn test_speaker_names_reach_the_backend() {
    let fixture = Fixture::new(
        "shift 5\nmkdir -p outputs\necho \"$@\" > outputs/speakers.mp3\n",
    );
    let handler = fixture.handler();

    let result = handler
        .handle(Job::new(
            "job-2",
            json!({
                "text": "Host: Welcome. Guest: Thanks.",
                "speaker_names": ["Host", " Expert ", "Guest", "Extra", "Dropped"],
                "output_format": "MP3"
            }),
        ))
        .await;

    let body = result.as_success().expect("job should succeed");
    assert_eq!(body.format, OutputFormat::Mp3);
    assert_eq!(body.speakers, vec!["Host", "Expert", "Guest", "Extra"]);
    let audio = STANDARD.decode(&body.audio_base64).unwrap();
    assert_eq!(String::from_utf8(audio).unwrap().trim(), "Host Expert Guest Extra");
}

#[tokio::test]
async fn test_empty_text_never_invokes_backend() {
    let fixture = Fixture::new("touch invoked\n");
    let handler = fixture.handler();

    let result = handler.handle(Job::new("job-3", json!({"text": ""}))).await;

    let body = result.as_failure().unwrap();
    assert_eq!(body.kind, FailureKind::ValidationError);
    assert!(body.error.starts_with("Invalid input: "));
    assert!(!fixture.path("backend/invoked").exists());
    assert!(fixture.scratch_is_empty());
    assert_eq!(handler.worker().init_attempts(), 0);
}

#[tokio::test]
async fn test_backend_failure_returns_bounded_stderr() {
    let fixture = Fixture::new(
        "echo 'loading checkpoint'\ni=0\nwhile [ $i -lt 100 ]; do printf 'CUDA out of memory. ' >&2; i=$((i+1)); done\nexit 1\n",
    );
    let handler = fixture.handler();

    let result = handler.handle(Job::new("job-4", json!({"text": "Hello there"}))).await;

    let body = result.as_failure().unwrap();
    assert_eq!(body.kind, FailureKind::ProcessFailure);
    let stderr = body.stderr.as_deref().unwrap();
    assert!(!stderr.is_empty());
    assert_eq!(stderr.chars().count(), 500);
    assert_eq!(body.stdout.as_deref(), Some("loading checkpoint\n"));
    assert!(fixture.scratch_is_empty());
}

#[tokio::test]
async fn test_no_artifact_is_reported() {
    let fixture = Fixture::new("echo done\n");
    let handler = fixture.handler();

    let result = handler.handle(Job::new("job-5", json!({"text": "Hello"}))).await;

    let body = result.as_failure().unwrap();
    assert_eq!(body.kind, FailureKind::ArtifactMissing);
    assert_eq!(body.error, "No audio file generated");
    assert_eq!(body.stdout.as_deref(), Some("done\n"));
    assert_eq!(body.stderr.as_deref(), Some(""));
    assert!(fixture.scratch_is_empty());
}

#[tokio::test]
async fn test_stale_audio_in_backend_tree_is_left_alone() {
    let fixture = Fixture::new("echo done\n");
    let sample = fixture.path("backend/voices/en-Alice_woman.wav");
    std::fs::create_dir_all(sample.parent().unwrap()).unwrap();
    std::fs::write(&sample, b"preset").unwrap();
    let hour_ago = std::time::SystemTime::now() - Duration::from_secs(3600);
    std::fs::File::options()
        .write(true)
        .open(&sample)
        .unwrap()
        .set_modified(hour_ago)
        .unwrap();

    let result = fixture.handler().handle(Job::new("job-6", json!({"text": "Hi"}))).await;

    assert_eq!(result.as_failure().unwrap().kind, FailureKind::ArtifactMissing);
    assert!(sample.exists());
}

#[tokio::test]
async fn test_timeout_kills_backend_and_cleans_up() {
    let fixture = Fixture::new("exec sleep 30\n");
    let mut config = fixture.config();
    config.generation_timeout_secs = 1;
    let handler = JobHandler::from_config(&config);

    let started = Instant::now();
    let result = handler.handle(Job::new("job-7", json!({"text": "Hello"}))).await;

    let body = result.as_failure().unwrap();
    assert_eq!(body.kind, FailureKind::Timeout);
    assert_eq!(body.error, "Generation timeout (1 seconds exceeded)");
    assert!(started.elapsed() < Duration::from_secs(10));
    assert!(fixture.scratch_is_empty());
}

#[tokio::test]
async fn test_initialization_failure_is_retried_on_next_job() {
    let fixture = Fixture::new(COPY_TEXT_TO_WAV);
    std::fs::remove_dir_all(fixture.path("model")).unwrap();
    let handler = fixture.handler();

    let result = handler.handle(Job::new("job-8", json!({"text": "Hello"}))).await;
    let body = result.as_failure().unwrap();
    assert_eq!(body.kind, FailureKind::InitializationError);
    assert!(body.error.starts_with("Model initialization failed: "));
    assert!(fixture.scratch_is_empty());

    // The model directory gets mounted; the following job initialises and succeeds.
    std::fs::create_dir_all(fixture.path("model")).unwrap();
    let result = handler.handle(Job::new("job-9", json!({"text": "Hello"}))).await;
    assert!(result.is_success());
    assert_eq!(handler.worker().init_attempts(), 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_jobs_share_one_initialization() {
    let fixture = Fixture::new("echo done\n");
    let handler = fixture.handler();

    let jobs = (0..8).map(|i| {
        let handler = handler.clone();
        tokio::spawn(async move {
            handler
                .handle(Job::new(format!("job-c{i}"), json!({"text": "Hello"})))
                .await
        })
    });
    for result in futures::future::join_all(jobs).await {
        // No job produces audio here; only the initialisation count matters.
        assert_eq!(result.unwrap().as_failure().unwrap().kind, FailureKind::ArtifactMissing);
    }

    assert_eq!(handler.worker().init_attempts(), 1);
    assert!(fixture.scratch_is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_jobs_get_their_own_audio() {
    // Every run names its output after its text file and lingers, so all
    // outputs sit side by side in the shared tree when each job looks.
    let fixture = Fixture::new(
        "mkdir -p outputs\nstem=$(basename \"$4\" .txt)\ncp \"$4\" \"outputs/${stem}_generated.wav\"\nsleep 1\n",
    );
    let handler = fixture.handler();

    let jobs = (0..4).map(|i| {
        let handler = handler.clone();
        tokio::spawn(async move {
            let text = format!("Speaker 1: This is job number {i}.");
            let result = handler.handle(Job::new(format!("job-o{i}"), json!({"text": text}))).await;
            (text, result)
        })
    });
    for joined in futures::future::join_all(jobs).await {
        let (text, result) = joined.unwrap();
        let body = result.as_success().expect("job should succeed");
        let audio = STANDARD.decode(&body.audio_base64).unwrap();
        assert_eq!(String::from_utf8(audio).unwrap(), text);
    }

    assert!(is_empty_dir(&fixture.path("backend/outputs")));
    assert!(fixture.scratch_is_empty());
}
