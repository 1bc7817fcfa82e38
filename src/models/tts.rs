use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::fmt;
use std::time::Duration;

use crate::errors::FailureKind;

/// Поддерживаемые форматы аудио на выходе
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    Wav,
    Mp3,
    Flac,
}

impl Default for OutputFormat {
    fn default() -> Self {
        OutputFormat::Wav
    }
}

impl OutputFormat {
    /// Order in which formats are tried when the requested one is not found.
    pub const FALLBACK_ORDER: [OutputFormat; 3] =
        [OutputFormat::Wav, OutputFormat::Mp3, OutputFormat::Flac];

    pub fn extension(&self) -> &'static str {
        match self {
            Self::Wav => "wav",
            Self::Mp3 => "mp3",
            Self::Flac => "flac",
        }
    }

    /// Case-insensitive lookup by name or file extension.
    pub fn from_extension(ext: &str) -> Option<Self> {
        Self::FALLBACK_ORDER
            .into_iter()
            .find(|format| format.extension().eq_ignore_ascii_case(ext.trim()))
    }
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.extension())
    }
}

/// Входящее задание в том виде, в каком его передаёт транспорт
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Job {
    #[serde(default)]
    pub id: Option<String>,

    /// Сырые параметры; проверяются валидатором
    #[serde(default)]
    pub input: Option<Value>,
}

impl Job {
    pub fn new(id: impl Into<String>, input: Value) -> Self {
        Self {
            id: Some(id.into()),
            input: Some(input),
        }
    }
}

/// Нормализованные параметры задания
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobInput {
    pub text: String,
    pub speaker_names: Vec<String>,
    pub output_format: OutputFormat,
}

impl JobInput {
    /// Length of the text in characters.
    pub fn text_length(&self) -> usize {
        self.text.chars().count()
    }
}

/// Successful outcome of one generation attempt.
#[derive(Debug, Clone)]
pub struct GeneratedAudio {
    pub audio: Vec<u8>,
    pub format: OutputFormat,
    pub speakers: Vec<String>,
    pub text_length: usize,
    pub generation_duration: Duration,
    pub total_duration: Duration,
}

impl GeneratedAudio {
    pub fn size_bytes(&self) -> usize {
        self.audio.len()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SuccessBody {
    pub success: bool,
    pub audio_base64: String,
    pub format: OutputFormat,
    pub size_mb: f64,
    pub speakers: Vec<String>,
    pub text_length: usize,
    pub generation_time: f64,
    pub total_time: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FailureBody {
    pub error: String,
    pub kind: FailureKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stdout: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stderr: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub example: Option<Value>,
}

/// Результат задания, возвращаемый транспорту
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum JobResult {
    Success(SuccessBody),
    Failure(FailureBody),
}

impl JobResult {
    pub fn failure(kind: FailureKind, error: impl Into<String>) -> Self {
        JobResult::Failure(FailureBody {
            error: error.into(),
            kind,
            stdout: None,
            stderr: None,
            example: None,
        })
    }

    pub fn with_diagnostics(mut self, stdout: &str, stderr: &str) -> Self {
        if let JobResult::Failure(body) = &mut self {
            body.stdout = Some(stdout.to_string());
            body.stderr = Some(stderr.to_string());
        }
        self
    }

    pub fn with_usage_example(mut self) -> Self {
        if let JobResult::Failure(body) = &mut self {
            body.example = Some(usage_example());
        }
        self
    }

    pub fn is_success(&self) -> bool {
        matches!(self, JobResult::Success(_))
    }

    pub fn as_failure(&self) -> Option<&FailureBody> {
        match self {
            JobResult::Failure(body) => Some(body),
            JobResult::Success(_) => None,
        }
    }

    pub fn as_success(&self) -> Option<&SuccessBody> {
        match self {
            JobResult::Success(body) => Some(body),
            JobResult::Failure(_) => None,
        }
    }
}

impl From<GeneratedAudio> for JobResult {
    fn from(audio: GeneratedAudio) -> Self {
        let size_mb = audio.size_bytes() as f64 / (1024.0 * 1024.0);
        JobResult::Success(SuccessBody {
            success: true,
            audio_base64: STANDARD.encode(&audio.audio),
            format: audio.format,
            size_mb: round2(size_mb),
            speakers: audio.speakers,
            text_length: audio.text_length,
            generation_time: round2(audio.generation_duration.as_secs_f64()),
            total_time: round2(audio.total_duration.as_secs_f64()),
        })
    }
}

/// Sample payload returned alongside malformed-job errors.
pub fn usage_example() -> Value {
    json!({
        "text": "Speaker 1: Hello there! Speaker 2: Hi, how are you?",
        "speaker_names": ["Alice", "Bob"],
        "output_format": "wav"
    })
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}
