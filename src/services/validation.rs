// Input validation
// Pure functions that normalise raw job parameters or reject them

use serde_json::{Map, Value};
use std::fmt;

use crate::errors::{AppError, AppResult};
use crate::models::{JobInput, OutputFormat};

pub const MAX_TEXT_CHARS: usize = 10_000;
pub const MIN_SPEAKERS: usize = 2;
pub const MAX_SPEAKERS: usize = 4;
pub const DEFAULT_SPEAKERS: [&str; 2] = ["Alice", "Bob"];

/// Why a text parameter was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TextRejection {
    EmptyOrNotString,
    TooLong,
}

impl fmt::Display for TextRejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TextRejection::EmptyOrNotString => f.write_str("Text must be a non-empty string"),
            TextRejection::TooLong => write!(
                f,
                "Text too long (max {} characters)",
                format_thousands(MAX_TEXT_CHARS)
            ),
        }
    }
}

/// Returns the trimmed text, or the reason it cannot be synthesized.
pub fn validate_text(raw: &Value) -> Result<String, TextRejection> {
    let text = raw.as_str().ok_or(TextRejection::EmptyOrNotString)?.trim();
    if text.is_empty() {
        return Err(TextRejection::EmptyOrNotString);
    }
    if text.chars().count() > MAX_TEXT_CHARS {
        return Err(TextRejection::TooLong);
    }
    Ok(text.to_string())
}

/// Normalises the speaker list. Never fails: bad shapes fall back to the default pair.
pub fn normalize_speaker_names(raw: Option<&Value>) -> Vec<String> {
    let Some(Value::Array(entries)) = raw else {
        return default_speakers();
    };

    let names: Vec<String> = entries
        .iter()
        .take(MAX_SPEAKERS)
        .map(|entry| match entry {
            Value::String(s) => s.trim().to_string(),
            other => other.to_string().trim().to_string(),
        })
        .filter(|name| !name.is_empty())
        .collect();

    if names.len() < MIN_SPEAKERS {
        return default_speakers();
    }
    names
}

/// Case-insensitive format match; anything unknown or absent becomes wav.
pub fn normalize_output_format(raw: Option<&Value>) -> OutputFormat {
    raw.and_then(Value::as_str)
        .and_then(OutputFormat::from_extension)
        .unwrap_or_default()
}

/// Validates a whole input object. Only the text can make this fail.
pub fn validate_input(input: &Map<String, Value>) -> AppResult<JobInput> {
    let text = validate_text(input.get("text").unwrap_or(&Value::Null))
        .map_err(|rejection| AppError::validation(rejection.to_string()))?;
    let speaker_names = normalize_speaker_names(field(input, "speaker_names", "speakerNames"));
    let output_format = normalize_output_format(field(input, "output_format", "outputFormat"));

    Ok(JobInput {
        text,
        speaker_names,
        output_format,
    })
}

fn field<'a>(input: &'a Map<String, Value>, key: &str, alias: &str) -> Option<&'a Value> {
    input.get(key).or_else(|| input.get(alias))
}

fn default_speakers() -> Vec<String> {
    DEFAULT_SPEAKERS.iter().map(|s| s.to_string()).collect()
}

fn format_thousands(n: usize) -> String {
    let digits = n.to_string();
    let mut out = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, ch) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(ch);
    }
    out
}
