// Error handling module
// Failure taxonomy of a single job plus the plumbing errors that feed into it

use serde::Serialize;
use thiserror::Error;

/// Категория ошибки, которая уходит клиенту в поле `kind`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    ValidationError,
    InitializationError,
    Timeout,
    ProcessFailure,
    ArtifactMissing,
    InternalError,
}

/// Ошибки обработки задания
#[derive(Debug, Error)]
pub enum AppError {
    /// Некорректный ввод (пустой или слишком длинный текст)
    #[error("{0}")]
    Validation(String),

    /// Бэкенд синтеза не готов: модель не найдена, устройство недоступно
    #[error("{0}")]
    Initialization(String),

    /// Внешний процесс не уложился в отведённое время и был остановлен
    #[error("generation exceeded the {secs}s deadline")]
    Timeout { secs: u64 },

    /// Внешний процесс завершился с ошибкой
    #[error("{message}")]
    ProcessFailure {
        message: String,
        stdout: String,
        stderr: String,
    },

    /// Процесс отработал, но аудиофайл не найден
    #[error("{message}")]
    ArtifactMissing {
        message: String,
        stdout: String,
        stderr: String,
    },

    /// Непредвиденная ошибка
    #[error("internal error: {0}")]
    Internal(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl AppError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn initialization(msg: impl Into<String>) -> Self {
        Self::Initialization(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Category reported to the caller. Plumbing errors count as internal.
    pub fn kind(&self) -> FailureKind {
        match self {
            Self::Validation(_) => FailureKind::ValidationError,
            Self::Initialization(_) => FailureKind::InitializationError,
            Self::Timeout { .. } => FailureKind::Timeout,
            Self::ProcessFailure { .. } => FailureKind::ProcessFailure,
            Self::ArtifactMissing { .. } => FailureKind::ArtifactMissing,
            Self::Internal(_) | Self::Io(_) | Self::Serialization(_) | Self::Other(_) => {
                FailureKind::InternalError
            }
        }
    }

    /// Bounded diagnostic excerpts of the child's stdout/stderr, if any.
    pub fn diagnostics(&self) -> Option<(&str, &str)> {
        match self {
            Self::ProcessFailure { stdout, stderr, .. }
            | Self::ArtifactMissing { stdout, stderr, .. } => Some((stdout, stderr)),
            _ => None,
        }
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::Serialization(err.to_string())
    }
}

impl From<String> for AppError {
    fn from(err: String) -> Self {
        AppError::Internal(err)
    }
}

impl From<&str> for AppError {
    fn from(err: &str) -> Self {
        AppError::Internal(err.to_string())
    }
}

pub type AppResult<T> = Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_mapping() {
        assert_eq!(AppError::validation("x").kind(), FailureKind::ValidationError);
        assert_eq!(AppError::Timeout { secs: 300 }.kind(), FailureKind::Timeout);
        let io = std::io::Error::new(std::io::ErrorKind::Other, "disk");
        assert_eq!(AppError::from(io).kind(), FailureKind::InternalError);
        assert_eq!(AppError::from("boom").kind(), FailureKind::InternalError);
    }

    #[test]
    fn test_diagnostics_only_for_process_errors() {
        let err = AppError::ProcessFailure {
            message: "Generation failed".to_string(),
            stdout: "out".to_string(),
            stderr: "err".to_string(),
        };
        assert_eq!(err.diagnostics(), Some(("out", "err")));
        assert_eq!(AppError::initialization("no model").diagnostics(), None);
    }

    #[test]
    fn test_timeout_display() {
        let err = AppError::Timeout { secs: 300 };
        assert_eq!(err.to_string(), "generation exceeded the 300s deadline");
    }
}
