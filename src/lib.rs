//! Speech job worker
//!
//! Receives text-to-speech jobs, validates them, makes sure the synthesis
//! backend is initialised, runs the backend as a bounded-time child process
//! and returns the produced audio (or a structured failure).

pub mod config;
pub mod errors;
pub mod models;
pub mod services;
pub mod utils;

pub use config::WorkerConfig;
pub use errors::{AppError, AppResult, FailureKind};
pub use models::{HealthReport, Job, JobResult};
pub use services::{GenerationOrchestrator, HealthReporter, JobHandler, WorkerLifecycle};
