// Health reporting
// Read-only view of the worker state for external monitoring

use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;

use crate::models::{HealthReport, HealthStatus, ModelInfo, OutputFormat};
use crate::services::validation::{MAX_SPEAKERS, MAX_TEXT_CHARS};
use crate::services::worker::WorkerLifecycle;

/// How long a health check waits for the state lock before giving up.
const STATE_READ_WAIT: Duration = Duration::from_millis(250);

pub struct HealthReporter {
    worker: Arc<WorkerLifecycle>,
}

impl HealthReporter {
    pub fn new(worker: Arc<WorkerLifecycle>) -> Self {
        Self { worker }
    }

    /// Current status. Never triggers or waits for initialisation.
    pub fn report(&self) -> HealthReport {
        let timestamp = Utc::now().timestamp_millis() as f64 / 1000.0;

        let Some(state) = self.worker.try_snapshot(STATE_READ_WAIT) else {
            return HealthReport {
                status: HealthStatus::Unhealthy,
                model_loaded: false,
                device: None,
                gpu_info: None,
                model_info: None,
                last_error: Some("worker state unavailable".to_string()),
                timestamp,
            };
        };

        HealthReport {
            status: if state.ready {
                HealthStatus::Healthy
            } else {
                HealthStatus::Initializing
            },
            model_loaded: state.ready,
            device: state.device,
            gpu_info: state.gpu,
            model_info: Some(ModelInfo {
                model_path: state
                    .backend_location
                    .unwrap_or_else(|| self.worker.config().model_path.clone()),
                max_speakers: MAX_SPEAKERS,
                max_text_chars: MAX_TEXT_CHARS,
                supported_formats: OutputFormat::FALLBACK_ORDER.to_vec(),
            }),
            last_error: state.last_error,
            timestamp,
        }
    }
}
