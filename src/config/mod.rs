// Configuration module
// Worker settings provided by the deployment environment

use log::warn;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

pub mod tts; // Backend configuration

pub use tts::{BackendConfig, DevicePreference};

const DEFAULT_TIMEOUT_SECS: u64 = 300;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerConfig {
    pub backend: BackendConfig,
    pub output_dir: PathBuf,
    pub cache_dir: PathBuf,
    /// Where per-job text files go; the system temp dir when unset.
    pub temp_dir: Option<PathBuf>,
    pub generation_timeout_secs: u64,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            backend: BackendConfig::default(),
            output_dir: PathBuf::from("/tmp/tts_worker_output"),
            cache_dir: PathBuf::from("/app/cache"),
            temp_dir: None,
            generation_timeout_secs: DEFAULT_TIMEOUT_SECS,
        }
    }
}

impl WorkerConfig {
    /// Build the configuration from process environment variables.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build the configuration from an arbitrary key lookup.
    ///
    /// Missing keys keep their defaults; unparsable values are logged and ignored.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(v) = get("MODEL_PATH") {
            config.backend.model_path = PathBuf::from(v);
        }
        if let Some(v) = get("BACKEND_DIR") {
            config.backend.backend_dir = PathBuf::from(v);
        }
        if let Some(v) = get("INFERENCE_SCRIPT") {
            config.backend.inference_script = PathBuf::from(v);
        }
        if let Some(v) = get("PYTHON_BIN") {
            config.backend.interpreter = v;
        }
        if let Some(v) = get("MODEL_MANIFEST") {
            config.backend.manifest_name = v;
        }
        if let Some(v) = get("COMPUTE_DEVICE") {
            match DevicePreference::parse(&v) {
                Some(device) => config.backend.device = device,
                None => warn!("Ignoring unknown COMPUTE_DEVICE value: {}", v),
            }
        }
        if let Some(v) = get("OUTPUT_DIR") {
            config.output_dir = PathBuf::from(v);
        }
        if let Some(v) = get("CACHE_DIR") {
            config.cache_dir = PathBuf::from(v);
        }
        if let Some(v) = get("TEMP_DIR") {
            config.temp_dir = Some(PathBuf::from(v));
        }
        if let Some(v) = get("GENERATION_TIMEOUT_SECS") {
            match v.trim().parse::<u64>() {
                Ok(secs) if secs > 0 => config.generation_timeout_secs = secs,
                _ => warn!(
                    "Ignoring invalid GENERATION_TIMEOUT_SECS value: {} (using {}s)",
                    v, config.generation_timeout_secs
                ),
            }
        }

        config
    }

    pub fn generation_timeout(&self) -> Duration {
        Duration::from_secs(self.generation_timeout_secs)
    }
}
