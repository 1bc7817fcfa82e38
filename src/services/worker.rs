// Worker lifecycle
// Process-wide readiness state of the synthesis backend

use chrono::{DateTime, Utc};
use log::{error, info, warn};
use once_cell::sync::Lazy;
use parking_lot::RwLock;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

use crate::config::{BackendConfig, WorkerConfig};
use crate::errors::{AppError, AppResult};
use crate::models::{ComputeDevice, GpuInfo};
use crate::utils::gpu;

/// Состояние бэкенда синтеза
///
/// Создаётся неготовым; становится готовым ровно один раз после успешной
/// инициализации. Неудачная инициализация повторяется при следующем задании.
#[derive(Debug, Clone, Default)]
pub struct WorkerState {
    pub ready: bool,
    pub backend_location: Option<PathBuf>,
    pub device: Option<ComputeDevice>,
    pub gpu: Option<GpuInfo>,
    pub last_error: Option<String>,
    pub initialized_at: Option<DateTime<Utc>>,
}

/// What a job needs to know about a ready worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerSnapshot {
    pub backend_location: PathBuf,
    pub device: ComputeDevice,
}

pub struct WorkerLifecycle {
    config: BackendConfig,
    state: RwLock<WorkerState>,
    // Serialises initialisers; readers of `state` never touch it.
    init_lock: Mutex<()>,
    attempts: AtomicUsize,
}

static WORKER: Lazy<Arc<WorkerLifecycle>> =
    Lazy::new(|| Arc::new(WorkerLifecycle::new(WorkerConfig::from_env().backend)));

/// The process-wide worker, configured from the environment on first use.
pub fn global() -> Arc<WorkerLifecycle> {
    Arc::clone(&WORKER)
}

impl WorkerLifecycle {
    pub fn new(config: BackendConfig) -> Self {
        Self {
            config,
            state: RwLock::new(WorkerState::default()),
            init_lock: Mutex::new(()),
            attempts: AtomicUsize::new(0),
        }
    }

    pub fn config(&self) -> &BackendConfig {
        &self.config
    }

    /// Make sure the backend is initialised, initialising it if needed.
    ///
    /// Once ready this is a read-lock check. Concurrent callers that arrive
    /// before readiness wait for a single initialisation instead of racing.
    pub async fn ensure_ready(&self) -> AppResult<WorkerSnapshot> {
        if let Some(snapshot) = self.ready_snapshot() {
            return Ok(snapshot);
        }

        let _guard = self.init_lock.lock().await;
        if let Some(snapshot) = self.ready_snapshot() {
            return Ok(snapshot);
        }

        self.attempts.fetch_add(1, Ordering::SeqCst);
        let started = Instant::now();
        info!("Initializing synthesis backend...");

        match self.initialize().await {
            Ok((device, gpu)) => {
                let snapshot = WorkerSnapshot {
                    backend_location: self.config.model_path.clone(),
                    device,
                };
                let mut state = self.state.write();
                state.ready = true;
                state.backend_location = Some(snapshot.backend_location.clone());
                state.device = Some(device);
                state.gpu = gpu;
                state.last_error = None;
                state.initialized_at = Some(Utc::now());
                info!(
                    "Synthesis backend initialized in {:.2}s on {}",
                    started.elapsed().as_secs_f64(),
                    device
                );
                Ok(snapshot)
            }
            Err(err) => {
                let err = match err {
                    AppError::Initialization(_) => err,
                    other => AppError::initialization(other.to_string()),
                };
                error!("Backend initialization failed: {}", err);
                self.state.write().last_error = Some(err.to_string());
                Err(err)
            }
        }
    }

    async fn initialize(&self) -> AppResult<(ComputeDevice, Option<GpuInfo>)> {
        let (device, gpu) = gpu::resolve_device(self.config.device).await;
        info!("Using device: {}", device);

        let model_path = &self.config.model_path;
        if !tokio::fs::try_exists(model_path).await? {
            return Err(AppError::initialization(format!(
                "Model path not found: {}",
                model_path.display()
            )));
        }

        let manifest = self.config.manifest_path();
        if !tokio::fs::try_exists(&manifest).await? {
            warn!("Model manifest not found: {}", manifest.display());
            match find_alternative_manifest(model_path).await? {
                Some(alt) => info!("Found alternative config: {}", alt.display()),
                None => warn!("No config files found, proceeding anyway..."),
            }
        }

        Ok((device, gpu))
    }

    fn ready_snapshot(&self) -> Option<WorkerSnapshot> {
        let state = self.state.read();
        if !state.ready {
            return None;
        }
        Some(WorkerSnapshot {
            backend_location: state.backend_location.clone()?,
            device: state.device?,
        })
    }

    pub fn is_ready(&self) -> bool {
        self.state.read().ready
    }

    /// Copy of the current state. Never initialises.
    pub fn snapshot(&self) -> WorkerState {
        self.state.read().clone()
    }

    /// Like [`snapshot`](Self::snapshot) but gives up after `wait`.
    pub fn try_snapshot(&self, wait: Duration) -> Option<WorkerState> {
        self.state.try_read_for(wait).map(|state| state.clone())
    }

    /// Number of initialisations actually run so far.
    pub fn init_attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }

    #[cfg(test)]
    pub(crate) fn lock_state_for_test(&self) -> parking_lot::RwLockWriteGuard<'_, WorkerState> {
        self.state.write()
    }

    #[cfg(test)]
    pub(crate) async fn lock_init_for_test(&self) -> tokio::sync::MutexGuard<'_, ()> {
        self.init_lock.lock().await
    }
}

// Любой файл с "config" в имени, например model_config.json
async fn find_alternative_manifest(model_path: &Path) -> AppResult<Option<PathBuf>> {
    let mut entries = tokio::fs::read_dir(model_path).await?;
    let mut found = Vec::new();
    while let Some(entry) = entries.next_entry().await? {
        if entry.file_name().to_string_lossy().contains("config") {
            found.push(entry.path());
        }
    }
    found.sort();
    Ok(found.into_iter().next())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DevicePreference;
    use futures::future::join_all;

    fn cpu_config(model_path: &Path) -> BackendConfig {
        BackendConfig {
            model_path: model_path.to_path_buf(),
            device: DevicePreference::Cpu,
            ..BackendConfig::default()
        }
    }

    #[tokio::test]
    async fn test_ready_after_successful_init() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("config.json"), "{}").unwrap();
        let worker = WorkerLifecycle::new(cpu_config(dir.path()));

        assert!(!worker.is_ready());
        let snapshot = worker.ensure_ready().await.unwrap();
        assert_eq!(snapshot.device, ComputeDevice::Cpu);
        assert_eq!(snapshot.backend_location, dir.path());

        let state = worker.snapshot();
        assert!(state.ready);
        assert!(state.initialized_at.is_some());
        assert!(state.last_error.is_none());
    }

    #[tokio::test]
    async fn test_missing_manifest_is_not_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let worker = WorkerLifecycle::new(cpu_config(dir.path()));
        assert!(worker.ensure_ready().await.is_ok());
        assert!(worker.is_ready());
    }

    #[tokio::test]
    async fn test_alternative_manifest_lookup() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("weights.bin"), "").unwrap();
        std::fs::write(dir.path().join("model_config.json"), "{}").unwrap();
        let found = find_alternative_manifest(dir.path()).await.unwrap();
        assert_eq!(found, Some(dir.path().join("model_config.json")));
    }

    #[tokio::test]
    async fn test_failed_init_is_retried() {
        let dir = tempfile::tempdir().unwrap();
        let model_path = dir.path().join("not-yet-mounted");
        let worker = WorkerLifecycle::new(cpu_config(&model_path));

        let err = worker.ensure_ready().await.unwrap_err();
        assert!(matches!(err, AppError::Initialization(_)));
        assert!(!worker.is_ready());
        assert!(worker.snapshot().last_error.unwrap().contains("Model path not found"));

        // The directory shows up later; the next call recovers.
        std::fs::create_dir_all(&model_path).unwrap();
        assert!(worker.ensure_ready().await.is_ok());
        assert_eq!(worker.init_attempts(), 2);
        assert!(worker.snapshot().last_error.is_none());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_callers_initialize_once() {
        let dir = tempfile::tempdir().unwrap();
        let worker = Arc::new(WorkerLifecycle::new(cpu_config(dir.path())));

        let calls = (0..16).map(|_| {
            let worker = Arc::clone(&worker);
            tokio::spawn(async move { worker.ensure_ready().await })
        });
        let results = join_all(calls).await;

        let first = results[0].as_ref().unwrap().as_ref().unwrap().clone();
        for result in results {
            assert_eq!(result.unwrap().unwrap(), first);
        }
        assert_eq!(worker.init_attempts(), 1);
    }

    #[tokio::test]
    async fn test_ready_fast_path_skips_filesystem() {
        let dir = tempfile::tempdir().unwrap();
        let model_path = dir.path().join("model");
        std::fs::create_dir_all(&model_path).unwrap();
        let worker = WorkerLifecycle::new(cpu_config(&model_path));
        worker.ensure_ready().await.unwrap();

        // Removing the directory does not affect an already-ready worker.
        std::fs::remove_dir_all(&model_path).unwrap();
        assert!(worker.ensure_ready().await.is_ok());
        assert_eq!(worker.init_attempts(), 1);
    }

    #[test]
    fn test_try_snapshot_reads_without_initializing() {
        let worker = WorkerLifecycle::new(BackendConfig::default());
        let state = worker.try_snapshot(Duration::from_millis(10)).unwrap();
        assert!(!state.ready);
        assert_eq!(worker.init_attempts(), 0);
    }
}
