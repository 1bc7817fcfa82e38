use log::{debug, info, warn};
use std::ffi::OsStr;
use std::path::PathBuf;
use std::time::Duration;
use tokio::process::Command;
use tokio::time::timeout;

use crate::config::DevicePreference;
use crate::models::{ComputeDevice, GpuInfo};

/// Resolve the compute device for the backend.
///
/// `auto` prefers CUDA when `nvidia-smi` reports at least one GPU.
pub async fn resolve_device(preference: DevicePreference) -> (ComputeDevice, Option<GpuInfo>) {
    match preference {
        DevicePreference::Cpu => (ComputeDevice::Cpu, None),
        DevicePreference::Cuda => (ComputeDevice::Cuda, query_gpus().await),
        DevicePreference::Auto => match query_gpus().await {
            Some(info) if info.gpu_count > 0 => (ComputeDevice::Cuda, Some(info)),
            _ => (ComputeDevice::Cpu, None),
        },
    }
}

// Locate nvidia-smi in PATH
fn nvidia_smi() -> Option<PathBuf> {
    which::which("nvidia-smi").ok()
}

/// Runs while the init lock is held, so a hung driver must not stall jobs.
const QUERY_TIMEOUT: Duration = Duration::from_secs(10);

const QUERY_ARGS: [&str; 2] = ["--query-gpu=name,memory.total", "--format=csv,noheader,nounits"];

/// Ask `nvidia-smi` for the installed GPUs. `None` when unavailable.
pub async fn query_gpus() -> Option<GpuInfo> {
    let path = nvidia_smi()?;
    run_gpu_query(&path, &QUERY_ARGS, QUERY_TIMEOUT).await
}

async fn run_gpu_query(program: impl AsRef<OsStr>, args: &[&str], wait: Duration) -> Option<GpuInfo> {
    let mut cmd = Command::new(program);
    cmd.args(args).kill_on_drop(true);
    let output = match timeout(wait, cmd.output()).await {
        Ok(result) => result.ok()?,
        Err(_) => {
            warn!("GPU query did not finish within {:?}, assuming no GPU", wait);
            return None;
        }
    };

    if !output.status.success() {
        debug!("nvidia-smi exited with {}", output.status);
        return None;
    }

    let info = parse_gpu_listing(&String::from_utf8_lossy(&output.stdout));
    info!("Detected {} GPU(s)", info.gpu_count);
    Some(info)
}

/// Parse `name, memory_mib` lines as printed by `nvidia-smi --format=csv,noheader,nounits`.
pub fn parse_gpu_listing(listing: &str) -> GpuInfo {
    let rows: Vec<&str> = listing.lines().filter(|l| !l.trim().is_empty()).collect();
    let first = rows.first().map(|row| {
        let mut cols = row.splitn(2, ',').map(str::trim);
        let name = cols.next().unwrap_or_default().to_string();
        let memory = cols
            .next()
            .and_then(|mib| mib.parse::<f64>().ok())
            .map(|mib| format!("{:.1}", mib * 1024.0 * 1024.0 / 1e9));
        (name, memory)
    });

    GpuInfo {
        gpu_count: rows.len(),
        gpu_name: first.as_ref().map(|(name, _)| name.clone()),
        gpu_memory_gb: first.and_then(|(_, memory)| memory),
    }
}
