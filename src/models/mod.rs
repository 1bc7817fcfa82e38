// Domain models module
// Jobs, results and health data exchanged with the transport

pub mod health;
pub mod tts;

pub use health::{ComputeDevice, GpuInfo, HealthReport, HealthStatus, ModelInfo};
pub use tts::{
    FailureBody, GeneratedAudio, Job, JobInput, JobResult, OutputFormat, SuccessBody,
    usage_example,
};
