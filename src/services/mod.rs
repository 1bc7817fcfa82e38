// Services module
// Job orchestration separated by responsibility

pub mod handler;    // Job entry point
pub mod health;     // Health reporting
pub mod tts;        // Backend invocation and artifact handling
pub mod validation; // Input normalisation
pub mod worker;     // Backend readiness lifecycle

#[cfg(test)]
mod tests;

pub use handler::JobHandler;
pub use health::HealthReporter;
pub use tts::{GenerationOrchestrator, ScriptBackend, SynthesisBackend};
pub use worker::{WorkerLifecycle, WorkerSnapshot, WorkerState};
