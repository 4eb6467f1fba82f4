//! Runtime side of the assistant: event bus, workers and their supervisor.
//!
//! - `bus`: the two event queues.
//! - `pipeline`: orchestrator owning worker lifecycles.
//! - `ingestion`: transport or replay → fusion engine → bus.
//! - `manual`: keyboard-driven vision trigger.
//! - `audio`: tone and speech playback consumer.
//! - `vision`: capture/caption consumer.
//! - `collaborators`: capture, caption, speech and tone back-ends.
//! - `server`: Actix Web snapshot and metrics preview.
//! - `watchdog`: ingestion heartbeat monitoring.
//! - `telemetry`: tracing and Prometheus setup.

pub use config::{
    AssistConfig, CollaboratorArgs, FusionArgs, ReplayArgs, ReplaySource, RunArgs, SerialSource,
    SourceConfig, TelemetryArgs, TelemetryOptions,
};
pub use pipeline::{Orchestrator, run};

pub mod audio;
pub mod bus;
pub mod collaborators;
pub mod config;
pub mod ingestion;
pub mod manual;
pub mod pipeline;
pub mod server;
pub mod telemetry;
pub mod vision;
pub mod watchdog;
