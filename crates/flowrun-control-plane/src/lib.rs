//! FlowRun Control Plane Library
//!
//! This crate provides the orchestration engine for FlowRun: the in-memory
//! task registry, the per-task job runner, the orchestrator that launches
//! runners, and the HTTP API in front of them.

pub mod config;
pub mod history;
pub mod http;
pub mod metrics;
pub mod orchestrator;
pub mod registry;
pub mod remote;
pub mod runner;
pub mod state;

#[cfg(test)]
pub(crate) mod test_helpers;

pub use config::{Config, RunnerConfig};
pub use orchestrator::{Orchestrator, OrchestratorError, Requester, SubmitRequest};
pub use registry::{RegistryError, TaskEntry, TaskRegistry};
pub use runner::JobRunner;
pub use state::{AppState, Collaborators, ProgressEvent};
