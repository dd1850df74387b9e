//! Fixflow: LLM-driven error resolution.
//!
//! Takes a failing change (diff, project tree, error log) and works it
//! through a fixed sequence of generation stages to a set of patched files
//! and a human-readable report.
//!
//! # Modules
//!
//! | Module         | Role                                                    |
//! |----------------|---------------------------------------------------------|
//! | `stages`       | The individual inference stages and their data types    |
//! | `orchestrator` | Sequences the stages for a full run                     |
//! | `contracts`    | Closed-shape parsing of generation output               |
//! | `prompts`      | Versioned prompt builders                               |
//! | `sources`      | Reading suspect files between locate and resolve        |
//! | `uploads`      | Resolving uploaded images for the refiner               |
//! | `config`       | Env + TOML service configuration                        |
//! | `retry`        | Caller-side retry of transport failures                 |
//! | `telemetry`    | Tracing setup and per-run metrics                       |
//!
//! The generation capability itself lives in the `fixflow-gateway` crate.

pub mod config;
pub mod contracts;
pub mod orchestrator;
pub mod prompts;
pub mod retry;
pub mod sources;
pub mod stages;
pub mod telemetry;
pub mod uploads;

pub use config::{PatchStrategy, PipelineConfig, ServiceConfig};
pub use orchestrator::{
    HaltReason, HaltedRun, PatchFailure, Pipeline, PipelineOutcome, PipelineReport,
    PipelineRequest,
};
pub use sources::{InMemorySource, SourceProvider, WorkspaceSource};
pub use stages::{ErrorKind, PipelineError};
pub use uploads::UploadStore;
