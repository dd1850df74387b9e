//! Inference stages of the error-resolution pipeline.
//!
//! Each stage is stateless: it builds one prompt from typed input, makes
//! exactly one gateway call, and validates what comes back.
//!
//! | Stage           | Input                                   | Output            |
//! |-----------------|-----------------------------------------|-------------------|
//! | `Locator`       | DiffSet, project tree, error log        | `LocatorResult`   |
//! | `Resolver`      | `ErrorContext`, file snapshots          | `Resolution`      |
//! | `Coordinator`   | path → code map, optional context       | path → instruction|
//! | `Patcher`       | one snapshot, one instruction           | `PatchedFile`     |
//! | `Reporter`      | fixes, resolution report                | `ErrorReport`     |
//! | `AppInference`  | raw hunks, log, application names       | `SuspectedApps`   |
//! | `Refiner`       | captions, uploaded image names          | `RefinedCaptions` |

pub mod app_inference;
pub mod coordinator;
pub mod errors;
pub mod locator;
pub mod patcher;
pub mod refiner;
pub mod reporter;
pub mod resolver;
pub mod types;

use std::time::Instant;

use fixflow_gateway::GenerationGateway;
use tracing::{debug, trace, warn};

use crate::prompts::PROMPT_VERSION;

pub use app_inference::AppInference;
pub use coordinator::Coordinator;
pub use errors::{ErrorKind, PipelineError};
pub use locator::Locator;
pub use patcher::Patcher;
pub use refiner::Refiner;
pub use reporter::Reporter;
pub use resolver::Resolver;
pub use types::{
    basename, validate_repo_path, CommitInfo, DiffSet, ErrorContext, ErrorReport, FileFix,
    FileSnapshot, Hunk, LocatorResult, PatchedFile, PathSetMismatch, RefineEvent, RefineRequest,
    RefinedCaptions, Resolution, ResolutionReport, ResolverResult, Stage, SuspectFile,
    SuspectedApps,
};

/// One text completion on behalf of `stage`, with uniform logging.
pub(crate) async fn generate(
    gateway: &dyn GenerationGateway,
    stage: Stage,
    prompt: &str,
) -> Result<String, PipelineError> {
    debug!(
        %stage,
        prompt_version = PROMPT_VERSION,
        prompt_chars = prompt.len(),
        "calling generation"
    );
    let started = Instant::now();
    let raw = gateway.complete(prompt).await.map_err(|e| {
        warn!(%stage, error = %e, "generation call failed");
        PipelineError::from_gateway(stage, e)
    })?;
    trace!(%stage, raw = %raw, "raw generation output");
    debug!(
        %stage,
        elapsed_ms = started.elapsed().as_millis() as u64,
        output_chars = raw.len(),
        "generation returned"
    );
    Ok(raw)
}
