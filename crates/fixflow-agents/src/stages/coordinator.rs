//! Multi-file coordinator: one aggregated request for files that must change
//! together.
//!
//! The returned mapping has exactly the input key set. Anything else fails
//! the whole batch; no partial instruction set is ever handed out.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;

use fixflow_gateway::GenerationGateway;
use tracing::info;

use super::{generate, validate_repo_path, ErrorContext, PipelineError, Stage};
use crate::contracts::{parse_closed_map, require_non_blank};
use crate::prompts::coordinator_prompt;

const STAGE: Stage = Stage::Coordinator;

pub struct Coordinator {
    gateway: Arc<dyn GenerationGateway>,
}

impl Coordinator {
    pub fn new(gateway: Arc<dyn GenerationGateway>) -> Self {
        Self { gateway }
    }

    /// Map every input path to one edit instruction.
    pub async fn coordinate(
        &self,
        files: &BTreeMap<String, String>,
        context: Option<&ErrorContext>,
    ) -> Result<BTreeMap<String, String>, PipelineError> {
        if files.is_empty() {
            return Err(PipelineError::invalid("coordinate needs at least one file"));
        }
        for path in files.keys() {
            validate_repo_path(path).map_err(PipelineError::invalid)?;
        }
        let started = Instant::now();

        let raw = generate(self.gateway.as_ref(), STAGE, &coordinator_prompt(files, context)).await?;
        let instructions = parse_closed_map(STAGE, &raw, files.keys().map(String::as_str))?;
        for (path, instruction) in &instructions {
            require_non_blank(STAGE, path, instruction)?;
        }

        info!(
            files = instructions.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "coordinator finished"
        );
        Ok(instructions)
    }
}
