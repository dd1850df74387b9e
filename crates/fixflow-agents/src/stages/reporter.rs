//! Reporter: fixes + resolution report → human-readable error report.
//!
//! Generation writes the prose only. `appliedFiles` is a pure path transform
//! and is computed here.

use std::sync::Arc;
use std::time::Instant;

use fixflow_gateway::GenerationGateway;
use schemars::JsonSchema;
use serde::Deserialize;
use tracing::info;

use super::{basename, generate, ErrorReport, FileFix, PipelineError, ResolutionReport, Stage};
use crate::contracts::{parse_closed, require_non_blank};
use crate::prompts::reporter_prompt;

const STAGE: Stage = Stage::Reporter;

// Generated prose only. Kept free of doc comments: schemars copies them into
// the prompt schema.
#[derive(Debug, Clone, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ReportDraft {
    #[schemars(description = "Short report title.")]
    pub title: String,
    #[schemars(description = "Three to five sentences on the error and its resolution.")]
    pub summary: String,
    #[serde(default, deserialize_with = "null_as_empty")]
    #[schemars(
        with = "String",
        description = "Extra notes, or \"\" when there is nothing to add."
    )]
    pub additional_notes: String,
}

/// Models sometimes answer `null` for "nothing"; treat it as `""`.
fn null_as_empty<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: serde::Deserializer<'de>,
{
    Ok(Option::<String>::deserialize(deserializer)?.unwrap_or_default())
}

pub struct Reporter {
    gateway: Arc<dyn GenerationGateway>,
}

impl Reporter {
    pub fn new(gateway: Arc<dyn GenerationGateway>) -> Self {
        Self { gateway }
    }

    pub async fn report(
        &self,
        fixes: &[FileFix],
        resolution: &ResolutionReport,
    ) -> Result<ErrorReport, PipelineError> {
        let started = Instant::now();

        let raw = generate(self.gateway.as_ref(), STAGE, &reporter_prompt(fixes, resolution)).await?;
        let draft: ReportDraft = parse_closed(STAGE, &raw)?;
        require_non_blank(STAGE, "title", &draft.title)?;
        require_non_blank(STAGE, "summary", &draft.summary)?;

        let report = ErrorReport {
            title: draft.title,
            summary: draft.summary,
            applied_files: applied_files(fixes),
            additional_notes: draft.additional_notes,
        };

        info!(
            applied_files = report.applied_files.len(),
            has_notes = !report.additional_notes.is_empty(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "reporter finished"
        );
        Ok(report)
    }
}

/// Basename of every fixed path, in fix order.
pub fn applied_files(fixes: &[FileFix]) -> Vec<String> {
    fixes.iter().map(|f| basename(&f.path).to_string()).collect()
}
