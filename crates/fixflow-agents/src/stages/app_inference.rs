//! Application inference: an independent diagnostic entry point.
//!
//! The allowed names form a closed world. Generation is told to stay inside
//! it, and the answer is checked anyway.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;

use fixflow_gateway::GenerationGateway;
use tracing::{info, warn};

use super::{generate, PipelineError, Stage, SuspectedApps};
use crate::contracts::{dedupe_by_key, parse_closed};
use crate::prompts::app_inference_prompt;

const STAGE: Stage = Stage::AppInference;

pub struct AppInference {
    gateway: Arc<dyn GenerationGateway>,
}

impl AppInference {
    pub fn new(gateway: Arc<dyn GenerationGateway>) -> Self {
        Self { gateway }
    }

    /// `diffs` are raw hunks; they are passed through unvalidated.
    pub async fn infer(
        &self,
        diffs: &[serde_json::Value],
        log: &str,
        application_names: &[String],
    ) -> Result<SuspectedApps, PipelineError> {
        if application_names.is_empty() {
            return Err(PipelineError::invalid("application name list is empty"));
        }
        if application_names.iter().any(|n| n.trim().is_empty()) {
            return Err(PipelineError::invalid("application name list contains a blank name"));
        }
        let started = Instant::now();

        let prompt = app_inference_prompt(diffs, log, application_names);
        let raw = generate(self.gateway.as_ref(), STAGE, &prompt).await?;
        let mut apps: SuspectedApps = parse_closed(STAGE, &raw)?;

        let allowed: HashSet<&str> = application_names.iter().map(String::as_str).collect();
        let outside: Vec<&str> = apps
            .suspected_apps
            .iter()
            .map(String::as_str)
            .filter(|name| !allowed.contains(name))
            .collect();
        if !outside.is_empty() {
            warn!(?outside, "suspected applications outside the allowed list");
            return Err(PipelineError::malformed(
                STAGE,
                format!("names outside the allowed list: {}", outside.join(", ")),
            ));
        }
        dedupe_by_key(&mut apps.suspected_apps, Clone::clone);

        info!(
            suspected = apps.suspected_apps.len(),
            candidates = application_names.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "app inference finished"
        );
        Ok(apps)
    }
}
