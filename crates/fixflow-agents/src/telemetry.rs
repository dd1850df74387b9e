//! Logging setup and per-run metrics.
//!
//! Diagnostics go through `tracing` to stderr, so JSON results on stdout stay
//! machine-readable. `RunMetrics` is attached to every pipeline report.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing_subscriber::EnvFilter;

use crate::stages::Stage;

/// Install the global subscriber. `RUST_LOG` wins; default level is `info`.
///
/// Safe to call more than once; later calls are no-ops.
pub fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into());
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    let _ = if json {
        builder.json().try_init()
    } else {
        builder.try_init()
    };
}

/// Wall time spent in one stage of a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StageTiming {
    pub stage: Stage,
    pub elapsed_ms: u64,
    /// Generation calls issued by this stage in this run.
    pub calls: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunMetrics {
    pub stages: Vec<StageTiming>,
    pub generation_calls: u32,
    pub total_ms: u64,
}

impl RunMetrics {
    /// Add a stage timing. Repeated stages accumulate into one entry.
    pub fn record(&mut self, stage: Stage, elapsed: Duration, calls: u32) {
        let elapsed_ms = elapsed.as_millis() as u64;
        self.generation_calls += calls;
        match self.stages.iter_mut().find(|t| t.stage == stage) {
            Some(timing) => {
                timing.elapsed_ms += elapsed_ms;
                timing.calls += calls;
            }
            None => self.stages.push(StageTiming {
                stage,
                elapsed_ms,
                calls,
            }),
        }
    }

    pub fn finish(&mut self, total: Duration) {
        self.total_ms = total.as_millis() as u64;
    }

    pub fn stage(&self, stage: Stage) -> Option<&StageTiming> {
        self.stages.iter().find(|t| t.stage == stage)
    }
}
