//! Pipeline orchestrator: Locator → Resolver → (per-file) Patcher → Reporter.
//!
//! ```text
//! PipelineRequest { diff, tree, log }
//!   │
//!   ├─ Locator ──────────── zero suspects ──────────► Halted(NoSuspects)
//!   ├─ SourceProvider::read  none readable ─────────► Halted(NoReadableFiles)
//!   ├─ Resolver ─────────── path mismatch → warning
//!   ├─ [Coordinator]        coordinated strategy, ≥ 2 known files
//!   ├─ Patcher × N          JoinSet + Semaphore(max_parallel_patches)
//!   └─ Reporter ────────────────────────────────────► Completed(PipelineReport)
//! ```
//!
//! ## Partial failure policy
//!
//! A failed patch is recorded as a `PatchFailure` and the run continues; the
//! report covers only the patches that landed. A failed coordinator batch
//! fails every file in that batch (no partial instruction set is applied).
//! Failures in Locator, Resolver or Reporter end the run with an error.
//!
//! The orchestrator also exposes each stage on its own, for callers that
//! drive the sequence themselves.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use fixflow_gateway::GenerationGateway;
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::config::{PatchStrategy, PipelineConfig, ServiceConfig};
use crate::sources::SourceProvider;
use crate::stages::{
    AppInference, Coordinator, DiffSet, ErrorContext, ErrorKind, ErrorReport, FileFix,
    FileSnapshot, Locator, LocatorResult, PatchedFile, Patcher, PipelineError, RefineEvent,
    RefineRequest, RefinedCaptions, Refiner, Reporter, Resolution, ResolutionReport, Resolver,
    Stage, SuspectedApps,
};
use crate::telemetry::RunMetrics;
use crate::uploads::UploadStore;

const DEFAULT_UPLOAD_DIR: &str = "uploads";

// ── Request / outcome types ──────────────────────────────────────────────────

/// Input to a full pipeline run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineRequest {
    pub diff: DiffSet,
    /// Opaque directory listing.
    pub tree: String,
    /// Opaque error log.
    pub log: String,
}

/// Why a run stopped before resolving anything.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HaltReason {
    /// The Locator found no file contributing to the failure.
    NoSuspects,
    /// None of the suspect files could be read.
    NoReadableFiles,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HaltedRun {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub reason: HaltReason,
    pub locator: LocatorResult,
    pub warnings: Vec<String>,
    pub metrics: RunMetrics,
}

/// A patch that could not be produced. The run carries on without it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PatchFailure {
    pub path: String,
    pub kind: ErrorKind,
    pub message: String,
}

impl PatchFailure {
    fn from_error(path: &str, err: &PipelineError) -> Self {
        Self {
            path: path.to_string(),
            kind: err.kind(),
            message: err.to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineReport {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub locator: LocatorResult,
    pub resolution: Resolution,
    /// Successful patches, in fix order.
    pub patches: Vec<PatchedFile>,
    pub failed_patches: Vec<PatchFailure>,
    pub report: ErrorReport,
    pub warnings: Vec<String>,
    pub metrics: RunMetrics,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum PipelineOutcome {
    Halted(HaltedRun),
    Completed(Box<PipelineReport>),
}

impl PipelineOutcome {
    pub fn is_completed(&self) -> bool {
        matches!(self, Self::Completed(_))
    }

    pub fn run_id(&self) -> Uuid {
        match self {
            Self::Halted(halted) => halted.run_id,
            Self::Completed(report) => report.run_id,
        }
    }
}

// ── Pipeline ─────────────────────────────────────────────────────────────────

pub struct Pipeline {
    gateway: Arc<dyn GenerationGateway>,
    config: PipelineConfig,
    locator: Locator,
    resolver: Resolver,
    coordinator: Coordinator,
    patcher: Arc<Patcher>,
    reporter: Reporter,
    app_inference: AppInference,
    refiner: Refiner,
}

impl Pipeline {
    pub fn new(gateway: Arc<dyn GenerationGateway>, config: PipelineConfig) -> Self {
        Self {
            config,
            locator: Locator::new(gateway.clone()),
            resolver: Resolver::new(gateway.clone()),
            coordinator: Coordinator::new(gateway.clone()),
            patcher: Arc::new(Patcher::new(gateway.clone())),
            reporter: Reporter::new(gateway.clone()),
            app_inference: AppInference::new(gateway.clone()),
            refiner: Refiner::new(gateway.clone(), UploadStore::new(DEFAULT_UPLOAD_DIR)),
            gateway,
        }
    }

    /// Resolve uploaded images against `uploads` instead of `./uploads`.
    pub fn with_uploads(mut self, uploads: UploadStore) -> Self {
        self.refiner = Refiner::new(self.gateway.clone(), uploads);
        self
    }

    /// Validate `config`, connect the production gateway, and build.
    pub fn from_config(config: &ServiceConfig) -> Result<Self, PipelineError> {
        config.validate()?;
        let gateway = fixflow_gateway::connect(config.gateway.clone())
            .map_err(|e| PipelineError::Configuration(e.to_string()))?;
        Ok(Self::new(gateway, config.pipeline.clone())
            .with_uploads(UploadStore::new(config.upload_dir.clone())))
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    // ── Boundary operations ──────────────────────────────────────────────

    pub async fn locate(
        &self,
        diff: &DiffSet,
        tree: &str,
        log: &str,
    ) -> Result<LocatorResult, PipelineError> {
        self.locator.locate(diff, tree, log).await
    }

    pub async fn resolve(
        &self,
        context: &ErrorContext,
        files: &[FileSnapshot],
    ) -> Result<Resolution, PipelineError> {
        self.resolver.resolve(context, files).await
    }

    /// The result's `download_name()` is the suggested filename.
    pub async fn patch_one(
        &self,
        path: &str,
        original_code: &str,
        instruction: &str,
    ) -> Result<PatchedFile, PipelineError> {
        self.patcher
            .patch(&FileSnapshot::new(path, original_code), instruction)
            .await
    }

    pub async fn coordinate_multi_file(
        &self,
        files: &BTreeMap<String, String>,
        context: Option<&ErrorContext>,
    ) -> Result<BTreeMap<String, String>, PipelineError> {
        self.coordinator.coordinate(files, context).await
    }

    pub async fn report(
        &self,
        fixes: &[FileFix],
        resolution: &ResolutionReport,
    ) -> Result<ErrorReport, PipelineError> {
        self.reporter.report(fixes, resolution).await
    }

    pub async fn infer_applications(
        &self,
        diffs: &[serde_json::Value],
        log: &str,
        application_names: &[String],
    ) -> Result<SuspectedApps, PipelineError> {
        self.app_inference.infer(diffs, log, application_names).await
    }

    pub async fn refine(&self, request: &RefineRequest) -> Result<RefinedCaptions, PipelineError> {
        self.refiner.refine(request).await
    }

    pub async fn refine_stream(
        &self,
        request: &RefineRequest,
        events: mpsc::Sender<RefineEvent>,
        cancel: CancellationToken,
    ) -> Result<usize, PipelineError> {
        self.refiner.refine_stream(request, events, cancel).await
    }

    // ── Full run ─────────────────────────────────────────────────────────

    /// Run every stage in order against files read through `sources`.
    pub async fn run(
        &self,
        request: &PipelineRequest,
        sources: &dyn SourceProvider,
    ) -> Result<PipelineOutcome, PipelineError> {
        let run_id = Uuid::new_v4();
        let span = info_span!("pipeline_run", %run_id, strategy = %self.config.patch_strategy);
        self.run_inner(run_id, request, sources).instrument(span).await
    }

    async fn run_inner(
        &self,
        run_id: Uuid,
        request: &PipelineRequest,
        sources: &dyn SourceProvider,
    ) -> Result<PipelineOutcome, PipelineError> {
        let started_at = Utc::now();
        let clock = Instant::now();
        let mut metrics = RunMetrics::default();
        let mut warnings = Vec::new();
        info!(hunks = request.diff.diffs.len(), "pipeline run starting");

        // --- locate ---
        let t = Instant::now();
        let located = self
            .locator
            .locate(&request.diff, &request.tree, &request.log)
            .await?;
        metrics.record(Stage::Locator, t.elapsed(), 1);

        if located.suspect_files.is_empty() {
            info!("no suspect files; halting");
            metrics.finish(clock.elapsed());
            return Ok(PipelineOutcome::Halted(HaltedRun {
                run_id,
                started_at,
                reason: HaltReason::NoSuspects,
                locator: located,
                warnings,
                metrics,
            }));
        }

        // --- read ---
        let mut snapshots = Vec::with_capacity(located.suspect_files.len());
        for path in located.suspect_paths() {
            match sources.read(path).await {
                Ok(code) => snapshots.push(FileSnapshot::new(path, code)),
                Err(e) => {
                    warn!(path, error = %e, "suspect file unreadable; skipping");
                    warnings.push(format!("skipped unreadable file {path}: {e}"));
                }
            }
        }
        if snapshots.is_empty() {
            info!("no suspect file could be read; halting");
            metrics.finish(clock.elapsed());
            return Ok(PipelineOutcome::Halted(HaltedRun {
                run_id,
                started_at,
                reason: HaltReason::NoReadableFiles,
                locator: located,
                warnings,
                metrics,
            }));
        }

        // --- resolve ---
        let context = located.context();
        let t = Instant::now();
        let resolution = self.resolver.resolve(&context, &snapshots).await?;
        metrics.record(Stage::Resolver, t.elapsed(), 1);
        if let Some(mismatch) = &resolution.mismatch {
            warnings.push(format!("resolver fix paths differ from input files: {mismatch}"));
        }

        // --- instructions ---
        let by_path: HashMap<&str, &FileSnapshot> =
            snapshots.iter().map(|s| (s.path.as_str(), s)).collect();
        let mut jobs: Vec<(FileSnapshot, String)> = Vec::new();
        for fix in &resolution.result.file_fixes {
            match by_path.get(fix.path.as_str()) {
                Some(snapshot) => jobs.push(((*snapshot).clone(), fix.instruction.clone())),
                None => warnings.push(format!("no source for fix path {}; not patched", fix.path)),
            }
        }

        let mut failed_patches = Vec::new();
        if self.config.patch_strategy == PatchStrategy::Coordinated && jobs.len() >= 2 {
            let files: BTreeMap<String, String> = jobs
                .iter()
                .map(|(s, _)| (s.path.clone(), s.code.clone()))
                .collect();
            let t = Instant::now();
            let coordinated = self.coordinator.coordinate(&files, Some(&context)).await;
            metrics.record(Stage::Coordinator, t.elapsed(), 1);
            match coordinated {
                Ok(instructions) => {
                    for (snapshot, instruction) in &mut jobs {
                        if let Some(coordinated) = instructions.get(&snapshot.path) {
                            *instruction = coordinated.clone();
                        }
                    }
                }
                Err(e) => {
                    warn!(error = %e, files = jobs.len(), "coordinated batch failed");
                    warnings.push(format!("coordinated batch failed: {e}"));
                    failed_patches.extend(
                        jobs.drain(..)
                            .map(|(s, _)| PatchFailure::from_error(&s.path, &e)),
                    );
                }
            }
        }

        // --- patch ---
        let applied: HashMap<String, String> = jobs
            .iter()
            .map(|(s, instruction)| (s.path.clone(), instruction.clone()))
            .collect();
        let t = Instant::now();
        let calls = jobs.len() as u32;
        let (patches, failures) = self.patch_all(jobs).await;
        if calls > 0 {
            metrics.record(Stage::Patcher, t.elapsed(), calls);
        }
        for failure in &failures {
            warnings.push(format!("patch failed for {}: {}", failure.path, failure.message));
        }
        failed_patches.extend(failures);

        // --- report ---
        let landed = applied_fixes(&resolution.result.file_fixes, &patches, &applied);
        let t = Instant::now();
        let report = self
            .reporter
            .report(&landed, &resolution.result.resolution_report)
            .await?;
        metrics.record(Stage::Reporter, t.elapsed(), 1);
        metrics.finish(clock.elapsed());

        info!(
            patched = patches.len(),
            failed = failed_patches.len(),
            warnings = warnings.len(),
            total_ms = metrics.total_ms,
            "pipeline run complete"
        );
        Ok(PipelineOutcome::Completed(Box::new(PipelineReport {
            run_id,
            started_at,
            locator: located,
            resolution,
            patches,
            failed_patches,
            report,
            warnings,
            metrics,
        })))
    }

    /// Patch every job concurrently; results come back in job order.
    async fn patch_all(
        &self,
        jobs: Vec<(FileSnapshot, String)>,
    ) -> (Vec<PatchedFile>, Vec<PatchFailure>) {
        let order: Vec<String> = jobs.iter().map(|(s, _)| s.path.clone()).collect();
        let sem = Arc::new(Semaphore::new(self.config.max_parallel_patches.max(1)));
        let mut join_set: JoinSet<(String, Result<PatchedFile, PipelineError>)> = JoinSet::new();

        for (snapshot, instruction) in jobs {
            let sem = sem.clone();
            let patcher = self.patcher.clone();
            join_set.spawn(async move {
                let _permit = sem.acquire_owned().await.ok();
                let result = patcher.patch(&snapshot, &instruction).await;
                (snapshot.path, result)
            });
        }

        let mut done: HashMap<String, Result<PatchedFile, PipelineError>> = HashMap::new();
        while let Some(res) = join_set.join_next().await {
            match res {
                Ok((path, result)) => {
                    debug!(path = %path, ok = result.is_ok(), "patch task finished");
                    done.insert(path, result);
                }
                Err(e) => warn!(error = %e, "patch task panicked"),
            }
        }

        let mut patches = Vec::new();
        let mut failures = Vec::new();
        for path in order {
            match done.remove(&path) {
                Some(Ok(patched)) => patches.push(patched),
                Some(Err(e)) => failures.push(PatchFailure::from_error(&path, &e)),
                None => failures.push(PatchFailure {
                    path,
                    kind: ErrorKind::Internal,
                    message: "patch task did not complete".to_string(),
                }),
            }
        }
        (patches, failures)
    }
}

/// Fixes that actually landed, in patch order, carrying the instruction the
/// Patcher was given (the Coordinator's, when it ran).
fn applied_fixes(
    fixes: &[FileFix],
    patches: &[PatchedFile],
    instructions: &HashMap<String, String>,
) -> Vec<FileFix> {
    patches
        .iter()
        .filter_map(|patched| {
            let fix = fixes.iter().find(|f| f.path == patched.path)?;
            let instruction = instructions
                .get(&patched.path)
                .cloned()
                .unwrap_or_else(|| fix.instruction.clone());
            Some(FileFix {
                instruction,
                ..fix.clone()
            })
        })
        .collect()
}
