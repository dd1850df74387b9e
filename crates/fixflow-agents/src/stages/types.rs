//! Request-scoped data model shared by every stage.
//!
//! All values live for one pipeline invocation and are never persisted.
//! Field names on the wire are the stable contract (camelCase for the
//! pipeline's own payloads, the hosting platform's snake_case for diffs).
//!
//! ## Key types
//!
//! | Type             | Produced by          | Consumed by                  |
//! |------------------|----------------------|------------------------------|
//! | `DiffSet`        | caller               | Locator                      |
//! | `LocatorResult`  | Locator              | Orchestrator, Resolver       |
//! | `FileSnapshot`   | caller / SourceProvider | Resolver, Coordinator, Patcher |
//! | `ResolverResult` | Resolver             | Patcher (instructions), Reporter |
//! | `PatchedFile`    | Patcher              | caller                       |
//! | `ErrorReport`    | Reporter             | caller                       |
//! | `SuspectedApps`  | Application inference| caller                       |

use std::collections::BTreeSet;
use std::fmt;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::errors::PipelineError;

// ── Stage ────────────────────────────────────────────────────────────────────

/// Inference stages, used for logging and error attribution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Locator,
    Resolver,
    Coordinator,
    Patcher,
    Reporter,
    AppInference,
    Refiner,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Locator => write!(f, "locator"),
            Self::Resolver => write!(f, "resolver"),
            Self::Coordinator => write!(f, "coordinator"),
            Self::Patcher => write!(f, "patcher"),
            Self::Reporter => write!(f, "reporter"),
            Self::AppInference => write!(f, "app_inference"),
            Self::Refiner => write!(f, "refiner"),
        }
    }
}

// ── Paths ────────────────────────────────────────────────────────────────────

/// Check that `path` is repository-relative: non-blank, not absolute, and
/// free of `..` segments.
pub fn validate_repo_path(path: &str) -> Result<(), String> {
    if path.trim().is_empty() {
        return Err("path is empty".to_string());
    }
    if path.starts_with('/') || path.starts_with('\\') {
        return Err(format!("path '{path}' is absolute"));
    }
    let bytes = path.as_bytes();
    if bytes.len() >= 2 && bytes[1] == b':' && bytes[0].is_ascii_alphabetic() {
        return Err(format!("path '{path}' has a drive prefix"));
    }
    if path.split(['/', '\\']).any(|seg| seg == "..") {
        return Err(format!("path '{path}' escapes the repository"));
    }
    Ok(())
}

/// Final path component, tolerating both separator styles.
pub fn basename(path: &str) -> &str {
    path.rsplit(['/', '\\'])
        .find(|seg| !seg.is_empty())
        .unwrap_or(path)
}

// ── DiffSet ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitInfo {
    pub title: String,
    pub message: String,
}

/// One file transition inside a commit diff.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Hunk {
    /// Unified diff text for this file.
    #[serde(rename = "diff")]
    pub diff_text: String,
    pub old_path: String,
    pub new_path: String,
    #[serde(rename = "a_mode")]
    pub file_mode_old: String,
    #[serde(rename = "b_mode")]
    pub file_mode_new: String,
    #[serde(rename = "new_file")]
    pub is_new: bool,
    #[serde(rename = "renamed_file")]
    pub is_renamed: bool,
    #[serde(rename = "deleted_file")]
    pub is_deleted: bool,
    /// `None` when the host could not tell.
    #[serde(rename = "generated_file", default)]
    pub is_generated: Option<bool>,
}

impl Hunk {
    /// Path the file lives at after this transition.
    pub fn path(&self) -> &str {
        if self.is_deleted {
            &self.old_path
        } else {
            &self.new_path
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiffSet {
    pub commit: CommitInfo,
    pub diffs: Vec<Hunk>,
}

impl DiffSet {
    /// Parse and validate a raw JSON diff payload.
    pub fn parse(raw: &str) -> Result<Self, PipelineError> {
        let diff: DiffSet = serde_json::from_str(raw)
            .map_err(|e| PipelineError::invalid(format!("diff is not a valid DiffSet: {e}")))?;
        diff.validate()?;
        Ok(diff)
    }

    pub fn validate(&self) -> Result<(), PipelineError> {
        if self.commit.title.trim().is_empty() {
            return Err(PipelineError::invalid("commit.title is empty"));
        }
        for (i, hunk) in self.diffs.iter().enumerate() {
            validate_repo_path(&hunk.old_path)
                .map_err(|e| PipelineError::invalid(format!("diffs[{i}].old_path: {e}")))?;
            validate_repo_path(&hunk.new_path)
                .map_err(|e| PipelineError::invalid(format!("diffs[{i}].new_path: {e}")))?;
        }
        Ok(())
    }

    /// Paths touched by this diff, in hunk order.
    pub fn touched_paths(&self) -> Vec<&str> {
        self.diffs.iter().map(Hunk::path).collect()
    }
}

// ── Locator ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct SuspectFile {
    /// Repository-relative path.
    pub path: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct LocatorResult {
    pub error_summary: String,
    pub cause: String,
    pub resolution_hint: String,
    /// Relevance order as produced by generation.
    pub suspect_files: Vec<SuspectFile>,
}

impl LocatorResult {
    /// Carry the diagnosis forward verbatim into the Resolver.
    pub fn context(&self) -> ErrorContext {
        ErrorContext {
            error_summary: self.error_summary.clone(),
            cause: self.cause.clone(),
            resolution_hint: self.resolution_hint.clone(),
        }
    }

    pub fn suspect_paths(&self) -> impl Iterator<Item = &str> {
        self.suspect_files.iter().map(|f| f.path.as_str())
    }
}

/// Diagnosis threaded from the Locator into the Resolver and Coordinator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorContext {
    pub error_summary: String,
    pub cause: String,
    pub resolution_hint: String,
}

// ── Resolver ─────────────────────────────────────────────────────────────────

/// Full current content of one file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileSnapshot {
    pub path: String,
    pub code: String,
}

impl FileSnapshot {
    pub fn new(path: impl Into<String>, code: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            code: code.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct FileFix {
    pub path: String,
    /// Natural-language edit directive, not a diff.
    pub instruction: String,
    pub explanation: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ResolutionReport {
    pub error_summary: String,
    pub cause: String,
    pub final_resolution: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ResolverResult {
    pub file_fixes: Vec<FileFix>,
    pub resolution_report: ResolutionReport,
}

/// Difference between an expected path set and the one generation produced.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PathSetMismatch {
    /// Expected but absent.
    pub missing: Vec<String>,
    /// Present but never asked for.
    pub unexpected: Vec<String>,
}

impl PathSetMismatch {
    /// `None` when both sets are equal. Output lists are sorted.
    pub fn between<'a, 'b>(
        expected: impl IntoIterator<Item = &'a str>,
        actual: impl IntoIterator<Item = &'b str>,
    ) -> Option<Self> {
        let expected: BTreeSet<&str> = expected.into_iter().collect();
        let actual: BTreeSet<&str> = actual.into_iter().collect();
        let missing: Vec<String> = expected.difference(&actual).map(|s| s.to_string()).collect();
        let unexpected: Vec<String> = actual.difference(&expected).map(|s| s.to_string()).collect();
        if missing.is_empty() && unexpected.is_empty() {
            None
        } else {
            Some(Self {
                missing,
                unexpected,
            })
        }
    }
}

impl fmt::Display for PathSetMismatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "missing [{}], unexpected [{}]",
            self.missing.join(", "),
            self.unexpected.join(", ")
        )
    }
}

/// Resolver output plus the partial-result condition, if any.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resolution {
    pub result: ResolverResult,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mismatch: Option<PathSetMismatch>,
}

impl Resolution {
    pub fn is_complete(&self) -> bool {
        self.mismatch.is_none()
    }
}

// ── Patcher ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PatchedFile {
    pub path: String,
    pub patched_code: String,
}

impl PatchedFile {
    /// Suggested filename when the patch is offered as a download.
    pub fn download_name(&self) -> &str {
        basename(&self.path)
    }
}

// ── Reporter ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorReport {
    pub title: String,
    pub summary: String,
    /// Basenames only, one per fix, in fix order.
    pub applied_files: Vec<String>,
    /// Empty string when there is nothing to add; never absent.
    pub additional_notes: String,
}

// ── Application inference ────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct SuspectedApps {
    /// One-line justification.
    #[serde(alias = "Reason")]
    pub reason: String,
    /// Always a subset of the caller's application names.
    pub suspected_apps: Vec<String>,
}

// ── Image refinement ─────────────────────────────────────────────────────────

/// Captions to refine against a set of uploaded images.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefineRequest {
    #[serde(default)]
    pub texts: Vec<String>,
    /// Upload-directory filenames, never paths.
    #[serde(default)]
    pub filenames: Vec<String>,
}

/// One refined caption per input caption, same order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct RefinedCaptions {
    pub refined_texts: Vec<String>,
}

/// Incremental refinement event as pushed to a streaming consumer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RefineEvent {
    Delta(String),
    Done,
    Error(String),
}

impl RefineEvent {
    /// Wire form: `{"stream": ..}`, `{"done": true}` or `{"error": ..}`.
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Self::Delta(text) => serde_json::json!({ "stream": text }),
            Self::Done => serde_json::json!({ "done": true }),
            Self::Error(message) => serde_json::json!({ "error": message }),
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Delta(_))
    }
}
