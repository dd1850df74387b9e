//! Patcher: one file + one instruction → full patched file text.
//!
//! Output is raw text, not JSON. Minimal-edit preservation of untouched lines
//! is asked for in the prompt but not verified here; only the shape rules
//! below are enforced.

use std::sync::Arc;
use std::time::Instant;

use fixflow_gateway::GenerationGateway;
use tracing::{debug, info};

use super::{generate, validate_repo_path, FileSnapshot, PatchedFile, PipelineError, Stage};
use crate::contracts::{has_fence_edges, strip_wrapping_fence};
use crate::prompts::patcher_prompt;

const STAGE: Stage = Stage::Patcher;

pub struct Patcher {
    gateway: Arc<dyn GenerationGateway>,
}

impl Patcher {
    pub fn new(gateway: Arc<dyn GenerationGateway>) -> Self {
        Self { gateway }
    }

    pub async fn patch(
        &self,
        file: &FileSnapshot,
        instruction: &str,
    ) -> Result<PatchedFile, PipelineError> {
        validate_repo_path(&file.path).map_err(PipelineError::invalid)?;
        if instruction.trim().is_empty() {
            return Err(PipelineError::invalid(format!(
                "instruction for '{}' is blank",
                file.path
            )));
        }
        let started = Instant::now();

        let raw = generate(self.gateway.as_ref(), STAGE, &patcher_prompt(file, instruction)).await?;
        let patched_code = normalize_patch(&file.code, &raw)?;

        info!(
            path = %file.path,
            original_bytes = file.code.len(),
            patched_bytes = patched_code.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "patch generated"
        );
        Ok(PatchedFile {
            path: file.path.clone(),
            patched_code,
        })
    }
}

/// Shape checks and cleanup for raw patch output.
///
/// - one wrapping fence is removed, unless the original itself is fenced
/// - fence markers left at either edge are rejected
/// - blank output for a non-blank original is rejected
/// - the original's trailing newline convention is restored
pub fn normalize_patch(original: &str, raw: &str) -> Result<String, PipelineError> {
    let original_fenced = has_fence_edges(original);

    let body = if original_fenced {
        raw
    } else {
        match strip_wrapping_fence(raw) {
            Some(inner) => {
                debug!("removed wrapping fence from patch output");
                inner
            }
            None => raw,
        }
    };

    if !original_fenced && has_fence_edges(body) {
        return Err(PipelineError::malformed(
            STAGE,
            "patch output carries markdown fence markers",
        ));
    }
    if body.trim().is_empty() && !original.trim().is_empty() {
        return Err(PipelineError::malformed(
            STAGE,
            "patch output is empty for a non-empty file",
        ));
    }

    Ok(match_trailing_newline(original, body))
}

fn match_trailing_newline(original: &str, body: &str) -> String {
    let newline = if original.ends_with("\r\n") {
        Some("\r\n")
    } else if original.ends_with('\n') {
        Some("\n")
    } else {
        None
    };

    match newline {
        Some(nl) if !body.ends_with('\n') => format!("{body}{nl}"),
        None if body.ends_with('\n') => body
            .strip_suffix("\r\n")
            .or_else(|| body.strip_suffix('\n'))
            .unwrap_or(body)
            .to_string(),
        _ => body.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stages::testing::FakeGateway;
    use crate::stages::ErrorKind;

    const ORIGINAL: &str = "class Foo {\n    void run() { foo.bar(); }\n}\n";
    const PATCHED: &str = "class Foo {\n    void run() { if (foo != null) foo.bar(); }\n}\n";

    #[tokio::test]
    async fn returns_full_text() {
        let gateway = FakeGateway::fixed(PATCHED);
        let patched = Patcher::new(gateway.clone())
            .patch(&FileSnapshot::new("src/Foo.java", ORIGINAL), "guard foo")
            .await
            .unwrap();
        assert_eq!(patched.patched_code, PATCHED);
        assert_eq!(patched.download_name(), "Foo.java");
        assert!(gateway.last_prompt().contains("guard foo"));
    }

    #[tokio::test]
    async fn blank_instruction_rejected_without_call() {
        let gateway = FakeGateway::fixed(PATCHED);
        let err = Patcher::new(gateway.clone())
            .patch(&FileSnapshot::new("src/Foo.java", ORIGINAL), " ")
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InputValidation);
        assert_eq!(gateway.calls(), 0);
    }

    #[test]
    fn wrapping_fence_removed() {
        let raw = format!("```java\n{PATCHED}```");
        let out = normalize_patch(ORIGINAL, &raw).unwrap();
        assert_eq!(out, PATCHED);
        assert!(!out.contains("```"));
    }

    #[test]
    fn stray_fence_rejected() {
        let raw = format!("```java\n{PATCHED}");
        let err = normalize_patch(ORIGINAL, &raw).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::MalformedOutput);
    }

    #[test]
    fn fenced_original_kept_verbatim() {
        let original = "```\nexample\n```\n";
        let out = normalize_patch(original, "```\nexample two\n```\n").unwrap();
        assert_eq!(out, "```\nexample two\n```\n");
    }

    #[test]
    fn empty_output_rejected() {
        assert!(normalize_patch(ORIGINAL, "  \n").is_err());
        assert_eq!(normalize_patch("", "").unwrap(), "");
    }

    #[test]
    fn trailing_newline_restored() {
        assert_eq!(normalize_patch("a\n", "b").unwrap(), "b\n");
        assert_eq!(normalize_patch("a\r\n", "b").unwrap(), "b\r\n");
        assert_eq!(normalize_patch("a", "b\n").unwrap(), "b");
        assert_eq!(normalize_patch("a\n", "b\n\n").unwrap(), "b\n\n");
    }
}
