//! Locator: diff + tree + log → diagnosis and suspect files.

use std::sync::Arc;
use std::time::Instant;

use fixflow_gateway::GenerationGateway;
use tracing::{info, warn};

use super::{generate, validate_repo_path, DiffSet, LocatorResult, PipelineError, Stage};
use crate::contracts::{dedupe_by_key, parse_closed, require_non_blank};
use crate::prompts::locator_prompt;

const STAGE: Stage = Stage::Locator;

pub struct Locator {
    gateway: Arc<dyn GenerationGateway>,
}

impl Locator {
    pub fn new(gateway: Arc<dyn GenerationGateway>) -> Self {
        Self { gateway }
    }

    /// Diagnose the failure and name the files that directly contribute to it.
    ///
    /// The diff is validated before any generation call. Suspect paths come
    /// back in relevance order with duplicates collapsed.
    pub async fn locate(
        &self,
        diff: &DiffSet,
        tree: &str,
        log: &str,
    ) -> Result<LocatorResult, PipelineError> {
        diff.validate()?;
        let started = Instant::now();

        let raw = generate(self.gateway.as_ref(), STAGE, &locator_prompt(diff, tree, log)).await?;
        let mut result: LocatorResult = parse_closed(STAGE, &raw)?;

        for file in &result.suspect_files {
            require_non_blank(STAGE, "suspectFiles[].path", &file.path)?;
            validate_repo_path(&file.path).map_err(|e| PipelineError::malformed(STAGE, e))?;
        }
        let dropped = dedupe_by_key(&mut result.suspect_files, |f| f.path.clone());
        if dropped > 0 {
            warn!(dropped, "locator listed duplicate suspect paths");
        }

        info!(
            suspects = result.suspect_files.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "locator finished"
        );
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stages::testing::FakeGateway;
    use crate::stages::{CommitInfo, ErrorKind, Hunk};

    fn diff(title: &str) -> DiffSet {
        DiffSet {
            commit: CommitInfo {
                title: title.into(),
                message: "touch Foo".into(),
            },
            diffs: vec![Hunk {
                diff_text: "@@ -10 +10 @@\n-foo.bar();\n+foo = null;\n".into(),
                old_path: "src/Foo.java".into(),
                new_path: "src/Foo.java".into(),
                file_mode_old: "100644".into(),
                file_mode_new: "100644".into(),
                is_new: false,
                is_renamed: false,
                is_deleted: false,
                is_generated: Some(false),
            }],
        }
    }

    const GOOD: &str = r#"{
        "errorSummary": "NullPointerException in Foo",
        "cause": "foo is set to null before use",
        "resolutionHint": "restore the initialisation",
        "suspectFiles": [{"path": "src/Foo.java"}]
    }"#;

    #[tokio::test]
    async fn locates_single_suspect() {
        let gateway = FakeGateway::fixed(GOOD);
        let locator = Locator::new(gateway.clone());
        let result = locator
            .locate(&diff("Fix"), "src/Foo.java", "NullPointerException at Foo.java:10")
            .await
            .unwrap();
        assert_eq!(result.suspect_paths().collect::<Vec<_>>(), vec!["src/Foo.java"]);
        assert_eq!(gateway.calls(), 1);
        assert!(gateway.last_prompt().contains("NullPointerException at Foo.java:10"));
    }

    #[tokio::test]
    async fn invalid_diff_makes_no_call() {
        let gateway = FakeGateway::fixed(GOOD);
        let locator = Locator::new(gateway.clone());
        let err = locator.locate(&diff(""), "", "").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InputValidation);
        assert_eq!(gateway.calls(), 0);
    }

    #[tokio::test]
    async fn legacy_array_shape_rejected() {
        let gateway = FakeGateway::fixed(r#"[{"path": "src/Foo.java"}]"#);
        let err = Locator::new(gateway)
            .locate(&diff("Fix"), "", "")
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::MalformedOutput);
    }

    #[tokio::test]
    async fn missing_field_rejected() {
        let gateway = FakeGateway::fixed(
            r#"{"errorSummary": "e", "cause": "c", "suspectFiles": []}"#,
        );
        let err = Locator::new(gateway)
            .locate(&diff("Fix"), "", "")
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::MalformedOutput);
    }

    #[tokio::test]
    async fn duplicate_suspects_collapsed() {
        let gateway = FakeGateway::fixed(
            r#"{"errorSummary":"e","cause":"c","resolutionHint":"h",
                "suspectFiles":[{"path":"b/B.java"},{"path":"a/A.java"},{"path":"b/B.java"}]}"#,
        );
        let result = Locator::new(gateway)
            .locate(&diff("Fix"), "", "")
            .await
            .unwrap();
        assert_eq!(
            result.suspect_paths().collect::<Vec<_>>(),
            vec!["b/B.java", "a/A.java"]
        );
    }

    #[tokio::test]
    async fn escaping_suspect_path_rejected() {
        let gateway = FakeGateway::fixed(
            r#"{"errorSummary":"e","cause":"c","resolutionHint":"h",
                "suspectFiles":[{"path":"../etc/passwd"}]}"#,
        );
        let err = Locator::new(gateway)
            .locate(&diff("Fix"), "", "")
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::MalformedOutput);
    }

    #[tokio::test]
    async fn empty_suspect_list_is_valid() {
        let gateway = FakeGateway::fixed(
            r#"{"errorSummary":"e","cause":"c","resolutionHint":"h","suspectFiles":[]}"#,
        );
        let result = Locator::new(gateway)
            .locate(&diff("Fix"), "", "")
            .await
            .unwrap();
        assert!(result.suspect_files.is_empty());
    }
}
