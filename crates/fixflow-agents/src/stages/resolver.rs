//! Resolver: diagnosis + file contents → one fix instruction per file.
//!
//! A fix set whose paths differ from the input set is a partial result, not
//! an error: matching fixes are still usable, so the mismatch travels next to
//! them in [`Resolution`].

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;

use fixflow_gateway::GenerationGateway;
use tracing::{info, warn};

use super::{
    generate, validate_repo_path, ErrorContext, FileSnapshot, PathSetMismatch, PipelineError,
    Resolution, ResolverResult, Stage,
};
use crate::contracts::{dedupe_by_key, parse_closed, require_non_blank};
use crate::prompts::resolver_prompt;

const STAGE: Stage = Stage::Resolver;

pub struct Resolver {
    gateway: Arc<dyn GenerationGateway>,
}

impl Resolver {
    pub fn new(gateway: Arc<dyn GenerationGateway>) -> Self {
        Self { gateway }
    }

    pub async fn resolve(
        &self,
        context: &ErrorContext,
        files: &[FileSnapshot],
    ) -> Result<Resolution, PipelineError> {
        check_snapshots(files)?;
        let started = Instant::now();

        let raw = generate(self.gateway.as_ref(), STAGE, &resolver_prompt(context, files)).await?;
        let mut result: ResolverResult = parse_closed(STAGE, &raw)?;

        for fix in &result.file_fixes {
            require_non_blank(STAGE, "fileFixes[].path", &fix.path)?;
            require_non_blank(STAGE, "fileFixes[].instruction", &fix.instruction)?;
        }
        let dropped = dedupe_by_key(&mut result.file_fixes, |f| f.path.clone());
        if dropped > 0 {
            warn!(dropped, "resolver produced more than one fix for a path");
        }

        // The diagnosis is threaded through by construction.
        result.resolution_report.error_summary = context.error_summary.clone();
        result.resolution_report.cause = context.cause.clone();

        let mismatch = PathSetMismatch::between(
            files.iter().map(|f| f.path.as_str()),
            result.file_fixes.iter().map(|f| f.path.as_str()),
        );
        if let Some(mismatch) = &mismatch {
            warn!(%mismatch, "resolver fix paths differ from input files");
        }

        info!(
            fixes = result.file_fixes.len(),
            complete = mismatch.is_none(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "resolver finished"
        );
        Ok(Resolution { result, mismatch })
    }
}

fn check_snapshots(files: &[FileSnapshot]) -> Result<(), PipelineError> {
    if files.is_empty() {
        return Err(PipelineError::invalid("resolve needs at least one file"));
    }
    let mut seen = HashSet::new();
    for file in files {
        validate_repo_path(&file.path).map_err(PipelineError::invalid)?;
        if !seen.insert(file.path.as_str()) {
            return Err(PipelineError::invalid(format!(
                "file '{}' supplied more than once",
                file.path
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stages::testing::FakeGateway;
    use crate::stages::ErrorKind;

    fn context() -> ErrorContext {
        ErrorContext {
            error_summary: "NPE in Foo".into(),
            cause: "foo is null".into(),
            resolution_hint: "initialise foo".into(),
        }
    }

    fn reply(paths: &[&str]) -> String {
        let fixes: Vec<_> = paths
            .iter()
            .map(|p| serde_json::json!({"path": p, "instruction": "init foo", "explanation": "avoids NPE"}))
            .collect();
        serde_json::json!({
            "fileFixes": fixes,
            "resolutionReport": {
                "errorSummary": "reworded by the model",
                "cause": "also reworded",
                "finalResolution": "foo initialised"
            }
        })
        .to_string()
    }

    #[tokio::test]
    async fn one_fix_per_file() {
        let gateway = FakeGateway::fixed(&reply(&["Foo.java"]));
        let resolution = Resolver::new(gateway)
            .resolve(&context(), &[FileSnapshot::new("Foo.java", "class Foo {}")])
            .await
            .unwrap();
        assert!(resolution.is_complete());
        assert_eq!(resolution.result.file_fixes.len(), 1);
        assert_eq!(resolution.result.file_fixes[0].path, "Foo.java");
    }

    #[tokio::test]
    async fn diagnosis_echoed_verbatim() {
        let gateway = FakeGateway::fixed(&reply(&["Foo.java"]));
        let resolution = Resolver::new(gateway)
            .resolve(&context(), &[FileSnapshot::new("Foo.java", "")])
            .await
            .unwrap();
        let report = &resolution.result.resolution_report;
        assert_eq!(report.error_summary, "NPE in Foo");
        assert_eq!(report.cause, "foo is null");
        assert_eq!(report.final_resolution, "foo initialised");
    }

    #[tokio::test]
    async fn mismatch_reported_not_dropped() {
        let gateway = FakeGateway::fixed(&reply(&["A.java", "C.java"]));
        let resolution = Resolver::new(gateway)
            .resolve(
                &context(),
                &[FileSnapshot::new("A.java", ""), FileSnapshot::new("B.java", "")],
            )
            .await
            .unwrap();
        let mismatch = resolution.mismatch.unwrap();
        assert_eq!(mismatch.missing, vec!["B.java"]);
        assert_eq!(mismatch.unexpected, vec!["C.java"]);
        assert_eq!(resolution.result.file_fixes.len(), 2);
    }

    #[tokio::test]
    async fn empty_and_duplicate_inputs_rejected_before_call() {
        let gateway = FakeGateway::fixed(&reply(&["A.java"]));
        let resolver = Resolver::new(gateway.clone());

        let err = resolver.resolve(&context(), &[]).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InputValidation);

        let dup = [FileSnapshot::new("A.java", ""), FileSnapshot::new("A.java", "x")];
        let err = resolver.resolve(&context(), &dup).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InputValidation);
        assert_eq!(gateway.calls(), 0);
    }

    #[tokio::test]
    async fn blank_instruction_is_malformed() {
        let raw = r#"{"fileFixes":[{"path":"A.java","instruction":"  ","explanation":""}],
            "resolutionReport":{"errorSummary":"","cause":"","finalResolution":""}}"#;
        let err = Resolver::new(FakeGateway::fixed(raw))
            .resolve(&context(), &[FileSnapshot::new("A.java", "")])
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::MalformedOutput);
    }

    #[tokio::test]
    async fn extra_report_field_is_malformed() {
        let raw = r#"{"fileFixes":[],
            "resolutionReport":{"errorSummary":"","cause":"","finalResolution":"","confidence":"high"}}"#;
        let err = Resolver::new(FakeGateway::fixed(raw))
            .resolve(&context(), &[FileSnapshot::new("A.java", "")])
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::MalformedOutput);
    }
}
