//! Prompt builders for each inference stage.
//!
//! Prompt versioning: bump `PROMPT_VERSION` whenever any template below
//! changes, so a logged response can be traced back to the wording that
//! produced it. Structured stages embed the exact JSON schema of their
//! output type, generated from the wire type itself.

use std::collections::BTreeMap;

use schemars::{schema_for, JsonSchema};
use serde::Serialize;

use crate::stages::reporter::ReportDraft;
use crate::stages::{
    DiffSet, ErrorContext, FileFix, FileSnapshot, LocatorResult, RefinedCaptions,
    ResolutionReport, ResolverResult, SuspectedApps,
};

/// Prompt version. Bump on any template change.
pub const PROMPT_VERSION: &str = "1.3.0";

const JSON_ONLY: &str = "\
Requirements:
- Return exactly one JSON object and nothing else.
- Do not include any field that the schema does not declare.
- Do not wrap the output in markdown, code fences, or commentary.";

/// Pretty JSON schema for `T`, embedded verbatim in prompts.
pub fn schema_json<T: JsonSchema>() -> String {
    serde_json::to_string_pretty(&schema_for!(T)).unwrap_or_default()
}

fn to_json<T: Serialize + ?Sized>(value: &T) -> String {
    serde_json::to_string_pretty(value).unwrap_or_default()
}

// ── Locator ──────────────────────────────────────────────────────────────────

pub fn locator_prompt(diff: &DiffSet, tree: &str, log: &str) -> String {
    format!(
        "\
You are FileLocator, specialised in pinpointing which source files must change \
to fix a build or runtime error.

## Commit diff (JSON)
{diff}

## Project tree
{tree}

## Error log
{log}

## Task
- Summarise the error in one or two sentences (errorSummary).
- State the root cause (cause).
- Give a short hint on how to resolve it (resolutionHint).
- List every file that directly contributes to the failure (suspectFiles), most \
relevant first, as repository-relative paths taken from the project tree.
- Omit speculative files. List each path once.

## Output schema
{schema}

{JSON_ONLY}",
        diff = to_json(diff),
        schema = schema_json::<LocatorResult>(),
    )
}

// ── Resolver ─────────────────────────────────────────────────────────────────

pub fn resolver_prompt(context: &ErrorContext, files: &[FileSnapshot]) -> String {
    let mut listing = String::new();
    for file in files {
        listing.push_str(&format!("--- {} ---\n{}\n\n", file.path, file.code));
    }
    format!(
        "\
You are BuildErrorResolver, specialised in diagnosing and resolving build or \
runtime errors.

## Diagnosis
errorSummary: {summary}
cause: {cause}
resolutionHint: {hint}

## Files
{listing}\
## Task
- Determine the minimal set of modifications that resolves the error.
- Produce exactly one entry in fileFixes for each file listed above, using the \
path exactly as shown. Do not add entries for other paths.
- instruction: a precise natural-language directive describing what to change \
in that file. Not a diff.
- explanation: briefly why the change works.
- resolutionReport.errorSummary and resolutionReport.cause must repeat the \
diagnosis above verbatim; finalResolution summarises the applied resolution.

## Output schema
{schema}

{JSON_ONLY}",
        summary = context.error_summary,
        cause = context.cause,
        hint = context.resolution_hint,
        schema = schema_json::<ResolverResult>(),
    )
}

// ── Coordinator ──────────────────────────────────────────────────────────────

pub fn coordinator_prompt(files: &BTreeMap<String, String>, context: Option<&ErrorContext>) -> String {
    let mut prompt = String::from(
        "You are an expert that examines several source files together and outputs \
exactly one minimal edit instruction per file.\n\n",
    );
    if let Some(ctx) = context {
        prompt.push_str(&format!(
            "## Error context\nerrorSummary: {}\ncause: {}\nresolutionHint: {}\n\n",
            ctx.error_summary, ctx.cause, ctx.resolution_hint
        ));
    }
    prompt.push_str("## Files\n");
    for (path, code) in files {
        prompt.push_str(&format!("--- {path} ---\n{code}\n\n"));
    }
    let example: BTreeMap<&str, &str> = files
        .keys()
        .map(|path| (path.as_str(), "<instruction for this file>"))
        .collect();
    prompt.push_str(&format!(
        "\
## Task
Produce one precise edit instruction per file so that, applied together, the \
edits fix the error. Edits must be mutually consistent across files.

Return a single JSON object mapping each file path above to its instruction. \
The keys must be exactly these paths, no more and no fewer:
{keys}

{JSON_ONLY}",
        keys = to_json(&example),
    ));
    prompt
}

// ── Patcher ──────────────────────────────────────────────────────────────────

pub fn patcher_prompt(file: &FileSnapshot, instruction: &str) -> String {
    format!(
        "\
You are PatchGenerator, specialised in minimally patching source files.

## File: {path}
<<<FILE
{code}
FILE>>>

## Instruction
{instruction}

## Task
- Keep the existing structure, comments and formatting unchanged wherever possible.
- Modify only the lines or small blocks necessary to carry out the instruction.
- Return the entire corrected file, preserving indentation and line breaks.
- Output the raw file text only: no markdown fences, no <<<FILE markers, no commentary.",
        path = file.path,
        code = file.code,
    )
}

// ── Reporter ─────────────────────────────────────────────────────────────────

pub fn reporter_prompt(fixes: &[FileFix], report: &ResolutionReport) -> String {
    #[derive(Serialize)]
    #[serde(rename_all = "camelCase")]
    struct Input<'a> {
        file_fixes: &'a [FileFix],
        resolution_report: &'a ResolutionReport,
    }

    format!(
        "\
You are ErrorResolutionReporter, writing the final report for a resolved build \
or runtime error.

## Input (JSON)
{input}

## Task
- title: a short title for the report.
- summary: a detailed paragraph (three to five sentences) covering the error's \
background and how it was resolved.
- additionalNotes: notes drawn from the fix explanations or other caveats worth \
recording. Use an empty string if there is nothing to add.

## Output schema
{schema}

{JSON_ONLY}",
        input = to_json(&Input {
            file_fixes: fixes,
            resolution_report: report,
        }),
        schema = schema_json::<ReportDraft>(),
    )
}

// ── Application inference ────────────────────────────────────────────────────

pub fn app_inference_prompt(diffs: &[serde_json::Value], log: &str, names: &[String]) -> String {
    format!(
        "\
You are AppInference, specialised in inferring which applications cause a failure \
from a diff, a build log, and the list of known application names.

## Diff (JSON)
{diff}

## Build log
{log}

## Application names
{names}

## Task
- Choose the applications most likely responsible for the failure.
- Choose only from the application names listed above, spelled exactly as listed. \
Never invent or alter a name.
- reason: a one-line justification.

## Output schema
{schema}

{JSON_ONLY}",
        diff = to_json(diffs),
        names = to_json(names),
        schema = schema_json::<SuspectedApps>(),
    )
}

// ── Refiner ──────────────────────────────────────────────────────────────────

pub fn refiner_prompt(texts: &[String], image_count: usize) -> String {
    format!(
        "\
You are ImageRefiner. You receive {image_count} image(s) and a list of captions \
written for them.

## Captions (JSON)
{texts}

## Task
- Rewrite each caption so it accurately and fluently describes what the images show.
- Keep the same number of captions in the same order; do not merge or split them.

## Output schema
{schema}

{JSON_ONLY}",
        texts = to_json(texts),
        schema = schema_json::<RefinedCaptions>(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stages::{CommitInfo, Hunk};

    fn diff() -> DiffSet {
        DiffSet {
            commit: CommitInfo {
                title: "Add null check".into(),
                message: String::new(),
            },
            diffs: vec![Hunk {
                diff_text: "+if (x == null) return;".into(),
                old_path: "src/Foo.java".into(),
                new_path: "src/Foo.java".into(),
                file_mode_old: "100644".into(),
                file_mode_new: "100644".into(),
                is_new: false,
                is_renamed: false,
                is_deleted: false,
                is_generated: None,
            }],
        }
    }

    #[test]
    fn locator_prompt_embeds_inputs_and_schema() {
        let prompt = locator_prompt(&diff(), "src/Foo.java", "NullPointerException at Foo.java:10");
        assert!(prompt.contains("\"new_path\": \"src/Foo.java\""));
        assert!(prompt.contains("NullPointerException"));
        assert!(prompt.contains("suspectFiles"));
        assert!(prompt.contains("resolutionHint"));
        assert!(prompt.contains("additionalProperties"));
    }

    #[test]
    fn coordinator_prompt_lists_exact_keys() {
        let mut files = BTreeMap::new();
        files.insert("a/A.java".to_string(), "class A {}".to_string());
        files.insert("b/B.java".to_string(), "class B {}".to_string());
        let prompt = coordinator_prompt(&files, None);
        assert!(prompt.contains("--- a/A.java ---\nclass A {}"));
        assert!(prompt.contains("\"b/B.java\": \"<instruction for this file>\""));
        assert!(!prompt.contains("## Error context"));
    }

    #[test]
    fn coordinator_prompt_includes_context_when_given() {
        let mut files = BTreeMap::new();
        files.insert("A.java".to_string(), String::new());
        let ctx = ErrorContext {
            error_summary: "compile error".into(),
            cause: "missing import".into(),
            resolution_hint: "add import".into(),
        };
        assert!(coordinator_prompt(&files, Some(&ctx)).contains("cause: missing import"));
    }

    #[test]
    fn app_prompt_lists_names() {
        let names = vec!["auth-service".to_string(), "billing-service".to_string()];
        let prompt = app_inference_prompt(&[], "boom", &names);
        assert!(prompt.contains("\"auth-service\""));
        assert!(prompt.contains("suspectedApps"));
    }

    #[test]
    fn report_draft_schema_has_no_applied_files() {
        let schema = schema_json::<ReportDraft>();
        assert!(schema.contains("additionalNotes"));
        assert!(!schema.contains("appliedFiles"));
        assert!(!schema.contains("null"));
    }
}
