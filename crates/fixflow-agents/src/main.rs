//! `fixflow` command-line entry point.
//!
//! Each subcommand maps to one pipeline operation. Results are printed to
//! stdout as JSON; logs go to stderr.
//!
//! # Usage
//!
//! ```bash
//! # Full run against a checkout
//! fixflow run --diff diff.json --tree tree.txt --log build.log --repo ./checkout
//!
//! # One stage at a time
//! fixflow locate --diff diff.json --tree tree.txt --log build.log
//! fixflow patch --path src/Foo.java --code Foo.java --instruction "rename bar to baz" --out-dir out/
//!
//! # Caption refinement, streamed as JSON lines
//! fixflow refine --text "a cat" --image cat.png --stream
//! ```

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use fixflow_agents::retry::{with_retries, RetryPolicy};
use fixflow_agents::stages::{DiffSet, ErrorContext, FileSnapshot, RefineRequest, ResolverResult};
use fixflow_agents::telemetry::init_tracing;
use fixflow_agents::{
    PatchStrategy, Pipeline, PipelineError, PipelineRequest, ServiceConfig, WorkspaceSource,
};

/// Command-line arguments
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// TOML config file, layered over environment defaults
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Emit logs as JSON lines
    #[arg(long, global = true, default_value_t = false)]
    json_logs: bool,

    /// Retries for transient transport failures (0 = fail fast)
    #[arg(long, global = true, default_value_t = 0)]
    retries: u32,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Identify the files responsible for a failure
    Locate {
        /// DiffSet JSON
        #[arg(long)]
        diff: PathBuf,
        /// Project tree listing
        #[arg(long)]
        tree: PathBuf,
        /// Error log
        #[arg(long)]
        log: PathBuf,
    },
    /// Produce per-file fix instructions
    Resolve {
        /// JSON: {"context": {...}, "files": [{"path", "code"}]}
        #[arg(long)]
        request: PathBuf,
    },
    /// Apply one instruction to one file
    Patch {
        /// Repository-relative path of the file
        #[arg(long)]
        path: String,
        /// File holding the current content
        #[arg(long)]
        code: PathBuf,
        #[arg(long)]
        instruction: String,
        /// Also write the patched file here, under its download name
        #[arg(long)]
        out_dir: Option<PathBuf>,
    },
    /// Derive consistent instructions for several files at once
    Coordinate {
        /// JSON object of path → code
        #[arg(long)]
        files: PathBuf,
        /// ErrorContext JSON
        #[arg(long)]
        context: Option<PathBuf>,
    },
    /// Write the final report for a resolution
    Report {
        /// Resolver output JSON: {"fileFixes", "resolutionReport"}
        #[arg(long)]
        request: PathBuf,
    },
    /// Guess which applications a failure belongs to
    InferApps {
        /// JSON array of raw diff hunks
        #[arg(long)]
        diff: PathBuf,
        #[arg(long)]
        log: PathBuf,
        /// Candidate application name (repeatable)
        #[arg(long = "app", required = true)]
        apps: Vec<String>,
    },
    /// Locate, resolve, patch and report in one go
    Run {
        #[arg(long)]
        diff: PathBuf,
        #[arg(long)]
        tree: PathBuf,
        #[arg(long)]
        log: PathBuf,
        /// Checkout that suspect files are read from
        #[arg(long, default_value = ".")]
        repo: PathBuf,
        /// Overrides the configured patch strategy
        #[arg(long)]
        strategy: Option<PatchStrategy>,
    },
    /// Refine captions against uploaded images
    Refine {
        /// Caption to refine (repeatable)
        #[arg(long = "text", required = true)]
        texts: Vec<String>,
        /// Upload filename (repeatable)
        #[arg(long = "image")]
        images: Vec<String>,
        /// Print incremental events as JSON lines
        #[arg(long, default_value_t = false)]
        stream: bool,
    },
}

#[derive(Debug, Deserialize)]
struct ResolveRequest {
    context: ErrorContext,
    files: Vec<FileSnapshot>,
}

#[derive(Debug, Serialize)]
struct ErrorBody<'a> {
    kind: String,
    message: &'a str,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.json_logs);

    match execute(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            let kind = err
                .downcast_ref::<PipelineError>()
                .map(|e| e.kind().to_string())
                .unwrap_or_else(|| "internal".to_string());
            let message = format!("{err:#}");
            error!(%kind, error = %message, "command failed");
            let body = serde_json::json!({ "error": ErrorBody { kind, message: &message } });
            eprintln!("{body}");
            ExitCode::FAILURE
        }
    }
}

async fn execute(cli: Cli) -> Result<()> {
    let mut config = ServiceConfig::load(cli.config.as_deref())?;
    if let Command::Run {
        strategy: Some(strategy),
        ..
    } = &cli.command
    {
        config.pipeline.patch_strategy = *strategy;
    }
    let pipeline = Pipeline::from_config(&config)?;
    let policy = RetryPolicy::new(cli.retries);
    info!(
        model = %config.gateway.text_model,
        strategy = %config.pipeline.patch_strategy,
        retries = cli.retries,
        "fixflow starting"
    );

    match cli.command {
        Command::Locate { diff, tree, log } => {
            let diff = DiffSet::parse(&read_text(&diff).await?)?;
            let tree = read_text(&tree).await?;
            let log = read_text(&log).await?;
            let located =
                with_retries(&policy, "locate", || pipeline.locate(&diff, &tree, &log)).await?;
            print_json(&located)
        }
        Command::Resolve { request } => {
            let request: ResolveRequest = read_json(&request).await?;
            let resolution = with_retries(&policy, "resolve", || {
                pipeline.resolve(&request.context, &request.files)
            })
            .await?;
            print_json(&resolution)
        }
        Command::Patch {
            path,
            code,
            instruction,
            out_dir,
        } => {
            let code = read_text(&code).await?;
            let patched = with_retries(&policy, "patch", || {
                pipeline.patch_one(&path, &code, &instruction)
            })
            .await?;
            if let Some(dir) = out_dir {
                let target = dir.join(patched.download_name());
                tokio::fs::create_dir_all(&dir)
                    .await
                    .with_context(|| format!("creating {}", dir.display()))?;
                tokio::fs::write(&target, &patched.patched_code)
                    .await
                    .with_context(|| format!("writing {}", target.display()))?;
                info!(path = %target.display(), "patched file written");
            }
            print_json(&patched)
        }
        Command::Coordinate { files, context } => {
            let files: BTreeMap<String, String> = read_json(&files).await?;
            let context: Option<ErrorContext> = match context {
                Some(path) => Some(read_json(&path).await?),
                None => None,
            };
            let instructions = with_retries(&policy, "coordinate", || {
                pipeline.coordinate_multi_file(&files, context.as_ref())
            })
            .await?;
            print_json(&instructions)
        }
        Command::Report { request } => {
            let resolved: ResolverResult = read_json(&request).await?;
            let report = with_retries(&policy, "report", || {
                pipeline.report(&resolved.file_fixes, &resolved.resolution_report)
            })
            .await?;
            print_json(&report)
        }
        Command::InferApps { diff, log, apps } => {
            let hunks: Vec<serde_json::Value> = read_json(&diff).await?;
            let log = read_text(&log).await?;
            let suspected = with_retries(&policy, "infer_apps", || {
                pipeline.infer_applications(&hunks, &log, &apps)
            })
            .await?;
            print_json(&suspected)
        }
        Command::Run {
            diff,
            tree,
            log,
            repo,
            ..
        } => {
            let request = PipelineRequest {
                diff: DiffSet::parse(&read_text(&diff).await?)?,
                tree: read_text(&tree).await?,
                log: read_text(&log).await?,
            };
            let sources = WorkspaceSource::new(&repo);
            let outcome =
                with_retries(&policy, "run", || pipeline.run(&request, &sources)).await?;
            print_json(&outcome)
        }
        Command::Refine {
            texts,
            images,
            stream,
        } => {
            let request = RefineRequest {
                texts,
                filenames: images,
            };
            if stream {
                refine_streaming(&pipeline, &request).await
            } else {
                let refined =
                    with_retries(&policy, "refine", || pipeline.refine(&request)).await?;
                print_json(&refined)
            }
        }
    }
}

/// Print each event as a JSON line until the stream ends. Ctrl-C cancels.
async fn refine_streaming(pipeline: &Pipeline, request: &RefineRequest) -> Result<()> {
    let (tx, mut rx) = mpsc::channel(32);
    let cancel = CancellationToken::new();

    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            on_interrupt.cancel();
        }
    });

    let producer = pipeline.refine_stream(request, tx, cancel);
    let consumer = async {
        while let Some(event) = rx.recv().await {
            println!("{}", event.to_json());
        }
    };
    let (result, ()) = tokio::join!(producer, consumer);
    let chunks = result?;
    info!(chunks, "refinement stream finished");
    Ok(())
}

async fn read_text(path: &Path) -> Result<String> {
    tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("reading {}", path.display()))
}

async fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T> {
    let text = read_text(path).await?;
    serde_json::from_str(&text)
        .map_err(|e| PipelineError::invalid(format!("{}: {e}", path.display())).into())
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
