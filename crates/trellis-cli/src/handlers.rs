//! Command handlers.

use anyhow::Context;
use console::style;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use trellis_core::events::Event;
use trellis_core::instance::{ExecutionStatus, SkipReason};
use trellis_core::pipeline::PipelineDefinition;
use trellis_core::ports::OutputStream;
use trellis_core::report::RunReport;
use trellis_core::secrets::SecretValue;
use trellis_engine::dag::GraphBuilder;
use trellis_engine::matrix::MatrixExpander;
use trellis_engine::scheduler::{RunParams, Scheduler};
use trellis_engine::triggers::{TriggerEvent, TriggerMatcher};
use trellis_runner::{JobRunner, ShellExecutor};

const PIPELINE_TEMPLATE: &str = r#"name: release

triggers:
  - tags: ["v*"]

version_check:
  job: version
  normalize: strip_v_prefix

jobs:
  - name: version
    steps:
      - name: extract
        run: cargo metadata --no-deps --format-version 1 | jq -r '.packages[0].version'

  - name: check
    matrix:
      axes:
        os: [linux]
    steps:
      - name: build
        run: cargo build --locked
      - name: test
        run: cargo test --locked

  - name: publish
    depends_on: [version, check]
    gate_required: true
    credential_env: CARGO_REGISTRY_TOKEN
    steps:
      - name: publish
        run: cargo publish --locked
"#;

/// Initialize a new pipeline file.
pub fn init() -> anyhow::Result<()> {
    let path = Path::new("trellis.yaml");

    if path.exists() {
        println!("{} trellis.yaml already exists", style("!").yellow());
        return Ok(());
    }

    std::fs::write(path, PIPELINE_TEMPLATE)?;
    println!("{} Created trellis.yaml", style("✓").green());
    Ok(())
}

/// Validate a pipeline file: parse, build the DAG, expand matrices.
pub fn validate(path: &str) -> anyhow::Result<()> {
    let definition = load_pipeline(Path::new(path))?;
    let graph = GraphBuilder::new().build(&definition)?;

    let expander = MatrixExpander::new();
    println!(
        "{} Pipeline \"{}\" is valid",
        style("✓").green(),
        definition.name
    );
    println!("  Jobs: {}", definition.jobs.len());

    for node in graph.topological_order()? {
        let instances = expander.expand(&node.definition).len();
        let gate = if node.definition.gate_required {
            " [gated]"
        } else {
            ""
        };
        match instances {
            0 => println!("    - {} (no-op: empty matrix axis){}", node.name, gate),
            1 => println!("    - {}{}", node.name, gate),
            n => println!("    - {} ({} instances){}", node.name, n, gate),
        }
    }

    Ok(())
}

/// Print the JSON schema for pipeline files.
pub fn schema() -> anyhow::Result<()> {
    let schema = schemars::schema_for!(PipelineDefinition);
    println!("{}", serde_json::to_string_pretty(&schema)?);
    Ok(())
}

pub struct RunArgs {
    pub path: String,
    pub branch: Option<String>,
    pub tag: Option<String>,
    pub expect_version: Option<String>,
    pub max_parallel: Option<usize>,
    pub workspace: Option<PathBuf>,
    pub json: bool,
}

/// Run a pipeline and return the process exit code.
pub async fn run(args: RunArgs) -> anyhow::Result<i32> {
    let definition = load_pipeline(Path::new(&args.path))?;

    let event = match (&args.tag, &args.branch) {
        (Some(tag), _) => TriggerEvent::Tag { name: tag.clone() },
        (None, Some(branch)) => TriggerEvent::Branch {
            name: branch.clone(),
        },
        (None, None) => TriggerEvent::Manual,
    };

    if !TriggerMatcher::new().matches(&definition, &event) {
        println!(
            "{} Pipeline \"{}\" not triggered for this event",
            style("i").blue(),
            definition.name
        );
        return Ok(0);
    }

    let reference_version = args
        .expect_version
        .clone()
        .or_else(|| event.reference_version().map(str::to_string));

    // Resolve scoped credentials up front so a missing one fails before
    // anything runs.
    let mut credentials = HashMap::new();
    for job in &definition.jobs {
        if job.gate_required
            && let Some(var) = &job.credential_env
        {
            let secret = SecretValue::from_env(var)
                .with_context(|| format!("credential for gated job `{}`", job.name))?;
            credentials.insert(job.name.clone(), (var.clone(), secret));
        }
    }

    let workspace = match args.workspace {
        Some(path) => path,
        None => std::env::current_dir()?,
    };
    let max_parallel = args.max_parallel.unwrap_or(definition.max_parallel);

    let runner = Arc::new(JobRunner::new(Arc::new(ShellExecutor::new())));
    let scheduler = Scheduler::new(definition, runner)?;

    let (cancel_tx, cancel_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            let _ = cancel_tx.send(true);
        }
    });

    let (events_tx, events_rx) = mpsc::channel(256);
    let renderer = tokio::spawn(render_events(events_rx, args.json));

    let report = scheduler
        .run(RunParams {
            workspace,
            max_parallel,
            reference_version,
            credentials,
            events: events_tx,
            cancel: cancel_rx,
        })
        .await?;

    let _ = renderer.await;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        render_summary(&report);
    }

    Ok(if !report.success {
        1
    } else if report.cancelled {
        130
    } else {
        0
    })
}

/// Load and parse a pipeline file.
fn load_pipeline(path: &Path) -> anyhow::Result<PipelineDefinition> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("reading pipeline file {}", path.display()))?;
    let definition: PipelineDefinition =
        serde_yaml::from_str(&content).context("parsing pipeline file")?;
    Ok(definition)
}

/// Render lifecycle events as they happen. In JSON mode events are drained
/// silently; the report is the only output.
async fn render_events(mut events: mpsc::Receiver<Event>, quiet: bool) {
    while let Some(event) = events.recv().await {
        if quiet {
            continue;
        }
        match event {
            Event::RunStarted(p) => {
                println!(
                    "\n{} Running pipeline: {} ({} instances)\n",
                    style("▶").cyan().bold(),
                    style(&p.pipeline).bold(),
                    p.instance_count
                );
            }
            Event::InstanceStarted(p) => {
                println!("{} {}", style("━━▶").cyan(), style(p.instance.as_str()).bold());
            }
            Event::StepStarted(p) => {
                println!("    {} {}", style("•").dim(), style(&p.step).bold());
            }
            Event::StepOutput(p) => match p.stream {
                OutputStream::Stdout => println!("      {}", style(&p.content).dim()),
                OutputStream::Stderr => println!("      {}", style(&p.content).red().dim()),
            },
            Event::StepCompleted(p) => {
                let seconds = p.duration_ms as f64 / 1000.0;
                if p.exit_code == 0 {
                    println!("      {} ({seconds:.2}s)", style("✓").green());
                } else {
                    println!(
                        "      {} exit code {} ({seconds:.2}s)",
                        style("✗").red(),
                        p.exit_code
                    );
                }
            }
            Event::InstanceCompleted(p) => match p.status {
                ExecutionStatus::Succeeded => {
                    println!(
                        "    {} {} passed\n",
                        style("✓").green(),
                        style(p.instance.as_str()).dim()
                    );
                }
                ExecutionStatus::Failed => {
                    let step = p
                        .failing_step
                        .map(|s| format!(" at step `{s}`"))
                        .unwrap_or_default();
                    println!(
                        "    {} {} failed{step}\n",
                        style("✗").red(),
                        style(p.instance.as_str()).dim()
                    );
                }
                ExecutionStatus::Skipped(reason) => {
                    println!(
                        "    {} {} skipped ({})\n",
                        style("⏭").yellow(),
                        style(p.instance.as_str()).dim(),
                        skip_reason_label(reason)
                    );
                }
                _ => {}
            },
            Event::RunCompleted(_) => {}
        }
    }
}

fn skip_reason_label(reason: SkipReason) -> &'static str {
    match reason {
        SkipReason::UpstreamFailed => "upstream failure",
        SkipReason::UpstreamSkipped => "upstream skipped",
        SkipReason::Cancelled => "cancelled",
    }
}

/// Print the final per-instance summary: the audit trail.
fn render_summary(report: &RunReport) {
    println!();
    println!("{}", style("Run summary").bold());

    for row in &report.instances {
        let status = match row.status {
            ExecutionStatus::Succeeded => style("succeeded".to_string()).green(),
            ExecutionStatus::Failed => style("failed".to_string()).red(),
            ExecutionStatus::Skipped(reason) => {
                style(format!("skipped ({})", skip_reason_label(reason))).yellow()
            }
            other => style(format!("{other:?}")).dim(),
        };
        let mut detail = String::new();
        if let Some(step) = &row.failing_step {
            detail.push_str(&format!("  step `{step}`"));
        }
        if let Some(error) = &row.error {
            detail.push_str(&format!("  {error}"));
        }
        println!("  {:<40} {}{}", row.id.as_str(), status, detail);
    }

    let duration = report
        .completed_at
        .signed_duration_since(report.started_at)
        .num_milliseconds() as f64
        / 1000.0;

    println!();
    if report.success && !report.cancelled {
        println!(
            "{} Pipeline completed successfully in {duration:.2}s",
            style("✓").green().bold()
        );
    } else if report.cancelled {
        println!(
            "{} Pipeline cancelled after {duration:.2}s",
            style("⚠").yellow().bold()
        );
    } else {
        println!(
            "{} Pipeline failed after {duration:.2}s",
            style("✗").red().bold()
        );
    }
}
