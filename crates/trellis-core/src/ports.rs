//! Port traits (hexagonal architecture).
//!
//! These traits are the only points of contact with external side effects:
//! the step boundary executes opaque commands, the instance boundary runs
//! one job instance to a terminal status.

use crate::events::Event;
use crate::ids::RunId;
use crate::instance::{AxisAssignment, ExecutionStatus, JobInstance};
use crate::pipeline::StepDefinition;
use crate::report::StepReport;
use crate::secrets::SecretValue;
use crate::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use tokio::sync::{mpsc, watch};

/// Output line from step execution.
#[derive(Debug, Clone)]
pub struct OutputLine {
    pub stream: OutputStream,
    pub content: String,
    pub line_number: u32,
    pub timestamp: DateTime<Utc>,
}

/// Output stream type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputStream {
    Stdout,
    Stderr,
}

/// Context for step execution.
#[derive(Debug, Clone)]
pub struct StepContext {
    pub job: String,
    pub step: StepDefinition,
    pub axes: AxisAssignment,
    pub env: HashMap<String, String>,
    pub workspace: PathBuf,
    /// Scoped credential as (env var name, value); present only for
    /// gate-required instances.
    pub credential: Option<(String, SecretValue)>,
    pub cancel: watch::Receiver<bool>,
}

/// Result of step execution.
#[derive(Debug, Clone)]
pub struct StepOutcome {
    pub exit_code: i32,
    pub success: bool,
    pub duration_ms: u64,
    /// Captured stdout, for consistency checks over declared outputs.
    pub captured: String,
}

/// Trait for step execution: one opaque external action.
#[async_trait]
pub trait StepExecutor: Send + Sync {
    /// Execute a step, streaming output to the provided channel.
    async fn execute(
        &self,
        ctx: &StepContext,
        output_tx: mpsc::Sender<OutputLine>,
    ) -> Result<StepOutcome>;
}

/// Context for running one job instance.
#[derive(Debug, Clone)]
pub struct InstanceContext {
    pub run_id: RunId,
    pub workspace: PathBuf,
    pub credential: Option<(String, SecretValue)>,
    pub cancel: watch::Receiver<bool>,
    pub events: mpsc::Sender<Event>,
}

/// Terminal outcome of one job instance.
#[derive(Debug, Clone)]
pub struct InstanceOutcome {
    /// Succeeded or Failed; never a pre-terminal status.
    pub status: ExecutionStatus,
    pub steps: Vec<StepReport>,
    pub failing_step: Option<String>,
    /// Trimmed captured stdout of the final completed step.
    pub captured: Option<String>,
    pub duration_ms: u64,
}

/// Trait for running a job instance to completion.
#[async_trait]
pub trait InstanceRunner: Send + Sync {
    async fn run(&self, instance: &JobInstance, ctx: InstanceContext) -> Result<InstanceOutcome>;
}
