//! Lifecycle events emitted by the scheduler and runners.
//!
//! Events flow over an in-process channel to whoever renders the run
//! (the CLI subscribes and prints them live).

use crate::ids::{InstanceId, RunId};
use crate::instance::ExecutionStatus;
use crate::ports::OutputStream;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    RunStarted(RunStartedPayload),
    InstanceStarted(InstancePayload),
    StepStarted(StepPayload),
    StepOutput(StepOutputPayload),
    StepCompleted(StepCompletedPayload),
    InstanceCompleted(InstanceCompletedPayload),
    RunCompleted(RunCompletedPayload),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunStartedPayload {
    pub run_id: RunId,
    pub pipeline: String,
    pub instance_count: usize,
    pub started_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstancePayload {
    pub run_id: RunId,
    pub instance: InstanceId,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepPayload {
    pub run_id: RunId,
    pub instance: InstanceId,
    pub step: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepOutputPayload {
    pub run_id: RunId,
    pub instance: InstanceId,
    pub step: String,
    pub stream: OutputStream,
    pub content: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepCompletedPayload {
    pub run_id: RunId,
    pub instance: InstanceId,
    pub step: String,
    pub exit_code: i32,
    pub duration_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstanceCompletedPayload {
    pub run_id: RunId,
    pub instance: InstanceId,
    pub status: ExecutionStatus,
    pub failing_step: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunCompletedPayload {
    pub run_id: RunId,
    pub success: bool,
    pub completed_at: DateTime<Utc>,
}
