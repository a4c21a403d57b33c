//! Run report types: the externally observable audit trail.

use crate::ids::{InstanceId, RunId};
use crate::instance::{AxisAssignment, ExecutionStatus};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepReport {
    pub name: String,
    pub exit_code: i32,
    pub duration_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstanceReport {
    pub id: InstanceId,
    pub job: String,
    pub axes: AxisAssignment,
    pub status: ExecutionStatus,
    pub failing_step: Option<String>,
    pub steps: Vec<StepReport>,
    pub duration_ms: u64,
    /// Human-readable failure detail (e.g. a version mismatch), when any.
    pub error: Option<String>,
}

/// Final aggregate over all job instances of one run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    pub run_id: RunId,
    pub pipeline: String,
    pub success: bool,
    pub cancelled: bool,
    pub instances: Vec<InstanceReport>,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
}

impl RunReport {
    pub fn failed_instances(&self) -> impl Iterator<Item = &InstanceReport> {
        self.instances
            .iter()
            .filter(|i| i.status == ExecutionStatus::Failed)
    }
}
