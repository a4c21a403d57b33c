//! Job instances and execution status.

use crate::ids::InstanceId;
use crate::pipeline::JobDefinition;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// One chosen value per matrix axis, in axis declaration order.
pub type AxisAssignment = IndexMap<String, String>;

/// One concrete execution unit: a job definition plus a matrix assignment.
///
/// Created by the matrix expander; owned by the scheduler for the duration
/// of one pipeline run.
#[derive(Debug, Clone)]
pub struct JobInstance {
    pub id: InstanceId,
    pub job: String,
    pub axes: AxisAssignment,
    pub definition: JobDefinition,
}

impl JobInstance {
    pub fn new(definition: &JobDefinition, axes: AxisAssignment) -> Self {
        Self {
            id: InstanceId::new(&definition.name, &axes),
            job: definition.name.clone(),
            axes,
            definition: definition.clone(),
        }
    }
}

/// Lifecycle status of a job instance.
///
/// Transitions are monotonic: once Running or terminal, an instance never
/// returns to Pending or Ready.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Pending,
    Ready,
    Running,
    Succeeded,
    Failed,
    Skipped(SkipReason),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    /// A transitive dependency failed; this instance never ran.
    UpstreamFailed,
    /// A transitive dependency was skipped for a non-failure reason.
    UpstreamSkipped,
    /// The run was cancelled before this instance could run to completion.
    Cancelled,
}

impl ExecutionStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ExecutionStatus::Succeeded | ExecutionStatus::Failed | ExecutionStatus::Skipped(_)
        )
    }

    pub fn is_success(&self) -> bool {
        matches!(self, ExecutionStatus::Succeeded)
    }

    /// Whether moving to `next` respects the monotonic lifecycle.
    pub fn can_transition_to(&self, next: ExecutionStatus) -> bool {
        use ExecutionStatus::*;
        match self {
            Pending => matches!(next, Ready | Skipped(_)),
            Ready => matches!(next, Running | Skipped(_)),
            Running => matches!(next, Succeeded | Failed | Skipped(SkipReason::Cancelled)),
            Succeeded | Failed | Skipped(_) => false,
        }
    }
}
