//! Admission control for gate-required jobs.

use std::collections::HashMap;
use tracing::{info, warn};
use trellis_core::ids::InstanceId;
use trellis_core::instance::{ExecutionStatus, JobInstance};
use trellis_core::pipeline::VersionNormalize;
use trellis_core::{Error, Result};

/// Outcome of a gate admission check.
#[derive(Debug, Clone)]
pub struct GateDecision {
    pub admitted: bool,
    /// Dependency instances that are not Succeeded, with their status.
    pub unsatisfied: Vec<(InstanceId, ExecutionStatus)>,
}

/// Evaluator for credential-bearing admission checks.
///
/// Ordinary readiness only requires dependencies to be terminal; this is
/// the stronger check that every instance of every dependency job has
/// Succeeded. It is computed from the status map alone, so the decision can
/// be re-verified after the fact, and every decision is logged.
pub struct GateEvaluator;

impl GateEvaluator {
    pub fn new() -> Self {
        Self
    }

    pub fn admit(
        &self,
        instance: &JobInstance,
        instances_by_job: &HashMap<String, Vec<InstanceId>>,
        statuses: &HashMap<InstanceId, ExecutionStatus>,
    ) -> GateDecision {
        let mut unsatisfied = Vec::new();

        for dep_job in &instance.definition.depends_on {
            let Some(dep_instances) = instances_by_job.get(dep_job) else {
                // A dependency that expanded to zero instances is vacuously
                // satisfied.
                continue;
            };
            for dep_id in dep_instances {
                let status = statuses
                    .get(dep_id)
                    .copied()
                    .unwrap_or(ExecutionStatus::Pending);
                if !status.is_success() {
                    unsatisfied.push((dep_id.clone(), status));
                }
            }
        }

        let admitted = unsatisfied.is_empty();
        if admitted {
            info!(
                instance = %instance.id,
                job = %instance.job,
                "gate admitted: all dependency instances succeeded"
            );
        } else {
            warn!(
                instance = %instance.id,
                job = %instance.job,
                unsatisfied = unsatisfied.len(),
                "gate refused: dependency instances not all succeeded"
            );
        }

        GateDecision {
            admitted,
            unsatisfied,
        }
    }

    /// Compare an extracted version against the externally supplied
    /// reference value.
    ///
    /// The comparison is byte-exact after normalization; normalization is
    /// applied to both sides or neither.
    pub fn check_version(
        reference: &str,
        extracted: &str,
        normalize: VersionNormalize,
    ) -> Result<()> {
        let (lhs, rhs) = match normalize {
            VersionNormalize::Exact => (reference, extracted),
            VersionNormalize::StripVPrefix => (
                reference.strip_prefix('v').unwrap_or(reference),
                extracted.strip_prefix('v').unwrap_or(extracted),
            ),
        };

        if lhs == rhs {
            Ok(())
        } else {
            Err(Error::VersionMismatch {
                expected: reference.to_string(),
                actual: extracted.to_string(),
            })
        }
    }
}

impl Default for GateEvaluator {
    fn default() -> Self {
        Self::new()
    }
}
