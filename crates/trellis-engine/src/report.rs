//! Result aggregation: the final status map folded into a run report.

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use trellis_core::ids::{InstanceId, RunId};
use trellis_core::instance::{ExecutionStatus, JobInstance, SkipReason};
use trellis_core::report::{InstanceReport, RunReport, StepReport};

/// Per-instance bookkeeping accumulated by the scheduler.
#[derive(Debug, Clone, Default)]
pub struct InstanceRecord {
    pub steps: Vec<StepReport>,
    pub failing_step: Option<String>,
    pub duration_ms: u64,
    pub error: Option<String>,
}

/// Aggregator over terminal instance statuses.
///
/// Pure function of its inputs: re-running it over the same status map
/// always yields the same report.
pub struct Aggregator;

impl Aggregator {
    pub fn aggregate(
        run_id: RunId,
        pipeline: &str,
        instances: &[JobInstance],
        statuses: &HashMap<InstanceId, ExecutionStatus>,
        records: &HashMap<InstanceId, InstanceRecord>,
        started_at: DateTime<Utc>,
        completed_at: DateTime<Utc>,
    ) -> RunReport {
        let rows: Vec<InstanceReport> = instances
            .iter()
            .map(|instance| {
                let status = statuses
                    .get(&instance.id)
                    .copied()
                    .unwrap_or(ExecutionStatus::Pending);
                let record = records.get(&instance.id).cloned().unwrap_or_default();
                InstanceReport {
                    id: instance.id.clone(),
                    job: instance.job.clone(),
                    axes: instance.axes.clone(),
                    status,
                    failing_step: record.failing_step,
                    steps: record.steps,
                    duration_ms: record.duration_ms,
                    error: record.error,
                }
            })
            .collect();

        let any_failed = rows.iter().any(|row| row.status == ExecutionStatus::Failed);
        let gated_skipped_on_failure = instances.iter().zip(&rows).any(|(instance, row)| {
            instance.definition.gate_required
                && row.status == ExecutionStatus::Skipped(SkipReason::UpstreamFailed)
        });
        let cancelled = rows
            .iter()
            .any(|row| row.status == ExecutionStatus::Skipped(SkipReason::Cancelled));

        RunReport {
            run_id,
            pipeline: pipeline.to_string(),
            success: !any_failed && !gated_skipped_on_failure,
            cancelled,
            instances: rows,
            started_at,
            completed_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use trellis_core::instance::AxisAssignment;
    use trellis_core::pipeline::{JobDefinition, StepDefinition};

    fn make_instance(name: &str, gate_required: bool) -> JobInstance {
        let definition = JobDefinition {
            name: name.to_string(),
            depends_on: vec![],
            matrix: None,
            steps: vec![StepDefinition {
                name: "noop".to_string(),
                run: "true".to_string(),
                shell: "sh".to_string(),
                env: Default::default(),
                timeout_minutes: 30,
            }],
            gate_required,
            credential_env: None,
            env: Default::default(),
        };
        JobInstance::new(&definition, AxisAssignment::new())
    }

    fn aggregate(
        instances: &[JobInstance],
        statuses: &HashMap<InstanceId, ExecutionStatus>,
    ) -> RunReport {
        let now = Utc::now();
        Aggregator::aggregate(
            RunId::new(),
            "test",
            instances,
            statuses,
            &HashMap::new(),
            now,
            now,
        )
    }

    #[test]
    fn test_all_succeeded_is_success() {
        let instances = vec![make_instance("build", false), make_instance("test", false)];
        let statuses = instances
            .iter()
            .map(|i| (i.id.clone(), ExecutionStatus::Succeeded))
            .collect();

        let report = aggregate(&instances, &statuses);
        assert!(report.success);
        assert!(!report.cancelled);
        assert_eq!(report.instances.len(), 2);
    }

    #[test]
    fn test_any_failed_is_failure() {
        let instances = vec![make_instance("build", false), make_instance("test", false)];
        let mut statuses: HashMap<InstanceId, ExecutionStatus> = instances
            .iter()
            .map(|i| (i.id.clone(), ExecutionStatus::Succeeded))
            .collect();
        statuses.insert(instances[1].id.clone(), ExecutionStatus::Failed);

        let report = aggregate(&instances, &statuses);
        assert!(!report.success);
    }

    #[test]
    fn test_gated_skip_on_failure_is_failure() {
        let instances = vec![make_instance("publish", true)];
        let statuses = HashMap::from([(
            instances[0].id.clone(),
            ExecutionStatus::Skipped(SkipReason::UpstreamFailed),
        )]);

        let report = aggregate(&instances, &statuses);
        assert!(!report.success);
    }

    #[test]
    fn test_cancellation_skips_are_not_failures() {
        let instances = vec![make_instance("build", false), make_instance("test", false)];
        let statuses = HashMap::from([
            (instances[0].id.clone(), ExecutionStatus::Succeeded),
            (
                instances[1].id.clone(),
                ExecutionStatus::Skipped(SkipReason::Cancelled),
            ),
        ]);

        let report = aggregate(&instances, &statuses);
        assert!(report.success);
        assert!(report.cancelled);
    }

    #[test]
    fn test_aggregation_is_idempotent() {
        let instances = vec![
            make_instance("version", false),
            make_instance("check", false),
            make_instance("publish", true),
        ];
        let statuses = HashMap::from([
            (instances[0].id.clone(), ExecutionStatus::Succeeded),
            (instances[1].id.clone(), ExecutionStatus::Failed),
            (
                instances[2].id.clone(),
                ExecutionStatus::Skipped(SkipReason::UpstreamFailed),
            ),
        ]);

        let first = aggregate(&instances, &statuses);
        let second = aggregate(&instances, &statuses);

        assert_eq!(first.success, second.success);
        assert_eq!(first.cancelled, second.cancelled);
        let first_statuses: Vec<_> = first.instances.iter().map(|r| r.status).collect();
        let second_statuses: Vec<_> = second.instances.iter().map(|r| r.status).collect();
        assert_eq!(first_statuses, second_statuses);
        assert!(!first.success);
    }
}
