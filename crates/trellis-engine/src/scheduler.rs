//! Scheduler: drives the job DAG to completion.
//!
//! DAG bookkeeping is single-writer: the status map lives on this task and
//! every transition happens here. Runner invocations execute concurrently in
//! a `JoinSet`, bounded by the configured parallelism.

use crate::dag::GraphBuilder;
use crate::gate::GateEvaluator;
use crate::matrix::MatrixExpander;
use crate::report::{Aggregator, InstanceRecord};

use chrono::Utc;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinSet;
use tracing::{debug, error, warn};
use trellis_core::events::{
    Event, InstanceCompletedPayload, InstancePayload, RunCompletedPayload, RunStartedPayload,
};
use trellis_core::ids::{InstanceId, RunId};
use trellis_core::instance::{ExecutionStatus, JobInstance, SkipReason};
use trellis_core::pipeline::PipelineDefinition;
use trellis_core::ports::{InstanceContext, InstanceOutcome, InstanceRunner};
use trellis_core::report::RunReport;
use trellis_core::secrets::SecretValue;
use trellis_core::{Error, Result};

/// Per-run inputs supplied by the caller.
pub struct RunParams {
    pub workspace: PathBuf,
    pub max_parallel: usize,
    /// Externally supplied reference for the version consistency check
    /// (usually the trigger tag).
    pub reference_version: Option<String>,
    /// Scoped credentials keyed by job name, as (env var name, value).
    /// Consulted only for gate-required jobs.
    pub credentials: HashMap<String, (String, SecretValue)>,
    pub events: mpsc::Sender<Event>,
    pub cancel: watch::Receiver<bool>,
}

/// The scheduler for one pipeline definition.
///
/// Construction performs all structural validation; a constructed scheduler
/// holds a valid DAG and the full expanded instance set, so nothing can
/// dispatch on a malformed pipeline.
pub struct Scheduler {
    definition: PipelineDefinition,
    instances: Vec<JobInstance>,
    instances_by_job: HashMap<String, Vec<InstanceId>>,
    runner: Arc<dyn InstanceRunner>,
    gate: GateEvaluator,
}

impl Scheduler {
    pub fn new(definition: PipelineDefinition, runner: Arc<dyn InstanceRunner>) -> Result<Self> {
        // Structural validation happens here; a scheduler never exists for a
        // malformed pipeline.
        GraphBuilder::new().build(&definition)?;

        let expander = MatrixExpander::new();
        let mut instances = Vec::new();
        let mut instances_by_job: HashMap<String, Vec<InstanceId>> = HashMap::new();
        for job in &definition.jobs {
            for instance in expander.expand(job) {
                instances_by_job
                    .entry(job.name.clone())
                    .or_default()
                    .push(instance.id.clone());
                instances.push(instance);
            }
        }

        Ok(Self {
            definition,
            instances,
            instances_by_job,
            runner,
            gate: GateEvaluator::new(),
        })
    }

    /// All expanded instances, in job declaration order then matrix order.
    pub fn instances(&self) -> &[JobInstance] {
        &self.instances
    }

    /// Run the pipeline to completion and aggregate the result.
    pub async fn run(&self, params: RunParams) -> Result<RunReport> {
        let run_id = RunId::new();
        let started_at = Utc::now();
        let limit = params.max_parallel.max(1);

        let mut statuses: HashMap<InstanceId, ExecutionStatus> = self
            .instances
            .iter()
            .map(|i| (i.id.clone(), ExecutionStatus::Pending))
            .collect();
        let mut records: HashMap<InstanceId, InstanceRecord> = HashMap::new();

        let mut join_set: JoinSet<(InstanceId, Result<InstanceOutcome>)> = JoinSet::new();
        let mut task_ids: HashMap<tokio::task::Id, InstanceId> = HashMap::new();
        let mut running = 0usize;

        self.emit(
            &params.events,
            Event::RunStarted(RunStartedPayload {
                run_id,
                pipeline: self.definition.name.clone(),
                instance_count: self.instances.len(),
                started_at,
            }),
        )
        .await;

        loop {
            if *params.cancel.borrow() {
                self.sweep_cancelled(run_id, &mut statuses, &params.events)
                    .await;
            }

            self.promote_pending(run_id, &mut statuses, &params.events)
                .await;

            // Dispatch ready instances up to the concurrency limit.
            for instance in &self.instances {
                if running >= limit {
                    break;
                }
                if statuses[&instance.id] != ExecutionStatus::Ready {
                    continue;
                }

                if instance.definition.gate_required {
                    let decision = self.gate.admit(instance, &self.instances_by_job, &statuses);
                    if !decision.admitted {
                        // Ordinary readiness should already have skipped
                        // this instance; the gate is the independent check
                        // of record.
                        self.transition(
                            run_id,
                            &mut statuses,
                            &mut records,
                            &instance.id,
                            ExecutionStatus::Skipped(SkipReason::UpstreamFailed),
                            &params.events,
                        )
                        .await;
                        continue;
                    }
                }

                set_status(&mut statuses, &instance.id, ExecutionStatus::Running);
                running += 1;
                self.emit(
                    &params.events,
                    Event::InstanceStarted(InstancePayload {
                        run_id,
                        instance: instance.id.clone(),
                    }),
                )
                .await;

                let credential = if instance.definition.gate_required {
                    params.credentials.get(&instance.job).cloned()
                } else {
                    None
                };
                let ctx = InstanceContext {
                    run_id,
                    workspace: params.workspace.clone(),
                    credential,
                    cancel: params.cancel.clone(),
                    events: params.events.clone(),
                };
                let runner = Arc::clone(&self.runner);
                let task_instance = instance.clone();
                let handle = join_set.spawn(async move {
                    let outcome = runner.run(&task_instance, ctx).await;
                    (task_instance.id, outcome)
                });
                task_ids.insert(handle.id(), instance.id.clone());
            }

            if running == 0 {
                let unfinished = statuses
                    .values()
                    .filter(|s| !s.is_terminal())
                    .count();
                if unfinished > 0 {
                    // Unreachable for a validated DAG; surface loudly rather
                    // than spin.
                    error!(unfinished, "scheduler stalled with non-terminal instances");
                    return Err(Error::Internal(format!(
                        "scheduler stalled with {unfinished} non-terminal instances"
                    )));
                }
                break;
            }

            // Wait for at least one outstanding runner to complete.
            match join_set.join_next().await {
                Some(Ok((id, outcome))) => {
                    running -= 1;
                    self.apply_completion(
                        run_id,
                        &id,
                        outcome,
                        &params,
                        &mut statuses,
                        &mut records,
                    )
                    .await;
                }
                Some(Err(join_err)) => {
                    running -= 1;
                    if let Some(id) = task_ids.get(&join_err.id()).cloned() {
                        warn!(instance = %id, error = %join_err, "runner task aborted");
                        records.entry(id.clone()).or_default().error =
                            Some(format!("runner task aborted: {join_err}"));
                        self.transition(
                            run_id,
                            &mut statuses,
                            &mut records,
                            &id,
                            ExecutionStatus::Failed,
                            &params.events,
                        )
                        .await;
                    } else {
                        error!(error = %join_err, "runner task aborted for unknown instance");
                    }
                }
                None => break,
            }
        }

        let completed_at = Utc::now();
        let report = Aggregator::aggregate(
            run_id,
            &self.definition.name,
            &self.instances,
            &statuses,
            &records,
            started_at,
            completed_at,
        );

        self.emit(
            &params.events,
            Event::RunCompleted(RunCompletedPayload {
                run_id,
                success: report.success,
                completed_at,
            }),
        )
        .await;

        Ok(report)
    }

    /// Promote Pending instances whose dependency instances are all
    /// terminal: to Ready, or straight to Skipped when something upstream
    /// failed or was skipped. Loops until a fixpoint so skips propagate
    /// transitively in one pass.
    async fn promote_pending(
        &self,
        run_id: RunId,
        statuses: &mut HashMap<InstanceId, ExecutionStatus>,
        events: &mpsc::Sender<Event>,
    ) {
        let mut changed = true;
        while changed {
            changed = false;
            for instance in &self.instances {
                if statuses[&instance.id] != ExecutionStatus::Pending {
                    continue;
                }

                let mut all_terminal = true;
                let mut upstream_failed = false;
                let mut upstream_cancelled = false;
                let mut upstream_skipped = false;

                for dep_job in &instance.definition.depends_on {
                    // A dependency that expanded to zero instances is
                    // vacuously terminal.
                    let Some(dep_ids) = self.instances_by_job.get(dep_job) else {
                        continue;
                    };
                    for dep_id in dep_ids {
                        match statuses[dep_id] {
                            ExecutionStatus::Failed => upstream_failed = true,
                            ExecutionStatus::Skipped(SkipReason::UpstreamFailed) => {
                                upstream_failed = true
                            }
                            ExecutionStatus::Skipped(SkipReason::Cancelled) => {
                                upstream_cancelled = true
                            }
                            ExecutionStatus::Skipped(SkipReason::UpstreamSkipped) => {
                                upstream_skipped = true
                            }
                            ExecutionStatus::Succeeded => {}
                            _ => all_terminal = false,
                        }
                    }
                }

                if !all_terminal {
                    continue;
                }

                let next = if upstream_failed {
                    ExecutionStatus::Skipped(SkipReason::UpstreamFailed)
                } else if upstream_cancelled {
                    ExecutionStatus::Skipped(SkipReason::Cancelled)
                } else if upstream_skipped {
                    ExecutionStatus::Skipped(SkipReason::UpstreamSkipped)
                } else {
                    ExecutionStatus::Ready
                };

                if next == ExecutionStatus::Ready {
                    debug!(instance = %instance.id, "instance ready");
                    set_status(statuses, &instance.id, next);
                } else {
                    self.transition_only(run_id, statuses, &instance.id, next, events)
                        .await;
                }
                changed = true;
            }
        }
    }

    /// Mark every instance that has not started as skipped by cancellation.
    async fn sweep_cancelled(
        &self,
        run_id: RunId,
        statuses: &mut HashMap<InstanceId, ExecutionStatus>,
        events: &mpsc::Sender<Event>,
    ) {
        for instance in &self.instances {
            let status = statuses[&instance.id];
            if matches!(status, ExecutionStatus::Pending | ExecutionStatus::Ready) {
                self.transition_only(
                    run_id,
                    statuses,
                    &instance.id,
                    ExecutionStatus::Skipped(SkipReason::Cancelled),
                    events,
                )
                .await;
            }
        }
    }

    /// Apply one runner completion, including the out-of-band version
    /// consistency check for the configured version job.
    async fn apply_completion(
        &self,
        run_id: RunId,
        id: &InstanceId,
        outcome: Result<InstanceOutcome>,
        params: &RunParams,
        statuses: &mut HashMap<InstanceId, ExecutionStatus>,
        records: &mut HashMap<InstanceId, InstanceRecord>,
    ) {
        let job = self
            .instances
            .iter()
            .find(|i| &i.id == id)
            .map(|i| i.job.as_str())
            .unwrap_or_default();

        let next = match outcome {
            Ok(outcome) => {
                let mut status = outcome.status;
                let mut record = InstanceRecord {
                    steps: outcome.steps,
                    failing_step: outcome.failing_step,
                    duration_ms: outcome.duration_ms,
                    error: None,
                };

                if status == ExecutionStatus::Succeeded
                    && let Some(version_check) = &self.definition.version_check
                    && version_check.job == job
                {
                    let extracted = outcome.captured.unwrap_or_default();
                    let checked = match &params.reference_version {
                        Some(reference) => GateEvaluator::check_version(
                            reference,
                            extracted.trim(),
                            version_check.normalize,
                        ),
                        None => Err(Error::MissingVersionReference),
                    };
                    if let Err(err) = checked {
                        warn!(instance = %id, error = %err, "version consistency check failed");
                        status = ExecutionStatus::Failed;
                        record.error = Some(err.to_string());
                    }
                }

                records.insert(id.clone(), record);
                status
            }
            Err(Error::Cancelled) => ExecutionStatus::Skipped(SkipReason::Cancelled),
            Err(err) => {
                warn!(instance = %id, error = %err, "instance execution error");
                records.entry(id.clone()).or_default().error = Some(err.to_string());
                ExecutionStatus::Failed
            }
        };

        self.transition(run_id, statuses, records, id, next, &params.events)
            .await;
    }

    async fn transition(
        &self,
        run_id: RunId,
        statuses: &mut HashMap<InstanceId, ExecutionStatus>,
        records: &mut HashMap<InstanceId, InstanceRecord>,
        id: &InstanceId,
        next: ExecutionStatus,
        events: &mpsc::Sender<Event>,
    ) {
        let failing_step = records
            .entry(id.clone())
            .or_default()
            .failing_step
            .clone();
        self.transition_only_with(run_id, statuses, id, next, failing_step, events)
            .await;
    }

    async fn transition_only(
        &self,
        run_id: RunId,
        statuses: &mut HashMap<InstanceId, ExecutionStatus>,
        id: &InstanceId,
        next: ExecutionStatus,
        events: &mpsc::Sender<Event>,
    ) {
        self.transition_only_with(run_id, statuses, id, next, None, events)
            .await;
    }

    async fn transition_only_with(
        &self,
        run_id: RunId,
        statuses: &mut HashMap<InstanceId, ExecutionStatus>,
        id: &InstanceId,
        next: ExecutionStatus,
        failing_step: Option<String>,
        events: &mpsc::Sender<Event>,
    ) {
        set_status(statuses, id, next);
        if next.is_terminal() {
            self.emit(
                events,
                Event::InstanceCompleted(InstanceCompletedPayload {
                    run_id,
                    instance: id.clone(),
                    status: next,
                    failing_step,
                }),
            )
            .await;
        }
    }

    async fn emit(&self, events: &mpsc::Sender<Event>, event: Event) {
        // Rendering is best-effort; a dropped receiver must not stall the run.
        let _ = events.send(event).await;
    }
}

/// Apply a status transition, enforcing monotonicity.
fn set_status(
    statuses: &mut HashMap<InstanceId, ExecutionStatus>,
    id: &InstanceId,
    next: ExecutionStatus,
) {
    let Some(current) = statuses.get_mut(id) else {
        error!(instance = %id, "status transition for unknown instance");
        return;
    };
    if !current.can_transition_to(next) {
        error!(
            instance = %id,
            from = ?*current,
            to = ?next,
            "rejected non-monotonic status transition"
        );
        return;
    }
    *current = next;
}
