//! Job runner: executes one instance's steps strictly in order.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info};
use trellis_core::events::{Event, StepCompletedPayload, StepOutputPayload, StepPayload};
use trellis_core::instance::{ExecutionStatus, JobInstance};
use trellis_core::ports::{
    InstanceContext, InstanceOutcome, InstanceRunner, OutputLine, StepContext, StepExecutor,
};
use trellis_core::report::StepReport;
use trellis_core::{Error, Result};

/// Runs one job instance: steps in declared order, stopping at the first
/// failing step. The only component that reaches external side effects,
/// always through the step executor port.
pub struct JobRunner {
    executor: Arc<dyn StepExecutor>,
}

impl JobRunner {
    pub fn new(executor: Arc<dyn StepExecutor>) -> Self {
        Self { executor }
    }

    /// Environment visible to every step of an instance: the job-level env
    /// plus the matrix axis assignment as `TRELLIS_MATRIX_<AXIS>`.
    fn instance_env(instance: &JobInstance) -> HashMap<String, String> {
        let mut env = instance.definition.env.clone();
        for (axis, value) in &instance.axes {
            env.insert(format!("TRELLIS_MATRIX_{}", env_key(axis)), value.clone());
        }
        env
    }
}

fn env_key(axis: &str) -> String {
    axis.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_ascii_uppercase()
            } else {
                '_'
            }
        })
        .collect()
}

#[async_trait]
impl InstanceRunner for JobRunner {
    async fn run(&self, instance: &JobInstance, ctx: InstanceContext) -> Result<InstanceOutcome> {
        let start = std::time::Instant::now();
        let env = Self::instance_env(instance);

        // The credential reaches a step only when the job is gated, even if
        // the caller attached one.
        let credential = if instance.definition.gate_required {
            ctx.credential.clone()
        } else {
            None
        };

        info!(
            instance = %instance.id,
            steps = instance.definition.steps.len(),
            gated = instance.definition.gate_required,
            "Running instance"
        );

        let mut steps = Vec::with_capacity(instance.definition.steps.len());
        let mut failing_step = None;
        let mut captured = None;
        let mut status = ExecutionStatus::Succeeded;

        for step in &instance.definition.steps {
            if *ctx.cancel.borrow() {
                return Err(Error::Cancelled);
            }

            let _ = ctx
                .events
                .send(Event::StepStarted(StepPayload {
                    run_id: ctx.run_id,
                    instance: instance.id.clone(),
                    step: step.name.clone(),
                }))
                .await;

            // Forward the executor's output lines as step output events.
            let (output_tx, mut output_rx) = mpsc::channel::<OutputLine>(128);
            let events = ctx.events.clone();
            let run_id = ctx.run_id;
            let instance_id = instance.id.clone();
            let step_name = step.name.clone();
            let forwarder = tokio::spawn(async move {
                while let Some(line) = output_rx.recv().await {
                    let _ = events
                        .send(Event::StepOutput(StepOutputPayload {
                            run_id,
                            instance: instance_id.clone(),
                            step: step_name.clone(),
                            stream: line.stream,
                            content: line.content,
                            timestamp: line.timestamp,
                        }))
                        .await;
                }
            });

            let step_ctx = StepContext {
                job: instance.job.clone(),
                step: step.clone(),
                axes: instance.axes.clone(),
                env: env.clone(),
                workspace: ctx.workspace.clone(),
                credential: credential.clone(),
                cancel: ctx.cancel.clone(),
            };

            let outcome = self.executor.execute(&step_ctx, output_tx).await;
            let _ = forwarder.await;
            let outcome = outcome?;

            let _ = ctx
                .events
                .send(Event::StepCompleted(StepCompletedPayload {
                    run_id: ctx.run_id,
                    instance: instance.id.clone(),
                    step: step.name.clone(),
                    exit_code: outcome.exit_code,
                    duration_ms: outcome.duration_ms,
                }))
                .await;

            steps.push(StepReport {
                name: step.name.clone(),
                exit_code: outcome.exit_code,
                duration_ms: outcome.duration_ms,
            });

            if outcome.success {
                captured = Some(outcome.captured.trim().to_string());
            } else {
                debug!(
                    instance = %instance.id,
                    step = %step.name,
                    exit_code = outcome.exit_code,
                    "Step failed, stopping instance"
                );
                failing_step = Some(step.name.clone());
                status = ExecutionStatus::Failed;
                break;
            }
        }

        Ok(InstanceOutcome {
            status,
            steps,
            failing_step,
            captured,
            duration_ms: start.elapsed().as_millis() as u64,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shell::ShellExecutor;
    use std::path::PathBuf;
    use tokio::sync::watch;
    use trellis_core::ids::RunId;
    use trellis_core::instance::AxisAssignment;
    use trellis_core::pipeline::{JobDefinition, StepDefinition};
    use trellis_core::secrets::SecretValue;

    fn make_step(name: &str, cmd: &str) -> StepDefinition {
        StepDefinition {
            name: name.to_string(),
            run: cmd.to_string(),
            shell: "sh".to_string(),
            env: Default::default(),
            timeout_minutes: 30,
        }
    }

    fn make_instance(steps: Vec<StepDefinition>, gate_required: bool) -> JobInstance {
        let definition = JobDefinition {
            name: "job".to_string(),
            depends_on: vec![],
            matrix: None,
            steps,
            gate_required,
            credential_env: None,
            env: Default::default(),
        };
        JobInstance::new(&definition, AxisAssignment::new())
    }

    fn make_ctx(credential: Option<(String, SecretValue)>) -> InstanceContext {
        let (cancel_tx, cancel_rx) = watch::channel(false);
        // Keep the sender alive for the test process so the step doesn't
        // observe a dropped channel as cancellation.
        std::mem::forget(cancel_tx);
        let (events_tx, mut events_rx) = mpsc::channel(256);
        // Drain events in the background so slow consumers never block tests.
        tokio::spawn(async move { while events_rx.recv().await.is_some() {} });
        InstanceContext {
            run_id: RunId::new(),
            workspace: PathBuf::from("/tmp"),
            credential,
            cancel: cancel_rx,
            events: events_tx,
        }
    }

    fn runner() -> JobRunner {
        JobRunner::new(Arc::new(ShellExecutor::new()))
    }

    #[tokio::test]
    async fn test_all_steps_succeed() {
        let instance = make_instance(
            vec![make_step("one", "echo one"), make_step("two", "echo two")],
            false,
        );

        let outcome = runner().run(&instance, make_ctx(None)).await.unwrap();
        assert_eq!(outcome.status, ExecutionStatus::Succeeded);
        assert_eq!(outcome.steps.len(), 2);
        assert!(outcome.failing_step.is_none());
        assert_eq!(outcome.captured.as_deref(), Some("two"));
    }

    #[tokio::test]
    async fn test_first_failure_stops_remaining_steps() {
        let instance = make_instance(
            vec![
                make_step("one", "echo one"),
                make_step("boom", "exit 3"),
                make_step("never", "echo never"),
            ],
            false,
        );

        let outcome = runner().run(&instance, make_ctx(None)).await.unwrap();
        assert_eq!(outcome.status, ExecutionStatus::Failed);
        assert_eq!(outcome.failing_step.as_deref(), Some("boom"));
        assert_eq!(outcome.steps.len(), 2);
        assert_eq!(outcome.steps[1].exit_code, 3);
    }

    #[tokio::test]
    async fn test_matrix_axes_reach_step_environment() {
        let definition = JobDefinition {
            name: "check".to_string(),
            depends_on: vec![],
            matrix: None,
            steps: vec![make_step("show", "echo \"$TRELLIS_MATRIX_OS\"")],
            gate_required: false,
            credential_env: None,
            env: Default::default(),
        };
        let mut axes = AxisAssignment::new();
        axes.insert("os".to_string(), "linux".to_string());
        let instance = JobInstance::new(&definition, axes);

        let outcome = runner().run(&instance, make_ctx(None)).await.unwrap();
        assert_eq!(outcome.captured.as_deref(), Some("linux"));
    }

    #[tokio::test]
    async fn test_credential_reaches_gated_instance() {
        let instance = make_instance(
            vec![make_step("show", "echo \"${PUBLISH_TOKEN:-unset}\"")],
            true,
        );
        let credential = Some(("PUBLISH_TOKEN".to_string(), SecretValue::new("tok-123")));

        let outcome = runner().run(&instance, make_ctx(credential)).await.unwrap();
        assert_eq!(outcome.captured.as_deref(), Some("tok-123"));
    }

    #[tokio::test]
    async fn test_credential_withheld_from_non_gated_instance() {
        let instance = make_instance(
            vec![make_step("show", "echo \"${PUBLISH_TOKEN:-unset}\"")],
            false,
        );
        let credential = Some(("PUBLISH_TOKEN".to_string(), SecretValue::new("tok-123")));

        let outcome = runner().run(&instance, make_ctx(credential)).await.unwrap();
        assert_eq!(outcome.captured.as_deref(), Some("unset"));
    }
}
