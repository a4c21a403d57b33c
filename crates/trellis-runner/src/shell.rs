//! Shell-based step execution on the host.

use async_trait::async_trait;
use std::collections::HashMap;
use std::process::Stdio;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tokio::sync::mpsc;
use tokio::time::{Duration, sleep};
use tracing::{debug, info, warn};
use trellis_core::ports::{OutputLine, OutputStream, StepContext, StepExecutor, StepOutcome};
use trellis_core::{Error, Result};

/// Step executor running commands through the host shell.
pub struct ShellExecutor;

impl ShellExecutor {
    pub fn new() -> Self {
        Self
    }
}

impl Default for ShellExecutor {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl StepExecutor for ShellExecutor {
    async fn execute(
        &self,
        ctx: &StepContext,
        output_tx: mpsc::Sender<OutputLine>,
    ) -> Result<StepOutcome> {
        let start = std::time::Instant::now();

        if *ctx.cancel.borrow() {
            return Err(Error::Cancelled);
        }

        info!(
            job = %ctx.job,
            step = %ctx.step.name,
            workspace = %ctx.workspace.display(),
            "Executing shell step"
        );

        // Build environment: process env, then instance env (matrix axes
        // included), then step env, then the scoped credential last.
        let mut env_vars: HashMap<String, String> = std::env::vars().collect();
        env_vars.extend(ctx.env.clone());
        env_vars.extend(ctx.step.env.clone());
        if let Some((name, secret)) = &ctx.credential {
            env_vars.insert(name.clone(), secret.expose().to_string());
        }

        let mut child = Command::new(&ctx.step.shell)
            .arg("-c")
            .arg(&ctx.step.run)
            .current_dir(&ctx.workspace)
            .envs(&env_vars)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| {
                Error::Internal(format!("Failed to spawn step `{}`: {}", ctx.step.name, e))
            })?;

        let stdout = child.stdout.take().ok_or_else(|| {
            Error::Internal("child process has no stdout handle".to_string())
        })?;
        let stderr = child.stderr.take().ok_or_else(|| {
            Error::Internal("child process has no stderr handle".to_string())
        })?;

        // Stream stdout, accumulating the captured text for consistency
        // checks. Keep draining even if the render side went away.
        let stdout_tx = output_tx.clone();
        let stdout_handle = tokio::spawn(async move {
            let reader = BufReader::new(stdout);
            let mut lines = reader.lines();
            let mut captured = String::new();
            let mut line_num = 0u32;

            while let Ok(Some(line)) = lines.next_line().await {
                line_num += 1;
                captured.push_str(&line);
                captured.push('\n');
                let output = OutputLine {
                    stream: OutputStream::Stdout,
                    content: line,
                    line_number: line_num,
                    timestamp: chrono::Utc::now(),
                };
                let _ = stdout_tx.send(output).await;
            }

            captured
        });

        // Stream stderr
        let stderr_tx = output_tx;
        let stderr_handle = tokio::spawn(async move {
            let reader = BufReader::new(stderr);
            let mut lines = reader.lines();
            let mut line_num = 0u32;

            while let Ok(Some(line)) = lines.next_line().await {
                line_num += 1;
                let output = OutputLine {
                    stream: OutputStream::Stderr,
                    content: line,
                    line_number: line_num,
                    timestamp: chrono::Utc::now(),
                };
                let _ = stderr_tx.send(output).await;
            }
        });

        let timeout_secs = u64::from(ctx.step.timeout_minutes) * 60;
        let deadline = sleep(Duration::from_secs(timeout_secs));
        tokio::pin!(deadline);
        let mut cancel = ctx.cancel.clone();

        let wait_result = loop {
            tokio::select! {
                result = child.wait() => break result,
                _ = &mut deadline => {
                    warn!(step = %ctx.step.name, timeout_secs, "Step timed out, killing process");
                    let _ = child.kill().await;
                    return Err(Error::StepTimeout {
                        step: ctx.step.name.clone(),
                        seconds: timeout_secs,
                    });
                }
                changed = cancel.changed() => {
                    if changed.is_err() || *cancel.borrow() {
                        warn!(step = %ctx.step.name, "Run cancelled, killing process");
                        let _ = child.kill().await;
                        return Err(Error::Cancelled);
                    }
                }
            }
        };

        let captured = stdout_handle.await.unwrap_or_default();
        let _ = stderr_handle.await;

        let status = wait_result.map_err(|e| {
            Error::Internal(format!("Failed to wait for process: {}", e))
        })?;

        let exit_code = status.code().unwrap_or(-1);
        let duration_ms = start.elapsed().as_millis() as u64;

        debug!(exit_code, duration_ms, "Step completed");

        Ok(StepOutcome {
            exit_code,
            success: exit_code == 0,
            duration_ms,
            captured,
        })
    }
}
