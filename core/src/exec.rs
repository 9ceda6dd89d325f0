//! External process execution with a mandatory timeout.
//!
//! On expiry the child is allowed to keep running; its handle is registered
//! under a task-local id so later requests can poll for completion instead
//! of losing the work.

use std::collections::HashMap;
use std::process::Stdio;
use std::sync::Arc;
use std::sync::Mutex;
use std::time::Duration;
use std::time::Instant;

use serde::Serialize;
use tokio::io::AsyncReadExt;
use tokio::process::Command;
use tracing::debug;
use uuid::Uuid;

use crate::error::NtsError;
use crate::error::Result;

// Caps match what an interactive agent can usefully consume per stream.
const MAX_STREAM_OUTPUT: usize = 10 * 1024;
const MAX_STREAM_OUTPUT_LINES: usize = 256;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandOutput {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
    pub duration_ms: u64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase", tag = "status")]
pub enum BackgroundStatus {
    Running,
    Finished(CommandOutput),
}

/// A command that outlived its timeout and keeps running detached.
#[derive(Debug, Clone)]
pub struct BackgroundHandle {
    pub command: Vec<String>,
    status: Arc<Mutex<BackgroundStatus>>,
}

impl BackgroundHandle {
    pub fn snapshot(&self) -> BackgroundStatus {
        match self.status.lock() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}

/// Task-local registry of timed-out commands, keyed by handle id.
#[derive(Debug, Default)]
pub struct BackgroundCommands {
    handles: HashMap<String, BackgroundHandle>,
}

impl BackgroundCommands {
    pub fn register(&mut self, handle: BackgroundHandle) -> String {
        let id = Uuid::new_v4().to_string();
        self.handles.insert(id.clone(), handle);
        id
    }

    pub fn poll(&self, id: &str) -> Option<BackgroundStatus> {
        self.handles.get(id).map(BackgroundHandle::snapshot)
    }

    pub fn ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.handles.keys().cloned().collect();
        ids.sort();
        ids
    }
}

#[derive(Debug)]
pub enum ExecOutcome {
    Completed(CommandOutput),
    TimedOut(BackgroundHandle),
}

/// Run `command` in `cwd`, waiting at most `timeout_ms`. The timeout is
/// mandatory; callers decide what to do with a [`ExecOutcome::TimedOut`]
/// handle (usually register it and surface [`NtsError::Timeout`]).
pub async fn run_command(
    command: &[String],
    cwd: &std::path::Path,
    timeout_ms: u64,
) -> Result<ExecOutcome> {
    let (program, args) = command
        .split_first()
        .ok_or_else(|| NtsError::InvalidArgument("command must not be empty".to_string()))?;
    if timeout_ms == 0 {
        return Err(NtsError::InvalidArgument(
            "timeoutMs must be greater than zero".to_string(),
        ));
    }

    let start = Instant::now();
    let mut child = Command::new(program)
        .args(args)
        .current_dir(cwd)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()?;

    let stdout = child.stdout.take();
    let stderr = child.stderr.take();
    let stdout_task = tokio::spawn(read_capped(stdout));
    let stderr_task = tokio::spawn(read_capped(stderr));

    match tokio::time::timeout(Duration::from_millis(timeout_ms), child.wait()).await {
        Ok(status) => {
            let status = status?;
            let stdout = stdout_task.await.unwrap_or_default();
            let stderr = stderr_task.await.unwrap_or_default();
            Ok(ExecOutcome::Completed(CommandOutput {
                exit_code: status.code().unwrap_or(-1),
                stdout,
                stderr,
                duration_ms: start.elapsed().as_millis() as u64,
            }))
        }
        Err(_) => {
            debug!(command = ?command, "command exceeded its timeout, detaching");
            let status = Arc::new(Mutex::new(BackgroundStatus::Running));
            let shared = Arc::clone(&status);
            tokio::spawn(async move {
                let exit = child.wait().await;
                let stdout = stdout_task.await.unwrap_or_default();
                let stderr = stderr_task.await.unwrap_or_default();
                let output = CommandOutput {
                    exit_code: exit.map(|s| s.code().unwrap_or(-1)).unwrap_or(-1),
                    stdout,
                    stderr,
                    duration_ms: start.elapsed().as_millis() as u64,
                };
                if let Ok(mut guard) = shared.lock() {
                    *guard = BackgroundStatus::Finished(output);
                }
            });
            Ok(ExecOutcome::TimedOut(BackgroundHandle {
                command: command.to_vec(),
                status,
            }))
        }
    }
}

/// Drain a stream to completion but retain only the first 10 KiB / 256
/// lines, whichever cap is hit first.
async fn read_capped(stream: Option<impl tokio::io::AsyncRead + Unpin>) -> String {
    let Some(mut stream) = stream else {
        return String::new();
    };
    let mut kept: Vec<u8> = Vec::new();
    let mut lines = 0usize;
    let mut truncated = false;
    let mut buf = [0u8; 4096];
    loop {
        match stream.read(&mut buf).await {
            Ok(0) | Err(_) => break,
            Ok(n) => {
                if truncated {
                    continue;
                }
                for &byte in &buf[..n] {
                    if kept.len() >= MAX_STREAM_OUTPUT || lines >= MAX_STREAM_OUTPUT_LINES {
                        truncated = true;
                        break;
                    }
                    if byte == b'\n' {
                        lines += 1;
                    }
                    kept.push(byte);
                }
            }
        }
    }
    let mut text = String::from_utf8_lossy(&kept).into_owned();
    if truncated {
        text.push_str("\n[output truncated]");
    }
    text
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;

    fn shell(script: &str) -> Vec<String> {
        vec!["sh".to_string(), "-c".to_string(), script.to_string()]
    }

    #[tokio::test]
    async fn completed_command_reports_output_and_exit_code() {
        let dir = tempfile::tempdir().unwrap();
        let outcome = run_command(&shell("echo out; echo err >&2; exit 3"), dir.path(), 5_000)
            .await
            .unwrap();
        match outcome {
            ExecOutcome::Completed(output) => {
                assert_eq!(output.exit_code, 3);
                assert_eq!(output.stdout.trim(), "out");
                assert_eq!(output.stderr.trim(), "err");
            }
            ExecOutcome::TimedOut(_) => panic!("unexpected timeout"),
        }
    }

    #[tokio::test]
    async fn slow_command_times_out_and_finishes_in_background() {
        let dir = tempfile::tempdir().unwrap();
        let outcome = run_command(&shell("sleep 0.2; echo late"), dir.path(), 20)
            .await
            .unwrap();
        let handle = match outcome {
            ExecOutcome::TimedOut(handle) => handle,
            ExecOutcome::Completed(_) => panic!("expected a timeout"),
        };
        assert!(matches!(handle.snapshot(), BackgroundStatus::Running));

        tokio::time::sleep(Duration::from_millis(400)).await;
        match handle.snapshot() {
            BackgroundStatus::Finished(output) => {
                assert_eq!(output.stdout.trim(), "late");
                assert_eq!(output.exit_code, 0);
            }
            BackgroundStatus::Running => panic!("command should have finished"),
        }
    }

    #[tokio::test]
    async fn empty_command_is_invalid() {
        let dir = tempfile::tempdir().unwrap();
        let err = run_command(&[], dir.path(), 1_000).await.unwrap_err();
        assert!(matches!(err, NtsError::InvalidArgument(_)));
    }
}
