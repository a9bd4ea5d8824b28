//! Process Runner (C3): launch external binaries with a timeout, capturing
//! exit code, stdout, stderr. Arguments are assumed pre-quoted by the
//! caller — the runner does no shell interpretation or extra quoting
//! beyond what the OS spawn API provides, and binary paths from
//! configuration are treated as trusted (per spec §4.3).

use std::path::Path;
use std::time::Duration;

use jacobine_core::error::ProcessError;
use tokio::process::Command;
use tracing::{debug, warn};

/// Default timeout applied when a stage does not configure one explicitly.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(300);

#[derive(Debug, Clone)]
pub struct ProcessOutput {
    pub successful: bool,
    pub command_line: String,
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

pub struct ProcessRunner;

impl ProcessRunner {
    /// Spawn `binary` with `args` in `working_dir` (defaults to the current
    /// directory), bounded by `timeout` (defaults to [`DEFAULT_TIMEOUT`]).
    pub async fn run(
        binary: &str,
        args: &[String],
        working_dir: Option<&Path>,
        timeout: Option<Duration>,
    ) -> Result<ProcessOutput, ProcessError> {
        let command_line = format!("{binary} {}", args.join(" "));
        let timeout = timeout.unwrap_or(DEFAULT_TIMEOUT);

        debug!(command_line = %command_line, timeout_secs = timeout.as_secs(), "spawning process");

        let mut command = Command::new(binary);
        command.args(args);
        if let Some(dir) = working_dir {
            command.current_dir(dir);
        }
        command
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::piped());

        let child = command.spawn().map_err(|e| ProcessError {
            command_line: command_line.clone(),
            message: format!("failed to spawn: {e}"),
            exit_code: None,
        })?;

        let output = match tokio::time::timeout(timeout, child.wait_with_output()).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => {
                return Err(ProcessError {
                    command_line,
                    message: format!("process wait failed: {e}"),
                    exit_code: None,
                });
            }
            Err(_) => {
                warn!(command_line = %command_line, timeout_secs = timeout.as_secs(), "process timed out");
                return Err(ProcessError {
                    command_line,
                    message: format!("timed out after {}s", timeout.as_secs()),
                    exit_code: None,
                });
            }
        };

        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        let stderr = String::from_utf8_lossy(&output.stderr).into_owned();
        let exit_code = output.status.code();
        let successful = output.status.success();

        if !successful {
            warn!(
                command_line = %command_line,
                exit_code = ?exit_code,
                stderr_tail = %tail(&stderr, 500),
                "process exited non-zero"
            );
        }

        Ok(ProcessOutput {
            successful,
            command_line,
            exit_code,
            stdout,
            stderr,
        })
    }
}

fn tail(s: &str, max_chars: usize) -> &str {
    if s.len() <= max_chars {
        s
    } else {
        &s[s.len() - max_chars..]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn captures_stdout_and_success() {
        let output = ProcessRunner::run("echo", &["hello".to_string()], None, None)
            .await
            .expect("run");
        assert!(output.successful);
        assert_eq!(output.stdout.trim(), "hello");
        assert_eq!(output.exit_code, Some(0));
    }

    #[tokio::test]
    async fn captures_non_zero_exit_code() {
        let output = ProcessRunner::run("sh", &["-c".to_string(), "exit 3".to_string()], None, None)
            .await
            .expect("run");
        assert!(!output.successful);
        assert_eq!(output.exit_code, Some(3));
    }

    #[tokio::test]
    async fn timeout_yields_process_error() {
        let err = ProcessRunner::run(
            "sleep",
            &["5".to_string()],
            None,
            Some(Duration::from_millis(50)),
        )
        .await
        .unwrap_err();
        assert!(err.message.contains("timed out"));
    }

    #[tokio::test]
    async fn spawn_failure_yields_process_error() {
        let err = ProcessRunner::run("definitely-not-a-real-binary", &[], None, None)
            .await
            .unwrap_err();
        assert!(err.message.contains("failed to spawn"));
    }
}
