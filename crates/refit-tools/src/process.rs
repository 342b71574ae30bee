//! External process runner with stdin feeding and a wall-clock limit.

use std::process::Stdio;
use std::time::Duration;

use tokio::io::AsyncWriteExt;
use tokio::process::Command;

use crate::executor::ToolError;

#[derive(Debug, Clone)]
pub struct ProcessOutput {
    pub stdout: String,
    pub stderr: String,
    /// `-1` when the process was terminated by a signal.
    pub exit_code: i32,
}

impl ProcessOutput {
    #[must_use]
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// Run `program` with `args`, writing `stdin` to it if given.
///
/// The child is killed when `timeout` elapses.
///
/// # Errors
///
/// Returns `ToolError::Execution` if the program cannot be started and
/// `ToolError::Timeout` if it does not finish in time.
pub async fn run_process(
    program: &str,
    args: &[&str],
    stdin: Option<&str>,
    timeout: Duration,
) -> Result<ProcessOutput, ToolError> {
    let mut child = Command::new(program)
        .args(args)
        .stdin(if stdin.is_some() {
            Stdio::piped()
        } else {
            Stdio::null()
        })
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| ToolError::Execution(format!("failed to start `{program}`: {e}")))?;

    if let (Some(input), Some(mut pipe)) = (stdin, child.stdin.take()) {
        let input = input.to_owned();
        tokio::spawn(async move {
            if let Err(e) = pipe.write_all(input.as_bytes()).await {
                tracing::debug!("stdin write failed: {e}");
            }
        });
    }

    let output = match tokio::time::timeout(timeout, child.wait_with_output()).await {
        Ok(output) => output?,
        Err(_) => {
            tracing::warn!(program, timeout_secs = timeout.as_secs(), "process timed out");
            return Err(ToolError::Timeout {
                timeout_secs: timeout.as_secs(),
            });
        }
    };

    Ok(ProcessOutput {
        stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
        stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        exit_code: output.status.code().unwrap_or(-1),
    })
}
