use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use tokio::process::Command;

use crate::error::{AppError, Result};
use crate::workspace::CommandOutput;

/// Exit code reported when a command is killed for running past its timeout.
pub const TIMEOUT_EXIT_CODE: i32 = -1;

/// Run `command` through `sh -c` in `cwd`, capturing both streams.
///
/// A timeout is not an error: the child is killed and the output reports
/// `TIMEOUT_EXIT_CODE` with an explanatory stderr. Failing to spawn is.
pub async fn run_command(command: &str, cwd: &Path, timeout: Duration) -> Result<CommandOutput> {
    tracing::debug!(command, cwd = %cwd.display(), "Running shell command");

    let child = Command::new("sh")
        .arg("-c")
        .arg(command)
        .current_dir(cwd)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| AppError::Shell(format!("Failed to spawn `{command}`: {e}")))?;

    match tokio::time::timeout(timeout, child.wait_with_output()).await {
        Ok(output) => {
            let output = output
                .map_err(|e| AppError::Shell(format!("Failed to wait for `{command}`: {e}")))?;
            Ok(CommandOutput {
                exit_code: output.status.code().unwrap_or(TIMEOUT_EXIT_CODE),
                stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
                stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            })
        }
        Err(_) => {
            tracing::warn!(command, timeout_secs = timeout.as_secs(), "Command timed out");
            Ok(CommandOutput {
                exit_code: TIMEOUT_EXIT_CODE,
                stdout: String::new(),
                stderr: format!("Command timed out after {} seconds", timeout.as_secs()),
            })
        }
    }
}
