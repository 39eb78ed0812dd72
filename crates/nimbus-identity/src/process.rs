//! Running developer tools (`az`, `pwsh`) as child processes.

use std::process::Stdio;
use std::time::Duration;

use nimbus_core::{Context, CredentialError};
use tracing::debug;

#[derive(Debug, thiserror::Error)]
pub(crate) enum ProcessError {
    #[error("{program} was not found on PATH")]
    NotFound { program: String },

    #[error("{program} did not finish within {timeout:?}")]
    TimedOut { program: String, timeout: Duration },

    #[error("failed to run {program}: {message}")]
    Io { program: String, message: String },

    #[error("cancelled while waiting for {program}")]
    Cancelled { program: String },
}

impl ProcessError {
    pub(crate) fn into_credential_error(self, credential: &str) -> CredentialError {
        match self {
            Self::Cancelled { .. } => CredentialError::Cancelled,
            other => CredentialError::unavailable(credential, other.to_string()),
        }
    }
}

/// Captured result of a finished tool.
#[derive(Debug)]
pub(crate) struct ToolOutput {
    pub success: bool,
    pub stdout: String,
    pub stderr: String,
}

/// Run `program args...` with stdin closed, bounded by `timeout` and by the
/// caller's deadline. The child is killed if the wait is abandoned.
pub(crate) async fn run_tool(
    ctx: &Context,
    program: &str,
    args: &[String],
    timeout: Duration,
) -> Result<ToolOutput, ProcessError> {
    let budget = ctx.remaining().map_or(timeout, |left| left.min(timeout));
    let deadline_bound = budget < timeout;

    let mut command = tokio::process::Command::new(program);
    command
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    debug!(program, "running developer tool");

    let output = tokio::select! {
        biased;
        _ = ctx.cancellation().cancelled() => {
            return Err(ProcessError::Cancelled { program: program.to_string() });
        }
        waited = tokio::time::timeout(budget, command.output()) => waited,
    };

    let output = match output {
        Ok(Ok(output)) => output,
        Ok(Err(e)) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(ProcessError::NotFound {
                program: program.to_string(),
            })
        }
        Ok(Err(e)) => {
            return Err(ProcessError::Io {
                program: program.to_string(),
                message: e.to_string(),
            })
        }
        Err(_) if deadline_bound => {
            return Err(ProcessError::Cancelled {
                program: program.to_string(),
            })
        }
        Err(_) => {
            return Err(ProcessError::TimedOut {
                program: program.to_string(),
                timeout,
            })
        }
    };

    Ok(ToolOutput {
        success: output.status.success(),
        stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
        stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
    })
}

/// Whether this target can spawn processes at all.
pub(crate) fn process_support() -> Result<(), String> {
    if cfg!(target_family = "wasm") {
        Err("process spawning is not available on this target".to_string())
    } else {
        Ok(())
    }
}
