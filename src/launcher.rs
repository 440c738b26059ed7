use std::process::{ExitStatus, Stdio};

use tokio::process::Command;
#[cfg(not(coverage_nightly))]
use tracing::{debug, info};

use crate::error::LaunchError;

/// Runs `args` as a local process sharing this process's standard streams, and
/// returns the exit code to finish with.
pub async fn run_local(args: &[String]) -> Result<i32, LaunchError> {
    let Some((program, rest)) = args.split_first() else {
        return Err(LaunchError::EmptyCommand);
    };
    #[cfg(not(coverage_nightly))]
    info!(%program, args = ?rest, "Starting local command.");
    let mut child = Command::new(program)
        .args(rest)
        .stdin(Stdio::inherit())
        .stdout(Stdio::inherit())
        .stderr(Stdio::inherit())
        .spawn()
        .map_err(|source| LaunchError::Spawn {
            program: program.clone(),
            source,
        })?;
    let status = child.wait().await.map_err(|source| LaunchError::Wait {
        program: program.clone(),
        source,
    })?;
    #[cfg(not(coverage_nightly))]
    debug!(%program, %status, "Local command finished.");
    Ok(exit_code(status))
}

// The process's own code, or 128 + the signal number if it was killed.
fn exit_code(status: ExitStatus) -> i32 {
    if let Some(code) = status.code() {
        return code;
    }
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;

        if let Some(signal) = status.signal() {
            return 128 + signal;
        }
    }
    255
}
