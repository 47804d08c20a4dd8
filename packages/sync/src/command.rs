//! Pre-sync shell command.

use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use tokio::process::Command;

use crate::SyncError;

#[cfg(not(windows))]
fn shell(command: &str) -> Command {
    let mut cmd = Command::new("sh");
    cmd.arg("-c").arg(command);
    // Own process group, so a timeout reaches everything the command spawned.
    #[cfg(unix)]
    cmd.process_group(0);
    cmd
}

#[cfg(windows)]
fn shell(command: &str) -> Command {
    let mut cmd = Command::new("cmd");
    cmd.arg("/C").arg(command);
    cmd
}

/// Sends `SIGKILL` to the process group led by `pid`.
#[cfg(unix)]
fn kill_process_group(pid: Option<u32>) {
    let Some(pgid) = pid.and_then(|pid| libc::pid_t::try_from(pid).ok()) else {
        return;
    };
    // SAFETY: kill(2) takes no pointers; a negative pid targets the group only.
    if unsafe { libc::kill(-pgid, libc::SIGKILL) } != 0 {
        log::debug!(
            "Process group {pgid} already gone: {}",
            std::io::Error::last_os_error()
        );
    }
}

/// Only the shell itself is killed (via `kill_on_drop`); its children are
/// left running.
#[cfg(not(unix))]
const fn kill_process_group(_pid: Option<u32>) {}

/// Runs `command` through the platform shell in `working_dir`.
///
/// The command runs in its own process group; if it outlives `timeout` the
/// whole group is killed, background children included. Its output is logged
/// at debug level on success and included in the error otherwise.
///
/// # Errors
///
/// * [`SyncError::PreCommand`] if the command cannot be started or exits
///   unsuccessfully.
/// * [`SyncError::PreCommandTimeout`] if it does not finish in time.
pub async fn run_pre_command(
    command: &str,
    working_dir: &Path,
    timeout: Duration,
) -> Result<(), SyncError> {
    log::info!("Running `{command}` in {}", working_dir.display());

    let child = shell(command)
        .current_dir(working_dir)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| SyncError::PreCommand {
            command: command.to_string(),
            reason: e.to_string(),
        })?;

    let pid = child.id();
    let output = tokio::time::timeout(timeout, child.wait_with_output())
        .await
        .map_err(|_| {
            kill_process_group(pid);
            SyncError::PreCommandTimeout {
                command: command.to_string(),
                timeout,
            }
        })?
        .map_err(|e| SyncError::PreCommand {
            command: command.to_string(),
            reason: e.to_string(),
        })?;

    let stdout = String::from_utf8_lossy(&output.stdout);
    if !stdout.trim().is_empty() {
        log::debug!("`{command}` output:\n{}", stdout.trim_end());
    }

    if output.status.success() {
        Ok(())
    } else {
        let stderr = String::from_utf8_lossy(&output.stderr);
        let stderr = stderr.trim();
        Err(SyncError::PreCommand {
            command: command.to_string(),
            reason: if stderr.is_empty() {
                output.status.to_string()
            } else {
                format!("{}: {stderr}", output.status)
            },
        })
    }
}
