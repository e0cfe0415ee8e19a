//! Small process-related helpers shared across the workspace.
//!
//! Besides the Windows console suppression used for every spawned child, this
//! crate owns the two-phase shutdown (terminate signal, bounded wait, forced
//! kill) that every supervised process goes through.

use std::ffi::OsStr;
#[cfg(feature = "tokio")]
use std::time::Duration;

#[cfg(windows)]
const CREATE_NO_WINDOW: u32 = 0x0800_0000;

/// Apply the Windows `CREATE_NO_WINDOW` flag to child processes.
///
/// On non-Windows targets this is a no-op.
pub trait NoWindowExt {
    fn no_window(&mut self);
}

impl NoWindowExt for std::process::Command {
    fn no_window(&mut self) {
        #[cfg(windows)]
        {
            use std::os::windows::process::CommandExt;
            self.creation_flags(CREATE_NO_WINDOW);
        }
    }
}

/// Create a `std::process::Command` with `CREATE_NO_WINDOW` applied on Windows.
pub fn std_command(program: impl AsRef<OsStr>) -> std::process::Command {
    let mut cmd = std::process::Command::new(program);
    cmd.no_window();
    cmd
}

#[cfg(feature = "tokio")]
impl NoWindowExt for tokio::process::Command {
    fn no_window(&mut self) {
        #[cfg(windows)]
        {
            use std::os::windows::process::CommandExt;
            self.as_std_mut().creation_flags(CREATE_NO_WINDOW);
        }
    }
}

/// Create a `tokio::process::Command` with `CREATE_NO_WINDOW` applied on Windows.
#[cfg(feature = "tokio")]
pub fn tokio_command(program: impl AsRef<OsStr>) -> tokio::process::Command {
    let mut cmd = tokio::process::Command::new(program);
    cmd.no_window();
    cmd
}

/// Check whether a process with the given PID exists.
///
/// Uses the null signal on unix, so a process we may not signal still counts
/// as alive. Always `false` on other targets.
pub fn is_process_alive(pid: u32) -> bool {
    #[cfg(unix)]
    {
        use nix::errno::Errno;
        use nix::sys::signal::kill;
        use nix::unistd::Pid;

        let Ok(raw) = i32::try_from(pid) else {
            return false;
        };
        match kill(Pid::from_raw(raw), None) {
            Ok(()) => true,
            Err(Errno::EPERM) => true,
            Err(_) => false,
        }
    }
    #[cfg(not(unix))]
    {
        let _ = pid;
        false
    }
}

/// Ask a process to exit (`SIGTERM`).
///
/// Returns `false` when the signal could not be delivered, including on
/// targets without a polite termination signal.
pub fn request_terminate(pid: u32) -> bool {
    #[cfg(unix)]
    {
        use nix::sys::signal::{Signal, kill};
        use nix::unistd::Pid;

        let Ok(raw) = i32::try_from(pid) else {
            return false;
        };
        kill(Pid::from_raw(raw), Signal::SIGTERM).is_ok()
    }
    #[cfg(not(unix))]
    {
        let _ = pid;
        false
    }
}

/// How a child ended up exiting during [`terminate_gracefully`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Termination {
    /// The child had already exited before we touched it.
    AlreadyExited,
    /// The child exited within the grace window after the terminate signal.
    Graceful,
    /// The grace window elapsed and the child was force killed.
    Killed,
}

/// Two-phase shutdown of a tokio child: terminate signal, bounded wait, kill.
///
/// Safe to call on a child that already exited; the child is always reaped.
#[cfg(feature = "tokio")]
pub async fn terminate_gracefully(
    child: &mut tokio::process::Child,
    grace: Duration,
) -> std::io::Result<Termination> {
    if child.try_wait()?.is_some() {
        return Ok(Termination::AlreadyExited);
    }

    let signalled = child.id().map(request_terminate).unwrap_or(false);
    if signalled {
        match tokio::time::timeout(grace, child.wait()).await {
            Ok(status) => {
                let status = status?;
                tracing::debug!(%status, "child exited after terminate signal");
                return Ok(Termination::Graceful);
            }
            Err(_) => {
                tracing::debug!(?grace, "child ignored terminate signal, killing");
            }
        }
    }

    match child.kill().await {
        Ok(()) => Ok(Termination::Killed),
        // Raced with a natural exit between the wait and the kill.
        Err(e) if e.kind() == std::io::ErrorKind::InvalidInput => Ok(Termination::AlreadyExited),
        Err(e) => Err(e),
    }
}
