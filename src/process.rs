// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Helper process lifecycle: polite termination, bounded wait, forced kill.

use std::process::{Child, ExitStatus};
use std::time::{Duration, Instant};

/// How long a forced kill is given before the child is reaped blocking.
const KILL_WAIT: Duration = Duration::from_secs(1);

const POLL_INTERVAL: Duration = Duration::from_millis(10);

// ---------------------------------------------------------------------------
// WaitResult
// ---------------------------------------------------------------------------

/// Outcome of [`wait_for_exit`] / [`shutdown`].
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct WaitResult {
    pub exited: bool,
    pub exit_code: Option<i32>,
    pub signaled: bool,
    pub signal: Option<i32>,
    /// A forced kill was needed.
    pub killed: bool,
}

impl WaitResult {
    fn from_status(status: ExitStatus) -> Self {
        #[cfg(unix)]
        let signal = std::os::unix::process::ExitStatusExt::signal(&status);
        #[cfg(not(unix))]
        let signal: Option<i32> = None;
        Self {
            exited: true,
            exit_code: status.code(),
            signaled: signal.is_some(),
            signal,
            killed: false,
        }
    }
}

// ---------------------------------------------------------------------------
// request_shutdown / force_kill
// ---------------------------------------------------------------------------

/// Send SIGTERM (POSIX). Windows has no polite equivalent for a console
/// child, so there this is a forced kill.
pub fn request_shutdown(child: &mut Child) -> bool {
    #[cfg(unix)]
    {
        let Ok(pid) = libc::pid_t::try_from(child.id()) else {
            return false;
        };
        unsafe { libc::kill(pid, libc::SIGTERM) == 0 }
    }
    #[cfg(not(unix))]
    {
        child.kill().is_ok()
    }
}

/// SIGKILL (POSIX) or TerminateProcess (Windows).
pub fn force_kill(child: &mut Child) -> bool {
    child.kill().is_ok()
}

// ---------------------------------------------------------------------------
// wait_for_exit
// ---------------------------------------------------------------------------

/// Poll until the child exits or `timeout` passes. An already reaped child
/// reports `exited`.
pub fn wait_for_exit(child: &mut Child, timeout: Duration) -> WaitResult {
    let deadline = Instant::now() + timeout;
    loop {
        match child.try_wait() {
            Ok(Some(status)) => return WaitResult::from_status(status),
            Ok(None) => {}
            Err(e) => {
                tracing::debug!(pid = child.id(), error = %e, "try_wait failed");
                return WaitResult::default();
            }
        }
        if Instant::now() >= deadline {
            return WaitResult::default();
        }
        std::thread::sleep(POLL_INTERVAL);
    }
}

// ---------------------------------------------------------------------------
// shutdown (graceful: SIGTERM → wait → SIGKILL)
// ---------------------------------------------------------------------------

/// SIGTERM, wait `grace`, then SIGKILL and reap. Always leaves the child
/// reaped unless the OS refuses the kill.
pub fn shutdown(child: &mut Child, grace: Duration) -> WaitResult {
    if let Ok(Some(status)) = child.try_wait() {
        return WaitResult::from_status(status);
    }
    request_shutdown(child);
    let r = wait_for_exit(child, grace);
    if r.exited {
        return r;
    }

    tracing::warn!(pid = child.id(), ?grace, "helper ignored SIGTERM, killing");
    force_kill(child);
    let mut r = wait_for_exit(child, KILL_WAIT);
    if !r.exited {
        r = match child.wait() {
            Ok(status) => WaitResult::from_status(status),
            Err(_) => WaitResult::default(),
        };
    }
    r.killed = true;
    r
}
