//! Termination signals
//!
//! The bootstrap usually runs as PID 1, where the kernel drops signals that
//! keep their default disposition. Every stage that can block therefore
//! races a handler for SIGINT and SIGTERM.

use std::future::Future;
use std::io;
use tokio::signal::unix::{signal, SignalKind};
use tracing::warn;

/// Install SIGINT and SIGTERM handlers. The returned future resolves to the
/// number of the first signal received.
///
/// Handlers are registered immediately, not on first poll.
pub fn termination_signal() -> io::Result<impl Future<Output = i32>> {
    let mut sigint = signal(SignalKind::interrupt())?;
    let mut sigterm = signal(SignalKind::terminate())?;

    Ok(async move {
        tokio::select! {
            _ = sigint.recv() => libc::SIGINT,
            _ = sigterm.recv() => libc::SIGTERM,
        }
    })
}

/// Send `sig` to every process in the group led by `pgid`. Returns whether
/// it was delivered.
pub fn signal_group(pgid: u32, sig: i32) -> bool {
    // SAFETY: plain syscall on an integer process group id
    if unsafe { libc::killpg(pgid as libc::pid_t, sig) } == 0 {
        return true;
    }
    let err = io::Error::last_os_error();
    if !is_already_gone(&err) {
        warn!("Failed to send signal {} to process group {}: {}", sig, pgid, err);
    }
    false
}

/// ESRCH: the target exited between the lookup and the signal
fn is_already_gone(err: &io::Error) -> bool {
    err.raw_os_error() == Some(libc::ESRCH)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::capture_logs;
    use std::os::unix::process::CommandExt;
    use std::process::Command;

    fn reaped_pid() -> u32 {
        let mut child = Command::new("true").spawn().unwrap();
        let pid = child.id();
        child.wait().unwrap();
        pid
    }

    #[test]
    fn test_exited_target_is_quiet() {
        let pid = reaped_pid();
        let (logs, _guard) = capture_logs();

        assert!(!signal_group(pid, libc::SIGTERM));
        assert!(logs.lines().is_empty());
    }

    #[test]
    fn test_rejected_signal_is_logged() {
        let (logs, _guard) = capture_logs();

        // Out-of-range signal number: EINVAL, nothing is delivered
        let own_group = unsafe { libc::getpgrp() } as u32;
        assert!(!signal_group(own_group, 4096));

        let lines = logs.lines();
        assert_eq!(lines.len(), 1);
        assert!(lines[0].contains("WARN"));
        assert!(lines[0].contains("Failed to send signal 4096 to process group"));
    }

    #[test]
    fn test_only_esrch_counts_as_gone() {
        assert!(is_already_gone(&io::Error::from_raw_os_error(libc::ESRCH)));
        assert!(!is_already_gone(&io::Error::from_raw_os_error(libc::EPERM)));
        assert!(!is_already_gone(&io::Error::from_raw_os_error(libc::EINVAL)));
    }

    #[test]
    fn test_delivered_signal() {
        let mut child = Command::new("sleep")
            .arg("30")
            .process_group(0)
            .spawn()
            .unwrap();

        assert!(signal_group(child.id(), libc::SIGKILL));

        let status = child.wait().unwrap();
        assert_eq!(crate::supervisor::exit_code(status), 128 + libc::SIGKILL);
    }
}
