//! Child termination status and signal forwarding.

use serde::{Deserialize, Serialize};
use std::fmt;

/// How the trainer process terminated.
///
/// A graceful exit and a kill by signal are kept apart so that an interrupted run is never
/// mistaken for one that failed on its own.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "value")]
pub enum ExitStatus {
    /// The process exited with this code.
    Exited(i32),
    /// The process was terminated by this signal number.
    Signaled(i32),
}

impl ExitStatus {
    pub fn from_std(status: std::process::ExitStatus) -> Self {
        #[cfg(unix)]
        {
            use std::os::unix::process::ExitStatusExt;
            if let Some(signal) = status.signal() {
                return Self::Signaled(signal);
            }
        }
        Self::Exited(status.code().unwrap_or(-1))
    }

    pub fn success(&self) -> bool {
        matches!(self, Self::Exited(0))
    }

    /// Exit code the launcher itself should terminate with, using the shell's
    /// `128 + signal` convention for signal deaths.
    pub fn exit_code(&self) -> i32 {
        match *self {
            Self::Exited(code) => code,
            Self::Signaled(signal) => 128 + signal,
        }
    }

    /// Turn anything but a clean zero exit into [`LaunchError::ChildFailed`].
    ///
    /// [`LaunchError::ChildFailed`]: crate::error::LaunchError::ChildFailed
    pub fn into_result(self) -> crate::error::Result<()> {
        if self.success() {
            Ok(())
        } else {
            Err(crate::error::LaunchError::ChildFailed { status: self })
        }
    }
}

impl fmt::Display for ExitStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Exited(code) => write!(f, "exited with code {code}"),
            Self::Signaled(signal) => write!(f, "terminated by signal {signal}"),
        }
    }
}

/// Send `signal` to the process `pid`. Returns `false` if the process is already gone.
#[cfg(unix)]
pub fn forward_signal(pid: u32, signal: i32) -> bool {
    // SAFETY: kill(2) has no memory-safety preconditions.
    unsafe { libc::kill(pid as libc::pid_t, signal) == 0 }
}

/// Send `signal` to every process in the group led by `pgid`.
#[cfg(unix)]
pub fn forward_signal_to_group(pgid: u32, signal: i32) -> bool {
    // SAFETY: killpg(3) has no memory-safety preconditions.
    unsafe { libc::killpg(pgid as libc::pid_t, signal) == 0 }
}

/// Waits for any of the termination signals the launcher relays to its child.
#[cfg(unix)]
pub(crate) struct SignalRelay {
    interrupt: tokio::signal::unix::Signal,
    terminate: tokio::signal::unix::Signal,
    hangup: tokio::signal::unix::Signal,
}

#[cfg(unix)]
impl SignalRelay {
    pub(crate) fn install() -> std::io::Result<Self> {
        use tokio::signal::unix::{SignalKind, signal};
        Ok(Self {
            interrupt: signal(SignalKind::interrupt())?,
            terminate: signal(SignalKind::terminate())?,
            hangup: signal(SignalKind::hangup())?,
        })
    }

    /// Resolve with the raw signal number of the next delivery.
    pub(crate) async fn recv(&mut self) -> i32 {
        tokio::select! {
            _ = self.interrupt.recv() => libc::SIGINT,
            _ = self.terminate.recv() => libc::SIGTERM,
            _ = self.hangup.recv() => libc::SIGHUP,
        }
    }
}

#[cfg(not(unix))]
pub(crate) struct SignalRelay;

#[cfg(not(unix))]
impl SignalRelay {
    pub(crate) fn install() -> std::io::Result<Self> {
        Ok(Self)
    }

    pub(crate) async fn recv(&mut self) -> i32 {
        interrupt_or_pending(tokio::signal::ctrl_c().await).await
    }
}

/// Signal number for a Ctrl-C delivery. If listening for Ctrl-C failed, never resolves, so
/// the caller keeps waiting on its child instead of treating the error as an interrupt.
#[cfg_attr(unix, allow(dead_code))]
pub(crate) async fn interrupt_or_pending(delivery: std::io::Result<()>) -> i32 {
    match delivery {
        Ok(()) => 2,
        Err(e) => {
            tracing::warn!(error = %e, "Cannot listen for Ctrl-C, interrupts will not be relayed");
            std::future::pending().await
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_code_mirrors_child() {
        assert_eq!(ExitStatus::Exited(0).exit_code(), 0);
        assert_eq!(ExitStatus::Exited(1).exit_code(), 1);
        assert_eq!(ExitStatus::Signaled(2).exit_code(), 130);
        assert_eq!(ExitStatus::Signaled(15).exit_code(), 143);
    }

    #[test]
    fn test_success_only_for_zero_exit() {
        assert!(ExitStatus::Exited(0).success());
        assert!(!ExitStatus::Exited(1).success());
        assert!(!ExitStatus::Signaled(2).success());
        assert!(ExitStatus::Exited(0).into_result().is_ok());
        assert!(ExitStatus::Signaled(9).into_result().is_err());
    }

    #[test]
    fn test_exit_status_serde() {
        let json = serde_json::to_string(&ExitStatus::Signaled(2)).unwrap();
        assert_eq!(json, r#"{"kind":"signaled","value":2}"#);
        let parsed: ExitStatus = serde_json::from_str(r#"{"kind":"exited","value":0}"#).unwrap();
        assert_eq!(parsed, ExitStatus::Exited(0));
    }

    #[tokio::test]
    async fn test_failed_ctrl_c_listener_never_reports_interrupt() {
        assert_eq!(interrupt_or_pending(Ok(())).await, 2);

        let failed = interrupt_or_pending(Err(std::io::Error::other("no console")));
        let waited = tokio::time::timeout(std::time::Duration::from_millis(50), failed).await;
        assert!(waited.is_err());
    }

    #[cfg(unix)]
    #[test]
    fn test_from_std_distinguishes_signal() {
        let status = std::process::Command::new("sh")
            .args(["-c", "exit 7"])
            .status()
            .unwrap();
        assert_eq!(ExitStatus::from_std(status), ExitStatus::Exited(7));

        let status = std::process::Command::new("sh")
            .args(["-c", "kill -TERM $$"])
            .status()
            .unwrap();
        assert_eq!(ExitStatus::from_std(status), ExitStatus::Signaled(libc::SIGTERM));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_forward_signal_terminates_child() {
        let mut child = tokio::process::Command::new("sleep")
            .arg("30")
            .kill_on_drop(true)
            .spawn()
            .unwrap();
        let pid = child.id().unwrap();
        assert!(forward_signal(pid, libc::SIGINT));
        let status = child.wait().await.unwrap();
        assert_eq!(ExitStatus::from_std(status), ExitStatus::Signaled(libc::SIGINT));
    }
}
