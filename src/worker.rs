//! Worker records: one supervised child process and the master-side
//! handle to it.
//!
//! A [`Worker`] owns the master ends of the child's streams. Descriptors
//! are open exactly while the worker is running; the reaper closes them
//! when it observes the exit. Callbacks never see the live record — they
//! receive by-value snapshots with the descriptor fields cleared.

use std::fmt;
use std::fs::File;
use std::os::fd::{AsFd, AsRawFd, RawFd};
use std::process::Child;

use nix::unistd::Pid;

/// Why a worker was spawned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpawnReason {
    /// Part of the initial pool fill.
    Initial,
    /// Replaces a worker that exited while the pool was below `min`.
    Replacement,
    /// Spawned by an explicit `scale_up` request.
    ScaleUp,
}

impl fmt::Display for SpawnReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SpawnReason::Initial => write!(f, "initial"),
            SpawnReason::Replacement => write!(f, "replacement"),
            SpawnReason::ScaleUp => write!(f, "scale-up"),
        }
    }
}

/// How a worker exited. `Unknown` while it is still running.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitReason {
    /// The process exited on its own; `exit_code` holds its status.
    Normal,
    /// Terminated by a signal other than SIGKILL.
    Signal,
    /// Terminated by SIGKILL.
    Killed,
    /// Not yet exited, or the exit status could not be determined.
    Unknown,
}

impl fmt::Display for ExitReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExitReason::Normal => write!(f, "normal"),
            ExitReason::Signal => write!(f, "signal"),
            ExitReason::Killed => write!(f, "killed"),
            ExitReason::Unknown => write!(f, "unknown"),
        }
    }
}

/// Which of a worker's readable streams a descriptor belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum StreamKind {
    Stdout,
    Stderr,
    Ipc,
}

/// One supervised child process.
///
/// Command workers carry a process handle plus four piped descriptors
/// (stdin, stdout, stderr, and the fd-3 IPC pipe). Closure workers carry
/// only the parent end of their socket pair as `ipc`.
pub struct Worker {
    pub(crate) pid: Pid,
    pub(crate) reason: SpawnReason,
    pub(crate) handle: Option<Child>,
    pub(crate) stdin: Option<File>,
    pub(crate) stdout: Option<File>,
    pub(crate) stderr: Option<File>,
    pub(crate) ipc: Option<File>,
    pub(crate) ipc_buf: Vec<u8>,
    pub(crate) running: bool,
    pub(crate) exit_code: i32,
    pub(crate) exit_reason: ExitReason,
    pub(crate) terminating: bool,
}

impl Worker {
    /// Process id of the child.
    pub fn pid(&self) -> Pid {
        self.pid
    }

    /// Why this worker was spawned.
    pub fn spawn_reason(&self) -> SpawnReason {
        self.reason
    }

    /// True from spawn until the reaper observes the exit.
    pub fn is_running(&self) -> bool {
        self.running
    }

    /// Exit status. Meaningful only once `is_running()` is false; zero
    /// for signal-induced exits.
    pub fn exit_code(&self) -> i32 {
        self.exit_code
    }

    /// Exit classification. `Unknown` while the worker is running.
    pub fn exit_reason(&self) -> ExitReason {
        self.exit_reason
    }

    /// By-value copy with descriptor and handle fields cleared, suitable
    /// for handing to user callbacks.
    pub(crate) fn snapshot(&self) -> Worker {
        Worker {
            pid: self.pid,
            reason: self.reason,
            handle: None,
            stdin: None,
            stdout: None,
            stderr: None,
            ipc: None,
            ipc_buf: Vec::new(),
            running: self.running,
            exit_code: self.exit_code,
            exit_reason: self.exit_reason,
            terminating: self.terminating,
        }
    }

    /// The readable streams this worker contributes to the poll set.
    pub(crate) fn streams(&self) -> impl Iterator<Item = &File> {
        [self.stdout.as_ref(), self.stderr.as_ref(), self.ipc.as_ref()]
            .into_iter()
            .flatten()
    }

    /// Raw descriptors of the readable streams, in stdout/stderr/ipc order.
    pub(crate) fn readable_fds(&self) -> Vec<RawFd> {
        self.streams().map(|f| f.as_fd().as_raw_fd()).collect()
    }

    /// True if `fd` is one of this worker's readable stream descriptors.
    pub(crate) fn owns_fd(&self, fd: RawFd) -> bool {
        self.streams().any(|f| f.as_fd().as_raw_fd() == fd)
    }

    /// Classify `fd` and hand back the stream for reading.
    pub(crate) fn stream_mut(&mut self, fd: RawFd) -> Option<(StreamKind, &mut File)> {
        if let Some(f) = self.stdout.as_mut() {
            if f.as_fd().as_raw_fd() == fd {
                return Some((StreamKind::Stdout, f));
            }
        }
        if let Some(f) = self.stderr.as_mut() {
            if f.as_fd().as_raw_fd() == fd {
                return Some((StreamKind::Stderr, f));
            }
        }
        if let Some(f) = self.ipc.as_mut() {
            if f.as_fd().as_raw_fd() == fd {
                return Some((StreamKind::Ipc, f));
            }
        }
        None
    }

    /// Close every descriptor and the process handle. Idempotent; closing
    /// an already-cleared field is harmless.
    pub(crate) fn close_resources(&mut self) {
        self.stdin.take();
        self.stdout.take();
        self.stderr.take();
        self.ipc.take();
        self.handle.take();
    }
}

impl fmt::Debug for Worker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Worker")
            .field("pid", &self.pid.as_raw())
            .field("reason", &self.reason)
            .field("running", &self.running)
            .field("exit_code", &self.exit_code)
            .field("exit_reason", &self.exit_reason)
            .field("terminating", &self.terminating)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bare_worker(pid: i32) -> Worker {
        Worker {
            pid: Pid::from_raw(pid),
            reason: SpawnReason::Initial,
            handle: None,
            stdin: None,
            stdout: None,
            stderr: None,
            ipc: None,
            ipc_buf: Vec::new(),
            running: true,
            exit_code: 0,
            exit_reason: ExitReason::Unknown,
            terminating: false,
        }
    }

    #[test]
    fn snapshot_clears_resources_and_keeps_state() {
        let mut w = bare_worker(42);
        w.running = false;
        w.exit_code = 3;
        w.exit_reason = ExitReason::Normal;

        let snap = w.snapshot();
        assert_eq!(snap.pid(), Pid::from_raw(42));
        assert!(!snap.is_running());
        assert_eq!(snap.exit_code(), 3);
        assert_eq!(snap.exit_reason(), ExitReason::Normal);
        assert!(snap.stdin.is_none() && snap.stdout.is_none());
        assert!(snap.stderr.is_none() && snap.ipc.is_none());
        assert!(snap.handle.is_none());
    }

    #[test]
    fn close_resources_is_idempotent() {
        let mut w = bare_worker(1);
        w.close_resources();
        w.close_resources();
        assert!(w.streams().next().is_none());
    }

    #[test]
    fn bare_worker_contributes_no_poll_fds() {
        let w = bare_worker(1);
        assert!(w.readable_fds().is_empty());
        assert!(!w.owns_fd(0));
    }
}
