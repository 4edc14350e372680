//! Runtime control handle passed to every callback.
//!
//! [`Control`] is the embedder's lever over a running pool: bounded
//! scale adjustments, stdin writes, signal delivery, and the shutdown
//! request. It borrows the loop's state for the duration of one
//! callback invocation, so everything it does happens at a well-defined
//! point between loop steps.

use std::io::Write;

use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use tracing::debug;

use crate::supervisor::{State, TERM_SIGNAL};

/// Handle for steering the supervisor from inside a callback.
pub struct Control<'a> {
    state: &'a mut State,
}

impl<'a> Control<'a> {
    pub(crate) fn new(state: &'a mut State) -> Self {
        Self { state }
    }

    /// Request one additional worker. The spawn happens on the loop's
    /// current turn, right after the running callback returns; the
    /// request is discarded if the pool is already at `max`.
    pub fn scale_up(&mut self) {
        self.state.pending_scale_up += 1;
    }

    /// Ask one worker to stop, shrinking the pool toward `min`. Picks a
    /// worker not already signalled for termination, so consecutive
    /// calls target distinct workers. No-op at or below `min`, or when
    /// every worker is already winding down. The exit surfaces through
    /// the normal reap path and does not trigger a replacement.
    pub fn scale_down(&mut self) {
        if self.state.registry.len() <= self.state.min {
            return;
        }
        let Some(pid) = self.state.registry.scale_down_target() else {
            return;
        };
        if let Some(worker) = self.state.registry.get_mut(pid) {
            worker.terminating = true;
        }
        debug!(pid = pid.as_raw(), "scaling down");
        if let Err(error) = kill(pid, TERM_SIGNAL) {
            debug!(pid = pid.as_raw(), %error, "scale-down signal failed");
        }
    }

    /// Raise the shutdown flag. The loop finishes its current turn and
    /// then runs the orderly shutdown sequence.
    pub fn shutdown(&mut self) {
        self.state.shutdown = true;
    }

    /// Write to a worker's stdin. Silently a no-op when the pid is
    /// unknown or the worker has no stdin (closure workers never do).
    pub fn send_input(&mut self, pid: Pid, bytes: &[u8]) {
        let Some(worker) = self.state.registry.get_mut(pid) else {
            return;
        };
        let Some(stdin) = worker.stdin.as_mut() else {
            return;
        };
        if let Err(error) = stdin.write_all(bytes) {
            debug!(pid = pid.as_raw(), %error, "stdin write dropped");
        }
    }

    /// Deliver an arbitrary signal to any pid.
    pub fn signal(&self, pid: Pid, sig: Signal) {
        if let Err(error) = kill(pid, sig) {
            debug!(pid = pid.as_raw(), %sig, %error, "signal delivery failed");
        }
    }

    /// Number of currently registered workers.
    pub fn worker_count(&self) -> usize {
        self.state.registry.len()
    }

    /// Pids of the currently registered workers, in unspecified order.
    pub fn pids(&self) -> Vec<Pid> {
        self.state.registry.pids()
    }
}
