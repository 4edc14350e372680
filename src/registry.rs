//! Authoritative map from pid to worker record.
//!
//! The master loop is the sole mutator: spawn inserts, reap and shutdown
//! remove. Lookup by pid is constant-time; lookup by descriptor is a
//! linear scan across workers, which is fine at pool sizes this crate
//! targets.

use std::collections::HashMap;
use std::os::fd::RawFd;

use nix::unistd::Pid;

use crate::worker::Worker;

/// Registry of live workers, keyed by pid.
#[derive(Default)]
pub(crate) struct Registry {
    workers: HashMap<Pid, Worker>,
}

impl Registry {
    pub(crate) fn new() -> Self {
        Self {
            workers: HashMap::new(),
        }
    }

    /// Number of registered workers.
    pub(crate) fn len(&self) -> usize {
        self.workers.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.workers.is_empty()
    }

    /// Insert a freshly spawned worker. A pid appears at most once; a
    /// collision would mean the previous holder was never reaped, so the
    /// stale record is replaced and its resources dropped.
    pub(crate) fn insert(&mut self, worker: Worker) {
        self.workers.insert(worker.pid, worker);
    }

    pub(crate) fn remove(&mut self, pid: Pid) -> Option<Worker> {
        self.workers.remove(&pid)
    }

    pub(crate) fn get(&self, pid: Pid) -> Option<&Worker> {
        self.workers.get(&pid)
    }

    pub(crate) fn get_mut(&mut self, pid: Pid) -> Option<&mut Worker> {
        self.workers.get_mut(&pid)
    }

    pub(crate) fn iter(&self) -> impl Iterator<Item = &Worker> {
        self.workers.values()
    }

    /// Registered pids, collected so the caller can mutate the registry
    /// while walking them.
    pub(crate) fn pids(&self) -> Vec<Pid> {
        self.workers.keys().copied().collect()
    }

    /// Which worker owns a ready descriptor.
    pub(crate) fn owner_of_fd(&self, fd: RawFd) -> Option<Pid> {
        self.workers
            .values()
            .find(|w| w.owns_fd(fd))
            .map(|w| w.pid)
    }

    /// Pick a scale-down victim: any worker not already signalled for
    /// termination. Iteration order is unspecified.
    pub(crate) fn scale_down_target(&self) -> Option<Pid> {
        self.workers
            .values()
            .find(|w| !w.terminating)
            .map(|w| w.pid)
    }
}
