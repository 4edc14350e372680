//! The master event loop.
//!
//! [`Supervisor::run`] blocks on a single-threaded loop that owns the
//! worker registry outright. One turn of the loop:
//!
//! 1. Poll every live worker stream for readability (1 s cap) and
//!    dispatch ready descriptors; sleep 100 ms instead when no worker
//!    contributes a descriptor.
//! 2. Fire the heartbeat if its interval has elapsed.
//! 3. Reap exited workers and replenish the pool to `min`.
//! 4. Service scale-up requests queued by callbacks.
//! 5. Service reload and user-signal flags.
//! 6. Exit the loop when the shutdown flag is up, then terminate the
//!    pool in order: SIGTERM broadcast, grace-period drain, SIGKILL.
//!
//! All callbacks run on this thread. Blocking inside one stalls I/O,
//! heartbeat, and reaping alike.

use std::io::{self, Read};
use std::os::fd::{AsFd, AsRawFd, RawFd};
use std::thread;
use std::time::{Duration, Instant};

use nix::errno::Errno;
use nix::poll::{poll, PollFd, PollFlags, PollTimeout};
use nix::sys::signal::{kill, Signal};
use nix::sys::wait::{waitpid, WaitPidFlag, WaitStatus};
use nix::unistd::Pid;
use serde_json::Value;
use tracing::{debug, info, trace, warn};

use crate::config::{Callbacks, Config, WorkerSpec};
use crate::control::Control;
use crate::error::{BroodError, Result};
use crate::ipc;
use crate::registry::Registry;
use crate::signals;
use crate::spawn::{spawn_worker, READ_CHUNK};
use crate::worker::{ExitReason, SpawnReason, StreamKind, Worker};

/// Upper bound on one readiness wait.
const POLL_WAIT_MS: u16 = 1000;
/// Loop nap when no worker contributes a descriptor.
const IDLE_SLEEP: Duration = Duration::from_millis(100);
/// Cadence of the non-blocking reap passes during shutdown.
const SHUTDOWN_POLL: Duration = Duration::from_millis(50);
/// Signal asking a worker to stop.
pub(crate) const TERM_SIGNAL: Signal = Signal::SIGTERM;
/// Signal that ends a worker unconditionally.
pub(crate) const KILL_SIGNAL: Signal = Signal::SIGKILL;

/// Loop-owned mutable state, shared with callbacks through [`Control`].
pub(crate) struct State {
    pub(crate) registry: Registry,
    pub(crate) min: usize,
    pub(crate) max: usize,
    pub(crate) pending_scale_up: usize,
    pub(crate) shutdown: bool,
}

/// Master process supervisor. Construct from a [`Config`], then call
/// [`run`](Supervisor::run); it returns after an orderly shutdown.
pub struct Supervisor {
    spec: Option<WorkerSpec>,
    heartbeat_interval: Duration,
    shutdown_grace: Duration,
    callbacks: Callbacks,
    state: State,
}

impl Supervisor {
    pub fn new(config: Config) -> Self {
        let Config {
            worker,
            min,
            max,
            heartbeat_interval,
            shutdown_grace,
            callbacks,
        } = config;
        Self {
            spec: worker,
            heartbeat_interval,
            shutdown_grace,
            callbacks,
            state: State {
                registry: Registry::new(),
                min,
                max,
                pending_scale_up: 0,
                shutdown: false,
            },
        }
    }

    /// Number of currently registered workers.
    pub fn worker_count(&self) -> usize {
        self.state.registry.len()
    }

    /// Establish the pool and drive the event loop until a termination
    /// signal arrives or a callback requests shutdown. Blocks for the
    /// lifetime of the pool.
    ///
    /// Fails up front with [`BroodError::NotConfigured`] when neither a
    /// command nor a closure was configured, with
    /// [`BroodError::InvalidLimits`] on an inverted envelope, and with a
    /// spawn error if the initial fill cannot complete. After that,
    /// per-operation failures stay local to the loop.
    pub fn run(&mut self) -> Result<()> {
        if self.spec.is_none() {
            return Err(BroodError::NotConfigured);
        }
        if self.state.min > self.state.max {
            return Err(BroodError::InvalidLimits {
                min: self.state.min,
                max: self.state.max,
            });
        }

        signals::install()?;
        info!(
            min = self.state.min,
            max = self.state.max,
            "starting worker pool"
        );

        while self.state.registry.len() < self.state.min && !self.state.shutdown {
            self.spawn_into_pool(SpawnReason::Initial)?;
        }

        let mut last_heartbeat = Instant::now();
        loop {
            self.wait_for_io();
            self.tick_heartbeat(&mut last_heartbeat);
            // The flag's real work was interrupting the poll; reaping
            // runs every turn and tolerates finding nothing.
            let _ = signals::take_child_exit();
            self.reap_exited();
            self.replenish();
            self.service_scale_requests();
            self.service_signal_flags();
            if signals::take_shutdown() {
                self.state.shutdown = true;
            }
            if self.state.shutdown {
                break;
            }
        }

        self.shutdown_pool();
        Ok(())
    }

    // ------------------------------------------------------------------
    // Spawn / scale
    // ------------------------------------------------------------------

    fn spawn_into_pool(&mut self, reason: SpawnReason) -> Result<Pid> {
        let spec = self.spec.as_ref().ok_or(BroodError::NotConfigured)?;
        let worker = spawn_worker(spec, reason)?;
        let pid = worker.pid();
        self.state.registry.insert(worker);
        info!(
            pid = pid.as_raw(),
            %reason,
            workers = self.state.registry.len(),
            "worker registered"
        );
        Self::fire_spawn(&mut self.callbacks, &mut self.state, pid);
        Ok(pid)
    }

    fn replenish(&mut self) {
        while self.state.registry.len() < self.state.min && !self.state.shutdown {
            if let Err(error) = self.spawn_into_pool(SpawnReason::Replacement) {
                warn!(%error, "replacement spawn failed; retrying next turn");
                break;
            }
        }
    }

    fn service_scale_requests(&mut self) {
        while self.state.pending_scale_up > 0 && !self.state.shutdown {
            self.state.pending_scale_up -= 1;
            if self.state.registry.len() >= self.state.max {
                debug!(max = self.state.max, "scale-up request discarded at max");
                continue;
            }
            if let Err(error) = self.spawn_into_pool(SpawnReason::ScaleUp) {
                warn!(%error, "scale-up spawn failed");
            }
        }
    }

    // ------------------------------------------------------------------
    // I/O multiplexing and dispatch
    // ------------------------------------------------------------------

    fn wait_for_io(&mut self) {
        let ready: Vec<RawFd> = {
            let mut raw = Vec::new();
            let mut poll_fds = Vec::new();
            for worker in self.state.registry.iter() {
                for stream in worker.streams() {
                    raw.push(stream.as_raw_fd());
                    poll_fds.push(PollFd::new(stream.as_fd(), PollFlags::POLLIN));
                }
            }

            if poll_fds.is_empty() {
                thread::sleep(IDLE_SLEEP);
                return;
            }

            match poll(&mut poll_fds, PollTimeout::from(POLL_WAIT_MS)) {
                Ok(0) => return,
                Ok(_) => raw
                    .iter()
                    .zip(&poll_fds)
                    .filter(|(_, pfd)| {
                        pfd.revents()
                            .map(|r| {
                                r.intersects(
                                    PollFlags::POLLIN | PollFlags::POLLHUP | PollFlags::POLLERR,
                                )
                            })
                            .unwrap_or(false)
                    })
                    .map(|(&fd, _)| fd)
                    .collect(),
                // Interrupted by signal delivery; the caller consumes the
                // flags right after us.
                Err(Errno::EINTR) => return,
                Err(error) => {
                    debug!(%error, "poll failed");
                    return;
                }
            }
        };

        for fd in ready {
            self.dispatch_fd(fd);
        }
    }

    /// Read one chunk from a ready descriptor and route it. Returns true
    /// when bytes were consumed, so callers can drain a stream by
    /// looping.
    fn dispatch_fd(&mut self, fd: RawFd) -> bool {
        enum Payload {
            Output(Vec<u8>),
            Messages(Vec<Value>),
        }

        let Some(pid) = self.state.registry.owner_of_fd(fd) else {
            return false;
        };

        let payload = {
            let Some(worker) = self.state.registry.get_mut(pid) else {
                return false;
            };
            let Some((kind, stream)) = worker.stream_mut(fd) else {
                return false;
            };

            let mut chunk = [0u8; READ_CHUNK];
            let n = match stream.read(&mut chunk) {
                // EOF: leave the descriptor alone, the reaper closes it.
                Ok(0) => return false,
                Ok(n) => n,
                Err(e)
                    if e.kind() == io::ErrorKind::WouldBlock
                        || e.kind() == io::ErrorKind::Interrupted =>
                {
                    return false
                }
                Err(error) => {
                    trace!(pid = pid.as_raw(), %error, "worker stream read failed");
                    return false;
                }
            };

            match kind {
                StreamKind::Ipc => {
                    Payload::Messages(ipc::extract_messages(&mut worker.ipc_buf, &chunk[..n]))
                }
                StreamKind::Stdout | StreamKind::Stderr => Payload::Output(chunk[..n].to_vec()),
            }
        };

        match payload {
            Payload::Output(bytes) => {
                Self::fire_output(&mut self.callbacks, &mut self.state, pid, &bytes);
            }
            Payload::Messages(values) => {
                for value in values {
                    Self::fire_message(&mut self.callbacks, &mut self.state, pid, value);
                }
            }
        }
        true
    }

    // ------------------------------------------------------------------
    // Heartbeat
    // ------------------------------------------------------------------

    fn tick_heartbeat(&mut self, last: &mut Instant) {
        if self.heartbeat_interval.is_zero() {
            return;
        }
        if last.elapsed() >= self.heartbeat_interval {
            Self::fire_heartbeat(&mut self.callbacks, &mut self.state);
            *last = Instant::now();
        }
    }

    // ------------------------------------------------------------------
    // Reaping
    // ------------------------------------------------------------------

    /// Drain every reportable exit without blocking. Only registered
    /// pids are waited on; other children of the embedding process are
    /// none of our business.
    fn reap_exited(&mut self) {
        loop {
            let mut reaped = Vec::new();
            for pid in self.state.registry.pids() {
                match waitpid(pid, Some(WaitPidFlag::WNOHANG)) {
                    Ok(WaitStatus::StillAlive) => {}
                    Ok(WaitStatus::Exited(p, code)) => {
                        reaped.push((p, code, ExitReason::Normal));
                    }
                    Ok(WaitStatus::Signaled(p, sig, _)) => {
                        let reason = if sig == KILL_SIGNAL {
                            ExitReason::Killed
                        } else {
                            ExitReason::Signal
                        };
                        reaped.push((p, 0, reason));
                    }
                    Ok(_) => {}
                    // The status is gone (reaped elsewhere); the record
                    // is stale and the exit cause unknowable.
                    Err(Errno::ECHILD) => reaped.push((pid, 0, ExitReason::Unknown)),
                    Err(error) => {
                        debug!(pid = pid.as_raw(), %error, "waitpid failed");
                    }
                }
            }
            if reaped.is_empty() {
                break;
            }
            for (pid, code, reason) in reaped {
                self.finalize_exit(pid, code, reason);
            }
        }
    }

    fn finalize_exit(&mut self, pid: Pid, code: i32, reason: ExitReason) {
        // Deliver whatever the worker wrote before dying, so output and
        // message callbacks always precede the exit callback.
        let fds = match self.state.registry.get(pid) {
            Some(worker) => worker.readable_fds(),
            None => return,
        };
        for fd in fds {
            while self.dispatch_fd(fd) {}
        }

        let Some(mut worker) = self.state.registry.remove(pid) else {
            return;
        };
        worker.close_resources();
        worker.running = false;
        worker.exit_code = code;
        worker.exit_reason = reason;
        info!(pid = pid.as_raw(), %reason, code, "worker exited");

        let snapshot = worker.snapshot();
        Self::fire_exit(&mut self.callbacks, &mut self.state, &snapshot, reason);
    }

    // ------------------------------------------------------------------
    // Signal servicing
    // ------------------------------------------------------------------

    fn service_signal_flags(&mut self) {
        if signals::take_reload() {
            let pids = self.state.registry.pids();
            info!(workers = pids.len(), "forwarding reload to workers");
            for pid in pids {
                let _ = kill(pid, Signal::SIGHUP);
            }
        }
        for sig in [Signal::SIGUSR1, Signal::SIGUSR2] {
            if signals::take_user(sig) {
                Self::fire_signal_fanout(&mut self.callbacks, &mut self.state, sig);
            }
        }
    }

    // ------------------------------------------------------------------
    // Shutdown
    // ------------------------------------------------------------------

    /// Terminate the pool in order: SIGTERM broadcast, non-blocking
    /// drain for up to the configured grace, then SIGKILL plus a
    /// blocking reap of each survivor. Exit callbacks do not fire here;
    /// they are reserved for workers lost during normal operation.
    fn shutdown_pool(&mut self) {
        Self::fire_shutdown(&mut self.callbacks, &mut self.state);

        let pids = self.state.registry.pids();
        info!(workers = pids.len(), "shutting down worker pool");
        for pid in &pids {
            let _ = kill(*pid, TERM_SIGNAL);
        }

        let deadline = Instant::now() + self.shutdown_grace;
        while !self.state.registry.is_empty() && Instant::now() < deadline {
            self.reap_for_shutdown();
            if self.state.registry.is_empty() {
                break;
            }
            thread::sleep(SHUTDOWN_POLL);
        }

        for pid in self.state.registry.pids() {
            warn!(pid = pid.as_raw(), "worker outlived shutdown grace; killing");
            let _ = kill(pid, KILL_SIGNAL);
            loop {
                match waitpid(pid, None) {
                    Ok(WaitStatus::StillAlive) => continue,
                    Ok(_) => break,
                    Err(Errno::EINTR) => continue,
                    Err(_) => break,
                }
            }
            if let Some(mut worker) = self.state.registry.remove(pid) {
                worker.close_resources();
            }
        }
        info!("worker pool drained");
    }

    fn reap_for_shutdown(&mut self) {
        for pid in self.state.registry.pids() {
            let gone = match waitpid(pid, Some(WaitPidFlag::WNOHANG)) {
                Ok(WaitStatus::StillAlive) => false,
                Ok(WaitStatus::Exited(..)) | Ok(WaitStatus::Signaled(..)) => true,
                Ok(_) => false,
                Err(_) => true,
            };
            if gone {
                if let Some(mut worker) = self.state.registry.remove(pid) {
                    worker.close_resources();
                }
            }
        }
    }

    // ------------------------------------------------------------------
    // Callback plumbing
    //
    // Associated functions splitting the borrow: the callback box comes
    // from `callbacks`, the Control handle from `state`, and the worker
    // snapshot is taken before the handle exists.
    // ------------------------------------------------------------------

    fn fire_spawn(callbacks: &mut Callbacks, state: &mut State, pid: Pid) {
        if let Some(cb) = callbacks.on_spawn.as_mut() {
            let Some(snapshot) = state.registry.get(pid).map(Worker::snapshot) else {
                return;
            };
            cb(&mut Control::new(state), &snapshot);
        }
    }

    fn fire_exit(callbacks: &mut Callbacks, state: &mut State, snapshot: &Worker, reason: ExitReason) {
        if let Some(cb) = callbacks.on_exit.as_mut() {
            cb(&mut Control::new(state), snapshot, reason);
        }
    }

    fn fire_message(callbacks: &mut Callbacks, state: &mut State, pid: Pid, value: Value) {
        if let Some(cb) = callbacks.on_message.as_mut() {
            let Some(snapshot) = state.registry.get(pid).map(Worker::snapshot) else {
                return;
            };
            cb(&mut Control::new(state), &snapshot, value);
        }
    }

    fn fire_output(callbacks: &mut Callbacks, state: &mut State, pid: Pid, bytes: &[u8]) {
        if let Some(cb) = callbacks.on_output.as_mut() {
            let Some(snapshot) = state.registry.get(pid).map(Worker::snapshot) else {
                return;
            };
            cb(&mut Control::new(state), &snapshot, bytes);
        }
    }

    fn fire_heartbeat(callbacks: &mut Callbacks, state: &mut State) {
        if let Some(cb) = callbacks.on_heartbeat.as_mut() {
            cb(&mut Control::new(state));
        }
    }

    fn fire_shutdown(callbacks: &mut Callbacks, state: &mut State) {
        if let Some(cb) = callbacks.on_shutdown.as_mut() {
            cb(&mut Control::new(state));
        }
    }

    fn fire_signal_fanout(callbacks: &mut Callbacks, state: &mut State, sig: Signal) {
        if let Some(cb) = callbacks.on_signal.as_mut() {
            for pid in state.registry.pids() {
                let Some(snapshot) = state.registry.get(pid).map(Worker::snapshot) else {
                    continue;
                };
                cb(&mut Control::new(state), &snapshot, sig);
            }
        } else {
            debug!(%sig, "user signal received; no on_signal callback registered");
        }
    }
}

impl Drop for Supervisor {
    /// Safety net for aborted runs: no worker outlives its supervisor.
    fn drop(&mut self) {
        if self.state.registry.is_empty() {
            return;
        }
        warn!(
            workers = self.state.registry.len(),
            "supervisor dropped with live workers; killing them"
        );
        for pid in self.state.registry.pids() {
            let _ = kill(pid, KILL_SIGNAL);
            loop {
                match waitpid(pid, None) {
                    Ok(WaitStatus::StillAlive) => continue,
                    Ok(_) => break,
                    Err(Errno::EINTR) => continue,
                    Err(_) => break,
                }
            }
            if let Some(mut worker) = self.state.registry.remove(pid) {
                worker.close_resources();
            }
        }
    }
}
