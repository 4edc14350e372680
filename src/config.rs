//! Supervisor configuration.
//!
//! [`Config`] describes what a worker is (an external command line or an
//! in-process routine run in a forked child), the pool envelope, the
//! heartbeat, the shutdown grace, and the lifecycle callbacks. It is
//! consumed once by [`Supervisor::new`](crate::Supervisor::new).
//!
//! # Example
//! ```no_run
//! use std::time::Duration;
//! use brood::{Config, Supervisor};
//!
//! let mut cfg = Config::new()
//!     .command("while true; do date; sleep 1; done")
//!     .pool(2, 4)
//!     .on_output(|_ctl, worker, bytes| {
//!         print!("[{}] {}", worker.pid(), String::from_utf8_lossy(bytes));
//!     });
//! cfg.shutdown_grace = Duration::from_secs(10);
//!
//! Supervisor::new(cfg).run().unwrap();
//! ```

use std::fmt;
use std::os::unix::net::UnixStream;
use std::sync::Arc;
use std::time::Duration;

use nix::sys::signal::Signal;
use serde_json::Value;

use crate::control::Control;
use crate::worker::{ExitReason, Worker};

/// Routine run inside a forked closure worker. Receives the child end of
/// the socket pair; the worker exits with status 0 when it returns.
pub type WorkerRoutine = Arc<dyn Fn(UnixStream) + Send + Sync + 'static>;

/// What to run in each worker slot.
#[derive(Clone)]
pub enum WorkerSpec {
    /// A shell command line, launched via `/bin/sh -c`.
    Command(String),
    /// An in-process routine, run in a forked child.
    Closure(WorkerRoutine),
}

impl fmt::Debug for WorkerSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WorkerSpec::Command(cmd) => f.debug_tuple("Command").field(cmd).finish(),
            WorkerSpec::Closure(_) => f.write_str("Closure(..)"),
        }
    }
}

/// Fired after a worker is spawned and registered.
pub type SpawnFn = Box<dyn FnMut(&mut Control, &Worker)>;
/// Fired after an exited worker is reaped and deregistered.
pub type ExitFn = Box<dyn FnMut(&mut Control, &Worker, ExitReason)>;
/// Fired once per worker when the master receives SIGUSR1 or SIGUSR2.
pub type SignalFn = Box<dyn FnMut(&mut Control, &Worker, Signal)>;
/// Fired once per well-formed JSON line on a worker's IPC channel.
pub type MessageFn = Box<dyn FnMut(&mut Control, &Worker, Value)>;
/// Fired with raw stdout/stderr bytes from a command worker.
pub type OutputFn = Box<dyn FnMut(&mut Control, &Worker, &[u8])>;
/// Fired when the heartbeat interval elapses.
pub type HeartbeatFn = Box<dyn FnMut(&mut Control)>;
/// Fired exactly once, before the shutdown terminate broadcast.
pub type ShutdownFn = Box<dyn FnMut(&mut Control)>;

/// Registered lifecycle callbacks. All run on the master loop thread;
/// a slow callback stalls I/O, heartbeat, and reaping alike.
#[derive(Default)]
pub(crate) struct Callbacks {
    pub(crate) on_spawn: Option<SpawnFn>,
    pub(crate) on_exit: Option<ExitFn>,
    pub(crate) on_signal: Option<SignalFn>,
    pub(crate) on_message: Option<MessageFn>,
    pub(crate) on_output: Option<OutputFn>,
    pub(crate) on_heartbeat: Option<HeartbeatFn>,
    pub(crate) on_shutdown: Option<ShutdownFn>,
}

/// Supervisor configuration.
pub struct Config {
    pub(crate) worker: Option<WorkerSpec>,
    /// Lower bound of the pool envelope. The loop replenishes to this
    /// size after losses. Zero is allowed; the loop then idles.
    pub min: usize,
    /// Upper bound of the pool envelope; `scale_up` requests beyond it
    /// are discarded.
    pub max: usize,
    /// Heartbeat period. `Duration::ZERO` disables the heartbeat.
    pub heartbeat_interval: Duration,
    /// How long shutdown waits for terminated workers before SIGKILL.
    pub shutdown_grace: Duration,
    pub(crate) callbacks: Callbacks,
}

impl Default for Config {
    /// Provides a default configuration:
    /// - no worker definition (`run()` fails with `NotConfigured`)
    /// - `min = 1`, `max = 1`
    /// - heartbeat disabled
    /// - `shutdown_grace = 5s`
    fn default() -> Self {
        Self {
            worker: None,
            min: 1,
            max: 1,
            heartbeat_interval: Duration::ZERO,
            shutdown_grace: Duration::from_secs(5),
            callbacks: Callbacks::default(),
        }
    }
}

impl Config {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run each worker as a shell command line. Replaces any previously
    /// configured command or closure.
    pub fn command(mut self, command: impl Into<String>) -> Self {
        self.worker = Some(WorkerSpec::Command(command.into()));
        self
    }

    /// Run each worker as a forked in-process routine. Replaces any
    /// previously configured command or closure.
    pub fn closure(mut self, routine: impl Fn(UnixStream) + Send + Sync + 'static) -> Self {
        self.worker = Some(WorkerSpec::Closure(Arc::new(routine)));
        self
    }

    /// Set the pool envelope.
    pub fn pool(mut self, min: usize, max: usize) -> Self {
        self.min = min;
        self.max = max;
        self
    }

    /// Enable the heartbeat with the given period and callback.
    pub fn heartbeat(mut self, interval: Duration, cb: impl FnMut(&mut Control) + 'static) -> Self {
        self.heartbeat_interval = interval;
        self.callbacks.on_heartbeat = Some(Box::new(cb));
        self
    }

    pub fn on_spawn(mut self, cb: impl FnMut(&mut Control, &Worker) + 'static) -> Self {
        self.callbacks.on_spawn = Some(Box::new(cb));
        self
    }

    pub fn on_exit(mut self, cb: impl FnMut(&mut Control, &Worker, ExitReason) + 'static) -> Self {
        self.callbacks.on_exit = Some(Box::new(cb));
        self
    }

    pub fn on_signal(mut self, cb: impl FnMut(&mut Control, &Worker, Signal) + 'static) -> Self {
        self.callbacks.on_signal = Some(Box::new(cb));
        self
    }

    pub fn on_message(mut self, cb: impl FnMut(&mut Control, &Worker, Value) + 'static) -> Self {
        self.callbacks.on_message = Some(Box::new(cb));
        self
    }

    pub fn on_output(mut self, cb: impl FnMut(&mut Control, &Worker, &[u8]) + 'static) -> Self {
        self.callbacks.on_output = Some(Box::new(cb));
        self
    }

    pub fn on_shutdown(mut self, cb: impl FnMut(&mut Control) + 'static) -> Self {
        self.callbacks.on_shutdown = Some(Box::new(cb));
        self
    }
}
