//! brood: a prefork worker-pool supervisor.
//!
//! A single long-running master keeps a pool of worker child processes
//! at a configured size, relays their output and newline-delimited JSON
//! IPC messages, and shuts them down in an orderly fashion. Host
//! programs embed it as a library: describe what a worker is (a shell
//! command line, or an in-process routine run in a forked child),
//! register lifecycle callbacks, and call the blocking [`Supervisor::run`]
//! entry point, which drives the master event loop until a termination
//! signal arrives.
//!
//! ## Modules
//!
//! ### Core
//! - [`config`]: worker definition, pool envelope, callbacks
//! - [`supervisor`]: the master event loop
//! - [`control`]: runtime handle passed to callbacks
//! - [`worker`]: worker records, spawn and exit reasons
//! - [`error`]: typed error types for all boundary failure modes
//!
//! ### Support
//! - [`logging`]: tracing initialization helpers for binaries
//!
//! ## Worker contract
//!
//! A command worker receives four descriptors: 0 = stdin, 1 = stdout,
//! 2 = stderr, 3 = IPC. A closure worker receives one connected stream
//! socket. Whatever a worker writes to its IPC descriptor is parsed as
//! newline-delimited JSON and delivered to the message callback one
//! value per well-formed line; malformed lines are dropped.
//!
//! ## Signals
//!
//! SIGTERM and SIGINT shut the pool down, SIGHUP is forwarded to every
//! worker, SIGUSR1/SIGUSR2 are reported through the signal callback,
//! and SIGCHLD drives the reaper. POSIX only.
//!
//! ## Example
//! ```no_run
//! use brood::{Config, Supervisor};
//! use std::io::Write;
//!
//! let cfg = Config::new()
//!     .closure(|mut socket| {
//!         writeln!(socket, "{{\"ready\":true}}").ok();
//!     })
//!     .pool(2, 4)
//!     .on_message(|_ctl, worker, value| {
//!         println!("worker {} says {}", worker.pid(), value);
//!     });
//!
//! Supervisor::new(cfg).run().unwrap();
//! ```

pub mod config;
pub mod control;
pub mod error;
pub mod logging;
pub mod supervisor;
pub mod worker;

mod ipc;
mod registry;
mod signals;
mod spawn;

// Re-export commonly used types at crate root
pub use config::{Config, WorkerRoutine, WorkerSpec};
pub use control::Control;
pub use error::{BroodError, Result};
pub use supervisor::Supervisor;
pub use worker::{ExitReason, SpawnReason, Worker};

// POSIX identifiers used throughout the public API
pub use nix::sys::signal::Signal;
pub use nix::unistd::Pid;
