//! Error types for brood.
//!
//! Provides typed errors for all failure modes surfaced at the crate
//! boundary. Once the master loop is running, per-operation failures
//! (interrupted polls, empty reads, malformed IPC lines, out-of-envelope
//! scale requests) are handled silently and never reach these variants.

use std::io;
use thiserror::Error;

/// All error types that can occur while configuring or running a supervisor.
#[derive(Debug, Error)]
pub enum BroodError {
    /// `run()` was called without a worker command or closure configured.
    #[error("no worker command or closure configured")]
    NotConfigured,

    /// The pool envelope is inverted.
    #[error("invalid pool limits: min {min} exceeds max {max}")]
    InvalidLimits { min: usize, max: usize },

    /// Failed to launch a worker command.
    #[error("failed to spawn worker command `{command}`: {source}")]
    Spawn {
        command: String,
        #[source]
        source: io::Error,
    },

    /// Failed to allocate the IPC pipe or socket pair for a worker.
    #[error("failed to allocate worker IPC channel: {0}")]
    IpcSetup(#[source] nix::Error),

    /// Failed to fork a closure worker.
    #[error("failed to fork worker: {0}")]
    Fork(#[source] nix::Error),

    /// Failed to install the master's signal handlers.
    #[error("failed to install signal handlers: {0}")]
    SignalInstall(#[source] nix::Error),

    /// Generic I/O error (for cases not covered above).
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Result type alias using BroodError.
pub type Result<T> = std::result::Result<T, BroodError>;
