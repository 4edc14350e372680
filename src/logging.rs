//! Tracing setup for standalone master processes.
//!
//! The master loop emits a `tracing` event for every lifecycle
//! transition: spawn, reap, scale, reload, shutdown. Embedders that
//! already own a subscriber can ignore this module; [`init`] installs
//! one tuned to a supervising process.

use tracing_subscriber::EnvFilter;

/// Fallback filter directives: the pool's lifecycle at `info`, host
/// crates at `warn`. Per-turn poll and read chatter sits at `debug`
/// and `trace` and stays dark until `RUST_LOG` turns it up.
const DEFAULT_DIRECTIVES: &str = "warn,brood=info";

/// Install a subscriber for a standalone master.
///
/// Honors `RUST_LOG` when set, falling back to [`DEFAULT_DIRECTIVES`].
/// Events go to stderr: stdout belongs to the relayed worker output,
/// and interleaving the two would garble both.
pub fn init() {
    init_with(DEFAULT_DIRECTIVES)
}

/// Like [`init`], but with a custom fallback, e.g. `"brood=debug"` to
/// watch individual spawns and reap passes, or `"brood=trace"` to see
/// dropped IPC lines and per-stream reads.
pub fn init_with(fallback: &str) {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(fallback)),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}
