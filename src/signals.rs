//! Master-side signal gate.
//!
//! Handlers must do the minimum work safely callable from an async
//! signal context, so each one only flips a global atomic flag. The
//! master loop consumes the flags on its next turn and performs the
//! substantive work there: reaping for SIGCHLD, loop exit for
//! SIGTERM/SIGINT, reload forwarding for SIGHUP, and the per-worker
//! callback fan-out for SIGUSR1/SIGUSR2.
//!
//! SIGPIPE is ignored so a write to a dead worker's stdin surfaces as
//! `EPIPE` instead of terminating the master.

use std::sync::atomic::{AtomicBool, Ordering};

use nix::libc;
use nix::sys::signal::{sigaction, SaFlags, SigAction, SigHandler, SigSet, Signal};

use crate::error::{BroodError, Result};

static CHILD_EXIT_PENDING: AtomicBool = AtomicBool::new(false);
static SHUTDOWN_PENDING: AtomicBool = AtomicBool::new(false);
static RELOAD_PENDING: AtomicBool = AtomicBool::new(false);
static USR1_PENDING: AtomicBool = AtomicBool::new(false);
static USR2_PENDING: AtomicBool = AtomicBool::new(false);

extern "C" fn handle_signal(signum: libc::c_int) {
    match signum {
        libc::SIGCHLD => CHILD_EXIT_PENDING.store(true, Ordering::Release),
        libc::SIGTERM | libc::SIGINT => SHUTDOWN_PENDING.store(true, Ordering::Release),
        libc::SIGHUP => RELOAD_PENDING.store(true, Ordering::Release),
        libc::SIGUSR1 => USR1_PENDING.store(true, Ordering::Release),
        libc::SIGUSR2 => USR2_PENDING.store(true, Ordering::Release),
        _ => {}
    }
}

/// Install handlers for every signal the master reacts to and clear any
/// flags left over from a previous run in this process.
///
/// Safe to call more than once; reinstallation is a no-op beyond
/// resetting the flags.
pub(crate) fn install() -> Result<()> {
    let handler = SigHandler::Handler(handle_signal);
    let action = SigAction::new(handler, SaFlags::SA_RESTART, SigSet::empty());
    // SA_NOCLDSTOP: stopped (not exited) children must not wake the reaper.
    let chld_action = SigAction::new(
        handler,
        SaFlags::SA_RESTART | SaFlags::SA_NOCLDSTOP,
        SigSet::empty(),
    );

    unsafe {
        sigaction(Signal::SIGCHLD, &chld_action).map_err(BroodError::SignalInstall)?;
        for sig in [
            Signal::SIGTERM,
            Signal::SIGINT,
            Signal::SIGHUP,
            Signal::SIGUSR1,
            Signal::SIGUSR2,
        ] {
            sigaction(sig, &action).map_err(BroodError::SignalInstall)?;
        }
        let ignore = SigAction::new(SigHandler::SigIgn, SaFlags::empty(), SigSet::empty());
        sigaction(Signal::SIGPIPE, &ignore).map_err(BroodError::SignalInstall)?;
    }

    for flag in [
        &CHILD_EXIT_PENDING,
        &SHUTDOWN_PENDING,
        &RELOAD_PENDING,
        &USR1_PENDING,
        &USR2_PENDING,
    ] {
        flag.store(false, Ordering::Release);
    }

    Ok(())
}

/// Restore default dispositions for the trapped signals. Called in a
/// freshly forked closure worker before the user routine runs, so the
/// child reacts to SIGTERM and friends the way any ordinary process
/// would. `sigaction` is async-signal-safe, which is all a post-fork
/// child may rely on.
pub(crate) fn reset_for_child() {
    let default = SigAction::new(SigHandler::SigDfl, SaFlags::empty(), SigSet::empty());
    for sig in [
        Signal::SIGCHLD,
        Signal::SIGTERM,
        Signal::SIGINT,
        Signal::SIGHUP,
        Signal::SIGUSR1,
        Signal::SIGUSR2,
        Signal::SIGPIPE,
    ] {
        // Failure here leaves the inherited disposition in place, which
        // the child cannot report anyway.
        let _ = unsafe { sigaction(sig, &default) };
    }
}

fn take(flag: &AtomicBool) -> bool {
    flag.swap(false, Ordering::AcqRel)
}

/// Consume the child-exit flag.
pub(crate) fn take_child_exit() -> bool {
    take(&CHILD_EXIT_PENDING)
}

/// Consume the shutdown flag (SIGTERM or SIGINT).
pub(crate) fn take_shutdown() -> bool {
    take(&SHUTDOWN_PENDING)
}

/// Consume the reload flag (SIGHUP).
pub(crate) fn take_reload() -> bool {
    take(&RELOAD_PENDING)
}

/// Consume a user-signal flag; `sig` must be SIGUSR1 or SIGUSR2.
pub(crate) fn take_user(sig: Signal) -> bool {
    match sig {
        Signal::SIGUSR1 => take(&USR1_PENDING),
        Signal::SIGUSR2 => take(&USR2_PENDING),
        _ => false,
    }
}
