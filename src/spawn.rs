//! Worker spawning, one function per strategy.
//!
//! Command workers are launched through `/bin/sh -c` with piped stdin,
//! stdout, and stderr, plus a dedicated IPC pipe installed as the
//! child's fd 3. Closure workers are forked; parent and child share a
//! unix-domain stream socket pair and the child runs the user routine
//! with its end before exiting.
//!
//! Every master-side descriptor is switched to non-blocking before the
//! worker record is returned, so a chatty child can never stall the
//! event loop.

use std::fs::File;
use std::io;
use std::os::fd::{AsRawFd, OwnedFd, RawFd};
use std::os::unix::net::UnixStream;
use std::os::unix::process::CommandExt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::process::{Command, Stdio};

use nix::libc;
use nix::sys::socket::{socketpair, AddressFamily, SockFlag, SockType};
use nix::unistd::{fork, pipe, ForkResult, Pid};
use tracing::debug;

use crate::config::{WorkerRoutine, WorkerSpec};
use crate::error::{BroodError, Result};
use crate::signals;
use crate::worker::{ExitReason, SpawnReason, Worker};

/// Child-side descriptor number of the IPC pipe for command workers.
const IPC_FD: RawFd = 3;

/// How much a single non-blocking read pulls off a worker stream.
pub(crate) const READ_CHUNK: usize = 8192;

/// Spawn one worker according to the configured strategy.
pub(crate) fn spawn_worker(spec: &WorkerSpec, reason: SpawnReason) -> Result<Worker> {
    match spec {
        WorkerSpec::Command(command) => spawn_command(command, reason),
        WorkerSpec::Closure(routine) => spawn_closure(routine, reason),
    }
}

fn spawn_command(command: &str, reason: SpawnReason) -> Result<Worker> {
    let (ipc_read, ipc_write) = pipe().map_err(BroodError::IpcSetup)?;

    let mut cmd = Command::new("/bin/sh");
    cmd.arg("-c")
        .arg(command)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());

    let ipc_write_raw = ipc_write.as_raw_fd();
    // Install the pipe's write end as fd 3 in the child. Runs between
    // fork and exec, so only async-signal-safe calls are allowed here.
    unsafe {
        cmd.pre_exec(move || {
            if ipc_write_raw == IPC_FD {
                // Already in place; just make sure it survives exec.
                let flags = libc::fcntl(IPC_FD, libc::F_GETFD);
                if flags < 0 {
                    return Err(io::Error::last_os_error());
                }
                if libc::fcntl(IPC_FD, libc::F_SETFD, flags & !libc::FD_CLOEXEC) < 0 {
                    return Err(io::Error::last_os_error());
                }
            } else if libc::dup2(ipc_write_raw, IPC_FD) < 0 {
                return Err(io::Error::last_os_error());
            }
            Ok(())
        });
    }

    let mut child = cmd.spawn().map_err(|e| BroodError::Spawn {
        command: command.to_string(),
        source: e,
    })?;
    // The child holds fd 3 now; only the read end stays with the master.
    drop(ipc_write);

    let pid = Pid::from_raw(child.id() as i32);

    let stdin = child.stdin.take().map(OwnedFd::from).map(File::from);
    let stdout = child.stdout.take().map(OwnedFd::from).map(File::from);
    let stderr = child.stderr.take().map(OwnedFd::from).map(File::from);
    let ipc = File::from(ipc_read);

    for f in [&stdin, &stdout, &stderr].into_iter().flatten() {
        set_nonblocking(f)?;
    }
    set_nonblocking(&ipc)?;

    debug!(pid = pid.as_raw(), %reason, command, "spawned command worker");

    Ok(Worker {
        pid,
        reason,
        handle: Some(child),
        stdin,
        stdout,
        stderr,
        ipc: Some(ipc),
        ipc_buf: Vec::new(),
        running: true,
        exit_code: 0,
        exit_reason: ExitReason::Unknown,
        terminating: false,
    })
}

fn spawn_closure(routine: &WorkerRoutine, reason: SpawnReason) -> Result<Worker> {
    let (parent_end, child_end) = socketpair(
        AddressFamily::Unix,
        SockType::Stream,
        None,
        SockFlag::empty(),
    )
    .map_err(BroodError::IpcSetup)?;

    match unsafe { fork() }.map_err(BroodError::Fork)? {
        ForkResult::Child => {
            // In the child. Restore default signal dispositions so the
            // master's flag handlers do not shadow SIGTERM and friends,
            // drop the parent's end, run the routine, and exit 0 no
            // matter how the routine came back.
            signals::reset_for_child();
            drop(parent_end);
            let stream = UnixStream::from(child_end);
            let _ = catch_unwind(AssertUnwindSafe(|| routine(stream)));
            unsafe { libc::_exit(0) }
        }
        ForkResult::Parent { child } => {
            drop(child_end);
            let ipc = File::from(parent_end);
            set_nonblocking(&ipc)?;

            debug!(pid = child.as_raw(), %reason, "forked closure worker");

            Ok(Worker {
                pid: child,
                reason,
                handle: None,
                stdin: None,
                stdout: None,
                stderr: None,
                ipc: Some(ipc),
                ipc_buf: Vec::new(),
                running: true,
                exit_code: 0,
                exit_reason: ExitReason::Unknown,
                terminating: false,
            })
        }
    }
}

fn set_nonblocking(f: &File) -> Result<()> {
    let fd = f.as_raw_fd();
    let flags = unsafe { libc::fcntl(fd, libc::F_GETFL) };
    if flags < 0 {
        return Err(BroodError::Io(io::Error::last_os_error()));
    }
    if unsafe { libc::fcntl(fd, libc::F_SETFL, flags | libc::O_NONBLOCK) } < 0 {
        return Err(BroodError::Io(io::Error::last_os_error()));
    }
    Ok(())
}
