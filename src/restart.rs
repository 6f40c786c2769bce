//! `RESTART` process-lifecycle mechanics (component B continuation).
//!
//! Resolved as a defect in the predecessor, not a deliberate design: this
//! implementation's `RESTART` path closes listener and client sockets and
//! lets `tracing`'s writer flush on drop, but deliberately leaves stdio
//! (fd 0/1/2) untouched before re-exec, so a supervisor (systemd, a shell
//! redirection) keeps working across restarts.

use std::os::unix::process::CommandExt;
use std::process::Command;

use tokio::task::JoinHandle;
use tracing::info;

/// Abort every listener accept loop so its bound socket is released before
/// re-exec. Client sockets are already closed by the time this runs — the
/// event loop drains its quit queue on the way out of `event_loop::run`
/// regardless of whether it stopped for `RESTART` or a plain shutdown.
pub fn close_listeners_not_stdio(listeners: &[JoinHandle<()>]) {
    for handle in listeners {
        handle.abort();
    }
}

/// Re-exec the current process image with the same argv, inheriting stdio.
/// Replaces the process in place on success, so it only ever returns an
/// error for the caller to log before falling back to a plain exit.
pub fn reexec() -> std::io::Error {
    let exe = match std::env::current_exe() {
        Ok(exe) => exe,
        Err(e) => return e,
    };
    let args: Vec<std::ffi::OsString> = std::env::args_os().skip(1).collect();
    info!(?exe, "re-executing for RESTART");
    Command::new(exe).args(args).exec()
}
