//! PID-file based single-instance toggle.
//!
//! Running the binary while a sidebar is already open signals that instance
//! to close instead of opening a second one.

use anyhow::{Context, Result};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Outcome of the startup toggle check.
pub enum Toggle {
    /// A running sidebar was told to close; the caller should exit without
    /// opening a window.
    ClosedExisting,
    /// No live instance was found; we now own the pidfile.
    Claimed(PidLock),
}

/// Ownership of the pidfile. Removes the file when dropped.
pub struct PidLock {
    path: PathBuf,
}

impl PidLock {
    pub fn release(self) {
        // Drop does the work
    }
}

impl Drop for PidLock {
    fn drop(&mut self) {
        if let Err(e) = fs::remove_file(&self.path) {
            debug!("could not remove pidfile {}: {}", self.path.display(), e);
        }
    }
}

/// Default location for the pidfile.
pub fn pidfile_path() -> PathBuf {
    std::env::var_os("XDG_RUNTIME_DIR")
        .map(PathBuf::from)
        .unwrap_or_else(std::env::temp_dir)
        .join("askbar.pid")
}

/// Check the pidfile and either signal the running instance to close or
/// claim the file for this process.
///
/// A pidfile naming a dead process (or holding garbage) is treated as stale
/// and reclaimed rather than blocking startup.
pub fn toggle(path: &Path) -> Result<Toggle> {
    if let Some(pid) = read_pid(path) {
        if process_alive(pid) {
            info!("sidebar already running (pid {}), telling it to close", pid);
            signal_close(pid);
            let _ = fs::remove_file(path);
            return Ok(Toggle::ClosedExisting);
        }
        warn!("removing stale pidfile for dead pid {}", pid);
        let _ = fs::remove_file(path);
    }

    fs::write(path, std::process::id().to_string())
        .with_context(|| format!("writing pidfile {}", path.display()))?;
    debug!("claimed pidfile {} (pid {})", path.display(), std::process::id());

    Ok(Toggle::Claimed(PidLock {
        path: path.to_path_buf(),
    }))
}

fn read_pid(path: &Path) -> Option<i32> {
    let contents = fs::read_to_string(path).ok()?;
    contents.trim().parse().ok()
}

#[cfg(unix)]
fn process_alive(pid: i32) -> bool {
    // Signal 0 probes for existence without delivering anything
    unsafe { libc::kill(pid, 0) == 0 }
}

#[cfg(unix)]
fn signal_close(pid: i32) {
    unsafe {
        libc::kill(pid, libc::SIGTERM);
    }
}

#[cfg(not(unix))]
fn process_alive(_pid: i32) -> bool {
    false
}

#[cfg(not(unix))]
fn signal_close(_pid: i32) {}
