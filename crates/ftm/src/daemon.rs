//! Starting the daemon on demand.
//!
//! Every CLI command needs `ftmd`; if it is not running it is spawned
//! with `ftmd start -d` and polled until its PID file shows up.

use std::fs;
use std::path::PathBuf;
use std::process::{Command, Stdio};
use std::thread;
use std::time::Duration;

use tracing::{debug, info};

use crate::error::{CliError, Result};

const STARTUP_POLLS: u32 = 30;
const STARTUP_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Location of the daemon PID file. Must agree with `ftmd`.
pub fn pid_file_path() -> PathBuf {
    dirs::state_dir()
        .unwrap_or_else(|| PathBuf::from("/tmp"))
        .join("ftm")
        .join("ftmd.pid")
}

fn read_pid() -> Option<u32> {
    fs::read_to_string(pid_file_path()).ok()?.trim().parse().ok()
}

fn is_process_running(pid: u32) -> bool {
    PathBuf::from(format!("/proc/{pid}")).exists()
}

pub fn is_daemon_running() -> bool {
    read_pid().is_some_and(is_process_running)
}

/// `ftmd` next to the current executable, else whatever is on `PATH`.
fn daemon_binary() -> PathBuf {
    std::env::current_exe()
        .ok()
        .and_then(|p| p.parent().map(|d| d.join("ftmd")))
        .filter(|p| p.exists())
        .unwrap_or_else(|| PathBuf::from("ftmd"))
}

fn spawn_daemon() -> std::io::Result<()> {
    let path = daemon_binary();
    debug!(path = %path.display(), "Starting daemon");

    Command::new(&path)
        .args(["start", "-d"])
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()?;
    Ok(())
}

/// Starts the daemon if it is not already running.
pub fn ensure_daemon_running() -> Result<()> {
    if is_daemon_running() {
        debug!("Daemon already running");
        return Ok(());
    }

    info!("Daemon not running, starting it");
    spawn_daemon().map_err(|e| CliError::DaemonStart(e.to_string()))?;

    for i in 0..STARTUP_POLLS {
        thread::sleep(STARTUP_POLL_INTERVAL);
        if is_daemon_running() {
            info!(attempts = i + 1, "Daemon started");
            return Ok(());
        }
    }

    Err(CliError::DaemonStart(
        "daemon did not start within 3 seconds".to_string(),
    ))
}
