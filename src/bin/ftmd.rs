//! ftmd - fasting timer daemon
//!
//! Owns the running fast, persists it, and serves `ftm` clients over a
//! Unix socket. See `ftmd --help`.

fn main() -> anyhow::Result<()> {
    ftmd::daemon::main_entry()
}
