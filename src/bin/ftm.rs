//! ftm - intermittent fasting timer CLI
//!
//! See `ftm --help` for the available commands.

fn main() -> anyhow::Result<()> {
    ftm_cli::cli::main_entry()
}
