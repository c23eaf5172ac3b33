//! Command-line front end.
//!
//! # Usage
//!
//! ```text
//! ftm start --hours 18   # begin a fast
//! ftm status             # FASTING / NOT FASTING and the elapsed clock
//! ftm preview --hours 20 # remaining time and end for a duration
//! ftm watch              # live ticks, alerts and notices until Ctrl-C
//! ftm history -n 10
//! ftm stop
//! ftm doctor             # notification and storage report
//! ```
//!
//! Set `FTM_DEBUG=1` to log to `ftm.log` in the state directory.

use std::env;
use std::fs::{self, OpenOptions};
use std::path::PathBuf;
use std::sync::Mutex;

use anyhow::{bail, Context, Result};
use chrono::Local;
use clap::{Parser, Subcommand};
use ftm_core::DEFAULT_DURATION_HOURS;
use ftm_protocol::{ClientMessage, DaemonMessage};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

use crate::client::{Connection, DaemonClient};
use crate::daemon::ensure_daemon_running;
use crate::render;

pub const ENV_DEBUG: &str = "FTM_DEBUG";

// ============================================================================
// CLI Arguments
// ============================================================================

/// ftm - intermittent fasting timer
#[derive(Parser, Debug)]
#[command(name = "ftm", version, about = "Intermittent fasting timer")]
pub struct Args {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug, PartialEq)]
enum Command {
    /// Begin a fast
    Start {
        /// Fast length in hours
        #[arg(long, default_value_t = DEFAULT_DURATION_HOURS)]
        hours: f64,
    },
    /// End the running fast now and record it
    Stop,
    /// Show remaining time and end for a duration without starting
    Preview {
        #[arg(long, default_value_t = DEFAULT_DURATION_HOURS)]
        hours: f64,
    },
    /// Show the current timer
    Status,
    /// Show the most recent fasts
    History {
        /// Number of entries (daemon default when omitted)
        #[arg(short = 'n', long)]
        limit: Option<usize>,
    },
    /// Follow the running fast until interrupted
    Watch,
    /// Report that the interface is visible again and show the timer
    Foreground,
    /// Show notification and storage diagnostics
    Doctor,
}

// ============================================================================
// Logging
// ============================================================================

fn log_file_path() -> PathBuf {
    dirs::state_dir()
        .unwrap_or_else(|| PathBuf::from("/tmp"))
        .join("ftm")
        .join("ftm.log")
}

/// Logs go to a file, never the terminal, and only when `FTM_DEBUG=1`.
fn init_logging() {
    if env::var(ENV_DEBUG).ok().as_deref() != Some("1") {
        return;
    }

    let path = log_file_path();
    if let Some(parent) = path.parent() {
        if let Err(e) = fs::create_dir_all(parent) {
            eprintln!("Warning: Failed to create log directory {parent:?}: {e}");
            return;
        }
    }
    let file = match OpenOptions::new().create(true).append(true).open(&path) {
        Ok(file) => file,
        Err(e) => {
            eprintln!("Warning: Failed to open log file {path:?}: {e}");
            return;
        }
    };

    let filter = EnvFilter::from_default_env().add_directive(
        "ftm_cli=debug"
            .parse()
            .unwrap_or_else(|_| tracing_subscriber::filter::Directive::from(tracing::Level::DEBUG)),
    );

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(Mutex::new(file))
        .with_ansi(false)
        .init();
}

// ============================================================================
// Commands
// ============================================================================

/// Parses arguments and runs the requested command.
pub fn main_entry() -> Result<()> {
    let args = Args::parse();
    init_logging();

    let command = args.command.unwrap_or(Command::Status);
    info!(?command, "ftm starting");

    ensure_daemon_running().context("Failed to ensure daemon is running")?;

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("Failed to build async runtime")?;
    runtime.block_on(run(command, DaemonClient::from_env()))
}

async fn run(command: Command, client: DaemonClient) -> Result<()> {
    match command {
        Command::Start { hours } => {
            match client.request(ClientMessage::start_fast(hours)).await? {
                DaemonMessage::FastStarted { session, schedule } => {
                    println!("{}", render::started(&session, &schedule, &Local));
                }
                other => bail!("Unexpected reply: {other:?}"),
            }
        }
        Command::Stop => match client.request(ClientMessage::stop_fast()).await? {
            DaemonMessage::FastFinished { entry, reason } => {
                println!("{}", render::finished(&entry, reason));
            }
            other => bail!("Unexpected reply: {other:?}"),
        },
        Command::Preview { hours } => match client.request(ClientMessage::preview(hours)).await? {
            DaemonMessage::Remaining { preview } => {
                println!("{}", render::remaining(&preview, &Local));
            }
            other => bail!("Unexpected reply: {other:?}"),
        },
        Command::Status => status(&client, ClientMessage::get_status()).await?,
        Command::Foreground => status(&client, ClientMessage::foreground()).await?,
        Command::History { limit } => {
            match client.request(ClientMessage::get_history(limit)).await? {
                DaemonMessage::History { entries, total } => {
                    print!("{}", render::history(&entries, total, &Local));
                }
                other => bail!("Unexpected reply: {other:?}"),
            }
        }
        Command::Doctor => match client.request(ClientMessage::diagnostics()).await? {
            DaemonMessage::Diagnostics { report } => print!("{}", render::diagnostics(&report)),
            other => bail!("Unexpected reply: {other:?}"),
        },
        Command::Watch => watch(&client).await?,
    }
    Ok(())
}

async fn status(client: &DaemonClient, message: ClientMessage) -> Result<()> {
    match client.request(message).await? {
        DaemonMessage::Status { view } => print!("{}", render::status_block(&view, &Local)),
        other => bail!("Unexpected reply: {other:?}"),
    }
    Ok(())
}

/// Renders one pushed message. Returns `None` for messages `watch` ignores.
fn render_pushed(message: &DaemonMessage) -> Option<String> {
    match message {
        DaemonMessage::Status { view } => {
            Some(render::status_block(view, &Local).trim_end().to_string())
        }
        DaemonMessage::Tick {
            remaining_ms,
            elapsed_clock,
            ..
        } => Some(render::tick(elapsed_clock, *remaining_ms)),
        DaemonMessage::FastStarted { session, schedule } => {
            Some(render::started(session, schedule, &Local))
        }
        DaemonMessage::FastFinished { entry, reason } => Some(render::finished(entry, *reason)),
        DaemonMessage::Notice { kind, message } => Some(render::notice(*kind, message)),
        DaemonMessage::Notification {
            title,
            body,
            actions,
        } => Some(render::notification(title, body, actions)),
        DaemonMessage::Error { message, .. } => Some(format!("Error: {message}")),
        _ => None,
    }
}

async fn watch(client: &DaemonClient) -> Result<()> {
    let cancel_token = CancellationToken::new();
    let signal_token = cancel_token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            debug!("Ctrl-C received");
        }
        signal_token.cancel();
    });

    let mut connection = client.connect().await?;
    connection.send(&ClientMessage::subscribe()).await?;

    let result = follow(&mut connection, &cancel_token).await;
    connection.close().await;
    result
}

async fn follow(connection: &mut Connection, cancel_token: &CancellationToken) -> Result<()> {
    loop {
        tokio::select! {
            _ = cancel_token.cancelled() => {
                info!("Watch cancelled");
                return Ok(());
            }
            message = connection.next_message() => match message? {
                Some(message) => {
                    if let Some(line) = render_pushed(&message) {
                        println!("{line}");
                    }
                }
                None => {
                    warn!("Daemon closed the watch connection");
                    bail!("Daemon closed the connection");
                }
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_start_defaults_to_sixteen_hours() {
        let args = Args::try_parse_from(["ftm", "start"]).unwrap();
        assert_eq!(args.command, Some(Command::Start { hours: 16.0 }));

        let args = Args::try_parse_from(["ftm", "start", "--hours", "18.5"]).unwrap();
        assert_eq!(args.command, Some(Command::Start { hours: 18.5 }));
    }

    #[test]
    fn test_history_limit_is_optional() {
        let args = Args::try_parse_from(["ftm", "history"]).unwrap();
        assert_eq!(args.command, Some(Command::History { limit: None }));

        let args = Args::try_parse_from(["ftm", "history", "-n", "10"]).unwrap();
        assert_eq!(args.command, Some(Command::History { limit: Some(10) }));
    }

    #[test]
    fn test_no_subcommand_parses() {
        let args = Args::try_parse_from(["ftm"]).unwrap();
        assert!(args.command.is_none());
    }

    #[test]
    fn test_render_pushed_tick() {
        let message = DaemonMessage::Tick {
            remaining_ms: 1_000,
            elapsed_ms: 59_000,
            elapsed_clock: "00:00:59".to_string(),
            at: chrono::Utc::now(),
        };
        assert_eq!(
            render_pushed(&message).as_deref(),
            Some("00:00:59  (remaining 00:00:01)")
        );
        assert_eq!(render_pushed(&DaemonMessage::pong(1)), None);
    }
}
