//! ftm CLI - command-line client for the fasting timer daemon
//!
//! Every command opens a short-lived connection to `ftmd`, starting the
//! daemon first if it is not running. `watch` keeps a subscription open
//! and prints ticks, alerts and notices as they arrive.

pub mod cli;
pub mod client;
pub mod daemon;
pub mod error;
pub mod render;

pub use client::{ClientConfig, Connection, DaemonClient};
pub use error::{CliError, Result};
