//! Error types for the ftm command-line client.
//!
//! **Panic-Free Policy:** No `.unwrap()`, `.expect()`, `panic!()`,
//! `unreachable!()`, or `todo!()`.

use std::io;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CliError {
    /// Failed to reach the daemon socket.
    #[error("Failed to connect to daemon: {0}")]
    DaemonConnection(String),

    /// Could not start the daemon automatically.
    #[error("Failed to start daemon: {0}")]
    DaemonStart(String),

    #[error("Protocol version mismatch (client: {client_version}, daemon: {daemon_version})")]
    VersionMismatch {
        client_version: String,
        daemon_version: String,
    },

    /// The daemon refused the handshake.
    #[error("Daemon rejected connection: {0}")]
    Rejected(String),

    /// The daemon answered a request with an error.
    #[error("{message}")]
    Daemon {
        message: String,
        code: Option<String>,
    },

    /// The daemon answered with a message this request does not expect.
    #[error("Protocol error: {0}")]
    ProtocolError(String),

    /// The daemon closed the connection.
    #[error("Daemon closed the connection")]
    Closed,

    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Failed to parse message: {0}")]
    ParseError(#[from] serde_json::Error),
}

impl CliError {
    /// Error code sent by the daemon, if any.
    pub fn code(&self) -> Option<&str> {
        match self {
            Self::Daemon { code, .. } => code.as_deref(),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, CliError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_daemon_error_displays_message_only() {
        let err = CliError::Daemon {
            message: "no fast is running".to_string(),
            code: Some("not_fasting".to_string()),
        };
        assert_eq!(err.to_string(), "no fast is running");
        assert_eq!(err.code(), Some("not_fasting"));
    }

    #[test]
    fn test_version_mismatch_display() {
        let err = CliError::VersionMismatch {
            client_version: "1.0".to_string(),
            daemon_version: "2.0".to_string(),
        };
        let display = err.to_string();
        assert!(display.contains("client: 1.0"));
        assert!(display.contains("daemon: 2.0"));
    }

    #[test]
    fn test_io_error_from_conversion() {
        let err: CliError = io::Error::new(io::ErrorKind::NotFound, "socket not found").into();
        assert!(matches!(err, CliError::Io(_)));
        assert_eq!(err.code(), None);
    }
}
