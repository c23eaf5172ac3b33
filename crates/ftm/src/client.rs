//! Daemon connection client for the ftm CLI.
//!
//! This module provides the `DaemonClient` which handles:
//! - Connection to the daemon via Unix socket, with bounded backoff
//! - The version handshake
//! - Request/response exchanges and the subscription stream
//!
//! **Panic-Free Policy:** No `.unwrap()`, `.expect()`, `panic!()`,
//! `unreachable!()`, or `todo!()`.

use std::env;
use std::path::PathBuf;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::unix::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::UnixStream;
use tokio::time::{sleep, timeout};
use tracing::{debug, info, warn};

use crate::error::{CliError, Result};
use ftm_protocol::{ClientMessage, DaemonMessage, ProtocolVersion};

pub const DEFAULT_SOCKET_PATH: &str = "/tmp/ftm.sock";
pub const ENV_SOCKET: &str = "FTM_SOCKET";

// ============================================================================
// Configuration
// ============================================================================

/// Connection behavior for the CLI.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Path to the Unix socket where the daemon listens.
    pub socket_path: PathBuf,

    /// Delay before the first retry after a failed connect.
    pub retry_initial_delay: Duration,

    /// Maximum delay between retry attempts.
    pub retry_max_delay: Duration,

    /// Multiplier for exponential backoff.
    pub retry_multiplier: f64,

    /// Connection attempts before giving up.
    pub max_attempts: u32,

    /// How long to wait for a reply to a request.
    pub response_timeout: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            socket_path: PathBuf::from(DEFAULT_SOCKET_PATH),
            retry_initial_delay: Duration::from_millis(100),
            retry_max_delay: Duration::from_secs(1),
            retry_multiplier: 2.0,
            max_attempts: 8,
            response_timeout: Duration::from_secs(5),
        }
    }
}

impl ClientConfig {
    /// Defaults with `FTM_SOCKET` applied.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Some(socket) = env::var_os(ENV_SOCKET) {
            config.socket_path = PathBuf::from(socket);
        }
        config
    }
}

// ============================================================================
// Daemon Client
// ============================================================================

/// Opens handshaken connections to the daemon.
#[derive(Debug, Clone)]
pub struct DaemonClient {
    config: ClientConfig,
}

impl DaemonClient {
    #[must_use]
    pub fn new(config: ClientConfig) -> Self {
        Self { config }
    }

    #[must_use]
    pub fn from_env() -> Self {
        Self::new(ClientConfig::from_env())
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Connects and completes the handshake.
    pub async fn connect(&self) -> Result<Connection> {
        let stream = self.connect_with_retry().await?;
        let (reader, writer) = stream.into_split();
        let mut connection = Connection {
            reader: BufReader::new(reader),
            writer,
            client_id: String::new(),
            response_timeout: self.config.response_timeout,
        };
        connection.handshake().await?;
        Ok(connection)
    }

    /// Sends one request on a fresh connection and returns the reply.
    pub async fn request(&self, message: ClientMessage) -> Result<DaemonMessage> {
        let mut connection = self.connect().await?;
        let reply = connection.request(&message).await;
        connection.close().await;
        reply
    }

    async fn connect_with_retry(&self) -> Result<UnixStream> {
        let mut delay = self.config.retry_initial_delay;
        let mut last_error = String::from("socket not found");

        for attempt in 1..=self.config.max_attempts.max(1) {
            debug!(
                attempt,
                socket_path = %self.config.socket_path.display(),
                "Attempting to connect to daemon"
            );

            if self.config.socket_path.exists() {
                match UnixStream::connect(&self.config.socket_path).await {
                    Ok(stream) => {
                        debug!(attempt, "Connection successful");
                        return Ok(stream);
                    }
                    Err(e) => {
                        debug!(attempt, error = %e, "Connection attempt failed");
                        last_error = e.to_string();
                    }
                }
            } else if attempt == 1 {
                warn!(
                    socket_path = %self.config.socket_path.display(),
                    "Daemon socket not found, will retry"
                );
            }

            if attempt < self.config.max_attempts {
                sleep(delay).await;
                let next_delay_ms = (delay.as_millis() as f64 * self.config.retry_multiplier) as u64;
                delay = Duration::from_millis(next_delay_ms).min(self.config.retry_max_delay);
            }
        }

        Err(CliError::DaemonConnection(format!(
            "{}: {last_error}",
            self.config.socket_path.display()
        )))
    }
}

// ============================================================================
// Connection
// ============================================================================

/// A handshaken JSON-lines connection.
pub struct Connection {
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
    client_id: String,
    response_timeout: Duration,
}

impl Connection {
    /// Client ID assigned by the daemon.
    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    async fn handshake(&mut self) -> Result<()> {
        self.send(&ClientMessage::connect(None)).await?;

        match self.read_reply().await? {
            DaemonMessage::Connected {
                protocol_version,
                client_id,
            } => {
                if !ProtocolVersion::CURRENT.is_compatible_with(&protocol_version) {
                    return Err(CliError::VersionMismatch {
                        client_version: ProtocolVersion::CURRENT.to_string(),
                        daemon_version: protocol_version.to_string(),
                    });
                }
                info!(client_id, protocol_version = %protocol_version, "Handshake complete");
                self.client_id = client_id;
                Ok(())
            }
            DaemonMessage::Rejected {
                reason,
                protocol_version,
            } => {
                if ProtocolVersion::CURRENT.is_compatible_with(&protocol_version) {
                    Err(CliError::Rejected(reason))
                } else {
                    Err(CliError::VersionMismatch {
                        client_version: ProtocolVersion::CURRENT.to_string(),
                        daemon_version: protocol_version.to_string(),
                    })
                }
            }
            other => Err(CliError::ProtocolError(format!(
                "Unexpected response to connect: {other:?}"
            ))),
        }
    }

    /// Writes one message followed by a newline.
    pub async fn send(&mut self, message: &ClientMessage) -> Result<()> {
        let json = serde_json::to_string(message)?;
        self.writer.write_all(json.as_bytes()).await?;
        self.writer.write_all(b"\n").await?;
        self.writer.flush().await?;
        debug!(message_type = ?message.message, "Sent message to daemon");
        Ok(())
    }

    /// Sends a request and waits for its reply. Daemon errors become
    /// [`CliError::Daemon`].
    pub async fn request(&mut self, message: &ClientMessage) -> Result<DaemonMessage> {
        self.send(message).await?;
        match self.read_reply().await? {
            DaemonMessage::Error { message, code } => Err(CliError::Daemon { message, code }),
            reply => Ok(reply),
        }
    }

    /// Next pushed message, without a deadline. `None` on EOF.
    pub async fn next_message(&mut self) -> Result<Option<DaemonMessage>> {
        let mut line = String::new();
        loop {
            line.clear();
            if self.reader.read_line(&mut line).await? == 0 {
                info!("Daemon closed connection");
                return Ok(None);
            }
            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }
            match serde_json::from_str(trimmed) {
                Ok(message) => return Ok(Some(message)),
                Err(e) => {
                    warn!(error = %e, line = %trimmed, "Failed to parse daemon message");
                }
            }
        }
    }

    async fn read_reply(&mut self) -> Result<DaemonMessage> {
        let mut line = String::new();
        let read = timeout(self.response_timeout, self.reader.read_line(&mut line))
            .await
            .map_err(|_| CliError::ProtocolError("Timed out waiting for daemon".to_string()))??;
        if read == 0 {
            return Err(CliError::Closed);
        }
        Ok(serde_json::from_str(line.trim())?)
    }

    /// Says goodbye. Errors are ignored since the socket is going away.
    pub async fn close(mut self) {
        let _ = self.send(&ClientMessage::disconnect()).await;
        let _ = self.writer.shutdown().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::UnixListener;

    fn test_config(socket_path: PathBuf) -> ClientConfig {
        ClientConfig {
            socket_path,
            retry_initial_delay: Duration::from_millis(5),
            retry_max_delay: Duration::from_millis(10),
            max_attempts: 3,
            ..Default::default()
        }
    }

    /// Accepts one client and answers each line from `replies` in order.
    fn fake_daemon(listener: UnixListener, replies: Vec<String>) {
        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let (reader, mut writer) = stream.into_split();
            let mut reader = BufReader::new(reader);
            for reply in replies {
                let mut line = String::new();
                if reader.read_line(&mut line).await.unwrap() == 0 {
                    return;
                }
                writer.write_all(reply.as_bytes()).await.unwrap();
                writer.write_all(b"\n").await.unwrap();
            }
        });
    }

    #[test]
    fn test_default_socket_path() {
        let config = ClientConfig::default();
        assert_eq!(config.socket_path, PathBuf::from("/tmp/ftm.sock"));
        assert!(config.max_attempts > 0);
    }

    #[tokio::test]
    async fn test_connect_gives_up_when_socket_missing() {
        let dir = tempfile::tempdir().unwrap();
        let client = DaemonClient::new(test_config(dir.path().join("missing.sock")));
        let err = client.connect().await.err().unwrap();
        assert!(matches!(err, CliError::DaemonConnection(_)));
    }

    #[tokio::test]
    async fn test_handshake_and_request() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ftm.sock");
        let listener = UnixListener::bind(&path).unwrap();
        let connected = serde_json::to_string(&DaemonMessage::connected("client-1".into())).unwrap();
        let pong = serde_json::to_string(&DaemonMessage::pong(7)).unwrap();
        fake_daemon(listener, vec![connected, pong]);

        let client = DaemonClient::new(test_config(path));
        let mut connection = client.connect().await.unwrap();
        assert_eq!(connection.client_id(), "client-1");

        let reply = connection.request(&ClientMessage::ping(7)).await.unwrap();
        assert!(matches!(reply, DaemonMessage::Pong { seq: 7 }));
    }

    #[tokio::test]
    async fn test_daemon_error_becomes_cli_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ftm.sock");
        let listener = UnixListener::bind(&path).unwrap();
        let connected = serde_json::to_string(&DaemonMessage::connected("c".into())).unwrap();
        let error = serde_json::to_string(&DaemonMessage::error_with_code(
            "no fast is running",
            "not_fasting",
        ))
        .unwrap();
        fake_daemon(listener, vec![connected, error]);

        let client = DaemonClient::new(test_config(path));
        let err = client.request(ClientMessage::stop_fast()).await.err().unwrap();
        assert_eq!(err.code(), Some("not_fasting"));
    }

    #[tokio::test]
    async fn test_rejected_incompatible_version() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ftm.sock");
        let listener = UnixListener::bind(&path).unwrap();
        let rejected = serde_json::to_string(&DaemonMessage::Rejected {
            reason: "upgrade".to_string(),
            protocol_version: ProtocolVersion::new(2, 0),
        })
        .unwrap();
        fake_daemon(listener, vec![rejected]);

        let client = DaemonClient::new(test_config(path));
        let err = client.connect().await.err().unwrap();
        assert!(matches!(err, CliError::VersionMismatch { .. }));
    }
}
