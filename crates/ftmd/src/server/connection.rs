//! Connection handler for individual client connections.
//!
//! Each client connection gets its own `ConnectionHandler` that:
//! - Performs protocol version negotiation
//! - Parses incoming messages
//! - Routes requests to the lifecycle manager
//! - Registers the client for event broadcasts on `subscribe`
//!
//! # Panic-Free Guarantees
//!
//! - No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`, `todo!()`
//! - Connection errors are logged and result in graceful disconnect

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use ftm_core::FinishReason;
use ftm_protocol::{ClientMessage, DaemonMessage, MessageType, ProtocolVersion};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, BufWriter};
use tokio::net::unix::{OwnedReadHalf, OwnedWriteHalf};
use tokio::sync::{Mutex, RwLock};
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

use crate::lifecycle::{LifecycleError, LifecycleHandle};

use super::{ServerError, MAX_SUBSCRIBERS};

pub type SubscriberWriter = Arc<Mutex<BufWriter<OwnedWriteHalf>>>;

/// A client receiving lifecycle broadcasts.
pub struct Subscriber {
    pub writer: SubscriberWriter,
}

pub type SubscribersMap = Arc<RwLock<HashMap<String, Subscriber>>>;

/// Maximum message size (1 MB)
const MAX_MESSAGE_SIZE: usize = 1_048_576;

/// Read timeout for idle connections (5 minutes)
const READ_TIMEOUT: Duration = Duration::from_secs(300);

const WRITE_TIMEOUT: Duration = Duration::from_secs(10);

type ClientId = String;

pub struct ConnectionHandler {
    reader: BufReader<OwnedReadHalf>,
    /// Shared with the broadcaster once subscribed
    writer: SubscriberWriter,
    lifecycle: LifecycleHandle,
    subscribers: SubscribersMap,
    client_id: Option<ClientId>,
    subscribed: bool,
    connection_number: u64,
}

impl ConnectionHandler {
    pub fn new(
        reader: OwnedReadHalf,
        writer: OwnedWriteHalf,
        lifecycle: LifecycleHandle,
        subscribers: SubscribersMap,
        connection_number: u64,
    ) -> Self {
        Self {
            reader: BufReader::new(reader),
            writer: Arc::new(Mutex::new(BufWriter::new(writer))),
            lifecycle,
            subscribers,
            client_id: None,
            subscribed: false,
            connection_number,
        }
    }

    /// Performs the handshake, then processes messages until the
    /// connection closes. Returns the client id for subscriber cleanup.
    pub async fn run(mut self) -> Option<ClientId> {
        debug!(connection = self.connection_number, "New client connected");

        match self.handle_handshake().await {
            Ok(()) => {
                info!(client_id = ?self.client_id, "Client handshake completed");
            }
            Err(e) => {
                warn!(
                    connection = self.connection_number,
                    error = %e,
                    "Handshake failed"
                );
                return None;
            }
        }

        let client_id = self.client_id.clone();

        if let Err(e) = self.process_messages().await {
            debug!(client_id = ?self.client_id, error = %e, "Connection closed");
        }

        info!(client_id = ?self.client_id, "Client disconnected");
        client_id
    }

    /// Expects `Connect` with a compatible protocol version.
    async fn handle_handshake(&mut self) -> Result<(), ConnectionError> {
        let msg = self.read_message().await?;

        let client_version = msg.protocol_version;
        if !client_version.is_compatible_with(&ProtocolVersion::CURRENT) {
            warn!(
                client_version = %client_version,
                server_version = %ProtocolVersion::CURRENT,
                "Protocol version mismatch"
            );

            self.send_message(DaemonMessage::rejected(&format!(
                "Protocol version {} not compatible with server version {}",
                client_version,
                ProtocolVersion::CURRENT
            )))
            .await?;

            return Err(ConnectionError::VersionMismatch {
                client: client_version,
                server: ProtocolVersion::CURRENT,
            });
        }

        match msg.message {
            MessageType::Connect { client_id } => {
                let assigned_id =
                    client_id.unwrap_or_else(|| format!("client-{}", self.connection_number));
                self.client_id = Some(assigned_id.clone());
                self.send_message(DaemonMessage::connected(assigned_id))
                    .await?;
                Ok(())
            }
            other => {
                self.send_message(DaemonMessage::error(
                    "Expected Connect message for handshake",
                ))
                .await?;
                Err(ConnectionError::UnexpectedMessage(format!("{other:?}")))
            }
        }
    }

    async fn process_messages(&mut self) -> Result<(), ConnectionError> {
        loop {
            // Subscribers only listen, so they are exempt from the idle timeout.
            let read = if self.subscribed {
                Ok(self.read_message().await)
            } else {
                timeout(READ_TIMEOUT, self.read_message()).await
            };

            let msg = match read {
                Ok(Ok(msg)) => msg,
                Ok(Err(ConnectionError::Eof)) => {
                    debug!(client_id = ?self.client_id, "Client sent EOF");
                    return Ok(());
                }
                Ok(Err(ConnectionError::ParseError(reason))) => {
                    warn!(client_id = ?self.client_id, error = %reason, "Malformed message");
                    self.send_message(DaemonMessage::error_with_code(
                        &format!("Parse error: {reason}"),
                        "parse_error",
                    ))
                    .await?;
                    continue;
                }
                Ok(Err(e)) => return Err(e),
                Err(_) => {
                    debug!(client_id = ?self.client_id, "Connection timed out");
                    return Err(ConnectionError::Timeout);
                }
            };

            match self.handle_message(msg).await {
                Ok(()) => {}
                Err(ConnectionError::Eof) => return Ok(()),
                Err(e) => {
                    error!(client_id = ?self.client_id, error = %e, "Error handling message");
                    let _ = self
                        .send_message(DaemonMessage::error(&e.to_string()))
                        .await;
                }
            }
        }
    }

    async fn handle_message(&mut self, msg: ClientMessage) -> Result<(), ConnectionError> {
        match msg.message {
            MessageType::Connect { .. } => {
                self.send_message(DaemonMessage::error("Already connected"))
                    .await?;
            }

            MessageType::StartFast { duration_hours } => {
                let reply = match self.lifecycle.start(duration_hours).await {
                    Ok(session) => DaemonMessage::FastStarted {
                        schedule: session.notification_schedule(),
                        session,
                    },
                    Err(e) => lifecycle_error(&e),
                };
                self.send_message(reply).await?;
            }

            MessageType::StopFast => {
                let reply = match self.lifecycle.stop().await {
                    Ok(entry) => DaemonMessage::FastFinished {
                        entry,
                        reason: FinishReason::Manual,
                    },
                    Err(e) => lifecycle_error(&e),
                };
                self.send_message(reply).await?;
            }

            MessageType::GetStatus => {
                let reply = match self.lifecycle.status().await {
                    Ok(view) => DaemonMessage::status(view),
                    Err(e) => lifecycle_error(&e),
                };
                self.send_message(reply).await?;
            }

            MessageType::GetHistory { limit } => {
                let reply = match self.lifecycle.history(limit).await {
                    Ok(page) => DaemonMessage::history(page.entries, page.total),
                    Err(e) => lifecycle_error(&e),
                };
                self.send_message(reply).await?;
            }

            MessageType::PreviewDuration { duration_hours } => {
                let reply = match self.lifecycle.preview(duration_hours).await {
                    Ok(preview) => DaemonMessage::Remaining { preview },
                    Err(e) => lifecycle_error(&e),
                };
                self.send_message(reply).await?;
            }

            MessageType::Subscribe => {
                self.handle_subscribe().await?;
            }

            MessageType::Unsubscribe => {
                if let Some(ref client_id) = self.client_id {
                    self.subscribers.write().await.remove(client_id);
                }
                self.subscribed = false;
                debug!(client_id = ?self.client_id, "Client unsubscribed from updates");
            }

            MessageType::Foreground => {
                debug!(client_id = ?self.client_id, "Client reported foreground");
                let reply = match self.lifecycle.foreground().await {
                    Ok(view) => DaemonMessage::status(view),
                    Err(e) => lifecycle_error(&e),
                };
                self.send_message(reply).await?;
            }

            MessageType::Diagnostics => {
                let reply = match self.lifecycle.diagnostics().await {
                    Ok(report) => DaemonMessage::diagnostics(report),
                    Err(e) => lifecycle_error(&e),
                };
                self.send_message(reply).await?;
            }

            MessageType::Ping { seq } => {
                self.send_message(DaemonMessage::pong(seq)).await?;
            }

            MessageType::Disconnect => {
                debug!(client_id = ?self.client_id, "Client requested disconnect");
                return Err(ConnectionError::Eof);
            }
        }

        Ok(())
    }

    /// Registers for broadcasts, then sends the current status and any
    /// notices no client has seen yet.
    async fn handle_subscribe(&mut self) -> Result<(), ConnectionError> {
        let client_id = match &self.client_id {
            Some(id) => id.clone(),
            None => {
                self.send_message(DaemonMessage::error("Must connect before subscribing"))
                    .await?;
                return Ok(());
            }
        };

        {
            let mut subs = self.subscribers.write().await;
            if subs.len() >= MAX_SUBSCRIBERS && !subs.contains_key(&client_id) {
                drop(subs);
                let err = ServerError::TooManyClients {
                    max: MAX_SUBSCRIBERS,
                };
                self.send_message(DaemonMessage::error_with_code(
                    &err.to_string(),
                    "too_many_clients",
                ))
                .await?;
                return Ok(());
            }
            subs.insert(
                client_id.clone(),
                Subscriber {
                    writer: Arc::clone(&self.writer),
                },
            );
        }

        self.subscribed = true;
        debug!(client_id = %client_id, "Client subscribed to updates");

        let view = self
            .lifecycle
            .status()
            .await
            .map_err(|e| ConnectionError::Lifecycle(e.to_string()))?;
        self.send_message(DaemonMessage::status(view)).await?;

        let notices = self
            .lifecycle
            .take_notices()
            .await
            .map_err(|e| ConnectionError::Lifecycle(e.to_string()))?;
        for (kind, message) in notices {
            self.send_message(DaemonMessage::notice(kind, message))
                .await?;
        }
        Ok(())
    }

    async fn read_message(&mut self) -> Result<ClientMessage, ConnectionError> {
        let mut line = String::new();

        let bytes_read = self
            .reader
            .read_line(&mut line)
            .await
            .map_err(|e| ConnectionError::Io(e.to_string()))?;

        if bytes_read == 0 {
            return Err(ConnectionError::Eof);
        }

        if line.len() > MAX_MESSAGE_SIZE {
            return Err(ConnectionError::MessageTooLarge {
                size: line.len(),
                max: MAX_MESSAGE_SIZE,
            });
        }

        let msg: ClientMessage = serde_json::from_str(&line)
            .map_err(|e| ConnectionError::ParseError(e.to_string()))?;

        debug!(
            client_id = ?self.client_id,
            message_type = ?std::mem::discriminant(&msg.message),
            "Received message"
        );

        Ok(msg)
    }

    async fn send_message(&self, msg: DaemonMessage) -> Result<(), ConnectionError> {
        let json =
            serde_json::to_string(&msg).map_err(|e| ConnectionError::ParseError(e.to_string()))?;
        write_line(&self.writer, &json).await
    }

    pub fn is_subscribed(&self) -> bool {
        self.subscribed
    }

    pub fn client_id(&self) -> Option<&str> {
        self.client_id.as_deref()
    }
}

fn lifecycle_error(err: &LifecycleError) -> DaemonMessage {
    DaemonMessage::error_with_code(&err.to_string(), err.code())
}

/// Writes one JSON line and flushes, bounded by the write timeout.
pub(crate) async fn write_line(writer: &SubscriberWriter, json: &str) -> Result<(), ConnectionError> {
    let mut writer = writer.lock().await;

    match timeout(WRITE_TIMEOUT, async {
        writer.write_all(json.as_bytes()).await?;
        writer.write_all(b"\n").await?;
        writer.flush().await?;
        Ok::<(), std::io::Error>(())
    })
    .await
    {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => Err(ConnectionError::Io(e.to_string())),
        Err(_) => Err(ConnectionError::WriteTimeout),
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConnectionError {
    #[error("Protocol version mismatch: client {client}, server {server}")]
    VersionMismatch {
        client: ProtocolVersion,
        server: ProtocolVersion,
    },

    #[error("Unexpected message: {0}")]
    UnexpectedMessage(String),

    #[error("Parse error: {0}")]
    ParseError(String),

    #[error("I/O error: {0}")]
    Io(String),

    #[error("Connection closed")]
    Eof,

    #[error("Read timeout")]
    Timeout,

    #[error("Write timeout")]
    WriteTimeout,

    #[error("Message too large: {size} bytes (max: {max})")]
    MessageTooLarge { size: usize, max: usize },

    #[error("Lifecycle error: {0}")]
    Lifecycle(String),
}
