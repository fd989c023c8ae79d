//! Carriers for the helper protocol.
//!
//! Two backends present the same request/response contract:
//! - [`websocket::WebSocketTransport`]: one JSON text frame per message.
//! - [`native::NativeMessagingTransport`]: a child process speaking
//!   length-prefixed JSON over stdin/stdout.
//!
//! Requests and responses strictly alternate; there are no message ids.

pub mod native;
pub mod websocket;

use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use log::{debug, info};
use sudolikeaboss_protocol::{Command, RawResponse};
use thiserror::Error;

use crate::config::{Config, TransportKind};
use crate::error::Error;

pub use native::NativeMessagingTransport;
pub use websocket::WebSocketTransport;

/// Failure to move bytes to or from the helper.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("{context}: {source}")]
    Io {
        context: &'static str,
        #[source]
        source: std::io::Error,
    },

    #[error("websocket error: {0}")]
    WebSocket(Box<tokio_tungstenite::tungstenite::Error>),

    /// The websocket handshake did not finish in time.
    #[error("timed out connecting to {uri} after {timeout:?}")]
    ConnectTimeout { uri: String, timeout: Duration },

    /// The connect request could not be built (bad URI or header value).
    #[error("invalid connect request: {0}")]
    InvalidRequest(String),

    /// The peer went away.
    #[error("connection closed by peer")]
    Closed,

    /// A native messaging length prefix exceeded the frame limit.
    #[error("frame of {0} bytes exceeds the native messaging limit")]
    FrameTooLarge(usize),

    /// The native messaging host manifest is missing or unusable.
    #[error("native messaging manifest {path}: {message}")]
    Manifest { path: PathBuf, message: String },

    #[error("failed to launch {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to encode command: {0}")]
    Encode(#[from] serde_json::Error),
}

impl From<tokio_tungstenite::tungstenite::Error> for TransportError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        TransportError::WebSocket(Box::new(err))
    }
}

impl TransportError {
    pub(crate) fn io(context: &'static str) -> impl FnOnce(std::io::Error) -> Self {
        move |source| TransportError::Io { context, source }
    }
}

/// A connected channel to the helper.
#[async_trait]
pub trait Transport: Send {
    /// Send one command.
    async fn send(&mut self, command: &Command) -> Result<(), TransportError>;

    /// Receive the next message as raw JSON bytes.
    async fn receive(&mut self) -> Result<Vec<u8>, TransportError>;

    /// Release the connection. Safe to call more than once.
    async fn close(&mut self) -> Result<(), TransportError>;
}

/// Open the transport selected by `config`.
pub async fn connect(config: &Config) -> crate::Result<Box<dyn Transport>> {
    match config.transport_kind() {
        TransportKind::Websocket => {
            info!("Connecting to {}", config.websocket_uri);
            let transport =
                WebSocketTransport::connect(&config.websocket_uri, &config.websocket_origin)
                    .await?;
            Ok(Box::new(transport))
        }
        TransportKind::Native => {
            let manifest = config.native_manifest_path()?;
            info!("Launching native messaging host from {}", manifest.display());
            let transport = NativeMessagingTransport::launch(&manifest).await?;
            Ok(Box::new(transport))
        }
    }
}

/// Send `command` and read back the envelope of its response.
///
/// Logs the action tags only; payloads may hold secrets.
pub async fn exchange(
    transport: &mut dyn Transport,
    command: &Command,
) -> crate::Result<RawResponse> {
    debug!("-> {}", command.action);
    transport.send(command).await?;
    let bytes = transport.receive().await?;
    let response = RawResponse::from_slice(&bytes).map_err(Error::decode("response envelope"))?;
    debug!("<- {} ({} bytes)", response.action, bytes.len());
    Ok(response)
}
