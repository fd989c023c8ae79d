use std::time::Duration;

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use log::{debug, trace};
use sudolikeaboss_protocol::Command;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::http::header::ORIGIN;
use tokio_tungstenite::tungstenite::protocol::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};

use super::{Transport, TransportError};

pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// The helper's websocket endpoint.
pub struct WebSocketTransport {
    stream: Option<Socket>,
    uri: String,
}

impl WebSocketTransport {
    /// Connect to `uri`, presenting `origin` for the helper's origin check.
    pub async fn connect(uri: &str, origin: &str) -> Result<Self, TransportError> {
        Self::connect_with_timeout(uri, origin, CONNECT_TIMEOUT).await
    }

    pub async fn connect_with_timeout(
        uri: &str,
        origin: &str,
        timeout: Duration,
    ) -> Result<Self, TransportError> {
        let mut request = uri
            .into_client_request()
            .map_err(|e| TransportError::InvalidRequest(e.to_string()))?;
        let origin = HeaderValue::from_str(origin)
            .map_err(|e| TransportError::InvalidRequest(format!("origin: {e}")))?;
        request.headers_mut().insert(ORIGIN, origin);

        let (stream, response) = tokio::time::timeout(timeout, connect_async(request))
            .await
            .map_err(|_| TransportError::ConnectTimeout {
                uri: uri.to_string(),
                timeout,
            })??;
        debug!("Websocket connected to {uri} ({})", response.status());

        Ok(Self {
            stream: Some(stream),
            uri: uri.to_string(),
        })
    }

    fn stream(&mut self) -> Result<&mut Socket, TransportError> {
        self.stream.as_mut().ok_or(TransportError::Closed)
    }
}

#[async_trait]
impl Transport for WebSocketTransport {
    async fn send(&mut self, command: &Command) -> Result<(), TransportError> {
        let json = command.to_json()?;
        self.stream()?.send(Message::Text(json.into())).await?;
        Ok(())
    }

    async fn receive(&mut self) -> Result<Vec<u8>, TransportError> {
        let stream = self.stream()?;
        loop {
            match stream.next().await {
                Some(Ok(Message::Text(text))) => return Ok(text.as_bytes().to_vec()),
                Some(Ok(Message::Binary(data))) => return Ok(data.to_vec()),
                Some(Ok(Message::Ping(_) | Message::Pong(_) | Message::Frame(_))) => {
                    trace!("Skipping control frame");
                }
                Some(Ok(Message::Close(frame))) => {
                    debug!("Websocket closed by peer: {frame:?}");
                    self.stream = None;
                    return Err(TransportError::Closed);
                }
                Some(Err(e)) => return Err(e.into()),
                None => {
                    self.stream = None;
                    return Err(TransportError::Closed);
                }
            }
        }
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        let Some(mut stream) = self.stream.take() else {
            return Ok(());
        };
        debug!("Closing websocket to {}", self.uri);
        match stream.close(None).await {
            Ok(())
            | Err(tokio_tungstenite::tungstenite::Error::ConnectionClosed)
            | Err(tokio_tungstenite::tungstenite::Error::AlreadyClosed) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_invalid_uri_is_rejected() {
        let err = WebSocketTransport::connect("not a uri", "origin")
            .await
            .err()
            .unwrap();
        assert!(matches!(err, TransportError::InvalidRequest(_)));
    }

    #[tokio::test]
    async fn test_invalid_origin_is_rejected() {
        let err = WebSocketTransport::connect("ws://127.0.0.1:1/4", "bad\norigin")
            .await
            .err()
            .unwrap();
        assert!(matches!(err, TransportError::InvalidRequest(_)));
    }

    #[tokio::test]
    async fn test_connect_timeout() {
        // Accepts TCP but never answers the upgrade.
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let _hold = tokio::spawn(async move {
            let (_socket, _) = listener.accept().await.unwrap();
            tokio::time::sleep(Duration::from_secs(60)).await;
        });

        let err = WebSocketTransport::connect_with_timeout(
            &format!("ws://{addr}/4"),
            "origin",
            Duration::from_millis(200),
        )
        .await
        .err()
        .unwrap();
        assert!(matches!(err, TransportError::ConnectTimeout { .. }));
    }
}
