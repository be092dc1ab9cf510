use async_trait::async_trait;
use bytes::Bytes;
use futures_util::{SinkExt, StreamExt};
use http::HeaderValue;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, trace};

use crate::error::TransportError;
use crate::protocol::PROTOCOL_VERSION;

use super::{Connector, Transport};

/// Handshake header announcing the framing revision.
pub const PROTOCOL_HEADER: &str = "x-wsi-protocol";

/// Opens WebSocket connections with `tokio-tungstenite`.
#[derive(Debug, Clone, Default)]
pub struct WsConnector;

impl WsConnector {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Connector for WsConnector {
    async fn connect(&self, endpoint: &str) -> Result<Box<dyn Transport>, TransportError> {
        let mut request = endpoint
            .into_client_request()
            .map_err(|e| TransportError::Refused(e.to_string()))?;
        request.headers_mut().insert(
            PROTOCOL_HEADER,
            HeaderValue::from(PROTOCOL_VERSION as u16),
        );

        let (stream, response) = connect_async(request).await.map_err(map_handshake_error)?;
        debug!(endpoint, status = %response.status(), "WebSocket handshake complete");

        Ok(Box::new(WsTransport { stream }))
    }
}

fn map_handshake_error(err: tungstenite::Error) -> TransportError {
    match err {
        tungstenite::Error::Io(e) => TransportError::Refused(e.to_string()),
        tungstenite::Error::Http(response) => {
            TransportError::Refused(format!("HTTP {}", response.status()))
        }
        other => TransportError::Refused(other.to_string()),
    }
}

struct WsTransport {
    stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

#[async_trait]
impl Transport for WsTransport {
    async fn send(&mut self, frame: Bytes) -> Result<(), TransportError> {
        self.stream
            .send(Message::Binary(frame.to_vec()))
            .await
            .map_err(|e| match e {
                tungstenite::Error::ConnectionClosed | tungstenite::Error::AlreadyClosed => {
                    TransportError::Closed
                }
                other => TransportError::Io(other.to_string()),
            })
    }

    async fn recv(&mut self) -> Option<Result<Bytes, TransportError>> {
        loop {
            match self.stream.next().await? {
                Ok(Message::Binary(data)) => return Some(Ok(Bytes::from(data))),
                Ok(Message::Close(frame)) => {
                    debug!(?frame, "Server closed WebSocket");
                    return None;
                }
                // Pings are answered by tungstenite on the next write/flush
                Ok(Message::Ping(_)) | Ok(Message::Pong(_)) | Ok(Message::Frame(_)) => continue,
                Ok(Message::Text(text)) => {
                    trace!(len = text.len(), "Ignoring text message");
                    continue;
                }
                Err(tungstenite::Error::ConnectionClosed) => return None,
                Err(e) => return Some(Err(TransportError::Io(e.to_string()))),
            }
        }
    }

    async fn close(&mut self) {
        if let Err(e) = self.stream.close(None).await {
            trace!(error = %e, "Error while closing WebSocket");
        }
    }
}
