//! WebSocket transport over tokio-tungstenite

use std::time::Duration;

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::{HeaderName, HeaderValue};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, warn};
use unified_core::{ConnectRequest, FeedError, FeedResult, StreamConnection, StreamTransport};

/// Handshake timeout
const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// Production transport
#[derive(Debug, Default, Clone, Copy)]
pub struct WebSocketTransport;

impl WebSocketTransport {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl StreamTransport for WebSocketTransport {
    async fn open(&self, request: ConnectRequest) -> FeedResult<Box<dyn StreamConnection>> {
        let mut ws_request = request
            .url
            .as_str()
            .into_client_request()
            .map_err(|e| FeedError::transport(format!("Invalid websocket request: {}", e)))?;

        let headers = ws_request.headers_mut();
        for (name, value) in &request.headers {
            let name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|e| FeedError::transport(format!("Invalid header name {}: {}", name, e)))?;
            let value = HeaderValue::from_str(value)
                .map_err(|e| FeedError::transport(format!("Invalid header value: {}", e)))?;
            headers.insert(name, value);
        }

        let (stream, _) = tokio::time::timeout(CONNECT_TIMEOUT, connect_async(ws_request))
            .await
            .map_err(|_| FeedError::transport("Connection timed out"))?
            .map_err(|e| FeedError::transport(e.to_string()))?;

        Ok(Box::new(WebSocketConnection { stream }))
    }
}

/// One open websocket
pub struct WebSocketConnection {
    stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

#[async_trait]
impl StreamConnection for WebSocketConnection {
    async fn send_text(&mut self, text: String) -> FeedResult<()> {
        self.stream
            .send(Message::Text(text.into()))
            .await
            .map_err(|e| FeedError::transport(e.to_string()))
    }

    async fn recv(&mut self) -> Option<FeedResult<String>> {
        loop {
            let message = match self.stream.next().await? {
                Ok(message) => message,
                Err(e) => return Some(Err(FeedError::transport(e.to_string()))),
            };

            match message {
                Message::Text(text) => return Some(Ok(text.as_str().to_owned())),
                Message::Binary(data) => match String::from_utf8(data.to_vec()) {
                    Ok(text) => return Some(Ok(text)),
                    Err(e) => warn!("Dropping non UTF-8 binary frame: {}", e),
                },
                Message::Ping(data) => {
                    if let Err(e) = self.stream.send(Message::Pong(data)).await {
                        return Some(Err(FeedError::transport(format!(
                            "Failed to send pong: {}",
                            e
                        ))));
                    }
                }
                Message::Close(frame) => {
                    debug!("Close frame received: {:?}", frame);
                    return None;
                }
                Message::Pong(_) | Message::Frame(_) => {}
            }
        }
    }
}

impl std::fmt::Debug for WebSocketConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WebSocketConnection").finish_non_exhaustive()
    }
}
