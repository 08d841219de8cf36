//! Streaming feed abstractions
//!
//! A `VenueSession` knows what to say to a venue and how to read what it says
//! back. A `StreamTransport` knows how to open a bidirectional text stream.
//! The live engine combines the two so venue logic never touches sockets.

use crate::error::FeedResult;
use crate::platform::Platform;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Everything needed to open one streaming connection
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectRequest {
    pub url: String,
    pub headers: Vec<(String, String)>,
}

impl ConnectRequest {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            headers: Vec::new(),
        }
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// Venue-normalized price update
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceUpdate {
    pub platform: Platform,
    /// Kalshi ticker or Polymarket token id
    pub key: String,
    /// Human readable title, when the session knows one
    #[serde(skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    /// YES price (0.00 - 1.00)
    pub price: Decimal,
    pub volume: Decimal,
    pub received_at: DateTime<Utc>,
}

/// A parsed inbound frame
#[derive(Debug, Clone, PartialEq)]
pub enum FeedEvent {
    Price(PriceUpdate),
    /// Venue-level keepalive (Kalshi `heartbeat`, Polymarket `pong`)
    Heartbeat,
}

/// An open text stream
#[async_trait]
pub trait StreamConnection: Send {
    async fn send_text(&mut self, text: String) -> FeedResult<()>;

    /// Next text frame. `None` means the peer closed the stream.
    async fn recv(&mut self) -> Option<FeedResult<String>>;
}

/// Opens streams for the engine
#[async_trait]
pub trait StreamTransport: Send + Sync {
    async fn open(&self, request: ConnectRequest) -> FeedResult<Box<dyn StreamConnection>>;
}

/// Venue-specific protocol knowledge
#[async_trait]
pub trait VenueSession: Send + Sync {
    fn platform(&self) -> Platform;

    /// Request for a fresh connection attempt; authentication is recomputed
    /// on every call and omitted when it cannot be produced
    fn connect_request(&self) -> ConnectRequest;

    /// Frames to send right after the stream opens
    async fn subscribe_frames(&self) -> Vec<String>;

    /// Parse one inbound frame. Unknown message types yield no events.
    fn parse(&self, text: &str) -> FeedResult<Vec<FeedEvent>>;

    /// Text frame to send periodically while connected, if the venue needs one
    fn keepalive_frame(&self) -> Option<String> {
        None
    }
}
