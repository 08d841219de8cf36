//! Per-venue connection status

use crate::platform::Platform;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Streaming connection lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeedState {
    Disconnected,
    Connecting,
    Connected,
    /// Terminal state after the engine was stopped
    Stopped,
}

impl FeedState {
    pub fn as_u8(self) -> u8 {
        match self {
            FeedState::Disconnected => 0,
            FeedState::Connecting => 1,
            FeedState::Connected => 2,
            FeedState::Stopped => 3,
        }
    }

    pub fn from_u8(value: u8) -> Self {
        match value {
            1 => FeedState::Connecting,
            2 => FeedState::Connected,
            3 => FeedState::Stopped,
            _ => FeedState::Disconnected,
        }
    }
}

/// Snapshot of one venue's streaming connection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectionStatus {
    pub platform: Platform,
    pub connected: bool,
    pub state: FeedState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_heartbeat: Option<DateTime<Utc>>,
    pub messages_received: u64,
    /// Duration of the most recent successful connection handshake
    pub latency_ms: f64,
}

impl ConnectionStatus {
    /// Initial status for a venue that has not connected yet
    pub fn disconnected(platform: Platform) -> Self {
        Self {
            platform,
            connected: false,
            state: FeedState::Disconnected,
            last_heartbeat: None,
            messages_received: 0,
            latency_ms: 0.0,
        }
    }
}
