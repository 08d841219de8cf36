//! Error types for the feed

use thiserror::Error;

/// Feed-wide error type
#[derive(Error, Debug)]
pub enum FeedError {
    #[error("API error: {0}")]
    Api(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Authentication error: {0}")]
    Auth(String),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl FeedError {
    pub fn api(msg: impl Into<String>) -> Self {
        FeedError::Api(msg.into())
    }

    pub fn network(msg: impl Into<String>) -> Self {
        FeedError::Network(msg.into())
    }

    pub fn auth(msg: impl Into<String>) -> Self {
        FeedError::Auth(msg.into())
    }

    pub fn parse(msg: impl Into<String>) -> Self {
        FeedError::Parse(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        FeedError::NotFound(msg.into())
    }

    pub fn config(msg: impl Into<String>) -> Self {
        FeedError::Config(msg.into())
    }

    pub fn transport(msg: impl Into<String>) -> Self {
        FeedError::Transport(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        FeedError::Internal(msg.into())
    }

    /// Whether the error came from the connection itself rather than its payload
    pub fn is_transport(&self) -> bool {
        matches!(self, FeedError::Transport(_) | FeedError::Network(_))
    }
}

impl From<serde_json::Error> for FeedError {
    fn from(e: serde_json::Error) -> Self {
        FeedError::Parse(e.to_string())
    }
}

/// Result type alias for feed operations
pub type FeedResult<T> = Result<T, FeedError>;
