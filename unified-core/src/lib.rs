//! Core types for the unified prediction-market feed
//!
//! This crate defines the data structures shared by the venue clients, the
//! reconciled store and the live ingestion engine: unified markets, price
//! history points, venue listings, connection status and the streaming
//! abstractions that venue adapters implement.

pub mod error;
pub mod feed;
pub mod market;
pub mod platform;
pub mod status;

pub use error::{FeedError, FeedResult};
pub use feed::{
    ConnectRequest, FeedEvent, PriceUpdate, StreamConnection, StreamTransport, VenueSession,
};
pub use market::{
    HistoryPoint, KalshiListing, OrderBook, OrderBookLevel, PolymarketListing, PricePoint,
    UnifiedMarket,
};
pub use platform::Platform;
pub use status::{ConnectionStatus, FeedState};
