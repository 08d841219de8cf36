//! Polymarket integration for the unified prediction-market feed
//!
//! This crate provides a client for the Gamma market listing API and the CLOB
//! order book, price history and balance endpoints, plus the streaming session
//! for the public market channel.

pub mod client;
pub mod types;
pub mod websocket;

pub use client::{PolymarketClient, PolymarketCredentials};
pub use websocket::PolymarketSession;
