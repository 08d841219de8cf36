//! Kalshi integration for the unified prediction-market feed
//!
//! This crate provides the RSA-PSS request signer, a REST client for market
//! snapshots and the account balance, and the streaming session that the live
//! engine drives over a websocket.

pub mod auth;
pub mod client;
pub mod types;
pub mod websocket;

pub use auth::{AuthHeaders, KalshiSigner};
pub use client::KalshiClient;
pub use types::KalshiEnvironment;
pub use websocket::{KalshiSession, WS_PATH};
