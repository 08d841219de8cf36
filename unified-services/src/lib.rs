//! Reconciliation and ingestion services for the unified prediction-market feed
//!
//! This crate matches listings across venues, keeps the reconciled market
//! store, and runs the live streaming engine that feeds it.

pub mod clock;
pub mod config;
pub mod engine;
pub mod matcher;
pub mod similarity;
pub mod snapshot;
pub mod store;
pub mod subscriber;
pub mod transport;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{ConfigError, FeedConfig, KalshiCredentials};
pub use engine::{EngineSettings, LiveEngine, RawMessage};
pub use matcher::MarketMatcher;
pub use snapshot::SnapshotSync;
pub use store::{ChangeType, ReconciledStore, StoreEvent, HISTORY_CAPACITY};
pub use subscriber::{Delivery, DeliveryReport, SubscriberError, SubscriberId};
pub use transport::WebSocketTransport;
