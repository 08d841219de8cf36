//! Kalshi API types
//!
//! REST responses are converted to `KalshiListing` at the client boundary.
//! Stream messages are parsed by the session into `PriceUpdate`s.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use unified_core::KalshiListing;

const PROD_REST_BASE: &str = "https://api.elections.kalshi.com";
const DEMO_REST_BASE: &str = "https://demo-api.kalshi.co";
const PROD_WS_URL: &str = "wss://api.elections.kalshi.com/trade-api/ws/v2";
const DEMO_WS_URL: &str = "wss://demo-api.kalshi.co/trade-api/ws/v2";

/// Which Kalshi deployment to talk to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum KalshiEnvironment {
    #[default]
    Production,
    Demo,
}

impl KalshiEnvironment {
    /// Scheme and host for REST calls (paths are signed in full)
    pub fn rest_base(&self) -> &'static str {
        match self {
            KalshiEnvironment::Production => PROD_REST_BASE,
            KalshiEnvironment::Demo => DEMO_REST_BASE,
        }
    }

    pub fn ws_url(&self) -> &'static str {
        match self {
            KalshiEnvironment::Production => PROD_WS_URL,
            KalshiEnvironment::Demo => DEMO_WS_URL,
        }
    }
}

impl std::str::FromStr for KalshiEnvironment {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "prod" | "production" => Ok(KalshiEnvironment::Production),
            "demo" => Ok(KalshiEnvironment::Demo),
            other => Err(format!("Unknown Kalshi environment: {}", other)),
        }
    }
}

/// Convert cents to decimal probability (0.00 - 1.00)
pub fn cents_to_decimal(cents: Decimal) -> Decimal {
    cents / Decimal::ONE_HUNDRED
}

// ============================================================================
// REST
// ============================================================================

/// Response from GET /markets
#[derive(Debug, Clone, Deserialize)]
pub struct MarketsResponse {
    #[serde(default)]
    pub markets: Vec<KalshiMarket>,
    #[serde(default)]
    pub cursor: Option<String>,
}

/// A Kalshi market from the API (prices in cents)
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct KalshiMarket {
    pub ticker: String,

    #[serde(default)]
    pub title: Option<String>,

    #[serde(default)]
    pub yes_bid: Option<Decimal>,

    #[serde(default)]
    pub yes_ask: Option<Decimal>,

    #[serde(default)]
    pub last_price: Option<Decimal>,

    #[serde(default)]
    pub volume: Option<Decimal>,
}

impl KalshiMarket {
    pub fn to_listing(&self) -> KalshiListing {
        KalshiListing {
            ticker: self.ticker.clone(),
            title: self.title.clone(),
            yes_bid: self.yes_bid.map(cents_to_decimal),
            yes_ask: self.yes_ask.map(cents_to_decimal),
            last_price: self.last_price.map(cents_to_decimal),
            volume: self.volume.unwrap_or(Decimal::ZERO),
        }
    }
}

/// Response from GET /portfolio/balance
#[derive(Debug, Clone, Deserialize)]
pub struct BalanceResponse {
    #[serde(default)]
    pub balance: Decimal, // in cents
}

// ============================================================================
// WebSocket
// ============================================================================

/// Command sent to Kalshi WebSocket
#[derive(Debug, Clone, Serialize)]
pub struct KalshiCommand {
    pub id: u64,
    pub cmd: String,
    pub params: KalshiCommandParams,
}

#[derive(Debug, Clone, Serialize)]
pub struct KalshiCommandParams {
    pub channels: Vec<String>,
}

/// Envelope of every inbound stream message
#[derive(Debug, Clone, Deserialize)]
pub struct KalshiEnvelope {
    #[serde(rename = "type", default)]
    pub msg_type: String,
    #[serde(default)]
    pub msg: Option<serde_json::Value>,
}

/// Kalshi sometimes batches several payloads into one `msg` array
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum OneOrMany<T> {
    One(T),
    Many(Vec<T>),
}

impl<T> OneOrMany<T> {
    pub fn into_vec(self) -> Vec<T> {
        match self {
            OneOrMany::One(item) => vec![item],
            OneOrMany::Many(items) => items,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct TickerMsg {
    pub market_ticker: String,
    #[serde(default)]
    pub price: Option<Decimal>,
    #[serde(default)]
    pub yes_bid: Option<Decimal>,
    #[serde(default)]
    pub yes_ask: Option<Decimal>,
    #[serde(default)]
    pub volume: Option<Decimal>,
}

impl TickerMsg {
    /// YES price in cents: mean of the quoted bid/ask, else the last price
    pub fn price_cents(&self) -> Option<Decimal> {
        let quotes: Vec<Decimal> = [self.yes_bid, self.yes_ask].into_iter().flatten().collect();
        if quotes.is_empty() {
            return self.price;
        }
        let sum: Decimal = quotes.iter().copied().sum();
        Some(sum / Decimal::from(quotes.len()))
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct TradeMsg {
    pub market_ticker: String,
    #[serde(default)]
    pub yes_price: Option<Decimal>,
    #[serde(default)]
    pub price: Option<Decimal>,
    #[serde(default)]
    pub count: Option<Decimal>,
}

impl TradeMsg {
    pub fn price_cents(&self) -> Option<Decimal> {
        self.yes_price.or(self.price)
    }
}

/// Book levels as `[price_cents, quantity]` pairs
pub type BookLevels = Vec<(Decimal, Decimal)>;

/// Order book snapshot, either flat (`yes`) or nested under `orderbook`
#[derive(Debug, Clone, Deserialize)]
pub struct OrderbookMsg {
    #[serde(alias = "ticker")]
    pub market_ticker: String,
    #[serde(default)]
    pub yes: BookLevels,
    #[serde(default)]
    pub orderbook: Option<OrderbookSides>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct OrderbookSides {
    #[serde(default)]
    pub yes: BookLevels,
}

impl OrderbookMsg {
    /// Best YES bid in cents
    pub fn best_yes_cents(&self) -> Option<Decimal> {
        let nested = self.orderbook.as_ref().map(|o| o.yes.as_slice()).unwrap_or_default();
        self.yes.iter().chain(nested).map(|(price, _)| *price).max()
    }
}
