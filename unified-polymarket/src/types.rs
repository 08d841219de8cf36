//! Polymarket API types
//!
//! Gamma returns several numeric fields as JSON-encoded strings, so the raw
//! market is converted to a `PolymarketListing` once at the client boundary.

use chrono::DateTime;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use unified_core::{HistoryPoint, OrderBook, OrderBookLevel, PolymarketListing};

/// Base URL for Polymarket Gamma API
pub const GAMMA_API_BASE: &str = "https://gamma-api.polymarket.com";

/// Base URL for Polymarket CLOB API
pub const CLOB_API_BASE: &str = "https://clob.polymarket.com";

/// Market channel websocket (no auth required)
pub const POLYMARKET_WS_URL: &str = "wss://ws-subscriptions-clob.polymarket.com/ws/market";

/// Read a decimal that may arrive as a JSON string or number
pub fn decimal_from_value(value: &serde_json::Value) -> Option<Decimal> {
    match value {
        serde_json::Value::String(s) => Decimal::from_str(s.trim()).ok(),
        serde_json::Value::Number(n) => Decimal::from_str(&n.to_string())
            .or_else(|_| Decimal::from_scientific(&n.to_string()))
            .ok(),
        _ => None,
    }
}

// ============================================================================
// Gamma
// ============================================================================

/// A Polymarket market from the Gamma API
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PolymarketMarket {
    #[serde(default)]
    pub id: String,

    #[serde(default)]
    pub question: Option<String>,

    /// JSON-encoded array, e.g. "[\"0.52\", \"0.48\"]"
    #[serde(default)]
    pub outcome_prices: Option<String>,

    /// Volume as a string
    #[serde(default)]
    pub volume: Option<String>,

    #[serde(default)]
    pub volume_num: Option<f64>,

    /// JSON-encoded array of CLOB token ids (YES first)
    #[serde(default)]
    pub clob_token_ids: Option<String>,
}

impl PolymarketMarket {
    /// Parse outcome prices from the JSON string
    pub fn parse_outcome_prices(&self) -> Vec<Decimal> {
        let Some(prices_str) = self.outcome_prices.as_ref() else {
            return Vec::new();
        };

        match serde_json::from_str::<Vec<serde_json::Value>>(prices_str) {
            Ok(values) => values
                .iter()
                .map(|v| decimal_from_value(v).unwrap_or(Decimal::ZERO))
                .collect(),
            // Comma-separated fallback
            Err(_) => prices_str
                .trim_matches(|c| c == '[' || c == ']')
                .split(',')
                .filter(|p| !p.trim().is_empty())
                .map(|p| Decimal::from_str(p.trim().trim_matches('"')).unwrap_or(Decimal::ZERO))
                .collect(),
        }
    }

    /// Parse volume, preferring the numeric field
    pub fn parse_volume(&self) -> Decimal {
        if let Some(v) = self.volume_num {
            return Decimal::from_str(&v.to_string()).unwrap_or(Decimal::ZERO);
        }

        self.volume
            .as_ref()
            .and_then(|v| Decimal::from_str(v).ok())
            .unwrap_or(Decimal::ZERO)
    }

    /// Parse CLOB token ids from the JSON string
    pub fn parse_clob_token_ids(&self) -> Vec<String> {
        self.clob_token_ids
            .as_ref()
            .and_then(|s| serde_json::from_str::<Vec<String>>(s).ok())
            .unwrap_or_default()
    }

    pub fn to_listing(&self) -> PolymarketListing {
        PolymarketListing {
            id: self.id.clone(),
            question: self.question.clone(),
            outcome_prices: self.parse_outcome_prices(),
            volume: self.parse_volume(),
            clob_token_ids: self.parse_clob_token_ids(),
        }
    }
}

// ============================================================================
// CLOB
// ============================================================================

/// Response from GET /book
#[derive(Debug, Clone, Deserialize)]
pub struct ClobOrderbookResponse {
    #[serde(default)]
    pub asset_id: Option<String>,
    #[serde(default)]
    pub bids: Vec<ClobOrderLevel>,
    #[serde(default)]
    pub asks: Vec<ClobOrderLevel>,
}

/// A single level in the CLOB order book
#[derive(Debug, Clone, Deserialize)]
pub struct ClobOrderLevel {
    /// Price as string (0.00 - 1.00)
    pub price: String,
    /// Size/quantity as string
    pub size: String,
}

impl ClobOrderbookResponse {
    pub fn to_order_book(&self, token_id: &str) -> OrderBook {
        let convert = |levels: &[ClobOrderLevel]| -> Vec<OrderBookLevel> {
            levels
                .iter()
                .filter_map(|l| {
                    let price = l.price.parse::<Decimal>().ok()?;
                    let size = l.size.parse::<Decimal>().ok()?;
                    Some(OrderBookLevel::new(price, size))
                })
                .collect()
        };

        let mut bids = convert(&self.bids);
        let mut asks = convert(&self.asks);
        bids.sort_by(|a, b| b.price.cmp(&a.price));
        asks.sort_by(|a, b| a.price.cmp(&b.price));

        OrderBook {
            token_id: self.asset_id.clone().unwrap_or_else(|| token_id.to_string()),
            timestamp: chrono::Utc::now(),
            bids,
            asks,
        }
    }
}

/// Response from GET /prices-history
#[derive(Debug, Clone, Deserialize)]
pub struct PricesHistoryResponse {
    #[serde(default)]
    pub history: Vec<PriceHistoryPoint>,
}

/// A single price point from the CLOB API
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PriceHistoryPoint {
    /// Unix timestamp in seconds
    pub t: i64,
    /// Price (0.0 - 1.0)
    pub p: f64,
}

impl PriceHistoryPoint {
    pub fn to_history_point(&self) -> Option<HistoryPoint> {
        let timestamp = DateTime::from_timestamp(self.t, 0)?;
        let price = Decimal::from_str(&self.p.to_string()).ok()?;
        Some(HistoryPoint::new(timestamp, price))
    }
}

/// Response from GET /balance-allowance
#[derive(Debug, Clone, Deserialize)]
pub struct BalanceAllowanceResponse {
    #[serde(default)]
    pub balance: serde_json::Value,
}

// ============================================================================
// WebSocket
// ============================================================================

/// Subscribe message for the market channel
#[derive(Debug, Clone, Serialize)]
pub struct MarketSubscribeMessage {
    #[serde(rename = "type")]
    pub msg_type: String,
    pub operation: String,
    pub assets_ids: Vec<String>,
}

impl MarketSubscribeMessage {
    pub fn new(assets_ids: Vec<String>) -> Self {
        Self {
            msg_type: "market".to_string(),
            operation: "subscribe".to_string(),
            assets_ids,
        }
    }
}
