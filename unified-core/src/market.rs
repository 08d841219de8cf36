//! Market data structures for the unified feed

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

// ============================================================================
// Unified Market
// ============================================================================

/// One real-world event as tracked by both venues
///
/// Kalshi fields are only written by the Kalshi update path and Polymarket
/// fields only by the Polymarket path. A price of zero means "no price".
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnifiedMarket {
    /// Reconciliation key, fixed at creation
    pub id: String,

    /// Display title
    pub event_name: String,

    /// Normalized form of the title
    pub normalized_name: String,

    /// Kalshi market ticker (if listed on Kalshi)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kalshi_ticker: Option<String>,

    /// Kalshi YES price (0.00 - 1.00)
    pub kalshi_price: Decimal,

    /// Kalshi volume
    pub kalshi_volume: Decimal,

    /// Polymarket CLOB token id (if listed on Polymarket)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub poly_token_id: Option<String>,

    /// Polymarket question text
    #[serde(skip_serializing_if = "Option::is_none")]
    pub poly_question: Option<String>,

    /// Polymarket YES price (0.00 - 1.00)
    pub poly_price: Decimal,

    /// Polymarket volume
    pub poly_volume: Decimal,

    /// When any field was last written
    pub last_update: DateTime<Utc>,
}

impl UnifiedMarket {
    /// Create an empty market with no venue data
    pub fn new(
        id: impl Into<String>,
        event_name: impl Into<String>,
        normalized_name: impl Into<String>,
        at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: id.into(),
            event_name: event_name.into(),
            normalized_name: normalized_name.into(),
            kalshi_ticker: None,
            kalshi_price: Decimal::ZERO,
            kalshi_volume: Decimal::ZERO,
            poly_token_id: None,
            poly_question: None,
            poly_price: Decimal::ZERO,
            poly_volume: Decimal::ZERO,
            last_update: at,
        }
    }

    /// Write the Kalshi side of the market
    pub fn apply_kalshi(
        &mut self,
        ticker: &str,
        price: Decimal,
        volume: Decimal,
        at: DateTime<Utc>,
    ) {
        self.kalshi_ticker = Some(ticker.to_string());
        self.kalshi_price = price;
        self.kalshi_volume = volume;
        self.last_update = at;
    }

    /// Write the Polymarket side of the market
    ///
    /// A missing token id or question keeps the value already recorded.
    pub fn apply_polymarket(
        &mut self,
        token_id: Option<&str>,
        question: Option<&str>,
        price: Decimal,
        volume: Decimal,
        at: DateTime<Utc>,
    ) {
        if let Some(token) = token_id {
            self.poly_token_id = Some(token.to_string());
        }
        if let Some(q) = question {
            self.poly_question = Some(q.to_string());
        }
        self.poly_price = price;
        self.poly_volume = volume;
        self.last_update = at;
    }

    /// Copy the Kalshi side from a freshly matched record
    pub fn copy_kalshi_from(&mut self, fresh: &UnifiedMarket, at: DateTime<Utc>) {
        self.kalshi_ticker = fresh.kalshi_ticker.clone();
        self.kalshi_price = fresh.kalshi_price;
        self.kalshi_volume = fresh.kalshi_volume;
        self.last_update = at;
    }

    /// Copy the Polymarket side from a freshly matched record
    pub fn copy_polymarket_from(&mut self, fresh: &UnifiedMarket, at: DateTime<Utc>) {
        self.poly_token_id = fresh.poly_token_id.clone();
        self.poly_question = fresh.poly_question.clone();
        self.poly_price = fresh.poly_price;
        self.poly_volume = fresh.poly_volume;
        self.last_update = at;
    }

    /// Whether Kalshi has ever contributed to this market
    pub fn has_kalshi_listing(&self) -> bool {
        self.kalshi_ticker.is_some()
    }

    /// Whether Polymarket has ever contributed to this market
    pub fn has_polymarket_listing(&self) -> bool {
        self.poly_token_id.is_some() || self.poly_question.is_some()
    }

    /// Percentage difference of the Polymarket price relative to Kalshi
    ///
    /// Zero unless both venues have a price, and zero when the ratio
    /// overflows the decimal range.
    pub fn delta_percent(&self) -> Decimal {
        if !self.has_both_prices() {
            return Decimal::ZERO;
        }
        self.poly_price
            .checked_sub(self.kalshi_price)
            .and_then(|diff| diff.checked_div(self.kalshi_price))
            .and_then(|ratio| ratio.checked_mul(Decimal::ONE_HUNDRED))
            .unwrap_or(Decimal::ZERO)
    }

    /// Check if both venues currently quote a price
    pub fn has_both_prices(&self) -> bool {
        self.kalshi_price > Decimal::ZERO && self.poly_price > Decimal::ZERO
    }

    /// Combined volume across venues
    pub fn total_volume(&self) -> Decimal {
        self.kalshi_volume.saturating_add(self.poly_volume)
    }
}

// ============================================================================
// Price History
// ============================================================================

/// One coalesced observation in a market's short-term history
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PricePoint {
    pub timestamp: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kalshi_price: Option<Decimal>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub poly_price: Option<Decimal>,
    pub kalshi_volume: Decimal,
    pub poly_volume: Decimal,
}

impl PricePoint {
    /// Create a point with no prices
    pub fn empty(timestamp: DateTime<Utc>) -> Self {
        Self {
            timestamp,
            kalshi_price: None,
            poly_price: None,
            kalshi_volume: Decimal::ZERO,
            poly_volume: Decimal::ZERO,
        }
    }
}

/// An externally fetched historical price (REST history/candle endpoints)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryPoint {
    pub timestamp: DateTime<Utc>,
    pub price: Decimal,
}

impl HistoryPoint {
    pub fn new(timestamp: DateTime<Utc>, price: Decimal) -> Self {
        Self { timestamp, price }
    }
}

// ============================================================================
// Venue Listings (REST snapshots)
// ============================================================================

/// An active Kalshi market from a REST snapshot
///
/// Prices are already converted from cents to the 0.00 - 1.00 scale.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KalshiListing {
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
    pub volume: Decimal,
}

impl KalshiListing {
    /// Title used for identity matching, falling back to the ticker
    pub fn match_title(&self) -> &str {
        match self.title.as_deref() {
            Some(t) if !t.trim().is_empty() => t,
            _ => &self.ticker,
        }
    }

    /// Effective YES price: best bid, then last trade, else zero
    pub fn price(&self) -> Decimal {
        self.yes_bid
            .filter(|p| !p.is_zero())
            .or(self.last_price)
            .unwrap_or(Decimal::ZERO)
    }
}

/// An active Polymarket market from a REST snapshot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PolymarketListing {
    pub id: String,
    #[serde(default)]
    pub question: Option<String>,
    #[serde(default)]
    pub outcome_prices: Vec<Decimal>,
    #[serde(default)]
    pub volume: Decimal,
    #[serde(default)]
    pub clob_token_ids: Vec<String>,
}

impl PolymarketListing {
    /// Question text, empty when the listing has none
    pub fn question(&self) -> &str {
        self.question.as_deref().unwrap_or("")
    }

    /// YES price (first outcome), else zero
    pub fn price(&self) -> Decimal {
        self.outcome_prices.first().copied().unwrap_or(Decimal::ZERO)
    }

    /// YES token id (first CLOB token)
    pub fn token_id(&self) -> Option<&str> {
        self.clob_token_ids.first().map(String::as_str)
    }
}

// ============================================================================
// Order Book Types
// ============================================================================

/// A single price level in the order book
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderBookLevel {
    /// Price (0.00 - 1.00 representing probability)
    pub price: Decimal,
    /// Total size at this level
    pub size: Decimal,
}

impl OrderBookLevel {
    pub fn new(price: Decimal, size: Decimal) -> Self {
        Self { price, size }
    }
}

/// Order book snapshot for one token
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderBook {
    pub token_id: String,
    pub timestamp: DateTime<Utc>,
    /// Sorted by price descending (best bid first)
    pub bids: Vec<OrderBookLevel>,
    /// Sorted by price ascending (best ask first)
    pub asks: Vec<OrderBookLevel>,
}

impl OrderBook {
    pub fn best_bid(&self) -> Option<Decimal> {
        self.bids.first().map(|l| l.price)
    }

    pub fn best_ask(&self) -> Option<Decimal> {
        self.asks.first().map(|l| l.price)
    }

    /// Mid price when both sides are present
    pub fn mid_price(&self) -> Option<Decimal> {
        match (self.best_bid(), self.best_ask()) {
            (Some(bid), Some(ask)) => Some((bid + ask) / Decimal::TWO),
            _ => None,
        }
    }
}
