//! Polymarket streaming session
//!
//! Subscribes to the public market channel for a set of CLOB tokens and reads
//! price changes, book snapshots and last trade prices. The live engine owns
//! the socket.

use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::RwLock;
use rust_decimal::Decimal;
use serde_json::Value;
use tracing::{debug, error, info, warn};

use crate::client::PolymarketClient;
use crate::types::{decimal_from_value, MarketSubscribeMessage, POLYMARKET_WS_URL};
use unified_core::{
    ConnectRequest, FeedEvent, FeedResult, Platform, PriceUpdate, VenueSession,
};

/// Server-side cap on asset ids per subscribe message
pub const SUBSCRIBE_CHUNK_SIZE: usize = 50;

/// Default number of tokens to subscribe to
pub const DEFAULT_MAX_TOKENS: usize = 100;

/// Polymarket streaming session
pub struct PolymarketSession {
    client: Option<PolymarketClient>,
    /// Always subscribed, regardless of what the listing returns
    configured_tokens: Vec<String>,
    max_tokens: usize,
    /// token id -> question, filled from listings
    questions: RwLock<HashMap<String, String>>,
}

impl PolymarketSession {
    pub fn new(
        client: Option<PolymarketClient>,
        configured_tokens: Vec<String>,
        max_tokens: usize,
    ) -> Self {
        Self {
            client,
            configured_tokens,
            max_tokens,
            questions: RwLock::new(HashMap::new()),
        }
    }

    /// Remember the question text for a token
    pub fn remember_question(&self, token_id: impl Into<String>, question: impl Into<String>) {
        self.questions.write().insert(token_id.into(), question.into());
    }

    pub fn question_for(&self, token_id: &str) -> Option<String> {
        self.questions.read().get(token_id).cloned()
    }

    /// Configured tokens first, then listed ones up to `max_tokens`
    async fn collect_tokens(&self) -> Vec<String> {
        let mut seen = HashSet::new();
        let mut tokens: Vec<String> = self
            .configured_tokens
            .iter()
            .filter(|t| !t.is_empty() && seen.insert(t.to_string()))
            .cloned()
            .collect();

        let Some(client) = &self.client else {
            return tokens;
        };

        let limit = self.max_tokens.min(u32::MAX as usize) as u32;
        match client.list_active_markets(limit, None).await {
            Ok(listings) => {
                for listing in listings {
                    let Some(token) = listing.token_id() else {
                        continue;
                    };
                    if let Some(question) = listing.question.as_deref() {
                        self.remember_question(token, question);
                    }
                    if tokens.len() < self.max_tokens && seen.insert(token.to_string()) {
                        tokens.push(token.to_string());
                    }
                }
            }
            Err(e) => warn!("[Polymarket WS] Failed to fetch active markets: {}", e),
        }

        self.resolve_configured_questions(client).await;
        tokens
    }

    /// Look up questions for configured tokens the listing did not cover
    async fn resolve_configured_questions(&self, client: &PolymarketClient) {
        for token in &self.configured_tokens {
            if token.is_empty() || self.question_for(token).is_some() {
                continue;
            }
            match client.get_market_by_token(token).await {
                Ok(Some(listing)) => match listing.question {
                    Some(question) => self.remember_question(token.as_str(), question),
                    None => debug!("[Polymarket WS] Market for token {} has no question", token),
                },
                Ok(None) => debug!("[Polymarket WS] No market found for token {}", token),
                Err(e) => warn!("[Polymarket WS] Failed to look up token {}: {}", token, e),
            }
        }
    }

    fn price_event(&self, asset_id: &str, price: Decimal, volume: Decimal) -> Option<FeedEvent> {
        if asset_id.is_empty() || price <= Decimal::ZERO {
            return None;
        }
        Some(FeedEvent::Price(PriceUpdate {
            platform: Platform::Polymarket,
            key: asset_id.to_string(),
            label: self.question_for(asset_id),
            price,
            volume,
            received_at: Utc::now(),
        }))
    }

    fn parse_item(&self, item: &Value, events: &mut Vec<FeedEvent>) {
        let event_type = item
            .get("event_type")
            .or_else(|| item.get("type"))
            .and_then(Value::as_str)
            .unwrap_or("");

        match event_type {
            "price_change" => self.parse_price_change(item, events),
            "book" | "orderbook_change" => {
                let Some(asset_id) = asset_id(item) else {
                    return;
                };
                let best_bid = item
                    .get("bids")
                    .and_then(Value::as_array)
                    .into_iter()
                    .flatten()
                    .filter_map(|level| level.get("price").and_then(decimal_from_value))
                    .max();
                if let Some(price) = best_bid {
                    debug!("[Polymarket WS] Book update for {}", asset_id);
                    events.extend(self.price_event(asset_id, price, Decimal::ZERO));
                }
            }
            "last_trade_price" => {
                let Some(asset_id) = asset_id(item) else {
                    return;
                };
                let price = field_decimal(item, "price").unwrap_or(Decimal::ZERO);
                let size = field_decimal(item, "size").unwrap_or(Decimal::ZERO);
                events.extend(self.price_event(asset_id, price, size));
            }
            "pong" => events.push(FeedEvent::Heartbeat),
            _ if item.get("error").is_some() => {
                error!("[Polymarket WS] Error: {}", item);
            }
            other => debug!("[Polymarket WS] Ignoring message type '{}'", other),
        }
    }

    fn parse_price_change(&self, item: &Value, events: &mut Vec<FeedEvent>) {
        let top_asset = asset_id(item);

        // Batched form: one entry per asset
        if let Some(changes) = item.get("price_changes").and_then(Value::as_array) {
            for change in changes {
                let Some(asset) = asset_id(change).or(top_asset) else {
                    continue;
                };
                let price = field_decimal(change, "price").unwrap_or(Decimal::ZERO);
                let size = field_decimal(change, "size").unwrap_or(Decimal::ZERO);
                events.extend(self.price_event(asset, price, size));
            }
            return;
        }

        let Some(asset) = top_asset else {
            return;
        };
        let first_change = item
            .get("changes")
            .and_then(Value::as_array)
            .and_then(|c| c.first());

        let price = field_decimal(item, "price")
            .or_else(|| first_change.and_then(|c| field_decimal(c, "price")))
            .unwrap_or(Decimal::ZERO);
        let volume = field_decimal(item, "size")
            .or_else(|| field_decimal(item, "volume"))
            .or_else(|| first_change.and_then(|c| field_decimal(c, "size")))
            .unwrap_or(Decimal::ZERO);

        debug!("[Polymarket WS] Price change for {}", asset);
        events.extend(self.price_event(asset, price, volume));
    }
}

fn asset_id(item: &Value) -> Option<&str> {
    item.get("asset_id")
        .or_else(|| item.get("token_id"))
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
}

fn field_decimal(item: &Value, key: &str) -> Option<Decimal> {
    item.get(key).and_then(decimal_from_value)
}

#[async_trait]
impl VenueSession for PolymarketSession {
    fn platform(&self) -> Platform {
        Platform::Polymarket
    }

    fn connect_request(&self) -> ConnectRequest {
        ConnectRequest::new(POLYMARKET_WS_URL)
    }

    async fn subscribe_frames(&self) -> Vec<String> {
        let tokens = self.collect_tokens().await;
        if tokens.is_empty() {
            warn!("[Polymarket WS] No tokens to subscribe to");
            return Vec::new();
        }

        info!("[Polymarket WS] Subscribing to {} tokens", tokens.len());

        tokens
            .chunks(SUBSCRIBE_CHUNK_SIZE)
            .filter_map(|chunk| {
                serde_json::to_string(&MarketSubscribeMessage::new(chunk.to_vec()))
                    .map_err(|e| warn!("[Polymarket WS] Failed to encode subscribe message: {}", e))
                    .ok()
            })
            .collect()
    }

    fn parse(&self, text: &str) -> FeedResult<Vec<FeedEvent>> {
        let trimmed = text.trim();
        if trimmed.eq_ignore_ascii_case("pong") {
            return Ok(vec![FeedEvent::Heartbeat]);
        }
        if trimmed.is_empty() {
            return Ok(Vec::new());
        }

        let json: Value = serde_json::from_str(trimmed)?;
        let mut events = Vec::new();
        match &json {
            Value::Array(items) => {
                for item in items {
                    self.parse_item(item, &mut events);
                }
            }
            item => self.parse_item(item, &mut events),
        }
        Ok(events)
    }

    fn keepalive_frame(&self) -> Option<String> {
        Some("PING".to_string())
    }
}

impl std::fmt::Debug for PolymarketSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PolymarketSession")
            .field("configured_tokens", &self.configured_tokens.len())
            .field("max_tokens", &self.max_tokens)
            .field("known_questions", &self.questions.read().len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn session() -> PolymarketSession {
        let session = PolymarketSession::new(None, Vec::new(), DEFAULT_MAX_TOKENS);
        session.remember_question("111", "Will the Fed cut rates in March?");
        session
    }

    fn single_price(events: Vec<FeedEvent>) -> PriceUpdate {
        match events.as_slice() {
            [FeedEvent::Price(p)] => p.clone(),
            other => panic!("expected one price event, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_subscribe_frames_chunked_at_50() {
        let tokens: Vec<String> = (0..120).map(|i| format!("tok{}", i)).collect();
        let session = PolymarketSession::new(None, tokens, DEFAULT_MAX_TOKENS);
        let frames = session.subscribe_frames().await;
        assert_eq!(frames.len(), 3);

        let first: Value = serde_json::from_str(&frames[0]).unwrap();
        assert_eq!(first["type"], "market");
        assert_eq!(first["operation"], "subscribe");
        assert_eq!(first["assets_ids"].as_array().unwrap().len(), 50);

        let last: Value = serde_json::from_str(&frames[2]).unwrap();
        assert_eq!(last["assets_ids"].as_array().unwrap().len(), 20);
    }

    #[tokio::test]
    async fn test_no_tokens_no_frames() {
        let session = PolymarketSession::new(None, vec![String::new()], DEFAULT_MAX_TOKENS);
        assert!(session.subscribe_frames().await.is_empty());
    }

    #[test]
    fn test_parse_flat_price_change_uses_question_label() {
        let text = r#"{"type":"price_change","asset_id":"111","price":"0.52","size":"300"}"#;
        let update = single_price(session().parse(text).unwrap());
        assert_eq!(update.price, dec!(0.52));
        assert_eq!(update.volume, dec!(300));
        assert_eq!(update.label.as_deref(), Some("Will the Fed cut rates in March?"));
    }

    #[test]
    fn test_parse_changes_array() {
        let text = r#"{"event_type":"price_change","asset_id":"222","changes":[{"price":"0.40","side":"BUY","size":"25"}]}"#;
        let update = single_price(session().parse(text).unwrap());
        assert_eq!(update.key, "222");
        assert_eq!(update.price, dec!(0.40));
        assert_eq!(update.volume, dec!(25));
        assert_eq!(update.label, None);
    }

    #[test]
    fn test_parse_batched_price_changes() {
        let text = r#"{"event_type":"price_change","market":"0xabc","price_changes":[
            {"asset_id":"111","price":"0.5","size":"10"},
            {"asset_id":"222","price":"0.5","size":"10"}]}"#;
        assert_eq!(session().parse(text).unwrap().len(), 2);
    }

    #[test]
    fn test_parse_book_uses_best_bid() {
        let text = r#"[{"event_type":"book","asset_id":"111",
            "bids":[{"price":"0.38","size":"5"},{"price":"0.41","size":"2"}],
            "asks":[{"price":"0.45","size":"1"}]}]"#;
        let update = single_price(session().parse(text).unwrap());
        assert_eq!(update.price, dec!(0.41));
    }

    #[test]
    fn test_parse_last_trade_price() {
        let text = r#"{"event_type":"last_trade_price","asset_id":"111","price":"0.57","size":"12","side":"BUY"}"#;
        let update = single_price(session().parse(text).unwrap());
        assert_eq!(update.price, dec!(0.57));
        assert_eq!(update.volume, dec!(12));
    }

    #[test]
    fn test_keepalive_is_text_ping() {
        assert_eq!(session().keepalive_frame().as_deref(), Some("PING"));
    }

    #[test]
    fn test_pong_is_heartbeat() {
        assert_eq!(session().parse("PONG").unwrap(), vec![FeedEvent::Heartbeat]);
        assert_eq!(session().parse(r#"{"type":"pong"}"#).unwrap(), vec![FeedEvent::Heartbeat]);
    }

    #[test]
    fn test_zero_price_and_unknown_are_dropped() {
        let text = r#"{"type":"price_change","asset_id":"111","price":"0"}"#;
        assert!(session().parse(text).unwrap().is_empty());
        assert!(session().parse(r#"{"event_type":"tick_size_change"}"#).unwrap().is_empty());
        assert!(session().parse("{broken").is_err());
    }
}
