//! Kalshi streaming session
//!
//! Describes how to connect to Kalshi's WebSocket API and how to read its
//! ticker, trade, order book snapshot and heartbeat messages. The live engine owns the socket.
//!
//! Authentication: RSA-PSS signed upgrade headers, recomputed per attempt.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use rust_decimal::Decimal;
use tracing::{debug, warn};

use crate::auth::KalshiSigner;
use crate::types::{
    cents_to_decimal, KalshiCommand, KalshiCommandParams, KalshiEnvelope, KalshiEnvironment,
    OneOrMany, OrderbookMsg, TickerMsg, TradeMsg,
};
use unified_core::{
    ConnectRequest, FeedEvent, FeedResult, Platform, PriceUpdate, VenueSession,
};

/// Path signed for the websocket upgrade
pub const WS_PATH: &str = "/trade-api/ws/v2";

/// Kalshi streaming session
pub struct KalshiSession {
    environment: KalshiEnvironment,
    signer: Option<Arc<KalshiSigner>>,
    channels: Vec<String>,
}

impl KalshiSession {
    pub fn new(
        environment: KalshiEnvironment,
        signer: Option<Arc<KalshiSigner>>,
        channels: Vec<String>,
    ) -> Self {
        let channels = if channels.is_empty() {
            vec!["ticker".to_string()]
        } else {
            channels
        };
        Self {
            environment,
            signer,
            channels,
        }
    }

    pub fn subscribe_command(&self) -> KalshiCommand {
        KalshiCommand {
            id: 1,
            cmd: "subscribe".to_string(),
            params: KalshiCommandParams {
                channels: self.channels.clone(),
            },
        }
    }

    fn price_update(ticker: String, cents: Decimal, volume: Option<Decimal>) -> FeedEvent {
        FeedEvent::Price(PriceUpdate {
            platform: Platform::Kalshi,
            key: ticker,
            label: None,
            price: cents_to_decimal(cents),
            volume: volume.unwrap_or(Decimal::ZERO),
            received_at: Utc::now(),
        })
    }
}

#[async_trait]
impl VenueSession for KalshiSession {
    fn platform(&self) -> Platform {
        Platform::Kalshi
    }

    fn connect_request(&self) -> ConnectRequest {
        let mut request = ConnectRequest::new(self.environment.ws_url());

        match &self.signer {
            Some(signer) => match signer.sign("GET", WS_PATH) {
                Ok(headers) => request.headers = headers.to_pairs(),
                Err(e) => warn!("[Kalshi WS] Signing failed, connecting unauthenticated: {}", e),
            },
            None => debug!("[Kalshi WS] No credentials configured, connecting unauthenticated"),
        }

        request
    }

    async fn subscribe_frames(&self) -> Vec<String> {
        match serde_json::to_string(&self.subscribe_command()) {
            Ok(json) => vec![json],
            Err(e) => {
                warn!("[Kalshi WS] Failed to encode subscribe command: {}", e);
                Vec::new()
            }
        }
    }

    fn parse(&self, text: &str) -> FeedResult<Vec<FeedEvent>> {
        let envelope: KalshiEnvelope = serde_json::from_str(text)?;

        let events = match envelope.msg_type.as_str() {
            "ticker" => match envelope.msg {
                Some(msg) => serde_json::from_value::<OneOrMany<TickerMsg>>(msg)?
                    .into_vec()
                    .into_iter()
                    .filter_map(|m| {
                        let cents = m.price_cents()?;
                        Some(Self::price_update(m.market_ticker, cents, m.volume))
                    })
                    .collect(),
                None => Vec::new(),
            },
            "trade" => match envelope.msg {
                Some(msg) => serde_json::from_value::<OneOrMany<TradeMsg>>(msg)?
                    .into_vec()
                    .into_iter()
                    .filter_map(|m| {
                        let cents = m.price_cents()?;
                        Some(Self::price_update(m.market_ticker, cents, m.count))
                    })
                    .collect(),
                None => Vec::new(),
            },
            "orderbook_snapshot" | "orderbook" => {
                // Older servers put the book at the top level instead of in `msg`
                let payload = match envelope.msg {
                    Some(msg) => msg,
                    None => serde_json::from_str(text)?,
                };
                serde_json::from_value::<OneOrMany<OrderbookMsg>>(payload)?
                    .into_vec()
                    .into_iter()
                    .filter_map(|m| {
                        let cents = m.best_yes_cents()?;
                        Some(Self::price_update(m.market_ticker, cents, None))
                    })
                    .collect()
            }
            "heartbeat" => vec![FeedEvent::Heartbeat],
            "subscribed" | "ok" => {
                debug!("[Kalshi WS] Subscription acknowledged");
                Vec::new()
            }
            "error" => {
                warn!("[Kalshi WS] Error message: {}", text);
                Vec::new()
            }
            other => {
                debug!("[Kalshi WS] Ignoring message type '{}'", other);
                Vec::new()
            }
        };

        Ok(events)
    }
}

impl std::fmt::Debug for KalshiSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KalshiSession")
            .field("environment", &self.environment)
            .field("authenticated", &self.signer.is_some())
            .field("channels", &self.channels)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn session() -> KalshiSession {
        KalshiSession::new(KalshiEnvironment::Production, None, Vec::new())
    }

    fn prices(events: Vec<FeedEvent>) -> Vec<PriceUpdate> {
        events
            .into_iter()
            .filter_map(|e| match e {
                FeedEvent::Price(p) => Some(p),
                FeedEvent::Heartbeat => None,
            })
            .collect()
    }

    #[tokio::test]
    async fn test_subscribe_frame() {
        let frames = session().subscribe_frames().await;
        assert_eq!(frames.len(), 1);
        let value: serde_json::Value = serde_json::from_str(&frames[0]).unwrap();
        assert_eq!(value["cmd"], "subscribe");
        assert_eq!(value["params"]["channels"][0], "ticker");
    }

    #[test]
    fn test_unsigned_connect_request() {
        let request = session().connect_request();
        assert_eq!(request.url, "wss://api.elections.kalshi.com/trade-api/ws/v2");
        assert!(request.headers.is_empty());
    }

    #[test]
    fn test_parse_ticker_mid_price() {
        let text = r#"{"type":"ticker","sid":1,"msg":{"market_ticker":"KXFED-25","yes_bid":44,"yes_ask":46,"volume":1500}}"#;
        let updates = prices(session().parse(text).unwrap());
        assert_eq!(updates.len(), 1);
        assert_eq!(updates[0].key, "KXFED-25");
        assert_eq!(updates[0].price, dec!(0.45));
        assert_eq!(updates[0].volume, dec!(1500));
        assert_eq!(updates[0].platform, Platform::Kalshi);
    }

    #[test]
    fn test_parse_batched_msg_array() {
        let text = r#"{"type":"ticker","msg":[{"market_ticker":"A","price":30},{"market_ticker":"B","yes_bid":60}]}"#;
        let updates = prices(session().parse(text).unwrap());
        assert_eq!(updates.len(), 2);
        assert_eq!(updates[0].price, dec!(0.30));
        assert_eq!(updates[1].price, dec!(0.60));
    }

    #[test]
    fn test_parse_trade() {
        let text = r#"{"type":"trade","msg":{"market_ticker":"KXBTC","yes_price":36,"no_price":64,"count":12,"taker_side":"no"}}"#;
        let updates = prices(session().parse(text).unwrap());
        assert_eq!(updates[0].price, dec!(0.36));
        assert_eq!(updates[0].volume, dec!(12));
    }

    #[test]
    fn test_parse_heartbeat_and_unknown() {
        let events = session().parse(r#"{"type":"heartbeat"}"#).unwrap();
        assert_eq!(events, vec![FeedEvent::Heartbeat]);

        let events = session().parse(r#"{"type":"orderbook_delta","msg":{}}"#).unwrap();
        assert!(events.is_empty());
    }

    #[test]
    fn test_parse_orderbook_snapshot_uses_best_yes_bid() {
        let text = r#"{"type":"orderbook_snapshot","sid":2,"seq":1,"msg":{"market_ticker":"KXFED-25","yes":[[38,300],[42,120]],"no":[[55,40]]}}"#;
        let updates = prices(session().parse(text).unwrap());
        assert_eq!(updates.len(), 1);
        assert_eq!(updates[0].key, "KXFED-25");
        assert_eq!(updates[0].price, dec!(0.42));
        assert_eq!(updates[0].volume, Decimal::ZERO);
    }

    #[test]
    fn test_parse_top_level_orderbook() {
        let text = r#"{"type":"orderbook","ticker":"KXBTC","orderbook":{"yes":[[61,10]],"no":[]}}"#;
        let updates = prices(session().parse(text).unwrap());
        assert_eq!(updates[0].key, "KXBTC");
        assert_eq!(updates[0].price, dec!(0.61));

        let empty = r#"{"type":"orderbook_snapshot","msg":{"market_ticker":"KXBTC","no":[[40,1]]}}"#;
        assert!(session().parse(empty).unwrap().is_empty());
    }

    #[test]
    fn test_ticker_without_price_is_skipped() {
        let text = r#"{"type":"ticker","msg":{"market_ticker":"KXFED-25","volume":10}}"#;
        assert!(session().parse(text).unwrap().is_empty());
    }

    #[test]
    fn test_invalid_json_is_error() {
        assert!(session().parse("not json").is_err());
    }
}
