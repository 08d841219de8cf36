//! Reconciled market store
//!
//! Single source of truth for unified market state. All mutations are
//! serialized by one async mutex. Reads take only the short data lock and
//! never wait for the mutation lock, so a reader may see a partially rebuilt
//! market set while `rebuild_from_feeds` is running.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use parking_lot::RwLock;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, info};
use unified_core::{
    HistoryPoint, KalshiListing, Platform, PolymarketListing, PricePoint, UnifiedMarket,
};

use crate::clock::{Clock, SystemClock};
use crate::matcher::{self, MarketMatcher};
use crate::subscriber::{DeliveryReport, Registry, SubscriberError, SubscriberId};

/// Maximum price points kept per market
pub const HISTORY_CAPACITY: usize = 100;

/// Updates closer than this to the newest point overwrite it
const COALESCE_WINDOW_MS: i64 = 1_000;

/// Fetched points closer than this to an existing point are the same observation
const HISTORY_MERGE_WINDOW_MS: i64 = 60_000;

/// What changed in the store
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ChangeType {
    #[serde(rename = "new_market")]
    NewMarket,
    #[serde(rename = "venueA_update")]
    KalshiUpdate,
    #[serde(rename = "venueB_update")]
    PolymarketUpdate,
    #[serde(rename = "rebuild_complete")]
    RebuildComplete,
}

impl ChangeType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChangeType::NewMarket => "new_market",
            ChangeType::KalshiUpdate => "venueA_update",
            ChangeType::PolymarketUpdate => "venueB_update",
            ChangeType::RebuildComplete => "rebuild_complete",
        }
    }
}

impl std::fmt::Display for ChangeType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Notification sent to store subscribers
///
/// `market` is `None` only for `RebuildComplete`, which means "re-read
/// everything".
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StoreEvent {
    pub market: Option<UnifiedMarket>,
    pub change: ChangeType,
}

#[derive(Default)]
struct StoreData {
    markets: IndexMap<String, UnifiedMarket>,
    history: HashMap<String, VecDeque<PricePoint>>,
    /// Kalshi ticker -> market id
    ticker_index: HashMap<String, String>,
    /// Polymarket token -> market id
    token_index: HashMap<String, String>,
}

impl StoreData {
    fn index(&mut self, market: &UnifiedMarket) {
        if let Some(ticker) = &market.kalshi_ticker {
            self.ticker_index.insert(ticker.clone(), market.id.clone());
        }
        if let Some(token) = &market.poly_token_id {
            self.token_index.insert(token.clone(), market.id.clone());
        }
    }

    fn record_observation(
        &mut self,
        id: &str,
        platform: Platform,
        price: Decimal,
        volume: Decimal,
        at: DateTime<Utc>,
    ) {
        let history = self.history.entry(id.to_string()).or_default();

        let coalesce = history
            .back()
            .is_some_and(|newest| (at - newest.timestamp).num_milliseconds() < COALESCE_WINDOW_MS);

        if !coalesce {
            history.push_back(PricePoint::empty(at));
        }

        if let Some(point) = history.back_mut() {
            match platform {
                Platform::Kalshi => {
                    point.kalshi_price = Some(price);
                    point.kalshi_volume = volume;
                }
                Platform::Polymarket => {
                    point.poly_price = Some(price);
                    point.poly_volume = volume;
                }
            }
        }

        while history.len() > HISTORY_CAPACITY {
            history.pop_front();
        }
    }
}

/// The reconciled market store
pub struct ReconciledStore {
    data: RwLock<StoreData>,
    mutation: Mutex<()>,
    subscribers: Registry<StoreEvent>,
    matcher: MarketMatcher,
    clock: Arc<dyn Clock>,
}

impl Default for ReconciledStore {
    fn default() -> Self {
        Self::new()
    }
}

impl ReconciledStore {
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            data: RwLock::new(StoreData::default()),
            mutation: Mutex::new(()),
            subscribers: Registry::new("[Store]"),
            matcher: MarketMatcher::default(),
            clock,
        }
    }

    pub fn with_matcher(mut self, matcher: MarketMatcher) -> Self {
        self.matcher = matcher;
        self
    }

    // ========================================================================
    // Subscribers
    // ========================================================================

    pub fn subscribe<F>(&self, callback: F) -> SubscriberId
    where
        F: Fn(&StoreEvent) -> Result<(), SubscriberError> + Send + Sync + 'static,
    {
        self.subscribers.subscribe(callback)
    }

    pub fn unsubscribe(&self, id: SubscriberId) -> bool {
        self.subscribers.unsubscribe(id)
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }

    fn notify(&self, market: Option<UnifiedMarket>, change: ChangeType) -> DeliveryReport {
        self.subscribers.notify(&StoreEvent { market, change })
    }

    // ========================================================================
    // Mutations
    // ========================================================================

    /// Apply a Kalshi price for `ticker`
    ///
    /// The market is found through the ticker index, else through the id
    /// derived from the ticker, else created with only Kalshi fields. Returns
    /// `None` for an empty ticker.
    pub async fn update_from_kalshi(
        &self,
        ticker: &str,
        price: Decimal,
        volume: Decimal,
    ) -> Option<UnifiedMarket> {
        if ticker.is_empty() {
            return None;
        }

        let _guard = self.mutation.lock().await;
        let now = self.clock.now();

        let (market, change) = {
            let mut data = self.data.write();

            let existing = data
                .ticker_index
                .get(ticker)
                .filter(|id| data.markets.contains_key(*id))
                .cloned()
                .or_else(|| {
                    let id = matcher::kalshi_market_id(ticker);
                    data.markets.contains_key(&id).then_some(id)
                });

            let (id, change) = match existing {
                Some(id) => (id, ChangeType::KalshiUpdate),
                None => {
                    let id = matcher::kalshi_market_id(ticker);
                    let market = UnifiedMarket::new(id.clone(), ticker, matcher::normalize(ticker), now);
                    data.markets.insert(id.clone(), market);
                    (id, ChangeType::NewMarket)
                }
            };

            let market = data.markets.get_mut(&id).map(|m| {
                m.apply_kalshi(ticker, price, volume, now);
                m.clone()
            })?;
            data.ticker_index.insert(ticker.to_string(), id.clone());
            data.record_observation(&id, Platform::Kalshi, price, volume, now);
            (market, change)
        };

        debug!("[Store] {} {} -> {} @ {}", change, ticker, market.id, price);
        self.notify(Some(market.clone()), change);
        Some(market)
    }

    /// Apply a Polymarket price for `token`, keyed by `label`
    ///
    /// Returns `None` when both the label and the token are empty.
    pub async fn update_from_polymarket(
        &self,
        token: &str,
        label: &str,
        price: Decimal,
        volume: Decimal,
    ) -> Option<UnifiedMarket> {
        let id = matcher::polymarket_market_id(label, token);
        if id.is_empty() {
            return None;
        }

        let _guard = self.mutation.lock().await;
        let now = self.clock.now();
        let token_id = (!token.is_empty()).then_some(token);
        let question = (!label.is_empty()).then_some(label);

        let (market, change) = {
            let mut data = self.data.write();

            let change = if data.markets.contains_key(&id) {
                ChangeType::PolymarketUpdate
            } else {
                let market = UnifiedMarket::new(id.clone(), label, matcher::normalize(label), now);
                data.markets.insert(id.clone(), market);
                ChangeType::NewMarket
            };

            let market = data.markets.get_mut(&id).map(|m| {
                m.apply_polymarket(token_id, question, price, volume, now);
                m.clone()
            })?;
            if let Some(token) = token_id {
                data.token_index.insert(token.to_string(), id.clone());
            }
            data.record_observation(&id, Platform::Polymarket, price, volume, now);
            (market, change)
        };

        debug!("[Store] {} {} -> {} @ {}", change, token, market.id, price);
        self.notify(Some(market.clone()), change);
        Some(market)
    }

    /// Reconcile a fresh snapshot of both venues into the store
    ///
    /// Existing markets keep their id and any venue side the snapshot does
    /// not cover. Emits exactly one `RebuildComplete` event.
    pub async fn rebuild_from_feeds(
        &self,
        kalshi: &[KalshiListing],
        polymarket: &[PolymarketListing],
    ) -> usize {
        let _guard = self.mutation.lock().await;
        let now = self.clock.now();
        let fresh = self.matcher.match_markets(kalshi, polymarket, now);
        let count = fresh.len();

        // The data lock is taken per market so readers can interleave
        for (id, market) in fresh {
            let mut data = self.data.write();
            let merged = match data.markets.get_mut(&id) {
                Some(existing) => {
                    if market.has_kalshi_listing() {
                        existing.copy_kalshi_from(&market, now);
                    }
                    if market.has_polymarket_listing() {
                        existing.copy_polymarket_from(&market, now);
                    }
                    existing.last_update = now;
                    existing.clone()
                }
                None => {
                    data.markets.insert(id, market.clone());
                    market
                }
            };
            data.index(&merged);
        }

        info!(
            "[Store] Rebuilt from {} Kalshi and {} Polymarket listings ({} reconciled)",
            kalshi.len(),
            polymarket.len(),
            count
        );
        self.notify(None, ChangeType::RebuildComplete);
        count
    }

    /// Merge externally fetched prices into a market's history
    ///
    /// A fetched point within 60 seconds of an existing point updates that
    /// point; others are inserted. History is then sorted and trimmed.
    /// Returns false if the market is unknown.
    pub async fn add_history_points(
        &self,
        id: &str,
        points: &[HistoryPoint],
        platform: Platform,
    ) -> bool {
        let _guard = self.mutation.lock().await;
        let mut data = self.data.write();
        if !data.markets.contains_key(id) {
            return false;
        }

        let history = data.history.entry(id.to_string()).or_default();
        for point in points {
            let existing = history.iter().position(|p| {
                (p.timestamp - point.timestamp).num_milliseconds().abs() < HISTORY_MERGE_WINDOW_MS
            });
            let index = match existing {
                Some(i) => i,
                None => {
                    history.push_back(PricePoint::empty(point.timestamp));
                    history.len() - 1
                }
            };
            let target = &mut history[index];
            match platform {
                Platform::Kalshi => target.kalshi_price = Some(point.price),
                Platform::Polymarket => target.poly_price = Some(point.price),
            }
        }

        history.make_contiguous().sort_by_key(|p| p.timestamp);
        while history.len() > HISTORY_CAPACITY {
            history.pop_front();
        }

        debug!("[Store] Merged {} {} history points into {}", points.len(), platform, id);
        true
    }

    // ========================================================================
    // Reads
    // ========================================================================

    pub fn get_market(&self, id: &str) -> Option<UnifiedMarket> {
        self.data.read().markets.get(id).cloned()
    }

    /// All markets in insertion order
    pub fn get_all_markets(&self) -> Vec<UnifiedMarket> {
        self.data.read().markets.values().cloned().collect()
    }

    /// Markets quoted on both venues whose spread is at least `min_spread_percent`
    pub fn get_markets_with_spread(&self, min_spread_percent: Decimal) -> Vec<UnifiedMarket> {
        self.data
            .read()
            .markets
            .values()
            .filter(|m| m.has_both_prices() && m.delta_percent().abs() >= min_spread_percent)
            .cloned()
            .collect()
    }

    pub fn get_price_history(&self, id: &str) -> Vec<PricePoint> {
        self.data
            .read()
            .history
            .get(id)
            .map(|h| h.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn market_for_ticker(&self, ticker: &str) -> Option<UnifiedMarket> {
        let data = self.data.read();
        data.ticker_index
            .get(ticker)
            .and_then(|id| data.markets.get(id))
            .cloned()
    }

    pub fn market_for_token(&self, token: &str) -> Option<UnifiedMarket> {
        let data = self.data.read();
        data.token_index
            .get(token)
            .and_then(|id| data.markets.get(id))
            .cloned()
    }

    /// Markets whose normalized name contains the normalized query or whose
    /// event name fuzzily matches it
    ///
    /// An empty query matches every market.
    pub fn search_markets(&self, query: &str) -> Vec<UnifiedMarket> {
        let needle = matcher::normalize(query);

        self.get_all_markets()
            .into_iter()
            .filter(|m| {
                m.normalized_name.contains(&needle)
                    || self
                        .matcher
                        .fuzzy_match_single(query, std::slice::from_ref(m), |m| m.event_name.as_str())
                        .is_some()
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.data.read().markets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.read().markets.is_empty()
    }
}

impl std::fmt::Debug for ReconciledStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReconciledStore")
            .field("markets", &self.len())
            .field("subscribers", &self.subscribers.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use chrono::Duration;
    use parking_lot::Mutex as SyncMutex;
    use rust_decimal_macros::dec;

    fn store_with_clock() -> (ReconciledStore, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        (ReconciledStore::with_clock(clock.clone()), clock)
    }

    fn record_events(store: &ReconciledStore) -> Arc<SyncMutex<Vec<StoreEvent>>> {
        let events = Arc::new(SyncMutex::new(Vec::new()));
        let sink = events.clone();
        store.subscribe(move |event| {
            sink.lock().push(event.clone());
            Ok(())
        });
        events
    }

    fn kalshi_listing(ticker: &str, title: &str, bid: Decimal) -> KalshiListing {
        KalshiListing {
            ticker: ticker.to_string(),
            title: Some(title.to_string()),
            yes_bid: Some(bid),
            yes_ask: None,
            last_price: None,
            volume: dec!(10),
        }
    }

    fn poly_listing(question: &str, price: Decimal, token: &str) -> PolymarketListing {
        PolymarketListing {
            id: token.to_string(),
            question: Some(question.to_string()),
            outcome_prices: vec![price],
            volume: dec!(20),
            clob_token_ids: vec![token.to_string()],
        }
    }

    #[tokio::test]
    async fn test_cross_venue_merge() {
        let (store, _clock) = store_with_clock();
        let events = record_events(&store);

        store.update_from_kalshi("TICK-1", dec!(0.45), dec!(1000)).await;
        store
            .update_from_polymarket("tok-1", "Will Tick 1 happen?", dec!(0.50), dec!(2000))
            .await;

        assert_eq!(store.len(), 1);
        let market = store.get_market("tick1").unwrap();
        assert_eq!(market.kalshi_price, dec!(0.45));
        assert_eq!(market.poly_price, dec!(0.50));
        assert_eq!(market.total_volume(), dec!(3000));
        assert_eq!(market.delta_percent().round_dp(2), dec!(11.11));
        assert_eq!(market.kalshi_ticker.as_deref(), Some("TICK-1"));
        assert_eq!(market.poly_token_id.as_deref(), Some("tok-1"));

        let changes: Vec<ChangeType> = events.lock().iter().map(|e| e.change).collect();
        assert_eq!(changes, vec![ChangeType::NewMarket, ChangeType::PolymarketUpdate]);

        assert_eq!(store.market_for_ticker("TICK-1").unwrap().id, "tick1");
        assert_eq!(store.market_for_token("tok-1").unwrap().id, "tick1");
    }

    #[tokio::test]
    async fn test_kalshi_update_found_by_ticker_index() {
        let (store, _clock) = store_with_clock();
        store
            .update_from_polymarket("tok", "Fed cuts rates in March", dec!(0.3), dec!(1))
            .await;
        store
            .rebuild_from_feeds(
                &[kalshi_listing("KXFED-MAR", "Fed cuts rates in March", dec!(0.25))],
                &[],
            )
            .await;

        let events = record_events(&store);
        let market = store.update_from_kalshi("KXFED-MAR", dec!(0.28), dec!(5)).await.unwrap();
        assert_eq!(market.id, "fedcutsratesmarch");
        assert_eq!(market.kalshi_price, dec!(0.28));
        assert_eq!(market.poly_price, dec!(0.3));
        assert_eq!(store.len(), 1);
        assert_eq!(events.lock()[0].change, ChangeType::KalshiUpdate);
    }

    #[tokio::test]
    async fn test_venue_fields_never_cleared_by_other_venue() {
        let (store, _clock) = store_with_clock();
        store.update_from_kalshi("TICK-1", dec!(0.45), dec!(1000)).await;
        store.update_from_polymarket("tok", "Tick 1", dec!(0.5), dec!(1)).await;
        store.update_from_polymarket("tok", "Tick 1", dec!(0.55), dec!(2)).await;

        let market = store.get_market("tick1").unwrap();
        assert_eq!(market.kalshi_price, dec!(0.45));
        assert_eq!(market.kalshi_volume, dec!(1000));
        assert_eq!(market.poly_price, dec!(0.55));
    }

    #[tokio::test]
    async fn test_spread_filter_boundaries() {
        let (store, _clock) = store_with_clock();
        // 2.9%
        store.update_from_kalshi("ALPHA", dec!(0.50), dec!(1)).await;
        store.update_from_polymarket("a", "alpha", dec!(0.5145), dec!(1)).await;
        // exactly 3.0%
        store.update_from_kalshi("BRAVO", dec!(0.50), dec!(1)).await;
        store.update_from_polymarket("b", "bravo", dec!(0.515), dec!(1)).await;
        // -3.0% counts by magnitude
        store.update_from_kalshi("CHARLIE", dec!(0.50), dec!(1)).await;
        store.update_from_polymarket("c", "charlie", dec!(0.485), dec!(1)).await;
        // large spread but only one venue priced
        store.update_from_kalshi("DELTA", dec!(0.10), dec!(1)).await;
        store.update_from_polymarket("d", "delta", Decimal::ZERO, dec!(1)).await;

        assert_eq!(store.get_market("alpha").unwrap().delta_percent(), dec!(2.9));
        let ids: Vec<String> = store
            .get_markets_with_spread(dec!(3.0))
            .into_iter()
            .map(|m| m.id)
            .collect();
        assert_eq!(ids, vec!["bravo".to_string(), "charlie".to_string()]);
    }

    #[tokio::test]
    async fn test_spread_read_survives_tiny_price() {
        let (store, _clock) = store_with_clock();
        store.update_from_kalshi("ECHO", Decimal::new(1, 28), dec!(1)).await;
        store.update_from_polymarket("e", "echo", dec!(0.9), dec!(1)).await;

        assert_eq!(store.get_market("echo").unwrap().delta_percent(), Decimal::ZERO);
        assert!(store.get_markets_with_spread(dec!(3.0)).is_empty());
    }

    #[tokio::test]
    async fn test_history_coalesces_within_one_second() {
        let (store, clock) = store_with_clock();
        store.update_from_kalshi("TICK-1", dec!(0.40), dec!(1)).await;
        clock.advance(Duration::milliseconds(500));
        store.update_from_kalshi("TICK-1", dec!(0.41), dec!(2)).await;

        let history = store.get_price_history("tick1");
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].kalshi_price, Some(dec!(0.41)));
        assert_eq!(history[0].kalshi_volume, dec!(2));

        clock.advance(Duration::milliseconds(1500));
        store.update_from_kalshi("TICK-1", dec!(0.42), dec!(3)).await;
        let history = store.get_price_history("tick1");
        assert_eq!(history.len(), 2);
        assert_eq!(history[1].kalshi_price, Some(dec!(0.42)));
    }

    #[tokio::test]
    async fn test_coalesced_point_keeps_other_venue() {
        let (store, clock) = store_with_clock();
        store.update_from_kalshi("TICK-1", dec!(0.40), dec!(1)).await;
        clock.advance(Duration::milliseconds(200));
        store.update_from_polymarket("tok", "Tick 1", dec!(0.45), dec!(1)).await;

        let history = store.get_price_history("tick1");
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].kalshi_price, Some(dec!(0.40)));
        assert_eq!(history[0].poly_price, Some(dec!(0.45)));
    }

    #[tokio::test]
    async fn test_history_capped_at_capacity() {
        let (store, clock) = store_with_clock();
        for i in 0..250 {
            store.update_from_kalshi("TICK-1", Decimal::from(i), dec!(1)).await;
            clock.advance(Duration::seconds(2));
            assert!(store.get_price_history("tick1").len() <= HISTORY_CAPACITY);
        }

        let history = store.get_price_history("tick1");
        assert_eq!(history.len(), HISTORY_CAPACITY);
        assert_eq!(history[0].kalshi_price, Some(Decimal::from(150)));
        assert_eq!(history[99].kalshi_price, Some(Decimal::from(249)));
    }

    #[tokio::test]
    async fn test_rebuild_is_idempotent_and_notifies_once() {
        let (store, clock) = store_with_clock();
        let kalshi = vec![
            kalshi_listing("KXFED", "Fed cuts rates in March", dec!(0.40)),
            kalshi_listing("KXBTC", "Bitcoin above 100k", dec!(0.20)),
        ];
        let poly = vec![
            poly_listing("Will the Fed cut rates in March?", dec!(0.45), "t1"),
            poly_listing("Fed cuts rates in March", dec!(0.44), "t2"),
        ];

        let events = record_events(&store);
        assert_eq!(store.rebuild_from_feeds(&kalshi, &poly).await, 3);
        let first = store.get_all_markets();

        clock.advance(Duration::seconds(5));
        store.rebuild_from_feeds(&kalshi, &poly).await;
        let second = store.get_all_markets();

        assert_eq!(first.len(), second.len());
        for (a, b) in first.iter().zip(second.iter()) {
            assert_eq!(a.id, b.id);
            assert_eq!(a.event_name, b.event_name);
            assert_eq!(a.kalshi_ticker, b.kalshi_ticker);
            assert_eq!(a.kalshi_price, b.kalshi_price);
            assert_eq!(a.poly_token_id, b.poly_token_id);
            assert_eq!(a.poly_price, b.poly_price);
            assert_eq!(a.total_volume(), b.total_volume());
        }

        let events = events.lock();
        assert_eq!(events.len(), 2);
        assert!(events
            .iter()
            .all(|e| e.change == ChangeType::RebuildComplete && e.market.is_none()));
    }

    #[tokio::test]
    async fn test_rebuild_preserves_uncovered_venue() {
        let (store, _clock) = store_with_clock();
        store.update_from_kalshi("KXFED", dec!(0.40), dec!(1)).await;
        store
            .update_from_polymarket("t1", "kxfed", dec!(0.50), dec!(7))
            .await;

        // Snapshot only covers Kalshi for this id
        store
            .rebuild_from_feeds(&[kalshi_listing("KXFED", "KXFED", dec!(0.42))], &[])
            .await;

        let market = store.get_market("kxfed").unwrap();
        assert_eq!(market.kalshi_price, dec!(0.42));
        assert_eq!(market.poly_price, dec!(0.50));
        assert_eq!(market.poly_token_id.as_deref(), Some("t1"));
    }

    #[tokio::test]
    async fn test_add_history_points_merges_and_sorts() {
        let (store, clock) = store_with_clock();
        let start = clock.now();
        store.update_from_polymarket("tok", "Tick 1", dec!(0.50), dec!(1)).await;

        let points = vec![
            HistoryPoint::new(start - Duration::minutes(10), dec!(0.30)),
            HistoryPoint::new(start + Duration::seconds(30), dec!(0.51)),
            HistoryPoint::new(start - Duration::minutes(5), dec!(0.40)),
        ];
        assert!(store.add_history_points("tick1", &points, Platform::Polymarket).await);

        let history = store.get_price_history("tick1");
        let prices: Vec<Option<Decimal>> = history.iter().map(|p| p.poly_price).collect();
        assert_eq!(prices, vec![Some(dec!(0.30)), Some(dec!(0.40)), Some(dec!(0.51))]);
        assert!(history.windows(2).all(|w| w[0].timestamp <= w[1].timestamp));

        assert!(!store.add_history_points("missing", &points, Platform::Kalshi).await);
    }

    #[tokio::test]
    async fn test_failing_subscriber_does_not_block_updates() {
        let (store, _clock) = store_with_clock();
        store.subscribe(|_| Err(SubscriberError::failed("downstream gone")));
        store.subscribe(|_| panic!("bad subscriber"));
        let events = record_events(&store);

        assert!(store.update_from_kalshi("TICK-1", dec!(0.4), dec!(1)).await.is_some());
        assert_eq!(events.lock().len(), 1);
        assert_eq!(store.subscriber_count(), 3);
    }

    #[tokio::test]
    async fn test_empty_keys_are_ignored() {
        let (store, _clock) = store_with_clock();
        assert!(store.update_from_kalshi("", dec!(0.4), dec!(1)).await.is_none());
        assert!(store.update_from_polymarket("", "", dec!(0.4), dec!(1)).await.is_none());
        assert!(store.is_empty());

        let market = store
            .update_from_polymarket("0xABC", "Will it happen?", dec!(0.4), dec!(1))
            .await
            .unwrap();
        assert_eq!(market.id, "poly_0xabc");
    }

    #[tokio::test]
    async fn test_search_markets() {
        let (store, _clock) = store_with_clock();
        store
            .update_from_polymarket("t1", "Will the Fed cut rates in March?", dec!(0.4), dec!(1))
            .await;
        store
            .update_from_polymarket("t2", "Bitcoin above 100k by June", dec!(0.2), dec!(1))
            .await;

        let hits = store.search_markets("bitcoin");
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].poly_token_id.as_deref(), Some("t2"));

        let fuzzy = store.search_markets("march rates cut fed");
        assert_eq!(fuzzy.len(), 1);
        assert_eq!(fuzzy[0].id, "fedcutratesmarch");

        assert!(store.search_markets("ethereum").is_empty());
        assert_eq!(store.search_markets("").len(), 2);
    }

    #[tokio::test]
    async fn test_search_returns_every_fuzzy_match() {
        let (store, _clock) = store_with_clock();
        for (token, label) in [
            ("t1", "Bitcoin above 100k by June"),
            ("t2", "June 100k above bitcoin price target"),
            ("t3", "100k bitcoin above June"),
            ("t4", "Will the Fed cut rates in March?"),
        ] {
            store.update_from_polymarket(token, label, dec!(0.5), dec!(1)).await;
        }

        let mut tokens: Vec<String> = store
            .search_markets("june bitcoin above 100k")
            .into_iter()
            .filter_map(|m| m.poly_token_id)
            .collect();
        tokens.sort();
        assert_eq!(tokens, vec!["t1", "t2", "t3"]);
    }

    #[tokio::test]
    async fn test_search_respects_matcher_threshold() {
        let store = ReconciledStore::new().with_matcher(MarketMatcher::new(101.0));
        store
            .update_from_polymarket("t1", "Bitcoin above 100k by June", dec!(0.5), dec!(1))
            .await;

        // Fuzzy matching is disabled, substring still hits
        assert!(store.search_markets("june bitcoin above 100k").is_empty());
        assert_eq!(store.search_markets("bitcoin above").len(), 1);
    }
}
