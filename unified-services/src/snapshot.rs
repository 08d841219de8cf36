//! Bulk snapshot sync
//!
//! Pulls both venues' active listings over REST and reconciles them into the
//! store. Streaming keeps prices fresh between refreshes.

use tracing::{debug, info, instrument, warn};
use unified_core::{FeedError, FeedResult, Platform};
use unified_kalshi::KalshiClient;
use unified_polymarket::PolymarketClient;

use crate::store::ReconciledStore;

/// Interval passed to the Polymarket price history endpoint on backfill
const BACKFILL_INTERVAL: &str = "1d";

/// REST snapshot source for the store
#[derive(Debug, Clone)]
pub struct SnapshotSync {
    kalshi: Option<KalshiClient>,
    polymarket: PolymarketClient,
    limit: u32,
    tag_id: Option<String>,
}

impl SnapshotSync {
    pub fn new(kalshi: Option<KalshiClient>, polymarket: PolymarketClient, limit: u32) -> Self {
        Self {
            kalshi,
            polymarket,
            limit,
            tag_id: None,
        }
    }

    /// Restrict Polymarket listings to one tag
    pub fn with_tag(mut self, tag_id: impl Into<String>) -> Self {
        self.tag_id = Some(tag_id.into());
        self
    }

    /// Fetch both venues concurrently and rebuild the store
    ///
    /// A venue that fails contributes no listings. Returns the number of
    /// reconciled markets.
    #[instrument(skip(self, store))]
    pub async fn refresh(&self, store: &ReconciledStore) -> usize {
        let kalshi_fetch = async {
            match &self.kalshi {
                Some(client) => client.list_active_markets(self.limit).await,
                None => Ok(Vec::new()),
            }
        };
        let poly_fetch = self
            .polymarket
            .list_active_markets(self.limit, self.tag_id.as_deref());

        let (kalshi, polymarket) = tokio::join!(kalshi_fetch, poly_fetch);

        let kalshi = kalshi.unwrap_or_else(|e| {
            warn!("Kalshi snapshot failed, continuing without it: {}", e);
            Vec::new()
        });
        let polymarket = polymarket.unwrap_or_else(|e| {
            warn!("Polymarket snapshot failed, continuing without it: {}", e);
            Vec::new()
        });

        debug!(
            "Snapshot fetched {} Kalshi and {} Polymarket listings",
            kalshi.len(),
            polymarket.len()
        );
        store.rebuild_from_feeds(&kalshi, &polymarket).await
    }

    /// Merge Polymarket price history for one market into the store
    ///
    /// Returns the number of points fetched.
    #[instrument(skip(self, store))]
    pub async fn backfill_history(
        &self,
        store: &ReconciledStore,
        market_id: &str,
    ) -> FeedResult<usize> {
        let market = store
            .get_market(market_id)
            .ok_or_else(|| FeedError::not_found(format!("Market {}", market_id)))?;
        let token = market
            .poly_token_id
            .ok_or_else(|| FeedError::not_found(format!("Polymarket token for {}", market_id)))?;

        let points = self
            .polymarket
            .get_prices_history(&token, BACKFILL_INTERVAL)
            .await?;
        store
            .add_history_points(market_id, &points, Platform::Polymarket)
            .await;

        info!("Backfilled {} history points for {}", points.len(), market_id);
        Ok(points.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::ChangeType;
    use parking_lot::Mutex;
    use rust_decimal_macros::dec;
    use std::sync::Arc;

    // Nothing listens on the discard port, so every request fails fast
    const DEAD_URL: &str = "http://127.0.0.1:9";

    fn offline_sync() -> SnapshotSync {
        let kalshi = KalshiClient::with_base_url(DEAD_URL, None).unwrap();
        let polymarket = PolymarketClient::with_base_urls(DEAD_URL, DEAD_URL, None).unwrap();
        SnapshotSync::new(Some(kalshi), polymarket, 10)
    }

    #[tokio::test]
    async fn test_refresh_survives_failing_venues() {
        let store = ReconciledStore::new();
        store.update_from_kalshi("TICK-1", dec!(0.4), dec!(1)).await;

        let changes = Arc::new(Mutex::new(Vec::new()));
        let sink = changes.clone();
        store.subscribe(move |event| {
            sink.lock().push(event.change);
            Ok(())
        });

        assert_eq!(offline_sync().refresh(&store).await, 0);
        assert_eq!(*changes.lock(), vec![ChangeType::RebuildComplete]);
        // Existing state untouched
        assert_eq!(store.get_market("tick1").unwrap().kalshi_price, dec!(0.4));
    }

    #[tokio::test]
    async fn test_backfill_requires_known_market_with_token() {
        let store = ReconciledStore::new();
        let sync = offline_sync();

        let err = sync.backfill_history(&store, "missing").await.unwrap_err();
        assert!(matches!(err, FeedError::NotFound(_)));

        store.update_from_kalshi("TICK-1", dec!(0.4), dec!(1)).await;
        let err = sync.backfill_history(&store, "tick1").await.unwrap_err();
        assert!(matches!(err, FeedError::NotFound(_)));

        store.update_from_polymarket("tok", "Tick 1", dec!(0.5), dec!(1)).await;
        let err = sync.backfill_history(&store, "tick1").await.unwrap_err();
        assert!(matches!(err, FeedError::Network(_)));
    }
}
