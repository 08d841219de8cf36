//! Unified Prediction-Market Feed Daemon
//!
//! Keeps a reconciled view of Kalshi and Polymarket markets up to date from
//! REST snapshots and both venues' live streams, and logs cross-venue spreads.

use std::sync::Arc;
use std::time::Duration;

use rust_decimal::Decimal;
use tracing::{debug, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};
use unified_core::UnifiedMarket;
use unified_kalshi::{KalshiClient, KalshiSession, KalshiSigner};
use unified_polymarket::{PolymarketClient, PolymarketSession};
use unified_services::{
    ChangeType, FeedConfig, LiveEngine, ReconciledStore, SnapshotSync, WebSocketTransport,
};

/// Markets backfilled with REST history after each refresh
const BACKFILL_TOP_SPREADS: usize = 5;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables from .env.local file
    if let Err(e) = dotenvy::from_filename(".env.local") {
        // Not an error if the file doesn't exist
        if !matches!(e, dotenvy::Error::Io(_)) {
            eprintln!("Warning: Failed to load .env.local: {}", e);
        }
    }

    // Initialize logging
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,unified_daemon=debug")),
        )
        .init();

    info!("Starting unified prediction-market feed");

    let config = FeedConfig::from_env()?;
    debug!("Loaded configuration: {:?}", config);

    let signer = config.kalshi.as_ref().and_then(|credentials| {
        match KalshiSigner::from_pem(credentials.api_key.clone(), &credentials.private_key) {
            Ok(signer) => {
                info!("Kalshi request signing enabled");
                Some(Arc::new(signer))
            }
            Err(e) => {
                warn!("Invalid Kalshi private key, continuing unauthenticated: {}", e);
                None
            }
        }
    });
    if config.kalshi.is_none() {
        info!("No Kalshi credentials found - streaming unauthenticated");
    }

    let kalshi_client = KalshiClient::new(config.kalshi_environment, signer.clone())?;
    let polymarket_client = PolymarketClient::new(config.polymarket.clone())?;
    log_balances(&kalshi_client, &polymarket_client).await;

    let store = Arc::new(ReconciledStore::new());
    watch_spreads(&store, config.min_spread_percent);

    let sync = SnapshotSync::new(
        Some(kalshi_client),
        polymarket_client.clone(),
        config.snapshot_limit,
    );
    let initial = sync.refresh(&store).await;
    info!("Initial snapshot reconciled {} markets", initial);

    let kalshi_session = Arc::new(KalshiSession::new(
        config.kalshi_environment,
        signer,
        config.kalshi_channels.clone(),
    ));
    let polymarket_session = Arc::new(PolymarketSession::new(
        Some(polymarket_client),
        config.poly_token_ids.clone(),
        config.poly_max_tokens,
    ));

    let engine = LiveEngine::new(
        store.clone(),
        kalshi_session,
        polymarket_session,
        Arc::new(WebSocketTransport::new()),
        config.engine_settings(),
    );
    engine.add_status_callback(|status| {
        debug!(
            "{} status: {:?} ({} messages, {:.0}ms handshake)",
            status.platform, status.state, status.messages_received, status.latency_ms
        );
        Ok(())
    });
    engine.start();

    let refresh_task = tokio::spawn(refresh_loop(
        sync,
        store.clone(),
        config.snapshot_refresh,
        config.min_spread_percent,
    ));

    tokio::signal::ctrl_c().await?;
    info!("Shutdown requested");

    refresh_task.abort();
    engine.stop().await;

    for status in engine.status_summary() {
        info!(
            "{}: {:?}, {} messages received, last heartbeat {:?}",
            status.platform, status.state, status.messages_received, status.last_heartbeat
        );
    }
    info!("Tracked {} markets at shutdown", store.len());

    Ok(())
}

/// Log account balances for the venues that have credentials
async fn log_balances(kalshi: &KalshiClient, polymarket: &PolymarketClient) {
    if kalshi.is_authenticated() {
        match kalshi.get_balance().await {
            Ok(balance) => info!("Kalshi balance: ${}", balance),
            Err(e) => warn!("Failed to fetch Kalshi balance: {}", e),
        }
    }
    if polymarket.has_credentials() {
        match polymarket.get_balance().await {
            Ok(balance) => info!("Polymarket balance: ${}", balance),
            Err(e) => warn!("Failed to fetch Polymarket balance: {}", e),
        }
    }
}

/// Log every live update that opens a spread of at least `min_spread_percent`
fn watch_spreads(store: &ReconciledStore, min_spread_percent: Decimal) {
    store.subscribe(move |event| {
        match (&event.market, event.change) {
            (Some(market), ChangeType::KalshiUpdate | ChangeType::PolymarketUpdate) => {
                if market.has_both_prices() && market.delta_percent().abs() >= min_spread_percent {
                    info!("Spread {}", describe(market));
                }
            }
            (Some(market), ChangeType::NewMarket) => debug!("New market {}", market.id),
            (_, ChangeType::RebuildComplete) => debug!("Store rebuilt"),
            _ => {}
        }
        Ok(())
    });
}

fn describe(market: &UnifiedMarket) -> String {
    format!(
        "{}: Kalshi {} vs Polymarket {} ({:.2}%)",
        market.event_name,
        market.kalshi_price,
        market.poly_price,
        market.delta_percent()
    )
}

/// Periodically rebuild from REST snapshots and backfill the widest spreads
async fn refresh_loop(
    sync: SnapshotSync,
    store: Arc<ReconciledStore>,
    period: Duration,
    min_spread_percent: Decimal,
) {
    let mut ticker = tokio::time::interval(period);
    ticker.tick().await;

    loop {
        ticker.tick().await;

        let count = sync.refresh(&store).await;
        let mut spreads = store.get_markets_with_spread(min_spread_percent);
        spreads.sort_by(|a, b| b.delta_percent().abs().cmp(&a.delta_percent().abs()));
        info!(
            "Snapshot reconciled {} markets, {} with spread >= {}%",
            count,
            spreads.len(),
            min_spread_percent
        );

        for market in spreads.iter().take(BACKFILL_TOP_SPREADS) {
            debug!("Top spread {}", describe(market));
            if let Err(e) = sync.backfill_history(&store, &market.id).await {
                warn!("History backfill failed for {}: {}", market.id, e);
            }
        }
    }
}
