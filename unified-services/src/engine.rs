//! Live ingestion engine
//!
//! Runs one reconnecting streaming loop per venue plus a status heartbeat.
//! Parsed price updates go to price callbacks and then into the store. Every
//! task is spawned on a `TaskTracker` and watches a `CancellationToken`, so
//! `stop()` returns only after all of them have exited.

use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tokio::time::{interval, sleep, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};
use unified_core::{
    ConnectionStatus, FeedEvent, FeedResult, FeedState, Platform, PriceUpdate, StreamConnection,
    StreamTransport, VenueSession,
};

use crate::store::ReconciledStore;
use crate::subscriber::{Registry, SubscriberError, SubscriberId};

/// Wait between a disconnect and the next connection attempt
pub const DEFAULT_RECONNECT_BACKOFF: Duration = Duration::from_secs(5);

/// Interval between status broadcasts
pub const DEFAULT_STATUS_HEARTBEAT: Duration = Duration::from_secs(10);

/// Interval between venue keepalive frames
pub const DEFAULT_KEEPALIVE_INTERVAL: Duration = Duration::from_secs(10);

/// Engine timing
#[derive(Debug, Clone)]
pub struct EngineSettings {
    pub reconnect_backoff: Duration,
    pub status_heartbeat: Duration,
    pub keepalive_interval: Duration,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            reconnect_backoff: DEFAULT_RECONNECT_BACKOFF,
            status_heartbeat: DEFAULT_STATUS_HEARTBEAT,
            keepalive_interval: DEFAULT_KEEPALIVE_INTERVAL,
        }
    }
}

/// An inbound frame exactly as received
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawMessage {
    pub platform: Platform,
    pub text: String,
}

// ============================================================================
// Connection status cells
// ============================================================================

/// Lock-free status of one venue connection, written only by its loop
struct StatusCell {
    platform: Platform,
    connected: AtomicBool,
    state: AtomicU8,
    /// Unix millis, 0 = never
    last_heartbeat_ms: AtomicI64,
    messages_received: AtomicU64,
    /// f64 bits
    latency_ms: AtomicU64,
}

impl StatusCell {
    fn new(platform: Platform) -> Self {
        Self {
            platform,
            connected: AtomicBool::new(false),
            state: AtomicU8::new(FeedState::Disconnected.as_u8()),
            last_heartbeat_ms: AtomicI64::new(0),
            messages_received: AtomicU64::new(0),
            latency_ms: AtomicU64::new(0f64.to_bits()),
        }
    }

    fn set_state(&self, state: FeedState) {
        self.state.store(state.as_u8(), Ordering::SeqCst);
        self.connected
            .store(state == FeedState::Connected, Ordering::SeqCst);
    }

    fn stamp_heartbeat(&self, at: DateTime<Utc>) {
        self.last_heartbeat_ms
            .store(at.timestamp_millis(), Ordering::Relaxed);
    }

    fn record_message(&self) {
        self.messages_received.fetch_add(1, Ordering::Relaxed);
    }

    fn set_latency(&self, latency: Duration) {
        let ms = latency.as_secs_f64() * 1000.0;
        self.latency_ms.store(ms.to_bits(), Ordering::Relaxed);
    }

    fn snapshot(&self) -> ConnectionStatus {
        let heartbeat = self.last_heartbeat_ms.load(Ordering::Relaxed);
        ConnectionStatus {
            platform: self.platform,
            connected: self.connected.load(Ordering::SeqCst),
            state: FeedState::from_u8(self.state.load(Ordering::SeqCst)),
            last_heartbeat: (heartbeat != 0)
                .then(|| DateTime::from_timestamp_millis(heartbeat))
                .flatten(),
            messages_received: self.messages_received.load(Ordering::Relaxed),
            latency_ms: f64::from_bits(self.latency_ms.load(Ordering::Relaxed)),
        }
    }
}

// ============================================================================
// Shared engine state
// ============================================================================

struct EngineShared {
    store: Arc<ReconciledStore>,
    settings: EngineSettings,
    running: AtomicBool,
    kalshi_status: StatusCell,
    polymarket_status: StatusCell,
    status_callbacks: Registry<ConnectionStatus>,
    price_callbacks: Registry<PriceUpdate>,
    raw_callbacks: Registry<RawMessage>,
}

impl EngineShared {
    fn status(&self, platform: Platform) -> &StatusCell {
        match platform {
            Platform::Kalshi => &self.kalshi_status,
            Platform::Polymarket => &self.polymarket_status,
        }
    }

    fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    fn broadcast_status(&self, platform: Platform) {
        self.status_callbacks.notify(&self.status(platform).snapshot());
    }

    /// Raw callbacks, then parse, then price callbacks and the store
    async fn handle_frame(&self, session: &dyn VenueSession, text: &str) {
        let platform = session.platform();

        if !self.raw_callbacks.is_empty() {
            self.raw_callbacks.notify(&RawMessage {
                platform,
                text: text.to_string(),
            });
        }

        let events = match session.parse(text) {
            Ok(events) => events,
            Err(e) => {
                debug!("{} Discarding message: {}", platform.ws_tag(), e);
                return;
            }
        };

        let status = self.status(platform);
        status.record_message();

        for event in events {
            match event {
                FeedEvent::Heartbeat => status.stamp_heartbeat(Utc::now()),
                FeedEvent::Price(update) => {
                    self.price_callbacks.notify(&update);
                    self.apply_to_store(update).await;
                }
            }
        }
    }

    async fn apply_to_store(&self, update: PriceUpdate) {
        match update.platform {
            Platform::Kalshi => {
                self.store
                    .update_from_kalshi(&update.key, update.price, update.volume)
                    .await;
            }
            Platform::Polymarket => {
                let label = update
                    .label
                    .unwrap_or_else(|| format!("Market {}", update.key));
                self.store
                    .update_from_polymarket(&update.key, &label, update.price, update.volume)
                    .await;
            }
        }
    }
}

/// How a connected session ended
enum SessionEnd {
    Cancelled,
    Disconnected,
}

enum ReadStep {
    Frame(Option<FeedResult<String>>),
    Keepalive,
    Cancelled,
}

// ============================================================================
// Engine
// ============================================================================

/// Live ingestion engine for both venues
pub struct LiveEngine {
    shared: Arc<EngineShared>,
    kalshi: Arc<dyn VenueSession>,
    polymarket: Arc<dyn VenueSession>,
    transport: Arc<dyn StreamTransport>,
    cancel: Mutex<CancellationToken>,
    tracker: TaskTracker,
}

impl LiveEngine {
    pub fn new(
        store: Arc<ReconciledStore>,
        kalshi: Arc<dyn VenueSession>,
        polymarket: Arc<dyn VenueSession>,
        transport: Arc<dyn StreamTransport>,
        settings: EngineSettings,
    ) -> Self {
        Self {
            shared: Arc::new(EngineShared {
                store,
                settings,
                running: AtomicBool::new(false),
                kalshi_status: StatusCell::new(Platform::Kalshi),
                polymarket_status: StatusCell::new(Platform::Polymarket),
                status_callbacks: Registry::new("[Engine]"),
                price_callbacks: Registry::new("[Engine]"),
                raw_callbacks: Registry::new("[Engine]"),
            }),
            kalshi,
            polymarket,
            transport,
            cancel: Mutex::new(CancellationToken::new()),
            tracker: TaskTracker::new(),
        }
    }

    pub fn store(&self) -> &Arc<ReconciledStore> {
        &self.shared.store
    }

    pub fn is_running(&self) -> bool {
        self.shared.is_running()
    }

    pub fn add_status_callback<F>(&self, callback: F) -> SubscriberId
    where
        F: Fn(&ConnectionStatus) -> Result<(), SubscriberError> + Send + Sync + 'static,
    {
        self.shared.status_callbacks.subscribe(callback)
    }

    pub fn add_price_callback<F>(&self, callback: F) -> SubscriberId
    where
        F: Fn(&PriceUpdate) -> Result<(), SubscriberError> + Send + Sync + 'static,
    {
        self.shared.price_callbacks.subscribe(callback)
    }

    pub fn add_raw_callback<F>(&self, callback: F) -> SubscriberId
    where
        F: Fn(&RawMessage) -> Result<(), SubscriberError> + Send + Sync + 'static,
    {
        self.shared.raw_callbacks.subscribe(callback)
    }

    pub fn status(&self, platform: Platform) -> ConnectionStatus {
        self.shared.status(platform).snapshot()
    }

    /// Status of both venues
    pub fn status_summary(&self) -> Vec<ConnectionStatus> {
        Platform::ALL.iter().map(|p| self.status(*p)).collect()
    }

    /// Spawn both venue loops and the status heartbeat
    ///
    /// Must be called from within a tokio runtime. Calling it while already
    /// running does nothing.
    pub fn start(&self) {
        if self.shared.running.swap(true, Ordering::SeqCst) {
            warn!("[Engine] Already running");
            return;
        }

        let cancel = CancellationToken::new();
        *self.cancel.lock() = cancel.clone();
        self.tracker.reopen();

        for session in [self.kalshi.clone(), self.polymarket.clone()] {
            self.tracker.spawn(run_venue(
                self.shared.clone(),
                session,
                self.transport.clone(),
                cancel.clone(),
            ));
        }
        self.tracker
            .spawn(run_heartbeat(self.shared.clone(), cancel));

        info!("[Engine] Started");
    }

    /// Stop every task and wait for them to finish
    pub async fn stop(&self) {
        if !self.shared.running.swap(false, Ordering::SeqCst) {
            return;
        }

        info!("[Engine] Stopping");
        let cancel = self.cancel.lock().clone();
        cancel.cancel();
        self.tracker.close();
        self.tracker.wait().await;

        for platform in Platform::ALL {
            self.shared.status(platform).set_state(FeedState::Stopped);
            self.shared.broadcast_status(platform);
        }
        info!("[Engine] Stopped");
    }
}

impl std::fmt::Debug for LiveEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LiveEngine")
            .field("running", &self.is_running())
            .field("tasks", &self.tracker.len())
            .finish()
    }
}

// ============================================================================
// Tasks
// ============================================================================

/// Connect, stream, and reconnect after a fixed backoff until cancelled
async fn run_venue(
    shared: Arc<EngineShared>,
    session: Arc<dyn VenueSession>,
    transport: Arc<dyn StreamTransport>,
    cancel: CancellationToken,
) {
    let platform = session.platform();
    let tag = platform.ws_tag();
    let status = shared.status(platform);

    while shared.is_running() {
        status.set_state(FeedState::Connecting);
        let request = session.connect_request();
        info!("{} Connecting to {}", tag, request.url);

        let started = Instant::now();
        let opened = tokio::select! {
            _ = cancel.cancelled() => break,
            opened = transport.open(request) => opened,
        };

        match opened {
            Ok(mut connection) => {
                status.set_latency(started.elapsed());

                let frames = tokio::select! {
                    _ = cancel.cancelled() => break,
                    frames = session.subscribe_frames() => frames,
                };

                let mut subscribed = true;
                for frame in frames {
                    if let Err(e) = connection.send_text(frame).await {
                        warn!("{} Failed to subscribe: {}", tag, e);
                        subscribed = false;
                        break;
                    }
                }

                if subscribed {
                    status.set_state(FeedState::Connected);
                    status.stamp_heartbeat(Utc::now());
                    info!("{} Connected", tag);
                    shared.broadcast_status(platform);

                    let end =
                        read_frames(&shared, session.as_ref(), connection.as_mut(), &cancel).await;
                    if matches!(end, SessionEnd::Cancelled) {
                        break;
                    }
                }
            }
            Err(e) => error!("{} Connection failed: {}", tag, e),
        }

        status.set_state(FeedState::Disconnected);
        shared.broadcast_status(platform);

        if !shared.is_running() {
            break;
        }

        let backoff = shared.settings.reconnect_backoff;
        info!("{} Reconnecting in {:?}", tag, backoff);
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = sleep(backoff) => {}
        }
    }

    status.set_state(FeedState::Stopped);
    debug!("{} Loop exited", tag);
}

async fn read_frames(
    shared: &EngineShared,
    session: &dyn VenueSession,
    connection: &mut dyn StreamConnection,
    cancel: &CancellationToken,
) -> SessionEnd {
    let tag = session.platform().ws_tag();
    let keepalive = session.keepalive_frame();
    let mut keepalive_timer = interval(shared.settings.keepalive_interval);
    keepalive_timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
    keepalive_timer.tick().await;

    loop {
        let step = tokio::select! {
            _ = cancel.cancelled() => ReadStep::Cancelled,
            frame = connection.recv() => ReadStep::Frame(frame),
            _ = keepalive_timer.tick(), if keepalive.is_some() => ReadStep::Keepalive,
        };

        match step {
            ReadStep::Cancelled => return SessionEnd::Cancelled,
            ReadStep::Frame(Some(Ok(text))) => shared.handle_frame(session, &text).await,
            ReadStep::Frame(Some(Err(e))) => {
                error!("{} Error: {}", tag, e);
                return SessionEnd::Disconnected;
            }
            ReadStep::Frame(None) => {
                info!("{} Connection closed by server", tag);
                return SessionEnd::Disconnected;
            }
            ReadStep::Keepalive => {
                if let Some(frame) = &keepalive {
                    if let Err(e) = connection.send_text(frame.clone()).await {
                        warn!("{} Failed to send keepalive: {}", tag, e);
                        return SessionEnd::Disconnected;
                    }
                }
            }
        }
    }
}

/// Broadcast both venue statuses on a fixed interval
async fn run_heartbeat(shared: Arc<EngineShared>, cancel: CancellationToken) {
    let mut ticker = interval(shared.settings.status_heartbeat);
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {
                for platform in Platform::ALL {
                    shared.broadcast_status(platform);
                }
            }
        }
    }
}
