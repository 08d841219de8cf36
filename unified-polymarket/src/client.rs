//! Polymarket API client
//!
//! Gamma for market listings, CLOB for order books, price history and the
//! L2-authenticated collateral balance.

use crate::types::{
    decimal_from_value, BalanceAllowanceResponse, ClobOrderbookResponse, PolymarketMarket,
    PricesHistoryResponse, CLOB_API_BASE, GAMMA_API_BASE,
};
use base64::{
    engine::general_purpose::{STANDARD, URL_SAFE},
    Engine as _,
};
use chrono::Utc;
use hmac::{Hmac, Mac};
use reqwest::Client;
use rust_decimal::Decimal;
use sha2::Sha256;
use std::time::Duration;
use tracing::{debug, instrument};
use unified_core::{FeedError, FeedResult, HistoryPoint, OrderBook, PolymarketListing};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(15);
const BALANCE_PATH: &str = "/balance-allowance";

/// Collateral is USDC with 6 decimals
const USDC_DECIMALS: u32 = 6;

/// API credentials for authenticated CLOB requests
#[derive(Clone)]
pub struct PolymarketCredentials {
    pub api_key: String,
    pub api_secret: String,
    pub passphrase: String,
    /// Wallet address sent as POLY_ADDRESS
    pub address: Option<String>,
}

impl PolymarketCredentials {
    pub fn new(api_key: String, api_secret: String, passphrase: String) -> Self {
        Self {
            api_key,
            api_secret,
            passphrase,
            address: None,
        }
    }

    pub fn with_address(mut self, address: impl Into<String>) -> Self {
        self.address = Some(address.into());
        self
    }

    /// Build HMAC signature for a request
    ///
    /// Message format: {timestamp}{method}{path}{body}
    /// - Secret: base64 decoded (standard or URL-safe)
    /// - Algorithm: HMAC-SHA256
    /// - Output: base64 URL-safe encoded
    pub fn build_signature(
        &self,
        timestamp: &str,
        method: &str,
        path: &str,
        body: &str,
    ) -> FeedResult<String> {
        let secret_bytes = STANDARD
            .decode(&self.api_secret)
            .or_else(|_| URL_SAFE.decode(&self.api_secret))
            .map_err(|e| FeedError::auth(format!("Failed to decode API secret: {}", e)))?;

        let message = format!("{}{}{}{}", timestamp, method, path, body);

        type HmacSha256 = Hmac<Sha256>;
        let mut mac = HmacSha256::new_from_slice(&secret_bytes)
            .map_err(|e| FeedError::auth(format!("Failed to create HMAC: {}", e)))?;
        mac.update(message.as_bytes());

        Ok(URL_SAFE.encode(mac.finalize().into_bytes()))
    }

    /// L2 headers for one request
    pub fn l2_headers(
        &self,
        timestamp: &str,
        method: &str,
        path: &str,
    ) -> FeedResult<Vec<(&'static str, String)>> {
        let signature = self.build_signature(timestamp, method, path, "")?;
        Ok(vec![
            ("POLY_ADDRESS", self.address.clone().unwrap_or_default()),
            ("POLY_SIGNATURE", signature),
            ("POLY_TIMESTAMP", timestamp.to_string()),
            ("POLY_API_KEY", self.api_key.clone()),
            ("POLY_PASSPHRASE", self.passphrase.clone()),
        ])
    }
}

impl std::fmt::Debug for PolymarketCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PolymarketCredentials")
            .field("api_key", &"[REDACTED]")
            .field("address", &self.address)
            .finish()
    }
}

/// Polymarket API client
#[derive(Clone)]
pub struct PolymarketClient {
    client: Client,
    gamma_url: String,
    clob_url: String,
    credentials: Option<PolymarketCredentials>,
}

impl PolymarketClient {
    pub fn new(credentials: Option<PolymarketCredentials>) -> FeedResult<Self> {
        Self::with_base_urls(GAMMA_API_BASE, CLOB_API_BASE, credentials)
    }

    pub fn with_base_urls(
        gamma_url: impl Into<String>,
        clob_url: impl Into<String>,
        credentials: Option<PolymarketCredentials>,
    ) -> FeedResult<Self> {
        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| FeedError::internal(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            gamma_url: gamma_url.into().trim_end_matches('/').to_string(),
            clob_url: clob_url.into().trim_end_matches('/').to_string(),
            credentials,
        })
    }

    pub fn has_credentials(&self) -> bool {
        self.credentials.is_some()
    }

    pub fn gamma_url(&self) -> &str {
        &self.gamma_url
    }

    async fn get_json<T: serde::de::DeserializeOwned>(
        &self,
        request: reqwest::RequestBuilder,
        what: &str,
    ) -> FeedResult<T> {
        let response = request
            .send()
            .await
            .map_err(|e| FeedError::network(format!("Failed to fetch {}: {}", what, e)))?;

        if response.status().as_u16() == 401 {
            return Err(FeedError::auth(format!("Polymarket rejected {} request", what)));
        }

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(FeedError::api(format!(
                "Polymarket API error ({}): {}",
                status, body
            )));
        }

        response
            .json()
            .await
            .map_err(|e| FeedError::parse(format!("Failed to parse {} response: {}", what, e)))
    }

    /// List active, unclosed markets, optionally filtered by tag
    #[instrument(skip(self))]
    pub async fn list_active_markets(
        &self,
        limit: u32,
        tag_id: Option<&str>,
    ) -> FeedResult<Vec<PolymarketListing>> {
        let mut params = vec![
            ("active", "true".to_string()),
            ("closed", "false".to_string()),
            ("limit", limit.to_string()),
        ];
        if let Some(tag) = tag_id {
            params.push(("tag_id", tag.to_string()));
        }

        debug!("Fetching Polymarket active markets (limit {})", limit);

        let request = self
            .client
            .get(format!("{}/markets", self.gamma_url))
            .query(&params);
        let markets: Vec<PolymarketMarket> = self.get_json(request, "markets").await?;

        Ok(markets.iter().map(|m| m.to_listing()).collect())
    }

    /// The market listing that carries a CLOB token, if Gamma knows it
    #[instrument(skip(self))]
    pub async fn get_market_by_token(&self, token_id: &str) -> FeedResult<Option<PolymarketListing>> {
        debug!("Looking up Polymarket market for token {}", token_id);

        let request = self
            .client
            .get(format!("{}/markets", self.gamma_url))
            .query(&[("clob_token_ids", token_id)]);
        let markets: Vec<PolymarketMarket> = self.get_json(request, "market").await?;

        Ok(markets
            .iter()
            .map(|m| m.to_listing())
            .find(|listing| listing.clob_token_ids.iter().any(|t| t == token_id)))
    }

    /// Order book for one CLOB token, best levels first
    #[instrument(skip(self))]
    pub async fn get_order_book(&self, token_id: &str) -> FeedResult<OrderBook> {
        debug!("Fetching Polymarket orderbook for {}", token_id);

        let request = self
            .client
            .get(format!("{}/book", self.clob_url))
            .query(&[("token_id", token_id)]);
        let book: ClobOrderbookResponse = self.get_json(request, "orderbook").await?;

        Ok(book.to_order_book(token_id))
    }

    /// Price history for a token
    ///
    /// `interval` is one of "1m", "1h", "6h", "1d", "1w", "max".
    #[instrument(skip(self))]
    pub async fn get_prices_history(
        &self,
        token_id: &str,
        interval: &str,
    ) -> FeedResult<Vec<HistoryPoint>> {
        // Fidelity controls data granularity - lower = more data points
        let fidelity = match interval {
            "1m" | "1h" => 1,
            "6h" => 5,
            "1d" => 15,
            "1w" => 60,
            "max" => 1440,
            _ => 60,
        };

        debug!("Fetching Polymarket price history for {} ({})", token_id, interval);

        let request = self
            .client
            .get(format!("{}/prices-history", self.clob_url))
            .query(&[
                ("market", token_id.to_string()),
                ("interval", interval.to_string()),
                ("fidelity", fidelity.to_string()),
            ]);
        let response: PricesHistoryResponse = self.get_json(request, "price history").await?;

        Ok(response
            .history
            .iter()
            .filter_map(|p| p.to_history_point())
            .collect())
    }

    /// Collateral balance in dollars (requires credentials)
    #[instrument(skip(self))]
    pub async fn get_balance(&self) -> FeedResult<Decimal> {
        let credentials = self
            .credentials
            .as_ref()
            .ok_or_else(|| FeedError::auth("Polymarket credentials required"))?;

        let timestamp = Utc::now().timestamp().to_string();
        let mut request = self
            .client
            .get(format!("{}{}", self.clob_url, BALANCE_PATH))
            .query(&[("asset_type", "COLLATERAL")]);
        for (name, value) in credentials.l2_headers(&timestamp, "GET", BALANCE_PATH)? {
            request = request.header(name, value);
        }

        debug!("Fetching Polymarket collateral balance");

        let response: BalanceAllowanceResponse = self.get_json(request, "balance").await?;
        let raw = decimal_from_value(&response.balance).unwrap_or(Decimal::ZERO);

        Ok(raw / Decimal::from(10u64.pow(USDC_DECIMALS)))
    }
}

impl std::fmt::Debug for PolymarketClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PolymarketClient")
            .field("gamma_url", &self.gamma_url)
            .field("clob_url", &self.clob_url)
            .field("authenticated", &self.credentials.is_some())
            .finish()
    }
}
