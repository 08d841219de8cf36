//! Kalshi API client
//!
//! REST snapshot of open markets and the portfolio balance. Every request is
//! signed when a signer is configured.

use crate::auth::KalshiSigner;
use crate::types::{BalanceResponse, KalshiEnvironment, MarketsResponse};
use reqwest::{Client, RequestBuilder};
use rust_decimal::Decimal;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, instrument, warn};
use unified_core::{FeedError, FeedResult, KalshiListing};

const MARKETS_PATH: &str = "/trade-api/v2/markets";
const BALANCE_PATH: &str = "/trade-api/v2/portfolio/balance";

const MARKETS_TIMEOUT: Duration = Duration::from_secs(15);
const BALANCE_TIMEOUT: Duration = Duration::from_secs(10);
const CLIENT_TIMEOUT: Duration = Duration::from_secs(30);

/// Kalshi API client
#[derive(Clone)]
pub struct KalshiClient {
    client: Client,
    base_url: String,
    signer: Option<Arc<KalshiSigner>>,
}

impl KalshiClient {
    pub fn new(environment: KalshiEnvironment, signer: Option<Arc<KalshiSigner>>) -> FeedResult<Self> {
        Self::with_base_url(environment.rest_base(), signer)
    }

    /// Point the client at an arbitrary host (paths stay the documented ones)
    pub fn with_base_url(base_url: impl Into<String>, signer: Option<Arc<KalshiSigner>>) -> FeedResult<Self> {
        let client = Client::builder()
            .timeout(CLIENT_TIMEOUT)
            .build()
            .map_err(|e| FeedError::internal(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            signer,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn is_authenticated(&self) -> bool {
        self.signer.is_some()
    }

    fn signed_get(&self, path: &str) -> FeedResult<RequestBuilder> {
        let mut request = self.client.get(format!("{}{}", self.base_url, path));
        if let Some(signer) = &self.signer {
            for (name, value) in signer.sign("GET", path)?.to_pairs() {
                request = request.header(name, value);
            }
        }
        Ok(request)
    }

    /// List open markets, prices converted to the 0.00 - 1.00 scale
    #[instrument(skip(self))]
    pub async fn list_active_markets(&self, limit: u32) -> FeedResult<Vec<KalshiListing>> {
        debug!("Fetching Kalshi open markets (limit {})", limit);

        let response = self
            .signed_get(MARKETS_PATH)?
            .query(&[("status", "open".to_string()), ("limit", limit.to_string())])
            .timeout(MARKETS_TIMEOUT)
            .send()
            .await
            .map_err(|e| FeedError::network(format!("Failed to fetch markets: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(FeedError::api(format!(
                "Kalshi API error ({}): {}",
                status, body
            )));
        }

        let markets_response: MarketsResponse = response
            .json()
            .await
            .map_err(|e| FeedError::parse(format!("Failed to parse markets response: {}", e)))?;

        let listings: Vec<KalshiListing> = markets_response
            .markets
            .iter()
            .map(|m| m.to_listing())
            .collect();

        debug!("Fetched {} Kalshi markets", listings.len());
        Ok(listings)
    }

    /// Account balance in dollars (requires a signer)
    #[instrument(skip(self))]
    pub async fn get_balance(&self) -> FeedResult<Decimal> {
        if self.signer.is_none() {
            return Err(FeedError::auth("Kalshi authentication required"));
        }

        debug!("Fetching Kalshi portfolio balance");

        let response = self
            .signed_get(BALANCE_PATH)?
            .timeout(BALANCE_TIMEOUT)
            .send()
            .await
            .map_err(|e| FeedError::network(format!("Failed to fetch balance: {}", e)))?;

        if response.status().as_u16() == 401 {
            warn!("Kalshi rejected the signed balance request");
            return Err(FeedError::auth("Invalid or expired Kalshi API key"));
        }

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(FeedError::api(format!(
                "Kalshi API error ({}): {}",
                status, body
            )));
        }

        let balance_response: BalanceResponse = response
            .json()
            .await
            .map_err(|e| FeedError::parse(format!("Failed to parse balance: {}", e)))?;

        // Convert cents to dollars
        Ok(balance_response.balance / Decimal::ONE_HUNDRED)
    }
}

impl std::fmt::Debug for KalshiClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KalshiClient")
            .field("base_url", &self.base_url)
            .field("authenticated", &self.signer.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_balance_requires_signer() {
        let client = KalshiClient::new(KalshiEnvironment::Demo, None).unwrap();
        assert!(!client.is_authenticated());
        assert!(matches!(client.get_balance().await, Err(FeedError::Auth(_))));
    }

    #[test]
    fn test_base_url_trailing_slash_trimmed() {
        let client = KalshiClient::with_base_url("http://localhost:9000/", None).unwrap();
        assert_eq!(client.base_url(), "http://localhost:9000");
    }
}
