//! Binance REST client
//!
//! Thin wrapper around `reqwest::Client` for the futures depth-snapshot
//! endpoint, guarded by a client-side GCRA rate limiter so snapshot refetch
//! storms cannot trip the venue's request weight limits.

use governor::{
    clock::DefaultClock,
    state::{InMemoryState, NotKeyed},
    Quota, RateLimiter as GovernorRateLimiter,
};
use reqwest::Client;
use std::num::NonZeroU32;
use std::time::Duration;
use tokio::time::timeout;
use tracing::{debug, warn};

use crate::binance::types::DepthSnapshot;
use crate::error::FeedError;

/// Conservative buffer below the venue's published request weight budget
const MAX_REQUESTS_PER_MINUTE: u32 = 1000;

/// Maximum time a snapshot request may wait in the rate-limit queue
const QUEUE_TIMEOUT_SECS: u64 = 30;

/// Client-side rate limiter for REST requests (GCRA via governor)
struct RestRateLimiter {
    limiter: GovernorRateLimiter<NotKeyed, InMemoryState, DefaultClock>,
    queue_timeout: Duration,
}

impl RestRateLimiter {
    fn new(requests_per_minute: u32, queue_timeout_secs: u64) -> Self {
        let quota = Quota::per_minute(
            NonZeroU32::new(requests_per_minute).expect("requests_per_minute must be non-zero"),
        );
        Self {
            limiter: GovernorRateLimiter::direct(quota),
            queue_timeout: Duration::from_secs(queue_timeout_secs),
        }
    }

    /// Wait for permission, erroring out past the queue timeout
    async fn wait(&self) -> Result<(), FeedError> {
        let waited = timeout(self.queue_timeout, async {
            while self.limiter.check().is_err() {
                tokio::time::sleep(Duration::from_millis(100)).await;
            }
        })
        .await;

        match waited {
            Ok(()) => Ok(()),
            Err(_) => {
                warn!(
                    timeout_secs = QUEUE_TIMEOUT_SECS,
                    "Rate limit queue timeout exceeded"
                );
                Err(FeedError::RateLimit(format!(
                    "snapshot request queued longer than {}s",
                    QUEUE_TIMEOUT_SECS
                )))
            }
        }
    }
}

/// REST client for the venue's depth-snapshot endpoint
pub struct BinanceClient {
    client: Client,
    base_url: String,
    rate_limiter: RestRateLimiter,
}

impl std::fmt::Debug for BinanceClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BinanceClient")
            .field("base_url", &self.base_url)
            .finish()
    }
}

impl BinanceClient {
    /// Create a client against the given REST base URL
    ///
    /// Defaults: 10 second request timeout, 1000 requests/minute budget.
    pub fn new(base_url: impl Into<String>) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(10))
            .user_agent(concat!("orderbook-mirror/", env!("CARGO_PKG_VERSION")))
            .build()
            .expect("Failed to create HTTP client");

        Self {
            client,
            base_url: base_url.into(),
            rate_limiter: RestRateLimiter::new(MAX_REQUESTS_PER_MINUTE, QUEUE_TIMEOUT_SECS),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Fetch a full depth snapshot for the symbol
    ///
    /// `GET <base>/fapi/v1/depth?symbol=<UPPER>&limit=<N>`
    ///
    /// # Errors
    ///
    /// `FeedError::RateLimit` when the client-side queue times out or the
    /// venue answers 429; `FeedError::Connection` for transport and server
    /// errors; `FeedError::Parse` for an undecodable body.
    pub async fn get_depth_snapshot(
        &self,
        symbol: &str,
        limit: u32,
    ) -> Result<DepthSnapshot, FeedError> {
        self.rate_limiter.wait().await?;

        let url = format!(
            "{}/fapi/v1/depth?symbol={}&limit={}",
            self.base_url,
            symbol.to_uppercase(),
            limit
        );
        debug!(symbol = %symbol, limit, "Fetching depth snapshot");

        let response = self.client.get(&url).send().await?;
        let response = response.error_for_status()?;
        let snapshot: DepthSnapshot = response.json().await?;

        debug!(
            symbol = %symbol,
            last_update_id = snapshot.last_update_id,
            bid_levels = snapshot.bids.len(),
            ask_levels = snapshot.asks.len(),
            "Fetched depth snapshot"
        );
        Ok(snapshot)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_base_url() {
        let client = BinanceClient::new("https://fapi.binance.com");
        assert_eq!(client.base_url(), "https://fapi.binance.com");
    }

    #[tokio::test]
    async fn test_rate_limiter_allows_within_quota() {
        let limiter = RestRateLimiter::new(10, 5);
        assert!(limiter.wait().await.is_ok());
    }

    #[tokio::test]
    async fn test_rate_limiter_times_out_when_exhausted() {
        let limiter = RestRateLimiter::new(1, 1);
        assert!(limiter.wait().await.is_ok());

        // Quota of 1/minute is now spent; the second wait must hit the 1s
        // queue timeout
        let result = limiter.wait().await;
        assert!(matches!(result, Err(FeedError::RateLimit(_))));
    }
}
