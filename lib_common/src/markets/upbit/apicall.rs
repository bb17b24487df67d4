//! # Upbit API Call
//!
//! Thin client over `ApiClient` for the two quotation endpoints the ranking
//! needs, plus the ranking itself.

use std::time::Duration;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use tokio::time::sleep;
use tracing::{debug, error, warn};

use crate::core::symbols::SymbolSet;
use crate::markets::upbit::model::{MarketInfo, Ticker};
use crate::markets::{RankingError, RankingSource};
use crate::retrieve::ky_http::ApiClient;

/// Base URL of the public Upbit REST API.
pub const UPBIT_REST_URL: &str = "https://api.upbit.com/";

/// Sorts by turnover, highest first, and keeps the first `n` as ranks 1..=n.
pub fn rank_by_turnover(mut tickers: Vec<Ticker>, n: usize) -> SymbolSet {
    tickers.sort_by(|a, b| b.turnover().total_cmp(&a.turnover()));
    SymbolSet::from_markets(tickers.into_iter().take(n).map(|t| t.market))
}

pub struct UpbitApi {
    client: ApiClient,
    attempts: u32,
    retry_delay: Duration,
}

impl UpbitApi {
    /// Client for `base_url` with the default ranking retry policy
    /// (5 attempts, 10 s apart).
    pub fn new(base_url: &str) -> Result<Self, RankingError> {
        let client = ApiClient::new(base_url, None).map_err(|e| RankingError::Http(e.to_string()))?;
        Ok(Self::from_client(client))
    }

    pub fn from_client(client: ApiClient) -> Self {
        Self {
            client,
            attempts: 5,
            retry_delay: Duration::from_secs(10),
        }
    }

    pub fn with_retry(mut self, attempts: u32, retry_delay: Duration) -> Self {
        self.attempts = attempts.max(1);
        self.retry_delay = retry_delay;
        self
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, RankingError> {
        let response = self
            .client
            .get::<T>(path)
            .await
            .map_err(|e| RankingError::Http(e.to_string()))?;

        match response.data {
            Some(data) if response.success => Ok(data),
            _ => Err(RankingError::Status {
                endpoint: path.split('?').next().unwrap_or(path).to_string(),
                status: response.status,
                body: response.error_body.unwrap_or_default(),
            }),
        }
    }

    /// All markets quoted in KRW.
    pub async fn fetch_krw_markets(&self) -> Result<Vec<String>, RankingError> {
        let markets: Vec<MarketInfo> = self.get_json("v1/market/all").await?;
        Ok(markets
            .into_iter()
            .filter(MarketInfo::is_krw)
            .map(|m| m.market)
            .collect())
    }

    pub async fn fetch_tickers(&self, markets: &[String]) -> Result<Vec<Ticker>, RankingError> {
        if markets.is_empty() {
            return Ok(Vec::new());
        }
        self.get_json(&format!("v1/ticker?markets={}", markets.join(",")))
            .await
    }

    async fn top_n_once(&self, n: usize) -> Result<SymbolSet, RankingError> {
        let markets = self.fetch_krw_markets().await?;
        let tickers = self.fetch_tickers(&markets).await?;
        let ranked = rank_by_turnover(tickers, n);
        if ranked.is_empty() {
            return Err(RankingError::Empty);
        }
        Ok(ranked)
    }
}

#[async_trait]
impl RankingSource for UpbitApi {
    async fn fetch_top_n(&self, n: usize) -> Result<SymbolSet, RankingError> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.top_n_once(n).await {
                Ok(ranked) => {
                    debug!(attempt, top = %ranked, "Fetched top markets");
                    return Ok(ranked);
                }
                Err(e) if attempt >= self.attempts => {
                    error!(error = %e, attempts = self.attempts, "Top markets unavailable");
                    return Err(RankingError::Exhausted {
                        attempts: self.attempts,
                        last: e.to_string(),
                    });
                }
                Err(e) => {
                    warn!(error = %e, attempt, max = self.attempts, "Top markets fetch failed, retrying");
                    sleep(self.retry_delay).await;
                }
            }
        }
    }
}
