//! # Market Data APIs Module
//!
//! Client implementations for exchange REST APIs and the `RankingSource`
//! seam the ranking poller consumes.
//!
//! ## Contained Modules:
//!
//! - **`upbit`**: REST client and models for the Upbit quotation API. It lists
//!   the KRW markets, fetches their tickers and ranks them by 24h turnover.

#![forbid(unsafe_code)]
#![warn(rust_2018_idioms, unused_qualifications)]

use async_trait::async_trait;
use thiserror::Error;

use crate::core::symbols::SymbolSet;

/// Client and data models for the Upbit quotation API.
pub mod upbit;

pub use upbit::{UpbitApi, UPBIT_REST_URL};

/// Why a top-N ranking could not be produced.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RankingError {
    #[error("http request failed: {0}")]
    Http(String),

    #[error("{endpoint} returned status {status}: {body}")]
    Status {
        endpoint: String,
        status: u16,
        body: String,
    },

    #[error("ranking is empty")]
    Empty,

    #[error("gave up after {attempts} attempts, last error: {last}")]
    Exhausted { attempts: u32, last: String },
}

/// Supplies the current top-N markets, best first.
#[async_trait]
pub trait RankingSource: Send + Sync + 'static {
    async fn fetch_top_n(&self, n: usize) -> Result<SymbolSet, RankingError>;
}
