//! # Upbit Quotation API
//!
//! - **`apicall`**: `UpbitApi`, the REST client with the attempt/delay retry
//!   loop used for ranking.
//! - **`model`**: market and ticker payloads.

/// REST client for the Upbit quotation endpoints.
pub mod apicall;
/// Upbit response payloads.
pub mod model;

pub use apicall::{rank_by_turnover, UpbitApi, UPBIT_REST_URL};
pub use model::{MarketInfo, Ticker};
