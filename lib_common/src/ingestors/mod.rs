//! # Data Ingestors Module
//!
//! The "front door" for external data entering the broadcaster.
//!
//! ## Contained Modules:
//! - **`upbit_wss`**: `Connector` / `Session` implementation for the Upbit
//!   public trade WebSocket, with keep-alive and bounded close.
//! - **`ranking_poller`**: A self-scheduling REST poller that tracks the
//!   top-N markets by turnover and re-targets the subscription manager.

#![forbid(unsafe_code)]
#![warn(rust_2018_idioms, unused_qualifications)]

/// Calendar-driven top-N poller.
pub mod ranking_poller;
/// The WebSocket client for the Upbit trade stream.
pub mod upbit_wss;

// --- Public API Re-exports ---
pub use ranking_poller::{PollOutcome, RankChanges, RankMove, RankingPoller};
pub use upbit_wss::{subscription_frame, UpbitConnector, UpbitSession, UpbitWssConfig};
