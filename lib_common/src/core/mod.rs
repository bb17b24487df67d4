//! # Core Engine Module
//!
//! This module forms the heart of the broadcaster: everything required to keep
//! one upstream trade stream alive, deduplicated and re-targetable without a
//! gap in the downstream publish stream.
//!
//! ## Core Components:
//!
//! - **`recency`**: Bounded FIFO set of recently forwarded sequential IDs. It
//!   decides whether a decoded trade is novel or a duplicate.
//!
//! - **`backoff`**: The exponential backoff state and the cancellable
//!   `ReconnectController` that keeps asking a connector for a session until
//!   one is established.
//!
//! - **`session`**: The `Connector` / `Session` seam. The manager only ever
//!   talks to these traits, so the WebSocket implementation and the in-memory
//!   test doubles are interchangeable.
//!
//! - **`manager`**: The `SubscriptionManager` state machine. It owns the active
//!   session, the symbol set and the recency filter, drives the receive loop
//!   and performs the open-new-before-close-old subscription swap.
//!
//! - **`broadcast`**: The downstream `BroadcastSink` interface and the decoded
//!   `TradeMessage` envelope.
//!
//! - **`symbols`**: The ranked `SymbolSet` a session subscribes to.

#![forbid(unsafe_code)]
#![warn(rust_2018_idioms, unused_qualifications)]

/// Exponential backoff and the cancellable reconnect loop.
pub mod backoff;
/// Downstream publish interface and the trade message envelope.
pub mod broadcast;
/// Error types shared by the core components.
pub mod error;
/// The subscription manager state machine.
pub mod manager;
/// Bounded recency window used for duplicate suppression.
pub mod recency;
/// Connector and session traits.
pub mod session;
/// Ranked symbol sets.
pub mod symbols;

// --- Public API Re-exports ---
pub use backoff::{Backoff, BackoffConfig, ReconnectController, ReconnectPhase};
pub use broadcast::{BroadcastSink, SequentialId, TradeMessage};
pub use error::{DecodeError, ManagerError, SessionError};
pub use manager::{
    Active, AlertHook, ManagerOptions, ManagerStats, Phase, SubscriptionManager, SwapOutcome,
};
pub use recency::{RecencyFilter, RECENCY_CAPACITY};
pub use session::{next_session_id, Connector, Session, SessionEvent};
pub use symbols::{RankedSymbol, SymbolSet};
