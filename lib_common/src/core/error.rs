//! # Core Errors
//!
//! `thiserror` enums for the three failure domains of the streaming core:
//! transport (`SessionError`), envelope decoding (`DecodeError`) and misuse
//! of the manager lifecycle (`ManagerError`).

use thiserror::Error;

/// Failures of a single upstream session.
///
/// All of these are transient from the manager's point of view. They are
/// answered with a reconnect, never with a shutdown.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SessionError {
    #[error("websocket handshake failed: {0}")]
    Handshake(String),

    #[error("failed to send subscription frame: {0}")]
    Send(String),

    #[error("connect timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error("peer silent for {0:?}, keep-alive expired")]
    KeepAlive(std::time::Duration),

    #[error("failed to encode subscription request: {0}")]
    Encode(String),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("session already closed")]
    Closed,
}

/// Why an upstream frame was not turned into a `TradeMessage`.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DecodeError {
    #[error("frame is not valid JSON: {0}")]
    Json(String),

    #[error("frame is not a JSON object")]
    NotAnObject,

    #[error("frame has no sequential_id")]
    MissingSequentialId,

    /// The exchange reported an error instead of data.
    #[error("upstream error {name}: {message}")]
    Upstream { name: String, message: String },

    /// A status/ack frame such as `{"status":"UP"}`.
    #[error("upstream status frame: {0}")]
    Status(String),
}

impl DecodeError {
    /// Control frames are expected traffic and are not counted as decode errors.
    pub fn is_control(&self) -> bool {
        matches!(self, DecodeError::Upstream { .. } | DecodeError::Status(_))
    }
}

/// Lifecycle misuse of the `SubscriptionManager`.
#[derive(Debug, Clone, Copy, Error, PartialEq, Eq)]
pub enum ManagerError {
    #[error("subscription manager already started")]
    AlreadyStarted,

    #[error("subscription manager not started")]
    NotStarted,

    #[error("subscription manager stopped")]
    Stopped,

    #[error("symbol set is empty")]
    EmptySymbolSet,
}
