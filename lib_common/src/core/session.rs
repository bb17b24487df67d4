//! # Connector / Session Seam
//!
//! The manager never touches a socket directly. It asks a `Connector` for a
//! `Session` bound to a symbol set and then only reads events from it and
//! closes it. `recv` and `close` both take `&self`, so a swap can close a
//! session while the receive loop is parked inside `recv`.

use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use bytes::Bytes;

use crate::core::error::SessionError;
use crate::core::symbols::SymbolSet;

static NEXT_SESSION_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique session id, starting at 1.
pub fn next_session_id() -> u64 {
    NEXT_SESSION_ID.fetch_add(1, Ordering::Relaxed)
}

/// What a session yields to the receive loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// One text or binary frame, raw.
    Frame(Bytes),
    /// The session was closed locally or the peer closed cleanly.
    Closed,
    /// The transport failed.
    Failed(SessionError),
}

/// Opens upstream sessions.
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    type Session: Session;

    /// Connects and subscribes to `symbols`. Returns only once the
    /// subscription request has been sent.
    async fn connect(&self, symbols: &SymbolSet) -> Result<Self::Session, SessionError>;
}

/// One live upstream connection.
#[async_trait]
pub trait Session: Send + Sync + 'static {
    fn id(&self) -> u64;

    fn symbols(&self) -> &SymbolSet;

    /// Waits for the next event. After `Closed` or `Failed` every further
    /// call returns `Closed` immediately.
    async fn recv(&self) -> SessionEvent;

    /// Idempotent, best effort. Unblocks a pending `recv`.
    async fn close(&self);

    fn is_closed(&self) -> bool;

    /// Resolves once the session has terminated for any reason.
    async fn closed(&self);
}
