//! `/health` and `/status` over HTTP.

use std::future::Future;
use std::time::Instant;

use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};
use serde::Serialize;
use tokio::net::TcpListener;

use lib_common::core::{Connector, ManagerStats, Phase, SubscriptionManager, SymbolSet};
use lib_common::publish::ZmqSink;

pub struct StatusState<C: Connector> {
    pub manager: SubscriptionManager<C>,
    pub sink: ZmqSink,
    pub version: String,
    pub started: Instant,
}

impl<C: Connector> Clone for StatusState<C> {
    fn clone(&self) -> Self {
        Self {
            manager: self.manager.clone(),
            sink: self.sink.clone(),
            version: self.version.clone(),
            started: self.started,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct StatusReport {
    pub version: String,
    pub phase: Phase,
    pub epoch: u64,
    pub session_id: Option<u64>,
    pub symbols: SymbolSet,
    pub stats: ManagerStats,
    pub published: u64,
    pub dropped: u64,
    pub uptime_seconds: u64,
}

impl<C: Connector> StatusState<C> {
    pub fn report(&self) -> StatusReport {
        StatusReport {
            version: self.version.clone(),
            phase: self.manager.phase(),
            epoch: self.manager.epoch(),
            session_id: self.manager.active_session_id(),
            symbols: self.manager.symbols(),
            stats: self.manager.stats(),
            published: self.sink.published(),
            dropped: self.sink.dropped(),
            uptime_seconds: self.started.elapsed().as_secs(),
        }
    }
}

async fn health() -> &'static str {
    "OK"
}

async fn status<C: Connector>(State(state): State<StatusState<C>>) -> Json<StatusReport> {
    Json(state.report())
}

pub fn router<C: Connector>(state: StatusState<C>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/status", get(status::<C>))
        .with_state(state)
}

/// Serves until `shutdown` resolves.
pub async fn serve<C: Connector>(
    listener: TcpListener,
    state: StatusState<C>,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> std::io::Result<()> {
    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown)
        .await
}
