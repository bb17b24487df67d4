//! # ZeroMQ PUB Sink
//!
//! The socket lives on its own task. The receive loop hands messages over a
//! bounded channel with `try_send`; when the publisher falls behind, messages
//! are dropped and counted instead of stalling the upstream read.
//!
//! Every message is one single-part frame holding the upstream JSON object.
//! There is no topic prefix, subscribers use an empty subscription.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use zeromq::{PubSocket, Socket, SocketSend, ZmqMessage};

use crate::core::broadcast::{BroadcastSink, TradeMessage};

/// Minimum spacing between two backpressure warnings.
const DROP_WARN_INTERVAL: Duration = Duration::from_secs(10);

#[derive(Debug, Error)]
pub enum PublishError {
    #[error("failed to bind publisher on {endpoint}: {reason}")]
    Bind { endpoint: String, reason: String },
}

/// `tcp://0.0.0.0:<port>`, the endpoint the broadcaster binds.
pub fn tcp_endpoint(port: u16) -> String {
    format!("tcp://0.0.0.0:{port}")
}

struct DropWindow {
    since_warn: u64,
    last_warn: Option<Instant>,
}

struct SinkShared {
    dropped: AtomicU64,
    published: AtomicU64,
    window: Mutex<DropWindow>,
}

/// `BroadcastSink` half of the publisher.
#[derive(Clone)]
pub struct ZmqSink {
    tx: mpsc::Sender<TradeMessage>,
    shared: Arc<SinkShared>,
}

impl ZmqSink {
    /// Messages dropped because the queue was full or the task had stopped.
    pub fn dropped(&self) -> u64 {
        self.shared.dropped.load(Ordering::Relaxed)
    }

    /// Messages handed to the socket.
    pub fn published(&self) -> u64 {
        self.shared.published.load(Ordering::Relaxed)
    }

    fn record_drop(&self, reason: &'static str) {
        self.shared.dropped.fetch_add(1, Ordering::Relaxed);

        let mut window = self.shared.window.lock().unwrap_or_else(PoisonError::into_inner);
        window.since_warn += 1;
        let due = window
            .last_warn
            .map_or(true, |at| at.elapsed() >= DROP_WARN_INTERVAL);
        if due {
            warn!(dropped = window.since_warn, reason, "ZMQ publish backpressure, messages dropped");
            window.since_warn = 0;
            window.last_warn = Some(Instant::now());
        }
    }
}

impl BroadcastSink for ZmqSink {
    fn publish(&self, message: TradeMessage) {
        match self.tx.try_send(message) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(_)) => self.record_drop("queue full"),
            Err(mpsc::error::TrySendError::Closed(_)) => self.record_drop("publisher stopped"),
        }
    }
}

/// A bound PUB socket and the task that owns it.
pub struct ZmqPublisher {
    pub sink: ZmqSink,
    /// The endpoint actually bound (port resolved).
    pub endpoint: String,
    pub task: JoinHandle<()>,
}

impl ZmqPublisher {
    /// Binds `endpoint` and spawns the publisher task.
    ///
    /// The task runs until `cancel` fires or every sink clone is dropped.
    pub async fn bind(
        endpoint: &str,
        capacity: usize,
        cancel: CancellationToken,
    ) -> Result<Self, PublishError> {
        let mut socket = PubSocket::new();
        let bound = socket
            .bind(endpoint)
            .await
            .map_err(|e| PublishError::Bind {
                endpoint: endpoint.to_string(),
                reason: e.to_string(),
            })?
            .to_string();
        info!(endpoint = %bound, "ZMQ publisher bound");

        let (tx, rx) = mpsc::channel(capacity.max(1));
        let shared = Arc::new(SinkShared {
            dropped: AtomicU64::new(0),
            published: AtomicU64::new(0),
            window: Mutex::new(DropWindow {
                since_warn: 0,
                last_warn: None,
            }),
        });

        let task = tokio::spawn(run_publisher(socket, rx, Arc::clone(&shared), cancel));

        Ok(Self {
            sink: ZmqSink { tx, shared },
            endpoint: bound,
            task,
        })
    }
}

async fn run_publisher(
    mut socket: PubSocket,
    mut rx: mpsc::Receiver<TradeMessage>,
    shared: Arc<SinkShared>,
    cancel: CancellationToken,
) {
    loop {
        let message = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            message = rx.recv() => match message {
                Some(message) => message,
                None => break,
            },
        };

        if let Err(e) = socket.send(ZmqMessage::from(message.to_json())).await {
            warn!(error = %e, sequential_id = %message.sequential_id, "ZMQ send failed");
            continue;
        }
        shared.published.fetch_add(1, Ordering::Relaxed);
    }
    debug!(published = shared.published.load(Ordering::Relaxed), "ZMQ publisher stopped");
}
