//! # Webhook Notifier
//!
//! Posts `{"text": ...}` to an incoming-webhook URL. A notification is
//! delivered iff the endpoint answers `200 OK`; failures are logged and never
//! reach the caller.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use serde_json::json;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Upper bound per message while draining the queue on shutdown.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Delivers one notification. Returns whether it was accepted.
#[async_trait]
pub trait Notifier: Send + Sync + 'static {
    async fn notify(&self, text: &str) -> bool;
}

pub struct WebhookNotifier {
    client: reqwest::Client,
    url: String,
}

impl WebhookNotifier {
    /// Notifier posting to `url` with a 10 s request timeout.
    pub fn new(url: impl Into<String>) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()?;
        Ok(Self {
            client,
            url: url.into(),
        })
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    async fn notify(&self, text: &str) -> bool {
        let result = self
            .client
            .post(&self.url)
            .json(&json!({ "text": text }))
            .send()
            .await;

        match result {
            Ok(response) if response.status() == StatusCode::OK => {
                debug!("Webhook notification delivered");
                true
            }
            Ok(response) => {
                let status = response.status();
                let body = response.text().await.unwrap_or_default();
                error!(%status, %body, "Webhook rejected notification");
                false
            }
            Err(e) => {
                error!(error = %e, "Webhook notification failed");
                false
            }
        }
    }
}

/// Cheap, cloneable sender side of the notifier task.
#[derive(Debug, Clone)]
pub struct NotifierHandle {
    tx: Option<mpsc::Sender<String>>,
}

impl NotifierHandle {
    /// Accepts and discards everything. Used when no webhook is configured.
    pub fn disabled() -> Self {
        Self { tx: None }
    }

    pub fn is_enabled(&self) -> bool {
        self.tx.is_some()
    }

    /// Queues `text` without waiting. Returns `false` if the queue is full or
    /// the notifier task has shut down.
    pub fn notify(&self, text: impl Into<String>) -> bool {
        let Some(tx) = &self.tx else {
            return true;
        };
        match tx.try_send(text.into()) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!("Notification queue full, message dropped");
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                debug!("Notifier stopped, message dropped");
                false
            }
        }
    }
}

/// Spawns the delivery task.
///
/// Messages are delivered one at a time in queue order. Once `cancel` fires
/// the queue is closed and whatever is still in it is delivered, each message
/// bounded by `DRAIN_TIMEOUT`, before the task exits.
pub fn spawn_notifier<N: Notifier>(
    notifier: N,
    capacity: usize,
    cancel: CancellationToken,
) -> (NotifierHandle, JoinHandle<()>) {
    let (tx, mut rx) = mpsc::channel::<String>(capacity.max(1));

    let task = tokio::spawn(async move {
        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                msg = rx.recv() => match msg {
                    Some(text) => {
                        notifier.notify(&text).await;
                    }
                    None => return,
                },
            }
        }

        rx.close();
        let mut drained = 0usize;
        while let Some(text) = rx.recv().await {
            if timeout(DRAIN_TIMEOUT, notifier.notify(&text)).await.is_err() {
                warn!("Notification timed out during shutdown");
            }
            drained += 1;
        }
        info!(drained, "Notifier stopped");
    });

    (NotifierHandle { tx: Some(tx) }, task)
}
