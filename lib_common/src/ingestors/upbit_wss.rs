//! # Upbit WSS Ingestor
//!
//! `Connector` / `Session` implementation for the Upbit public trade stream.
//!
//! Each session owns one WebSocket. A reader task per session pumps frames
//! into a bounded channel, sends keep-alive pings and watches the peer for
//! silence. The session handle itself only reads from the channel, which is
//! what lets the manager close a session while another task waits in `recv`.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::{SinkExt, StreamExt};
use serde::Serialize;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, Mutex};
use tokio::time::{interval_at, sleep_until, timeout, Instant};
use tokio_tungstenite::tungstenite::protocol::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};
use uuid::Uuid;

use crate::core::error::SessionError;
use crate::core::session::{next_session_id, Connector, Session, SessionEvent};
use crate::core::symbols::SymbolSet;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Configuration for the Upbit WebSocket stream.
#[derive(Debug, Clone)]
pub struct UpbitWssConfig {
    pub url: String,
    /// Interval between client pings.
    pub ping_interval: Duration,
    /// Extra silence tolerated after a ping before the peer is declared dead.
    pub ping_timeout: Duration,
    /// Bound on the closing handshake.
    pub close_timeout: Duration,
    /// Bound on handshake plus subscription send.
    pub connect_timeout: Duration,
    /// Frames buffered between the reader task and `recv`.
    pub buffer: usize,
}

impl Default for UpbitWssConfig {
    fn default() -> Self {
        Self {
            url: "wss://api.upbit.com/websocket/v1".to_string(),
            ping_interval: Duration::from_secs(30),
            ping_timeout: Duration::from_secs(10),
            close_timeout: Duration::from_secs(5),
            connect_timeout: Duration::from_secs(10),
            buffer: 1024,
        }
    }
}

#[derive(Serialize)]
struct Ticket<'a> {
    ticket: &'a str,
}

#[derive(Serialize)]
struct TradeRequest {
    #[serde(rename = "type")]
    kind: &'static str,
    codes: Vec<String>,
    is_only_realtime: bool,
}

/// Builds the subscription request sent right after the handshake.
///
/// `[{"ticket":"<ticket>"},{"type":"trade","codes":[...],"is_only_realtime":true}]`
pub fn subscription_frame(ticket: &str, symbols: &SymbolSet) -> Result<String, SessionError> {
    let request = (
        Ticket { ticket },
        TradeRequest {
            kind: "trade",
            codes: symbols.codes(),
            is_only_realtime: true,
        },
    );
    serde_json::to_string(&request).map_err(|e| SessionError::Encode(e.to_string()))
}

/// Opens Upbit trade sessions.
#[derive(Debug, Clone, Default)]
pub struct UpbitConnector {
    config: UpbitWssConfig,
}

impl UpbitConnector {
    pub fn new(config: UpbitWssConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &UpbitWssConfig {
        &self.config
    }

    async fn open(&self, symbols: &SymbolSet) -> Result<UpbitSession, SessionError> {
        let ticket = Uuid::new_v4().to_string();
        let frame = subscription_frame(&ticket, symbols)?;

        let (mut ws, _) = connect_async(self.config.url.as_str())
            .await
            .map_err(|e| SessionError::Handshake(e.to_string()))?;
        ws.send(Message::text(frame))
            .await
            .map_err(|e| SessionError::Send(e.to_string()))?;

        let id = next_session_id();
        info!(session = id, %ticket, codes = symbols.len(), "Subscribed to Upbit trades");
        Ok(UpbitSession::spawn(id, symbols.clone(), ws, &self.config))
    }
}

#[async_trait]
impl Connector for UpbitConnector {
    type Session = UpbitSession;

    async fn connect(&self, symbols: &SymbolSet) -> Result<UpbitSession, SessionError> {
        let limit = self.config.connect_timeout;
        timeout(limit, self.open(symbols))
            .await
            .map_err(|_| SessionError::Timeout(limit))?
    }
}

/// One live Upbit WebSocket.
pub struct UpbitSession {
    id: u64,
    symbols: SymbolSet,
    events: Mutex<mpsc::Receiver<SessionEvent>>,
    /// Fired by `close`.
    stop: CancellationToken,
    /// Fired by the reader task when it exits.
    done: CancellationToken,
    finished: AtomicBool,
    close_timeout: Duration,
}

impl UpbitSession {
    fn spawn(id: u64, symbols: SymbolSet, ws: WsStream, config: &UpbitWssConfig) -> Self {
        let (tx, rx) = mpsc::channel(config.buffer.max(1));
        let stop = CancellationToken::new();
        let done = CancellationToken::new();

        let reader = Reader {
            id,
            tx,
            stop: stop.clone(),
            ping_interval: config.ping_interval,
            silence_limit: config.ping_interval + config.ping_timeout,
            close_timeout: config.close_timeout,
        };
        let done_guard = done.clone().drop_guard();
        tokio::spawn(async move {
            let _done = done_guard;
            reader.run(ws).await;
        });

        Self {
            id,
            symbols,
            events: Mutex::new(rx),
            stop,
            done,
            finished: AtomicBool::new(false),
            close_timeout: config.close_timeout,
        }
    }
}

#[async_trait]
impl Session for UpbitSession {
    fn id(&self) -> u64 {
        self.id
    }

    fn symbols(&self) -> &SymbolSet {
        &self.symbols
    }

    async fn recv(&self) -> SessionEvent {
        if self.finished.load(Ordering::Acquire) || self.stop.is_cancelled() {
            return SessionEvent::Closed;
        }
        let mut events = self.events.lock().await;
        let event = tokio::select! {
            biased;
            _ = self.stop.cancelled() => SessionEvent::Closed,
            event = events.recv() => event.unwrap_or(SessionEvent::Closed),
        };
        if !matches!(event, SessionEvent::Frame(_)) {
            self.finished.store(true, Ordering::Release);
        }
        event
    }

    async fn close(&self) {
        self.stop.cancel();
        if timeout(self.close_timeout, self.done.cancelled()).await.is_err() {
            debug!(session = self.id, "Reader did not finish within close timeout");
        }
    }

    fn is_closed(&self) -> bool {
        self.stop.is_cancelled() || self.done.is_cancelled()
    }

    async fn closed(&self) {
        tokio::select! {
            _ = self.stop.cancelled() => {}
            _ = self.done.cancelled() => {}
        }
    }
}

impl Drop for UpbitSession {
    fn drop(&mut self) {
        self.stop.cancel();
    }
}

struct Reader {
    id: u64,
    tx: mpsc::Sender<SessionEvent>,
    stop: CancellationToken,
    ping_interval: Duration,
    silence_limit: Duration,
    close_timeout: Duration,
}

impl Reader {
    async fn run(self, ws: WsStream) {
        let (mut write, mut read) = ws.split();
        let mut ping = interval_at(Instant::now() + self.ping_interval, self.ping_interval);
        let mut last_seen = Instant::now();

        let terminal = loop {
            let frame = tokio::select! {
                biased;
                _ = self.stop.cancelled() => break None,
                _ = sleep_until(last_seen + self.silence_limit) => {
                    warn!(session = self.id, silent = ?self.silence_limit, "Upbit peer went silent");
                    break Some(SessionEvent::Failed(SessionError::KeepAlive(self.silence_limit)));
                }
                _ = ping.tick() => {
                    if let Err(e) = write.send(Message::Ping(Bytes::new())).await {
                        break Some(SessionEvent::Failed(SessionError::Transport(e.to_string())));
                    }
                    continue;
                }
                msg = read.next() => msg,
            };

            last_seen = Instant::now();
            let payload = match frame {
                Some(Ok(Message::Text(text))) => Bytes::copy_from_slice(text.as_bytes()),
                Some(Ok(Message::Binary(bin))) => bin,
                Some(Ok(Message::Close(reason))) => {
                    info!(session = self.id, ?reason, "Upbit closed the stream");
                    break Some(SessionEvent::Closed);
                }
                Some(Ok(_)) => continue,
                Some(Err(e)) => break Some(SessionEvent::Failed(SessionError::Transport(e.to_string()))),
                None => break Some(SessionEvent::Closed),
            };

            trace!(session = self.id, bytes = payload.len(), "Frame received");
            tokio::select! {
                biased;
                _ = self.stop.cancelled() => break None,
                sent = self.tx.send(SessionEvent::Frame(payload)) => {
                    if sent.is_err() {
                        break None;
                    }
                }
            }
        };

        match terminal {
            None => {
                if timeout(self.close_timeout, write.close()).await.is_err() {
                    debug!(session = self.id, "Closing handshake timed out");
                }
                debug!(session = self.id, "Session closed locally");
            }
            Some(event) => {
                // The receiver may be gone or full; it sees `Closed` either way.
                let _ = self.tx.try_send(event);
            }
        }
    }
}
