use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, OnceLock};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::{mpsc, watch, Semaphore};
use tokio::time::{timeout, Instant};
use tokio_util::sync::CancellationToken;

use lib_common::core::{
    Active, BackoffConfig, BroadcastSink, Connector, ManagerError, ManagerOptions, Phase, Session,
    SessionError, SessionEvent, SubscriptionManager, SwapOutcome, SymbolSet, TradeMessage,
    next_session_id,
};

// --- Test doubles ---

#[derive(Debug, Clone, PartialEq, Eq)]
struct CloseRecord {
    session: u64,
    /// Session published as active at the moment of closing.
    active_at_close: Option<u64>,
}

struct World {
    feeds: Mutex<HashMap<u64, mpsc::UnboundedSender<SessionEvent>>>,
    opened: Mutex<Vec<(u64, SymbolSet)>>,
    attempts: Mutex<Vec<Instant>>,
    closes: Mutex<Vec<CloseRecord>>,
    tokens: Mutex<HashMap<u64, CancellationToken>>,
    fail_next: AtomicUsize,
    gated: AtomicBool,
    gate: Semaphore,
    observer: OnceLock<watch::Receiver<Active<MockSession>>>,
}

impl Default for World {
    fn default() -> Self {
        Self {
            feeds: Mutex::default(),
            opened: Mutex::default(),
            attempts: Mutex::default(),
            closes: Mutex::default(),
            tokens: Mutex::default(),
            fail_next: AtomicUsize::new(0),
            gated: AtomicBool::new(false),
            gate: Semaphore::new(0),
            observer: OnceLock::new(),
        }
    }
}

impl World {
    fn feed(&self, session: u64, event: SessionEvent) {
        if let Some(tx) = self.feeds.lock().unwrap().get(&session) {
            let _ = tx.send(event);
        }
    }

    fn trade(&self, session: u64, id: u64) {
        let json = format!(r#"{{"type":"trade","code":"KRW-BTC","sequential_id":{id}}}"#);
        self.feed(session, SessionEvent::Frame(Bytes::from(json)));
    }

    fn raw(&self, session: u64, frame: &'static str) {
        self.feed(session, SessionEvent::Frame(Bytes::from_static(frame.as_bytes())));
    }

    /// Ends `session` from the remote side.
    fn kill(&self, session: u64) {
        if let Some(token) = self.tokens.lock().unwrap().get(&session) {
            token.cancel();
        }
    }

    fn opened(&self) -> Vec<(u64, SymbolSet)> {
        self.opened.lock().unwrap().clone()
    }

    fn attempt_count(&self) -> usize {
        self.attempts.lock().unwrap().len()
    }

    fn attempt_gaps(&self) -> Vec<Duration> {
        let attempts = self.attempts.lock().unwrap();
        attempts.windows(2).map(|w| w[1] - w[0]).collect()
    }

    fn closes(&self) -> Vec<CloseRecord> {
        self.closes.lock().unwrap().clone()
    }

    fn close_gate(&self) {
        self.gated.store(true, Ordering::SeqCst);
    }

    fn open_gate(&self) {
        self.gated.store(false, Ordering::SeqCst);
        self.gate.add_permits(64);
    }
}

struct MockSession {
    id: u64,
    symbols: SymbolSet,
    events: tokio::sync::Mutex<mpsc::UnboundedReceiver<SessionEvent>>,
    closed: CancellationToken,
    world: Arc<World>,
}

#[async_trait]
impl Session for MockSession {
    fn id(&self) -> u64 {
        self.id
    }

    fn symbols(&self) -> &SymbolSet {
        &self.symbols
    }

    async fn recv(&self) -> SessionEvent {
        if self.closed.is_cancelled() {
            return SessionEvent::Closed;
        }
        let mut events = self.events.lock().await;
        let event = tokio::select! {
            biased;
            _ = self.closed.cancelled() => SessionEvent::Closed,
            event = events.recv() => event.unwrap_or(SessionEvent::Closed),
        };
        if !matches!(event, SessionEvent::Frame(_)) {
            self.closed.cancel();
        }
        event
    }

    async fn close(&self) {
        if self.closed.is_cancelled() {
            return;
        }
        let active_at_close = self.world.observer.get().and_then(|rx| rx.borrow().session_id());
        self.world.closes.lock().unwrap().push(CloseRecord {
            session: self.id,
            active_at_close,
        });
        self.closed.cancel();
    }

    fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }

    async fn closed(&self) {
        self.closed.cancelled().await
    }
}

#[derive(Clone, Default)]
struct MockConnector {
    world: Arc<World>,
}

#[async_trait]
impl Connector for MockConnector {
    type Session = MockSession;

    async fn connect(&self, symbols: &SymbolSet) -> Result<MockSession, SessionError> {
        let world = &self.world;
        world.attempts.lock().unwrap().push(Instant::now());

        let left = world.fail_next.load(Ordering::SeqCst);
        if left > 0 {
            world.fail_next.store(left - 1, Ordering::SeqCst);
            return Err(SessionError::Handshake("connection refused".into()));
        }
        if world.gated.load(Ordering::SeqCst) {
            world
                .gate
                .acquire()
                .await
                .map_err(|_| SessionError::Closed)?
                .forget();
        }

        let (tx, rx) = mpsc::unbounded_channel();
        let id = next_session_id();
        let closed = CancellationToken::new();
        world.feeds.lock().unwrap().insert(id, tx);
        world.tokens.lock().unwrap().insert(id, closed.clone());
        world.opened.lock().unwrap().push((id, symbols.clone()));
        Ok(MockSession {
            id,
            symbols: symbols.clone(),
            events: tokio::sync::Mutex::new(rx),
            closed,
            world: Arc::clone(world),
        })
    }
}

#[derive(Default)]
struct RecordingSink {
    messages: Mutex<Vec<TradeMessage>>,
}

impl RecordingSink {
    fn ids(&self) -> Vec<String> {
        self.messages
            .lock()
            .unwrap()
            .iter()
            .map(|m| m.sequential_id.to_string())
            .collect()
    }

    fn len(&self) -> usize {
        self.messages.lock().unwrap().len()
    }
}

impl BroadcastSink for RecordingSink {
    fn publish(&self, message: TradeMessage) {
        self.messages.lock().unwrap().push(message);
    }
}

// --- Harness ---

struct Harness {
    world: Arc<World>,
    sink: Arc<RecordingSink>,
    manager: SubscriptionManager<MockConnector>,
}

fn options() -> ManagerOptions {
    ManagerOptions {
        backoff: BackoffConfig::default(),
        swap_verify: Duration::ZERO,
        stop_grace: Duration::from_secs(1),
    }
}

fn symbols(markets: &[&str]) -> SymbolSet {
    SymbolSet::from_markets(markets.iter().copied())
}

fn harness(markets: &[&str]) -> Harness {
    let connector = MockConnector::default();
    let world = Arc::clone(&connector.world);
    let sink = Arc::new(RecordingSink::default());
    let manager = SubscriptionManager::new(connector, Arc::clone(&sink), symbols(markets), options());
    let _ = world.observer.set(manager.watch_active());
    Harness { world, sink, manager }
}

impl Harness {
    fn active(&self) -> u64 {
        self.manager.active_session_id().expect("an active session")
    }
}

/// Polls `condition` until it holds, failing the test after 5 s.
async fn eventually(what: &str, condition: impl Fn() -> bool) {
    let waited = timeout(Duration::from_secs(5), async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await;
    assert!(waited.is_ok(), "timed out waiting for {what}");
}

// --- Scenarios ---

#[tokio::test]
async fn duplicate_within_a_stream_is_forwarded_once() {
    let h = harness(&["KRW-BTC"]);
    h.manager.start().await.unwrap();
    let session = h.active();

    for id in [10, 11, 10] {
        h.world.trade(session, id);
    }
    // Frames are handled in order, so once the marker is through the
    // duplicate has been seen.
    h.world.trade(session, 99);
    eventually("marker forwarded", || h.sink.ids().contains(&"99".to_string())).await;

    assert_eq!(h.sink.ids(), vec!["10", "11", "99"]);
    assert_eq!(h.manager.stats().forwarded, 3);
    assert_eq!(h.manager.stats().duplicates, 1);

    h.manager.stop().await;
}

#[tokio::test]
async fn swap_closes_old_session_and_resets_dedup_window() {
    let h = harness(&["KRW-BTC"]);
    h.manager.start().await.unwrap();
    let old = h.active();

    h.world.trade(old, 10);
    h.world.trade(old, 11);
    eventually("pre-swap trades", || h.sink.len() == 2).await;

    let outcome = h.manager.update_subscription(symbols(&["KRW-ETH"])).await.unwrap();
    let SwapOutcome::Swapped { session_id: new } = outcome else {
        panic!("expected a swap, got {outcome:?}");
    };
    assert_ne!(new, old);
    assert_eq!(h.active(), new);
    assert_eq!(h.manager.symbols(), symbols(&["KRW-ETH"]));
    assert_eq!(h.manager.epoch(), 1);
    assert_eq!(h.manager.phase(), Phase::Streaming);

    // The old session was retired only after the new one was published.
    assert_eq!(
        h.world.closes(),
        vec![CloseRecord {
            session: old,
            active_at_close: Some(new),
        }]
    );

    // An ID from the previous epoch is novel again; repeats within the new
    // epoch are still suppressed.
    h.world.trade(new, 10);
    h.world.trade(new, 10);
    h.world.trade(new, 12);
    eventually("post-swap trades", || h.sink.ids().contains(&"12".to_string())).await;
    assert_eq!(h.sink.ids(), vec!["10", "11", "10", "12"]);
    assert_eq!(h.manager.stats().swaps, 1);

    h.manager.stop().await;
}

#[tokio::test]
async fn old_session_is_closed_only_after_replacement_is_published() {
    let h = harness(&["KRW-BTC"]);
    h.manager.start().await.unwrap();

    let mut retired = Vec::new();
    for markets in [["KRW-ETH"], ["KRW-XRP"], ["KRW-SOL"]] {
        let before = h.active();
        let outcome = h.manager.update_subscription(symbols(&markets)).await.unwrap();
        let SwapOutcome::Swapped { session_id } = outcome else {
            panic!("expected a swap, got {outcome:?}");
        };
        assert_eq!(h.active(), session_id);
        retired.push(CloseRecord {
            session: before,
            active_at_close: Some(session_id),
        });
    }
    assert_eq!(h.world.closes(), retired);

    // Stop empties the slot before closing the last session.
    let last = h.active();
    h.manager.stop().await;
    assert_eq!(
        h.world.closes().last(),
        Some(&CloseRecord {
            session: last,
            active_at_close: None,
        })
    );
}

#[tokio::test(start_paused = true)]
async fn connect_failures_back_off_and_success_resets() {
    let h = harness(&["KRW-BTC"]);
    h.world.fail_next.store(3, Ordering::SeqCst);

    h.manager.start().await.unwrap();
    assert_eq!(
        h.world.attempt_gaps(),
        vec![Duration::from_secs(1), Duration::from_secs(2), Duration::from_secs(4)]
    );

    // The stream drops and the first reconnect attempt fails too: the wait
    // starts over at the floor.
    h.world.fail_next.store(1, Ordering::SeqCst);
    let first = h.active();
    h.world.feed(first, SessionEvent::Failed(SessionError::Transport("reset by peer".into())));
    eventually("reconnected", || h.manager.active_session_id().is_some_and(|id| id != first)).await;

    let gaps = h.world.attempt_gaps();
    assert_eq!(gaps.len(), 5);
    assert_eq!(gaps[4], Duration::from_secs(1));
    assert_eq!(h.manager.stats().reconnects, 1);
    assert_eq!(h.manager.phase(), Phase::Streaming);

    h.manager.stop().await;
}

#[tokio::test]
async fn dedup_window_survives_reconnects() {
    let h = harness(&["KRW-BTC"]);
    h.manager.start().await.unwrap();
    let first = h.active();

    h.world.trade(first, 10);
    eventually("first trade", || h.sink.len() == 1).await;
    h.world.feed(first, SessionEvent::Closed);
    eventually("reconnected", || h.manager.active_session_id().is_some_and(|id| id != first)).await;

    let second = h.active();
    h.world.trade(second, 10);
    h.world.trade(second, 11);
    eventually("second trade", || h.sink.ids().contains(&"11".to_string())).await;
    assert_eq!(h.sink.ids(), vec!["10", "11"]);
    assert_eq!(h.manager.epoch(), 0);
    assert_eq!(h.manager.symbols(), symbols(&["KRW-BTC"]));

    h.manager.stop().await;
}

#[tokio::test]
async fn failed_swap_keeps_healthy_session() {
    let h = harness(&["KRW-BTC"]);
    let alerts = Arc::new(Mutex::new(Vec::new()));
    {
        let alerts = Arc::clone(&alerts);
        assert!(h.manager.set_alert(move |text| alerts.lock().unwrap().push(text)));
    }
    h.manager.start().await.unwrap();
    let old = h.active();

    h.world.fail_next.store(1, Ordering::SeqCst);
    let outcome = h.manager.update_subscription(symbols(&["KRW-ETH"])).await.unwrap();
    assert_eq!(outcome, SwapOutcome::Retained);
    assert_eq!(h.active(), old);
    assert_eq!(h.manager.symbols(), symbols(&["KRW-BTC"]));
    assert_eq!(h.manager.stats().failed_swaps, 1);
    assert_eq!(alerts.lock().unwrap().len(), 1);
    assert!(h.world.closes().is_empty());

    h.world.trade(old, 7);
    eventually("old session still streaming", || h.sink.len() == 1).await;

    h.manager.stop().await;
}

#[tokio::test]
async fn new_session_dying_during_verification_is_rejected() {
    let connector = MockConnector::default();
    let world = Arc::clone(&connector.world);
    let sink = Arc::new(RecordingSink::default());
    let manager = SubscriptionManager::new(
        connector,
        Arc::clone(&sink),
        symbols(&["KRW-BTC"]),
        ManagerOptions {
            swap_verify: Duration::from_secs(2),
            ..options()
        },
    );
    manager.start().await.unwrap();
    let old = manager.active_session_id().unwrap();

    let update = {
        let manager = manager.clone();
        tokio::spawn(async move { manager.update_subscription(symbols(&["KRW-ETH"])).await })
    };
    eventually("swap session opened", || world.opened().len() == 2).await;
    let doomed = world.opened()[1].0;
    world.kill(doomed);

    assert_eq!(update.await.unwrap(), Ok(SwapOutcome::Retained));
    assert_eq!(manager.active_session_id(), Some(old));
    assert_eq!(manager.symbols(), symbols(&["KRW-BTC"]));
    assert_eq!(manager.stats().failed_swaps, 1);

    manager.stop().await;
}

#[tokio::test]
async fn swap_supersedes_reconnect_and_recovers_when_old_is_dead() {
    let h = harness(&["KRW-BTC"]);
    h.manager.start().await.unwrap();
    let old = h.active();

    // The outage starts and the reconnect attempt hangs at the gate.
    h.world.close_gate();
    let attempts = h.world.attempt_count();
    h.world.feed(old, SessionEvent::Failed(SessionError::Transport("eof".into())));
    eventually("reconnect in flight", || h.world.attempt_count() == attempts + 1).await;
    assert_eq!(h.manager.phase(), Phase::Reconnecting);

    // The swap cancels the reconnect; its own connect fails, the old session
    // is dead, so it falls back to reconnecting to the requested set.
    h.world.fail_next.store(1, Ordering::SeqCst);
    let update = {
        let manager = h.manager.clone();
        tokio::spawn(async move { manager.update_subscription(symbols(&["KRW-ETH"])).await })
    };
    eventually("fallback connect in flight", || h.world.attempt_count() == attempts + 3).await;
    h.world.open_gate();

    let outcome = update.await.unwrap().unwrap();
    let SwapOutcome::Recovered { session_id } = outcome else {
        panic!("expected recovery, got {outcome:?}");
    };
    assert_eq!(h.active(), session_id);
    assert_eq!(h.manager.symbols(), symbols(&["KRW-ETH"]));
    assert_eq!(h.manager.epoch(), 1);
    assert_eq!(h.manager.stats().failed_swaps, 1);

    // The superseded reconnect never opened a session for the old set.
    let opened = h.world.opened();
    assert_eq!(opened.len(), 2);
    assert_eq!(opened[1].1, symbols(&["KRW-ETH"]));

    h.world.trade(session_id, 1);
    eventually("recovered session streaming", || h.sink.len() == 1).await;

    h.manager.stop().await;
}

#[tokio::test]
async fn update_dropped_while_queued_does_not_block_reconnect() {
    let h = harness(&["KRW-BTC"]);
    h.manager.start().await.unwrap();

    // The first update owns the lock and hangs in connect.
    h.world.close_gate();
    let attempts = h.world.attempt_count();
    let first = {
        let manager = h.manager.clone();
        tokio::spawn(async move { manager.update_subscription(symbols(&["KRW-ETH"])).await })
    };
    eventually("first swap connecting", || h.world.attempt_count() == attempts + 1).await;

    // The second caller gives up while still queued behind it.
    let abandoned = timeout(
        Duration::from_millis(50),
        h.manager.update_subscription(symbols(&["KRW-XRP"])),
    )
    .await;
    assert!(abandoned.is_err());

    h.world.open_gate();
    let SwapOutcome::Swapped { session_id } = first.await.unwrap().unwrap() else {
        panic!("expected the first update to swap");
    };
    assert_eq!(h.manager.phase(), Phase::Streaming);

    // An outage afterwards is recovered by the receive loop.
    h.world.kill(session_id);
    eventually("reconnected", || {
        h.manager.active_session_id().is_some_and(|id| id != session_id)
    })
    .await;
    assert_eq!(h.manager.symbols(), symbols(&["KRW-ETH"]));
    assert_eq!(h.manager.phase(), Phase::Streaming);
    assert_eq!(h.manager.stats().reconnects, 1);

    h.manager.stop().await;
}

#[tokio::test]
async fn update_dropped_mid_swap_restores_phase() {
    let h = harness(&["KRW-BTC"]);
    h.manager.start().await.unwrap();
    let old = h.active();

    h.world.close_gate();
    let abandoned = timeout(
        Duration::from_millis(50),
        h.manager.update_subscription(symbols(&["KRW-ETH"])),
    )
    .await;
    assert!(abandoned.is_err());
    assert_eq!(h.manager.phase(), Phase::Streaming);
    assert_eq!(h.active(), old);
    assert_eq!(h.manager.symbols(), symbols(&["KRW-BTC"]));

    h.world.open_gate();
    h.world.kill(old);
    eventually("reconnected", || h.manager.active_session_id().is_some_and(|id| id != old)).await;
    assert_eq!(h.manager.symbols(), symbols(&["KRW-BTC"]));
    assert_eq!(h.manager.phase(), Phase::Streaming);

    h.manager.stop().await;
}

#[tokio::test]
async fn update_dropped_during_outage_hands_back_to_reconnect() {
    let h = harness(&["KRW-BTC"]);
    h.manager.start().await.unwrap();
    let old = h.active();

    // The outage starts and the reconnect hangs at the gate.
    h.world.close_gate();
    let attempts = h.world.attempt_count();
    h.world.feed(old, SessionEvent::Failed(SessionError::Transport("eof".into())));
    eventually("reconnect in flight", || h.world.attempt_count() == attempts + 1).await;

    // An update supersedes the reconnect, hangs in its own connect and is
    // then abandoned. The receive loop was waiting on it.
    let abandoned = timeout(
        Duration::from_millis(100),
        h.manager.update_subscription(symbols(&["KRW-ETH"])),
    )
    .await;
    assert!(abandoned.is_err());
    assert_ne!(h.manager.phase(), Phase::Swapping);

    eventually("reconnect resumed", || h.world.attempt_count() >= attempts + 3).await;
    h.world.open_gate();
    eventually("reconnected", || h.manager.active_session_id().is_some_and(|id| id != old)).await;
    assert_eq!(h.manager.symbols(), symbols(&["KRW-BTC"]));
    assert_eq!(h.manager.phase(), Phase::Streaming);
    assert!(h.world.opened().iter().all(|(_, set)| *set == symbols(&["KRW-BTC"])));

    h.manager.stop().await;
}

#[tokio::test]
async fn concurrent_updates_are_serialized() {
    let h = harness(&["KRW-BTC"]);
    h.manager.start().await.unwrap();

    let (a, b) = tokio::join!(
        h.manager.update_subscription(symbols(&["KRW-ETH"])),
        h.manager.update_subscription(symbols(&["KRW-XRP"])),
    );
    assert!(matches!(a.unwrap(), SwapOutcome::Swapped { .. }));
    assert!(matches!(b.unwrap(), SwapOutcome::Swapped { .. }));

    assert_eq!(h.manager.symbols(), symbols(&["KRW-XRP"]));
    assert_eq!(h.manager.epoch(), 2);
    let opened = h.world.opened();
    assert_eq!(opened.len(), 3);
    assert_eq!(h.active(), opened[2].0);
    let closed: Vec<u64> = h.world.closes().iter().map(|c| c.session).collect();
    assert_eq!(closed, vec![opened[0].0, opened[1].0]);

    h.manager.stop().await;
}

#[tokio::test]
async fn same_markets_only_update_ranks() {
    let h = harness(&["KRW-BTC", "KRW-ETH"]);
    h.manager.start().await.unwrap();
    let session = h.active();

    let outcome = h
        .manager
        .update_subscription(symbols(&["KRW-ETH", "KRW-BTC"]))
        .await
        .unwrap();
    assert_eq!(outcome, SwapOutcome::Unchanged);
    assert_eq!(h.active(), session);
    assert_eq!(h.manager.symbols().rank_of("KRW-ETH"), Some(1));
    assert_eq!(h.manager.epoch(), 0);

    h.manager.stop().await;
}

#[tokio::test]
async fn control_and_malformed_frames_are_not_forwarded() {
    let h = harness(&["KRW-BTC"]);
    h.manager.start().await.unwrap();
    let session = h.active();

    h.world.raw(session, r#"{"status":"UP"}"#);
    h.world.raw(session, r#"{"error":{"name":"INVALID_AUTH","message":"nope"}}"#);
    h.world.raw(session, "garbage");
    h.world.raw(session, r#"{"code":"KRW-BTC"}"#);
    h.world.trade(session, 5);
    eventually("trade after junk", || h.sink.len() == 1).await;

    let stats = h.manager.stats();
    assert_eq!(stats.control_frames, 2);
    assert_eq!(stats.decode_errors, 2);
    assert_eq!(stats.forwarded, 1);

    h.manager.stop().await;
}

#[tokio::test]
async fn lifecycle_errors() {
    let h = harness(&["KRW-BTC"]);
    assert_eq!(
        h.manager.update_subscription(symbols(&["KRW-ETH"])).await,
        Err(ManagerError::NotStarted)
    );

    h.manager.start().await.unwrap();
    assert_eq!(h.manager.start().await, Err(ManagerError::AlreadyStarted));
    assert_eq!(
        h.manager.update_subscription(SymbolSet::default()).await,
        Err(ManagerError::EmptySymbolSet)
    );

    h.manager.stop().await;
    assert_eq!(h.manager.phase(), Phase::Stopped);
    assert_eq!(
        h.manager.update_subscription(symbols(&["KRW-ETH"])).await,
        Err(ManagerError::Stopped)
    );

    let empty = harness(&[]);
    assert_eq!(empty.manager.start().await, Err(ManagerError::EmptySymbolSet));
}

#[tokio::test]
async fn stop_closes_session_and_ends_receive_loop() {
    let h = harness(&["KRW-BTC"]);
    h.manager.start().await.unwrap();
    let session = h.active();

    timeout(Duration::from_secs(2), h.manager.stop())
        .await
        .expect("stop within grace");
    assert_eq!(h.manager.phase(), Phase::Stopped);
    assert_eq!(h.manager.active_session_id(), None);
    assert_eq!(h.world.closes()[0].session, session);

    // Frames arriving after stop go nowhere.
    h.world.trade(session, 1);
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(h.sink.len(), 0);
}

#[tokio::test(start_paused = true)]
async fn stop_interrupts_initial_backoff() {
    let h = harness(&["KRW-BTC"]);
    h.world.fail_next.store(usize::MAX, Ordering::SeqCst);

    let start = {
        let manager = h.manager.clone();
        tokio::spawn(async move { manager.start().await })
    };
    tokio::time::sleep(Duration::from_secs(60)).await;
    h.manager.stop().await;

    assert_eq!(start.await.unwrap(), Err(ManagerError::Stopped));
    assert_eq!(h.manager.phase(), Phase::Stopped);
    assert!(h.world.opened().is_empty());
}
