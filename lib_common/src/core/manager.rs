//! # Subscription Manager
//!
//! Owns the active upstream session, the subscribed symbol set and the
//! recency filter, and keeps the downstream publish stream flowing across
//! failures and re-subscriptions.
//!
//! ## Concurrency model
//!
//! - **Coordination lock**: a `tokio::sync::Mutex` around the session slot,
//!   the symbol set, the epoch and the reconnect controller. A swap holds it
//!   from opening the new session until the old one is closed; a
//!   failure-driven reconnect holds it until the replacement is installed.
//!   Nothing else mutates those fields.
//! - **Active watch**: every installed session is published through a
//!   `watch` channel. The receive loop never takes the coordination lock to
//!   find out what to read from; it follows the watch.
//! - **Recency filter**: behind a short `std::sync::Mutex` together with the
//!   epoch it belongs to. Frames from a superseded session are checked
//!   against it but never recorded.
//! - **Supersession**: a swap announces itself (`swap_waiting`) and cancels
//!   any in-flight reconnect before queueing on the lock, so a subscription
//!   change never waits behind an outage of the set it is replacing. An
//!   update whose caller goes away part way withdraws that announcement
//!   (`SwapTicket`), so the receive loop is never left waiting on it.

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex as StdMutex, MutexGuard as StdMutexGuard, OnceLock, PoisonError};
use std::time::Duration;

use serde::Serialize;
use tokio::sync::{watch, Mutex, MutexGuard};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

use crate::core::backoff::{BackoffConfig, ReconnectController};
use crate::core::broadcast::{BroadcastSink, TradeMessage};
use crate::core::error::{DecodeError, ManagerError, SessionError};
use crate::core::recency::RecencyFilter;
use crate::core::session::{Connector, Session, SessionEvent};
use crate::core::symbols::SymbolSet;

/// Callback receiving human-readable alerts (failed swaps).
pub type AlertHook = Arc<dyn Fn(String) + Send + Sync>;

/// Lifecycle phase of the manager, mirrored through `watch_phase`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Phase {
    Idle,
    Streaming,
    Swapping,
    Reconnecting,
    Stopped,
}

#[derive(Debug, Clone)]
pub struct ManagerOptions {
    pub backoff: BackoffConfig,
    /// How long a freshly opened swap session must stay open before the old
    /// one is retired.
    pub swap_verify: Duration,
    /// Upper bound on how long `stop` waits for the receive loop.
    pub stop_grace: Duration,
}

impl Default for ManagerOptions {
    fn default() -> Self {
        Self {
            backoff: BackoffConfig::default(),
            swap_verify: Duration::from_millis(500),
            stop_grace: Duration::from_secs(5),
        }
    }
}

/// Result of `update_subscription`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SwapOutcome {
    /// The new session replaced the old one.
    Swapped { session_id: u64 },
    /// Opening the new session failed; the healthy old session stays active.
    Retained,
    /// Opening the new session failed and the old one was dead too; the
    /// reconnect controller established a session for the new set instead.
    Recovered { session_id: u64 },
    /// Same markets as the current subscription; only the ranks were updated.
    Unchanged,
}

/// Point-in-time counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ManagerStats {
    pub forwarded: u64,
    pub duplicates: u64,
    pub decode_errors: u64,
    pub control_frames: u64,
    pub reconnects: u64,
    pub swaps: u64,
    pub failed_swaps: u64,
}

#[derive(Default)]
struct Counters {
    forwarded: AtomicU64,
    duplicates: AtomicU64,
    decode_errors: AtomicU64,
    control_frames: AtomicU64,
    reconnects: AtomicU64,
    swaps: AtomicU64,
    failed_swaps: AtomicU64,
}

impl Counters {
    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    fn snapshot(&self) -> ManagerStats {
        ManagerStats {
            forwarded: self.forwarded.load(Ordering::Relaxed),
            duplicates: self.duplicates.load(Ordering::Relaxed),
            decode_errors: self.decode_errors.load(Ordering::Relaxed),
            control_frames: self.control_frames.load(Ordering::Relaxed),
            reconnects: self.reconnects.load(Ordering::Relaxed),
            swaps: self.swaps.load(Ordering::Relaxed),
            failed_swaps: self.failed_swaps.load(Ordering::Relaxed),
        }
    }
}

/// What the receive loop reads from: the published session and the
/// subscription it belongs to.
pub struct Active<S> {
    session: Option<Arc<S>>,
    symbols: SymbolSet,
    epoch: u64,
}

impl<S> Clone for Active<S> {
    fn clone(&self) -> Self {
        Self {
            session: self.session.clone(),
            symbols: self.symbols.clone(),
            epoch: self.epoch,
        }
    }
}

impl<S: Session> Active<S> {
    pub fn session_id(&self) -> Option<u64> {
        self.session.as_ref().map(|s| s.id())
    }

    pub fn symbols(&self) -> &SymbolSet {
        &self.symbols
    }

    pub fn epoch(&self) -> u64 {
        self.epoch
    }
}

struct Coordination<S> {
    symbols: SymbolSet,
    active: Option<Arc<S>>,
    reconnect: ReconnectController,
    epoch: u64,
}

struct FilterState {
    epoch: u64,
    filter: RecencyFilter,
}

struct Inner<C: Connector> {
    connector: C,
    sink: Arc<dyn BroadcastSink>,
    options: ManagerOptions,
    coordination: Mutex<Coordination<C::Session>>,
    active_tx: watch::Sender<Active<C::Session>>,
    phase_tx: watch::Sender<Phase>,
    filter: StdMutex<FilterState>,
    shutdown: CancellationToken,
    reconnect_cancel: StdMutex<Option<CancellationToken>>,
    swap_waiting: AtomicUsize,
    started: AtomicBool,
    task: StdMutex<Option<JoinHandle<()>>>,
    counters: Counters,
    alert: OnceLock<AlertHook>,
}

fn lock<T>(mutex: &StdMutex<T>) -> StdMutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Bookkeeping of one `update_subscription` call.
///
/// The call announces itself in `swap_waiting` while queued and holds
/// `Phase::Swapping` while it owns the lock; the receive loop defers to it in
/// both states. If the caller's future is dropped part way, `Drop` undoes
/// both and wakes the receive loop so it can recover on its own.
struct SwapTicket<'a, C: Connector> {
    inner: &'a Inner<C>,
    queued: bool,
    swapping: bool,
}

impl<'a, C: Connector> SwapTicket<'a, C> {
    fn queue(inner: &'a Inner<C>) -> Self {
        inner.swap_waiting.fetch_add(1, Ordering::SeqCst);
        Self {
            inner,
            queued: true,
            swapping: false,
        }
    }

    /// The coordination lock is held; the swap starts.
    fn begin(&mut self) {
        self.inner.set_phase(Phase::Swapping);
        self.inner.swap_waiting.fetch_sub(1, Ordering::SeqCst);
        self.queued = false;
        self.swapping = true;
    }

    /// The swap ran to completion and set the phase itself.
    fn finish(&mut self) {
        self.swapping = false;
    }
}

impl<C: Connector> Drop for SwapTicket<'_, C> {
    fn drop(&mut self) {
        if !self.queued && !self.swapping {
            return;
        }
        let inner = self.inner;
        if self.queued {
            inner.swap_waiting.fetch_sub(1, Ordering::SeqCst);
        }
        if self.swapping && *inner.phase_tx.borrow() == Phase::Swapping {
            let alive = inner
                .active_tx
                .borrow()
                .session
                .as_ref()
                .is_some_and(|s| !s.is_closed());
            let phase = if inner.shutdown.is_cancelled() {
                Phase::Stopped
            } else if alive {
                Phase::Streaming
            } else {
                Phase::Reconnecting
            };
            inner.set_phase(phase);
        }
        debug!(queued = self.queued, "Subscription update abandoned");
        // A receive loop parked behind this update re-checks the session.
        inner.active_tx.send_modify(|_| {});
    }
}

/// Keeps one upstream subscription alive and re-targetable.
///
/// Cheap to clone; all clones drive the same manager.
pub struct SubscriptionManager<C: Connector> {
    inner: Arc<Inner<C>>,
}

impl<C: Connector> Clone for SubscriptionManager<C> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<C: Connector> SubscriptionManager<C> {
    pub fn new(
        connector: C,
        sink: impl BroadcastSink,
        symbols: SymbolSet,
        options: ManagerOptions,
    ) -> Self {
        let (active_tx, _) = watch::channel(Active {
            session: None,
            symbols: symbols.clone(),
            epoch: 0,
        });
        let (phase_tx, _) = watch::channel(Phase::Idle);
        let filter = FilterState {
            epoch: 0,
            filter: RecencyFilter::default(),
        };

        Self {
            inner: Arc::new(Inner {
                connector,
                sink: Arc::new(sink),
                coordination: Mutex::new(Coordination {
                    symbols,
                    active: None,
                    reconnect: ReconnectController::new(options.backoff),
                    epoch: 0,
                }),
                options,
                active_tx,
                phase_tx,
                filter: StdMutex::new(filter),
                shutdown: CancellationToken::new(),
                reconnect_cancel: StdMutex::new(None),
                swap_waiting: AtomicUsize::new(0),
                started: AtomicBool::new(false),
                task: StdMutex::new(None),
                counters: Counters::default(),
                alert: OnceLock::new(),
            }),
        }
    }

    /// Installs the alert callback. Only the first call has an effect.
    pub fn set_alert(&self, hook: impl Fn(String) + Send + Sync + 'static) -> bool {
        self.inner.alert.set(Arc::new(hook)).is_ok()
    }

    /// Establishes the first session (retrying with backoff) and spawns the
    /// receive loop.
    pub async fn start(&self) -> Result<(), ManagerError> {
        let inner = &self.inner;
        if inner.shutdown.is_cancelled() {
            return Err(ManagerError::Stopped);
        }

        let mut coord = inner.coordination.lock().await;
        if coord.symbols.is_empty() {
            return Err(ManagerError::EmptySymbolSet);
        }
        if inner.started.swap(true, Ordering::SeqCst) {
            return Err(ManagerError::AlreadyStarted);
        }

        info!(symbols = %coord.symbols, "Starting subscription manager");
        inner.set_phase(Phase::Reconnecting);

        let cancel = inner.shutdown.child_token();
        let symbols = coord.symbols.clone();
        let Some(session) = coord
            .reconnect
            .establish(&inner.connector, &symbols, &cancel)
            .await
        else {
            inner.set_phase(Phase::Stopped);
            return Err(ManagerError::Stopped);
        };

        let session = Arc::new(session);
        coord.active = Some(Arc::clone(&session));
        inner.publish(&coord);
        inner.set_phase(Phase::Streaming);
        drop(coord);

        let handle = tokio::spawn(Arc::clone(inner).receive_loop());
        *lock(&inner.task) = Some(handle);
        Ok(())
    }

    /// Replaces the subscription with `symbols` without a gap in the stream.
    ///
    /// Concurrent calls are serialized; each one operates on the state the
    /// previous one left behind.
    pub async fn update_subscription(&self, symbols: SymbolSet) -> Result<SwapOutcome, ManagerError> {
        let inner = &self.inner;
        if symbols.is_empty() {
            return Err(ManagerError::EmptySymbolSet);
        }
        if inner.shutdown.is_cancelled() {
            return Err(ManagerError::Stopped);
        }
        if !inner.started.load(Ordering::SeqCst) {
            return Err(ManagerError::NotStarted);
        }

        // Declared before the lock guard so it is dropped after it.
        let mut ticket = SwapTicket::queue(inner);
        if let Some(token) = lock(&inner.reconnect_cancel).as_ref() {
            debug!("Subscription update supersedes in-flight reconnect");
            token.cancel();
        }

        let coord = tokio::select! {
            _ = inner.shutdown.cancelled() => return Err(ManagerError::Stopped),
            coord = inner.coordination.lock() => coord,
        };
        ticket.begin();

        let result = inner.swap(coord, symbols).await;
        ticket.finish();
        if result.is_err() {
            inner.set_phase(Phase::Stopped);
        }
        result
    }

    /// Stops the receive loop and closes the active session.
    pub async fn stop(&self) {
        let inner = &self.inner;
        inner.shutdown.cancel();

        {
            let mut coord = inner.coordination.lock().await;
            let retired = coord.active.take();
            inner.publish(&coord);
            if let Some(session) = retired {
                session.close().await;
            }
            inner.set_phase(Phase::Stopped);
        }

        let handle = lock(&inner.task).take();
        if let Some(mut handle) = handle {
            if timeout(inner.options.stop_grace, &mut handle).await.is_err() {
                warn!(grace = ?inner.options.stop_grace, "Receive loop did not stop in time, aborting");
                handle.abort();
            }
        }
        info!(stats = ?inner.counters.snapshot(), "Subscription manager stopped");
    }

    pub fn phase(&self) -> Phase {
        *self.inner.phase_tx.borrow()
    }

    pub fn watch_phase(&self) -> watch::Receiver<Phase> {
        self.inner.phase_tx.subscribe()
    }

    /// Follows every published session.
    pub fn watch_active(&self) -> watch::Receiver<Active<C::Session>> {
        self.inner.active_tx.subscribe()
    }

    pub fn active_session_id(&self) -> Option<u64> {
        self.inner.active_tx.borrow().session_id()
    }

    /// The symbol set of the published session.
    pub fn symbols(&self) -> SymbolSet {
        self.inner.active_tx.borrow().symbols.clone()
    }

    pub fn epoch(&self) -> u64 {
        self.inner.active_tx.borrow().epoch
    }

    pub fn stats(&self) -> ManagerStats {
        self.inner.counters.snapshot()
    }
}

impl<C: Connector> Inner<C> {
    fn set_phase(&self, phase: Phase) {
        self.phase_tx.send_replace(phase);
    }

    /// Publishes the session slot as it is in `coord`. Always bumps the watch
    /// version so waiters wake up even when nothing changed.
    fn publish(&self, coord: &Coordination<C::Session>) {
        self.active_tx.send_replace(Active {
            session: coord.active.clone(),
            symbols: coord.symbols.clone(),
            epoch: coord.epoch,
        });
    }

    fn raise_alert(&self, text: String) {
        if let Some(hook) = self.alert.get() {
            hook(text);
        }
    }

    /// Installs `session` as the start of a new epoch and retires the old one.
    ///
    /// The filter is reset and the new session published under the filter
    /// lock, so no frame of the new epoch can be checked against the old
    /// window.
    async fn install_epoch(
        &self,
        coord: &mut Coordination<C::Session>,
        session: C::Session,
        symbols: SymbolSet,
    ) -> u64 {
        let session = Arc::new(session);
        let session_id = session.id();
        let old = coord.active.replace(session);
        coord.symbols = symbols;
        coord.epoch += 1;
        {
            let mut state = lock(&self.filter);
            state.filter.clear();
            state.epoch = coord.epoch;
            self.publish(coord);
        }
        if let Some(old) = old {
            old.close().await;
            debug!(session = old.id(), "Retired previous session");
        }
        Counters::bump(&self.counters.swaps);
        session_id
    }

    async fn swap(
        &self,
        mut coord: MutexGuard<'_, Coordination<C::Session>>,
        symbols: SymbolSet,
    ) -> Result<SwapOutcome, ManagerError> {
        let old_alive = coord.active.as_ref().is_some_and(|s| !s.is_closed());

        if old_alive && symbols.same_markets(&coord.symbols) {
            debug!(%symbols, "Markets unchanged, keeping session");
            coord.symbols = symbols;
            self.publish(&coord);
            self.set_phase(Phase::Streaming);
            return Ok(SwapOutcome::Unchanged);
        }

        info!(from = %coord.symbols, to = %symbols, "Swapping subscription");

        let attempt = tokio::select! {
            _ = self.shutdown.cancelled() => return Err(ManagerError::Stopped),
            result = self.connector.connect(&symbols) => result,
        };

        let verified = match attempt {
            Ok(session) => {
                let verify = self.options.swap_verify;
                if timeout(verify, session.closed()).await.is_ok() {
                    session.close().await;
                    Err(SessionError::Transport(format!(
                        "new session closed within {verify:?} of opening"
                    )))
                } else {
                    Ok(session)
                }
            }
            Err(e) => Err(e),
        };

        match verified {
            Ok(session) => {
                let session_id = self.install_epoch(&mut coord, session, symbols).await;
                self.set_phase(Phase::Streaming);
                info!(session = session_id, epoch = coord.epoch, symbols = %coord.symbols, "Subscription swapped");
                Ok(SwapOutcome::Swapped { session_id })
            }
            Err(e) => {
                Counters::bump(&self.counters.failed_swaps);
                error!(error = %e, requested = %symbols, "Subscription update failed");
                self.raise_alert(format!(
                    "subscription update to {symbols} failed: {e}; keeping {}",
                    coord.symbols
                ));

                let old_alive = coord.active.as_ref().is_some_and(|s| !s.is_closed());
                if old_alive {
                    self.publish(&coord);
                    self.set_phase(Phase::Streaming);
                    return Ok(SwapOutcome::Retained);
                }

                warn!(%symbols, "Previous session is down too, reconnecting to requested set");
                self.set_phase(Phase::Reconnecting);
                Counters::bump(&self.counters.reconnects);
                let cancel = self.shutdown.child_token();
                let Some(session) = coord.reconnect.establish(&self.connector, &symbols, &cancel).await else {
                    return Err(ManagerError::Stopped);
                };
                let session_id = self.install_epoch(&mut coord, session, symbols).await;
                self.set_phase(Phase::Streaming);
                Ok(SwapOutcome::Recovered { session_id })
            }
        }
    }

    async fn receive_loop(self: Arc<Self>) {
        let mut active_rx = self.active_tx.subscribe();
        debug!("Receive loop started");

        loop {
            if self.shutdown.is_cancelled() {
                break;
            }

            let (session, epoch) = {
                let active = active_rx.borrow_and_update();
                (active.session.clone(), active.epoch)
            };

            let Some(session) = session else {
                tokio::select! {
                    _ = self.shutdown.cancelled() => break,
                    changed = active_rx.changed() => if changed.is_err() { break },
                }
                continue;
            };

            let event = tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => break,
                event = session.recv() => event,
            };

            match event {
                SessionEvent::Frame(frame) => self.handle_frame(&frame, epoch),
                SessionEvent::Closed | SessionEvent::Failed(_) => {
                    match &event {
                        SessionEvent::Failed(e) => warn!(session = session.id(), error = %e, "Upstream session failed"),
                        _ => info!(session = session.id(), "Upstream session closed"),
                    }
                    if !self.recover(&session, &mut active_rx).await {
                        break;
                    }
                }
            }
        }

        debug!("Receive loop exited");
    }

    fn handle_frame(&self, frame: &[u8], epoch: u64) {
        match TradeMessage::decode(frame) {
            Ok(message) => {
                let novel = {
                    let mut state = lock(&self.filter);
                    if state.filter.seen(&message.sequential_id) {
                        false
                    } else {
                        if state.epoch == epoch {
                            state.filter.record(message.sequential_id.clone());
                        }
                        true
                    }
                };

                if !novel {
                    Counters::bump(&self.counters.duplicates);
                    debug!(sequential_id = %message.sequential_id, "Duplicate trade dropped");
                    return;
                }

                Counters::bump(&self.counters.forwarded);
                trace!(sequential_id = %message.sequential_id, code = message.code(), "Forwarding trade");
                self.sink.publish(message);
            }
            Err(DecodeError::Upstream { name, message }) => {
                Counters::bump(&self.counters.control_frames);
                error!(%name, %message, "Upstream reported an error");
            }
            Err(DecodeError::Status(status)) => {
                Counters::bump(&self.counters.control_frames);
                trace!(%status, "Upstream status frame");
            }
            Err(e) => {
                Counters::bump(&self.counters.decode_errors);
                warn!(error = %e, "Dropping undecodable frame");
            }
        }
    }

    /// Handles the end of `failed`. Returns `false` when the manager is
    /// shutting down.
    async fn recover(
        &self,
        failed: &Arc<C::Session>,
        active_rx: &mut watch::Receiver<Active<C::Session>>,
    ) -> bool {
        failed.close().await;

        let swapping = *self.phase_tx.borrow() == Phase::Swapping
            || self.swap_waiting.load(Ordering::SeqCst) > 0;
        if swapping {
            debug!(session = failed.id(), "Swap in progress, waiting for its session");
            return tokio::select! {
                _ = self.shutdown.cancelled() => false,
                changed = active_rx.changed() => changed.is_ok(),
            };
        }

        if active_rx.borrow().session_id() != Some(failed.id()) {
            return true;
        }

        let mut coord = tokio::select! {
            _ = self.shutdown.cancelled() => return false,
            coord = self.coordination.lock() => coord,
        };
        let still_active = coord.active.as_ref().is_some_and(|s| s.id() == failed.id());
        if !still_active {
            return true;
        }

        self.set_phase(Phase::Reconnecting);
        Counters::bump(&self.counters.reconnects);

        let cancel = self.shutdown.child_token();
        *lock(&self.reconnect_cancel) = Some(cancel.clone());
        if self.swap_waiting.load(Ordering::SeqCst) > 0 {
            cancel.cancel();
        }

        let symbols = coord.symbols.clone();
        let replacement = coord.reconnect.establish(&self.connector, &symbols, &cancel).await;
        *lock(&self.reconnect_cancel) = None;

        match replacement {
            Some(session) => {
                let session_id = session.id();
                coord.active = Some(Arc::new(session));
                self.publish(&coord);
                self.set_phase(Phase::Streaming);
                info!(session = session_id, "Reconnected upstream");
                true
            }
            None if self.shutdown.is_cancelled() => false,
            None => {
                // A queued swap takes over from here.
                debug!("Reconnect superseded by subscription update");
                true
            }
        }
    }
}
