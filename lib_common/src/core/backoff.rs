//! # Backoff & Reconnect Controller
//!
//! `Backoff` is the plain doubling delay (floor 1 s, cap 30 s by default).
//! `ReconnectController` drives a `Connector` until it yields a session,
//! sleeping the backoff delay between failures. It never gives up on its own;
//! the only way out without a session is the cancellation token.
//!
//! The controller is long lived: the manager keeps one instance, so a
//! success resets the delay for the *next* outage and consecutive outages
//! without a success in between keep escalating.

use std::time::Duration;

use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::core::session::{Connector, Session};
use crate::core::symbols::SymbolSet;

/// Bounds of the exponential backoff.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffConfig {
    pub floor: Duration,
    pub cap: Duration,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            floor: Duration::from_secs(1),
            cap: Duration::from_secs(30),
        }
    }
}

impl BackoffConfig {
    pub fn from_millis(floor_ms: u64, cap_ms: u64) -> Self {
        Self {
            floor: Duration::from_millis(floor_ms),
            cap: Duration::from_millis(cap_ms),
        }
    }
}

/// Doubling delay with a floor and a cap.
#[derive(Debug, Clone)]
pub struct Backoff {
    config: BackoffConfig,
    current: Duration,
}

impl Backoff {
    pub fn new(config: BackoffConfig) -> Self {
        let floor = config.floor.min(config.cap);
        Self {
            config: BackoffConfig { floor, cap: config.cap },
            current: floor,
        }
    }

    /// Returns the delay to wait now and doubles the next one, up to the cap.
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.current;
        self.current = self.current.saturating_mul(2).min(self.config.cap);
        delay
    }

    /// The delay the next failure will wait.
    pub fn peek(&self) -> Duration {
        self.current
    }

    pub fn reset(&mut self) {
        self.current = self.config.floor;
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Self::new(BackoffConfig::default())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconnectPhase {
    Idle,
    Connecting,
    Connected,
    Failed,
}

/// Retry loop around `Connector::connect`.
#[derive(Debug)]
pub struct ReconnectController {
    backoff: Backoff,
    phase: ReconnectPhase,
    attempts: u64,
    failures: u64,
}

impl ReconnectController {
    pub fn new(config: BackoffConfig) -> Self {
        Self {
            backoff: Backoff::new(config),
            phase: ReconnectPhase::Idle,
            attempts: 0,
            failures: 0,
        }
    }

    pub fn phase(&self) -> ReconnectPhase {
        self.phase
    }

    /// Total connect attempts made by this controller.
    pub fn attempts(&self) -> u64 {
        self.attempts
    }

    /// Total failed connect attempts.
    pub fn failures(&self) -> u64 {
        self.failures
    }

    pub fn backoff(&self) -> &Backoff {
        &self.backoff
    }

    /// Connects to `symbols`, retrying with backoff until a session is
    /// established or `cancel` fires.
    ///
    /// Returns `None` only on cancellation. A connect attempt still in flight
    /// when `cancel` fires is dropped; a session that completed at the same
    /// moment is closed before returning.
    pub async fn establish<C: Connector>(
        &mut self,
        connector: &C,
        symbols: &SymbolSet,
        cancel: &CancellationToken,
    ) -> Option<C::Session> {
        loop {
            if cancel.is_cancelled() {
                self.phase = ReconnectPhase::Idle;
                return None;
            }

            self.phase = ReconnectPhase::Connecting;
            self.attempts += 1;
            debug!(attempt = self.attempts, %symbols, "Connecting upstream");

            let attempt = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    debug!("Connect attempt cancelled");
                    self.phase = ReconnectPhase::Idle;
                    return None;
                }
                result = connector.connect(symbols) => result,
            };

            match attempt {
                Ok(session) => {
                    if cancel.is_cancelled() {
                        session.close().await;
                        self.phase = ReconnectPhase::Idle;
                        return None;
                    }
                    self.phase = ReconnectPhase::Connected;
                    self.backoff.reset();
                    info!(session = session.id(), "Upstream session established");
                    return Some(session);
                }
                Err(e) => {
                    self.phase = ReconnectPhase::Failed;
                    self.failures += 1;
                    let delay = self.backoff.next_delay();
                    warn!(error = %e, delay_ms = delay.as_millis() as u64, "Connect failed, backing off");

                    tokio::select! {
                        biased;
                        _ = cancel.cancelled() => {
                            self.phase = ReconnectPhase::Idle;
                            return None;
                        }
                        _ = sleep(delay) => {}
                    }
                }
            }
        }
    }
}

impl Default for ReconnectController {
    fn default() -> Self {
        Self::new(BackoffConfig::default())
    }
}
