//! # Ranking Poller
//!
//! A self-scheduling poller that keeps the subscription pointed at the
//! current top-N markets. It wakes on calendar boundaries, fetches the
//! ranking, reports rank movements and asks the manager to swap whenever the
//! set of markets differs from what is actually subscribed.
//!
//! The poller never holds a symbol set of its own beyond `previous`, which is
//! refreshed from the manager after every swap attempt. A swap that failed is
//! therefore retried on the next tick.

use std::collections::HashMap;
use std::fmt::Write as _;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::core::error::ManagerError;
use crate::core::manager::{SubscriptionManager, SwapOutcome};
use crate::core::session::Connector;
use crate::core::symbols::{RankedSymbol, SymbolSet};
use crate::markets::RankingSource;
use crate::notify::NotifierHandle;
use crate::utils::schedule::wait_until_next_boundary;

/// A market whose rank moved between two polls.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RankMove {
    pub market: String,
    pub from: u32,
    pub to: u32,
}

/// Differences between two rankings.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RankChanges {
    pub moved: Vec<RankMove>,
    /// New entries, in their new rank order.
    pub added: Vec<RankedSymbol>,
    /// Entries that left the ranking, in their old rank order.
    pub removed: Vec<RankedSymbol>,
}

impl RankChanges {
    pub fn between(previous: &SymbolSet, current: &SymbolSet) -> Self {
        let old: HashMap<&str, u32> = previous.iter().map(|s| (s.market.as_str(), s.rank)).collect();
        let new: HashMap<&str, u32> = current.iter().map(|s| (s.market.as_str(), s.rank)).collect();

        let mut changes = Self::default();
        for symbol in current.iter() {
            match old.get(symbol.market.as_str()) {
                Some(&from) if from != symbol.rank => changes.moved.push(RankMove {
                    market: symbol.market.clone(),
                    from,
                    to: symbol.rank,
                }),
                Some(_) => {}
                None => changes.added.push(symbol.clone()),
            }
        }
        changes.removed = previous
            .iter()
            .filter(|s| !new.contains_key(s.market.as_str()))
            .cloned()
            .collect();
        changes
    }

    pub fn is_empty(&self) -> bool {
        self.moved.is_empty() && self.added.is_empty() && self.removed.is_empty()
    }

    /// `true` if markets entered or left, i.e. a resubscription is needed.
    pub fn membership_changed(&self) -> bool {
        !self.added.is_empty() || !self.removed.is_empty()
    }

    /// Operator report: one line per change, then the full new ranking.
    pub fn report(&self, current: &SymbolSet) -> String {
        let mut out = String::new();
        for m in &self.moved {
            let _ = writeln!(out, "{}: rank {} -> {}", m.market, m.from, m.to);
        }
        for s in &self.added {
            let _ = writeln!(out, "{} added (rank {})", s.market, s.rank);
        }
        for s in &self.removed {
            let _ = writeln!(out, "{} dropped out of the top", s.market);
        }
        out.push_str("\nFull ranking:\n");
        let ranking: Vec<String> = current.iter().map(|s| format!("{}: {}", s.rank, s.market)).collect();
        out.push_str(&ranking.join("\n"));
        out
    }
}

/// What one poll did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollOutcome {
    /// The ranking could not be fetched; nothing changed.
    FetchFailed,
    /// Same markets, same ranks.
    Unchanged,
    /// Same markets, different ranks; no swap needed.
    RanksChanged,
    /// Markets differed and `update_subscription` was called.
    Swapped(SwapOutcome),
    /// Markets differed but the manager refused the update.
    SwapFailed(ManagerError),
}

pub struct RankingPoller<R: RankingSource, C: Connector> {
    source: R,
    manager: SubscriptionManager<C>,
    notifier: NotifierHandle,
    top_n: usize,
    interval_minutes: u32,
    previous: SymbolSet,
}

impl<R: RankingSource, C: Connector> RankingPoller<R, C> {
    /// `previous` is the ranking the manager was started with.
    pub fn new(
        source: R,
        manager: SubscriptionManager<C>,
        notifier: NotifierHandle,
        top_n: usize,
        interval_minutes: u32,
        previous: SymbolSet,
    ) -> Self {
        Self {
            source,
            manager,
            notifier,
            top_n,
            interval_minutes,
            previous,
        }
    }

    pub fn previous(&self) -> &SymbolSet {
        &self.previous
    }

    /// Fetches the ranking once and reconciles the subscription with it.
    pub async fn poll_once(&mut self) -> PollOutcome {
        let current = match self.source.fetch_top_n(self.top_n).await {
            Ok(current) if !current.is_empty() => current,
            Ok(_) => {
                warn!("Top markets came back empty, keeping current subscription");
                self.notifier.notify("top markets refresh returned nothing; keeping current subscription");
                return PollOutcome::FetchFailed;
            }
            Err(e) => {
                warn!(error = %e, "Top markets refresh failed, keeping current subscription");
                self.notifier
                    .notify(format!("top markets refresh failed ({e}); keeping current subscription"));
                return PollOutcome::FetchFailed;
            }
        };

        let changes = RankChanges::between(&self.previous, &current);
        if !changes.is_empty() {
            let report = changes.report(&current);
            info!(
                moved = changes.moved.len(),
                added = changes.added.len(),
                removed = changes.removed.len(),
                "Ranking changed\n{report}"
            );
            self.notifier.notify(report);
        }

        if current.same_markets(&self.previous) {
            let outcome = if changes.is_empty() {
                PollOutcome::Unchanged
            } else {
                PollOutcome::RanksChanged
            };
            self.previous = current;
            return outcome;
        }

        let outcome = match self.manager.update_subscription(current).await {
            Ok(swap) => PollOutcome::Swapped(swap),
            Err(e) => {
                warn!(error = %e, "Subscription update rejected");
                PollOutcome::SwapFailed(e)
            }
        };
        self.previous = self.manager.symbols();
        outcome
    }

    /// Polls on every calendar boundary until `cancel` fires.
    pub async fn run(mut self, cancel: CancellationToken) {
        info!(
            top_n = self.top_n,
            interval_minutes = self.interval_minutes,
            "Ranking poller started"
        );
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = wait_until_next_boundary(self.interval_minutes) => {}
            }
            let outcome = tokio::select! {
                _ = cancel.cancelled() => break,
                outcome = self.poll_once() => outcome,
            };
            debug!(?outcome, "Ranking poll finished");
            if matches!(outcome, PollOutcome::SwapFailed(ManagerError::Stopped)) {
                break;
            }
        }
        info!("Ranking poller stopped");
    }
}
