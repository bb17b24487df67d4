//! # Symbol Sets
//!
//! The ranked list of markets one session subscribes to. A set is always
//! replaced wholesale; comparisons that matter to the manager only look at the
//! market codes, never at the ranks.

use std::collections::HashSet;
use std::fmt;

use serde::{Deserialize, Serialize};

/// One market with its turnover rank (1 = highest).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RankedSymbol {
    pub market: String,
    pub rank: u32,
}

/// Ordered, duplicate-free list of ranked markets.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SymbolSet {
    symbols: Vec<RankedSymbol>,
}

impl SymbolSet {
    /// Builds a set from markets ordered best first. Ranks are assigned
    /// 1..=n in iteration order; a repeated market keeps its first position.
    pub fn from_markets<I, S>(markets: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut seen = HashSet::new();
        let mut symbols = Vec::new();
        for market in markets {
            let market = market.into();
            if seen.insert(market.clone()) {
                let rank = symbols.len() as u32 + 1;
                symbols.push(RankedSymbol { market, rank });
            }
        }
        Self { symbols }
    }

    /// Market codes in rank order, as sent in the subscription frame.
    pub fn codes(&self) -> Vec<String> {
        self.symbols.iter().map(|s| s.market.clone()).collect()
    }

    /// Rank of `market`, if it is part of the set.
    pub fn rank_of(&self, market: &str) -> Option<u32> {
        self.symbols.iter().find(|s| s.market == market).map(|s| s.rank)
    }

    pub fn contains(&self, market: &str) -> bool {
        self.symbols.iter().any(|s| s.market == market)
    }

    /// `true` if both sets subscribe to the same markets, in any order.
    pub fn same_markets(&self, other: &SymbolSet) -> bool {
        if self.symbols.len() != other.symbols.len() {
            return false;
        }
        let mine: HashSet<&str> = self.symbols.iter().map(|s| s.market.as_str()).collect();
        other.symbols.iter().all(|s| mine.contains(s.market.as_str()))
    }

    pub fn iter(&self) -> impl Iterator<Item = &RankedSymbol> {
        self.symbols.iter()
    }

    pub fn len(&self) -> usize {
        self.symbols.len()
    }

    pub fn is_empty(&self) -> bool {
        self.symbols.is_empty()
    }
}

impl fmt::Display for SymbolSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}]", self.codes().join(", "))
    }
}
