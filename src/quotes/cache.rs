//! In-memory TTL cache for market-data responses.
//!
//! Entries remember when they were stored (monotonic `tokio::time::Instant`, so
//! tests can drive expiry with a paused clock). Expired entries are kept around
//! so the client can serve them as stale data under the degrade policy.

use std::collections::HashMap;
use std::fmt;
use std::time::Duration;
use tokio::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    Price,
    Fundamentals,
    History,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Price => "price",
            Self::Fundamentals => "fundamentals",
            Self::History => "history",
        };
        f.write_str(s)
    }
}

/// Cache key: (operation, symbol, period)
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub operation: Operation,
    pub symbol: String,
    pub period: Option<String>,
}

impl CacheKey {
    pub fn price(symbol: &str) -> Self {
        Self {
            operation: Operation::Price,
            symbol: symbol.to_string(),
            period: None,
        }
    }

    pub fn fundamentals(symbol: &str) -> Self {
        Self {
            operation: Operation::Fundamentals,
            symbol: symbol.to_string(),
            period: None,
        }
    }

    pub fn history(symbol: &str, period: &str) -> Self {
        Self {
            operation: Operation::History,
            symbol: symbol.to_string(),
            period: Some(period.to_string()),
        }
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.period {
            Some(period) => write!(f, "{}:{}:{}", self.operation, self.symbol, period),
            None => write!(f, "{}:{}", self.operation, self.symbol),
        }
    }
}

struct Entry<V> {
    value: V,
    stored_at: Instant,
}

/// Lookup outcome
#[derive(Debug, Clone, PartialEq)]
pub enum Lookup<V> {
    Fresh(V),
    Expired(V),
    Missing,
}

pub struct TtlCache<V> {
    ttl: Duration,
    entries: HashMap<CacheKey, Entry<V>>,
}

impl<V: Clone> TtlCache<V> {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: HashMap::new(),
        }
    }

    pub fn lookup(&self, key: &CacheKey) -> Lookup<V> {
        match self.entries.get(key) {
            Some(entry) if entry.stored_at.elapsed() < self.ttl => Lookup::Fresh(entry.value.clone()),
            Some(entry) => Lookup::Expired(entry.value.clone()),
            None => Lookup::Missing,
        }
    }

    /// Fresh value only
    pub fn get(&self, key: &CacheKey) -> Option<V> {
        match self.lookup(key) {
            Lookup::Fresh(v) => Some(v),
            _ => None,
        }
    }

    /// Any value, regardless of age
    pub fn get_stale(&self, key: &CacheKey) -> Option<V> {
        self.entries.get(key).map(|e| e.value.clone())
    }

    pub fn insert(&mut self, key: CacheKey, value: V) {
        self.entries.insert(
            key,
            Entry {
                value,
                stored_at: Instant::now(),
            },
        );
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
