//! Alert deduplication
//!
//! Per-symbol cooldown: a repeat of the same direction inside the window is
//! suppressed, a direction flip always goes through. State lives in memory
//! only and is keyed per symbol, so check-and-set is atomic per key.

use chrono::{DateTime, Duration, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

use crate::types::{Direction, Signal, Symbol};

/// Last notification sent for a symbol
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AlertState {
    pub direction: Direction,
    pub alerted_at: DateTime<Utc>,
}

/// Result of a cooldown check
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Suppressed,
    /// Recorded as sent; `previous` is the state it replaced
    Send { previous: Option<AlertState> },
}

impl Admission {
    pub fn is_send(&self) -> bool {
        matches!(self, Admission::Send { .. })
    }
}

#[derive(Debug)]
pub struct AlertDeduplicator {
    cooldown: Duration,
    state: DashMap<Symbol, AlertState>,
}

impl AlertDeduplicator {
    pub fn new(cooldown: std::time::Duration) -> Self {
        AlertDeduplicator {
            cooldown: Duration::from_std(cooldown).unwrap_or_else(|_| Duration::days(36_500)),
            state: DashMap::new(),
        }
    }

    pub fn from_secs(cooldown_secs: u64) -> Self {
        Self::new(std::time::Duration::from_secs(cooldown_secs))
    }

    /// Whether `signal` should be sent now; records it when it should
    pub fn should_notify(&self, symbol: &Symbol, signal: &Signal) -> bool {
        self.admit(symbol, signal).is_send()
    }

    /// [`should_notify`](Self::should_notify) against an explicit clock
    pub fn should_notify_at(&self, symbol: &Symbol, signal: &Signal, now: DateTime<Utc>) -> bool {
        self.admit_at(symbol, signal, now).is_send()
    }

    /// Cooldown check that hands back the replaced state for [`revert`](Self::revert)
    pub fn admit(&self, symbol: &Symbol, signal: &Signal) -> Admission {
        self.admit_at(symbol, signal, Utc::now())
    }

    pub fn admit_at(&self, symbol: &Symbol, signal: &Signal, now: DateTime<Utc>) -> Admission {
        let direction = signal.direction;
        if !direction.is_actionable() {
            return Admission::Suppressed;
        }

        let next = AlertState {
            direction,
            alerted_at: now,
        };

        match self.state.entry(symbol.clone()) {
            Entry::Occupied(mut entry) => {
                let last = *entry.get();
                if last.direction == direction && now - last.alerted_at < self.cooldown {
                    return Admission::Suppressed;
                }
                entry.insert(next);
                Admission::Send {
                    previous: Some(last),
                }
            }
            Entry::Vacant(entry) => {
                entry.insert(next);
                Admission::Send { previous: None }
            }
        }
    }

    pub fn last(&self, symbol: &Symbol) -> Option<AlertState> {
        self.state.get(symbol).map(|s| *s)
    }

    /// Undo an admission whose alert was never delivered
    ///
    /// Restores the last delivered state, or forgets the symbol when there
    /// was none, so the next cycle retries.
    pub fn revert(&self, symbol: &Symbol, previous: Option<AlertState>) {
        match previous {
            Some(state) => {
                self.state.insert(symbol.clone(), state);
            }
            None => {
                self.state.remove(symbol);
            }
        }
    }

    pub fn len(&self) -> usize {
        self.state.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.is_empty()
    }
}
