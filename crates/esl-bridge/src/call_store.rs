//! Call Correlation Store
//!
//! Tracks in-flight calls keyed by call id. Records are created by a call
//! begin event, updated by correlated events and removed by a hangup, by
//! TTL expiry or by capacity eviction. There are no transition checks; the
//! last write wins.
//!
//! Two correlation keys share the table. `begin` and `mark_answered` use the
//! `callid` of web-call events, while `mark_hangup` looks up the
//! `Other-Leg-Unique-ID` of the hangup event. A hangup only finds its call
//! when the switch reports the begin event's call id as the other leg.

use chrono::{DateTime, Utc};
use rand::seq::SliceRandom;
use serde::Serialize;
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, info};

use esl_common::{CallRecord, CallState};

/// Which records to drop when the store is over capacity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EvictionPolicy {
    /// Oldest `updated_at` first, ties broken by call id
    #[default]
    LeastRecentlyUpdated,
    /// Uniformly random subset
    Random,
}

#[derive(Debug, Clone)]
pub struct CallStoreConfig {
    /// Answered calls older than this are assumed dead
    pub answered_ttl: Duration,
    /// Calls that never got answered time out after this
    pub unanswered_ttl: Duration,
    pub max_calls: usize,
    pub eviction: EvictionPolicy,
}

impl Default for CallStoreConfig {
    fn default() -> Self {
        Self {
            answered_ttl: Duration::from_secs(2 * 60 * 60),
            unanswered_ttl: Duration::from_secs(60),
            max_calls: 10_000,
            eviction: EvictionPolicy::LeastRecentlyUpdated,
        }
    }
}

/// Result of one maintenance sweep
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MaintenanceReport {
    pub expired: usize,
    pub evicted: usize,
    pub remaining: usize,
}

#[derive(Debug, Default)]
pub struct CallStore {
    config: CallStoreConfig,
    calls: HashMap<String, CallRecord>,
}

impl CallStore {
    pub fn new(config: CallStoreConfig) -> Self {
        Self {
            config,
            calls: HashMap::new(),
        }
    }

    pub fn config(&self) -> &CallStoreConfig {
        &self.config
    }

    /// Insert a call, replacing any record with the same id
    pub fn begin(&mut self, call_id: &str, record: CallRecord) -> Option<CallRecord> {
        self.calls.insert(call_id.to_string(), record)
    }

    /// Set the answered state. Returns false when the call is unknown.
    pub fn mark_answered(&mut self, call_id: &str, now: DateTime<Utc>) -> bool {
        match self.calls.get_mut(call_id) {
            Some(record) => {
                record.state = CallState::CalleeAnswered;
                record.updated_at = now;
                true
            }
            None => false,
        }
    }

    /// Remove the call whose id matches a hangup's other leg, returning it
    /// in the hangup state
    pub fn mark_hangup(&mut self, other_leg_id: &str, now: DateTime<Utc>) -> Option<CallRecord> {
        let mut record = self.calls.remove(other_leg_id)?;
        record.state = CallState::Hangup;
        record.updated_at = now;
        Some(record)
    }

    pub fn get(&self, call_id: &str) -> Option<&CallRecord> {
        self.calls.get(call_id)
    }

    pub fn contains(&self, call_id: &str) -> bool {
        self.calls.contains_key(call_id)
    }

    pub fn len(&self) -> usize {
        self.calls.len()
    }

    pub fn is_empty(&self) -> bool {
        self.calls.is_empty()
    }

    /// Drop expired calls, then evict down to capacity
    pub fn maintain(&mut self, now: DateTime<Utc>) -> MaintenanceReport {
        let before = self.calls.len();
        let answered_ttl = self.config.answered_ttl;
        let unanswered_ttl = self.config.unanswered_ttl;

        self.calls.retain(|_, record| {
            let ttl = if record.state.is_answered() {
                answered_ttl
            } else {
                unanswered_ttl
            };
            !is_older_than(record.updated_at, now, ttl)
        });
        let expired = before - self.calls.len();

        let evicted = self.evict_over_capacity();
        if evicted > 0 {
            info!(
                max_calls = self.config.max_calls,
                evicted,
                policy = ?self.config.eviction,
                "Call count exceeded maximum, evicted calls"
            );
        }

        let remaining = self.calls.len();
        debug!(expired, remaining, "Current call count");

        MaintenanceReport {
            expired,
            evicted,
            remaining,
        }
    }

    fn evict_over_capacity(&mut self) -> usize {
        let excess = self.calls.len().saturating_sub(self.config.max_calls);
        if excess == 0 {
            return 0;
        }

        let victims: Vec<String> = match self.config.eviction {
            EvictionPolicy::LeastRecentlyUpdated => {
                let mut keys: Vec<(DateTime<Utc>, &String)> = self
                    .calls
                    .iter()
                    .map(|(id, record)| (record.updated_at, id))
                    .collect();
                keys.sort_unstable();
                keys.into_iter().take(excess).map(|(_, id)| id.clone()).collect()
            }
            EvictionPolicy::Random => {
                let mut keys: Vec<&String> = self.calls.keys().collect();
                keys.shuffle(&mut rand::rng());
                keys.into_iter().take(excess).cloned().collect()
            }
        };

        for id in &victims {
            self.calls.remove(id);
        }
        victims.len()
    }
}

fn is_older_than(updated_at: DateTime<Utc>, now: DateTime<Utc>, ttl: Duration) -> bool {
    (now - updated_at).to_std().is_ok_and(|age| age > ttl)
}
