//! Experience cooldown gate
//!
//! Tracks the last accepted experience event per (scope, account). The map is
//! a cache: the ledger seeds missing keys from the newest experience entry in
//! the store, and calls [`CooldownGate::admit`] and the append under the same
//! account lock, restoring the previous value if the append fails.

use crate::types::{AccountId, ScopeId};
use chrono::{DateTime, Duration, Utc};
use dashmap::{mapref::entry::Entry, DashMap};

/// Per-account rate limiter for experience events
#[derive(Debug)]
pub struct CooldownGate {
    window: Duration,
    last_accepted: DashMap<(ScopeId, AccountId), DateTime<Utc>>,
}

impl CooldownGate {
    /// Gate admitting one event per `window` per account
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            last_accepted: DashMap::new(),
        }
    }

    /// Cooldown window
    pub fn window(&self) -> Duration {
        self.window
    }

    /// Last accepted event time, if cached
    pub fn last_accepted(&self, scope_id: ScopeId, account_id: AccountId) -> Option<DateTime<Utc>> {
        self.last_accepted
            .get(&(scope_id, account_id))
            .map(|at| *at)
    }

    /// Earliest time the next event would be admitted
    pub fn retry_at(&self, scope_id: ScopeId, account_id: AccountId) -> Option<DateTime<Utc>> {
        self.last_accepted(scope_id, account_id)
            .map(|at| at + self.window)
    }

    /// Fill a cache miss from durable state; never moves a cached time backwards
    pub fn seed(&self, scope_id: ScopeId, account_id: AccountId, at: DateTime<Utc>) {
        self.last_accepted
            .entry((scope_id, account_id))
            .and_modify(|last| {
                if at > *last {
                    *last = at;
                }
            })
            .or_insert(at);
    }

    /// Accept and record `event_time`, or reject inside the window
    pub fn admit(&self, scope_id: ScopeId, account_id: AccountId, event_time: DateTime<Utc>) -> bool {
        match self.last_accepted.entry((scope_id, account_id)) {
            Entry::Occupied(mut last) => {
                if event_time - *last.get() < self.window {
                    return false;
                }
                last.insert(event_time);
                true
            }
            Entry::Vacant(slot) => {
                slot.insert(event_time);
                true
            }
        }
    }

    /// Undo an admission whose append did not commit
    pub fn restore(
        &self,
        scope_id: ScopeId,
        account_id: AccountId,
        previous: Option<DateTime<Utc>>,
    ) {
        match previous {
            Some(at) => {
                self.last_accepted.insert((scope_id, account_id), at);
            }
            None => {
                self.last_accepted.remove(&(scope_id, account_id));
            }
        }
    }

    /// Forget cached times of one scope
    pub fn forget_scope(&self, scope_id: ScopeId) {
        self.last_accepted.retain(|(scope, _), _| *scope != scope_id);
    }

    /// Forget every cached time
    pub fn clear(&self) {
        self.last_accepted.clear();
    }
}
