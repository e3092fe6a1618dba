//! Experience path: cooldown gate, experience entries and levels
//!
//! An incoming message becomes at most one experience entry per account per
//! cooldown window. The gate decision and the append happen under the
//! account's experience lock, so two messages racing for the same account
//! cannot both pass the gate.

use crate::{
    actor::WriterHandle,
    aggregate::{self, Leaderboard},
    cooldown::CooldownGate,
    coordinator::commit,
    level::{level_from_xp, next_level_xp},
    locks::{AccountGuard, AccountLocks},
    metrics::Metrics,
    storage::Order,
    types::{
        AccountId, AccountKey, Book, Entry, EntryId, ExperienceOutcome, PendingEntry,
        ProgressPoint, Rank, RejectReason, ScopeId,
    },
    Error, Result, Storage,
};
use chrono::{DateTime, Utc};
use rand::Rng;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use std::ops::RangeInclusive;
use std::sync::Arc;

const MESSAGE_DESCRIPTION: &str = "Message experience";

/// Records experience events and derives levels
#[derive(Debug)]
pub struct ExperienceTracker {
    writer: WriterHandle,
    storage: Arc<Storage>,
    locks: Arc<AccountLocks>,
    gate: CooldownGate,
    xp_per_event: RangeInclusive<u64>,
    metrics: Metrics,
}

impl ExperienceTracker {
    /// Create tracker
    pub fn new(
        writer: WriterHandle,
        storage: Arc<Storage>,
        locks: Arc<AccountLocks>,
        gate: CooldownGate,
        xp_per_event: RangeInclusive<u64>,
        metrics: Metrics,
    ) -> Self {
        Self {
            writer,
            storage,
            locks,
            gate,
            xp_per_event,
            metrics,
        }
    }

    /// Cooldown gate in use
    pub fn gate(&self) -> &CooldownGate {
        &self.gate
    }

    /// Grant experience for a message sent at `event_time`, unless on cooldown
    pub async fn record_event(
        &self,
        scope_id: ScopeId,
        account_id: AccountId,
        event_time: DateTime<Utc>,
    ) -> Result<ExperienceOutcome> {
        let timestamp_nanos = event_time.timestamp_nanos_opt().ok_or_else(|| {
            Error::InvariantViolation(format!("Event time {} out of range", event_time))
        })?;

        let guard = self
            .locks
            .acquire(AccountKey::experience(scope_id, account_id))
            .await;

        let previous = self.last_accepted(scope_id, account_id)?;

        if !self.gate.admit(scope_id, account_id, event_time) {
            let retry_at = self
                .gate
                .retry_at(scope_id, account_id)
                .unwrap_or(event_time);
            self.metrics.record_experience(false);
            tracing::debug!(
                scope = %scope_id,
                account = %account_id,
                retry_at = %retry_at,
                "Experience on cooldown"
            );
            return Ok(ExperienceOutcome::Rejected(RejectReason::Cooldown { retry_at }));
        }

        let xp_granted = rand::thread_rng().gen_range(self.xp_per_event.clone());

        match self
            .append(&guard, scope_id, account_id, xp_granted, timestamp_nanos)
            .await
        {
            Ok((entry_id, total_before)) => {
                self.metrics.record_experience(true);

                let level_before = level_from_xp(total_before).level;
                let level_after = level_from_xp(total_before.saturating_add(xp_granted)).level;
                if level_after > level_before {
                    tracing::info!(
                        scope = %scope_id,
                        account = %account_id,
                        level = level_after,
                        "Level up"
                    );
                }

                Ok(ExperienceOutcome::Accepted {
                    entry_id,
                    xp_granted,
                    level_before,
                    level_after,
                })
            }
            Err(e) => {
                self.gate.restore(scope_id, account_id, previous);
                tracing::warn!(
                    scope = %scope_id,
                    account = %account_id,
                    error = %e,
                    "Experience append failed"
                );
                Err(e)
            }
        }
    }

    /// Caller must hold the account's experience boundary
    fn last_accepted(
        &self,
        scope_id: ScopeId,
        account_id: AccountId,
    ) -> Result<Option<DateTime<Utc>>> {
        if let Some(at) = self.gate.last_accepted(scope_id, account_id) {
            return Ok(Some(at));
        }

        let stored = self
            .storage
            .latest(Book::Experience, scope_id, account_id)?
            .map(|entry| entry.timestamp());
        if let Some(at) = stored {
            self.gate.seed(scope_id, account_id, at);
        }
        Ok(stored)
    }

    async fn append(
        &self,
        guard: &AccountGuard,
        scope_id: ScopeId,
        account_id: AccountId,
        xp: u64,
        timestamp_nanos: i64,
    ) -> Result<(EntryId, u64)> {
        let total_before = self.total_xp(scope_id, account_id)?;

        let entry = PendingEntry {
            book: Book::Experience,
            scope_id,
            account_id,
            amount: Decimal::from(xp),
            description: MESSAGE_DESCRIPTION.to_string(),
            timestamp_nanos,
            correlation_id: None,
        };

        let entry_id = commit(&self.writer, guard, vec![entry])
            .await?
            .first()
            .copied()
            .ok_or_else(|| Error::InvariantViolation("Append returned no entry id".to_string()))?;

        Ok((entry_id, total_before))
    }

    /// Accumulated experience
    pub fn total_xp(&self, scope_id: ScopeId, account_id: AccountId) -> Result<u64> {
        let amounts = self.storage.amounts(Book::Experience, scope_id, account_id)?;
        to_xp(aggregate::total(amounts))
    }

    /// Level and progress
    pub fn rank(&self, scope_id: ScopeId, account_id: AccountId) -> Result<Rank> {
        let total_xp = self.total_xp(scope_id, account_id)?;
        let progress = level_from_xp(total_xp);

        Ok(Rank {
            level: progress.level,
            xp_in_level: progress.remainder,
            xp_for_next_level: next_level_xp(progress.level),
            total_xp,
        })
    }

    /// Accumulated experience after every entry, oldest first
    pub fn rank_history(&self, scope_id: ScopeId, account_id: AccountId) -> Result<Vec<ProgressPoint>> {
        let entries = self
            .storage
            .query(Book::Experience, scope_id, account_id, Order::OldestFirst, None)?;

        aggregate::running_totals(&entries)
            .map(|(entry, total)| {
                Ok(ProgressPoint {
                    at: entry.timestamp(),
                    total_xp: to_xp(total)?,
                })
            })
            .collect()
    }

    /// Most recent experience entries
    pub fn history(&self, scope_id: ScopeId, account_id: AccountId, limit: usize) -> Result<Vec<Entry>> {
        self.storage.query(
            Book::Experience,
            scope_id,
            account_id,
            Order::NewestFirst,
            Some(limit),
        )
    }

    /// Experience leaderboard of a scope
    pub fn leaderboard(&self, scope_id: ScopeId) -> Result<Leaderboard> {
        let rows = self.storage.scope_amounts(Book::Experience, scope_id)?;
        Ok(Leaderboard::from_rows(rows))
    }
}

fn to_xp(total: Decimal) -> Result<u64> {
    if !total.fract().is_zero() {
        return Err(Error::InvariantViolation(format!(
            "Fractional experience total {}",
            total
        )));
    }
    total
        .to_u64()
        .ok_or_else(|| Error::InvariantViolation(format!("Experience total {} out of range", total)))
}
