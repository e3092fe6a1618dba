//! Main ledger orchestration layer
//!
//! This module ties together storage, the writer actor, account locks and the
//! two write paths (currency and experience) into one high-level API.
//!
//! # Example
//!
//! ```no_run
//! use guild_ledger::{AccountId, Config, Ledger, ScopeId};
//! use rust_decimal::Decimal;
//!
//! #[tokio::main]
//! async fn main() -> guild_ledger::Result<()> {
//!     let ledger = Ledger::open(Config::default()).await?;
//!     let guild = ScopeId::new(1);
//!
//!     ledger.grant(guild, AccountId::new(7), Decimal::new(10000, 2), "Income").await?;
//!     let balance = ledger.balance(guild, AccountId::new(7))?;
//!     assert_eq!(balance, Decimal::new(10000, 2));
//!
//!     ledger.shutdown().await
//! }
//! ```

use crate::{
    actor::{spawn_writer, WriterHandle},
    aggregate::{self, Leaderboard},
    clock::{Clock, SystemClock},
    cooldown::CooldownGate,
    coordinator::TransferCoordinator,
    experience::ExperienceTracker,
    locks::AccountLocks,
    metrics::Metrics,
    storage::{Order, StorageStats},
    types::{
        AccountId, Book, Entry, EntryId, ExperienceOutcome, ProgressPoint, Rank, ScopeId,
        Standing,
    },
    Config, Result, Storage,
};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::time::Duration;
use uuid::Uuid;

/// Main ledger interface
#[derive(Debug)]
pub struct Ledger {
    /// Writer actor handle
    writer: WriterHandle,

    /// Direct storage access (for reads)
    storage: Arc<Storage>,

    /// Currency write path
    coordinator: TransferCoordinator,

    /// Experience write path
    experience: ExperienceTracker,

    /// Account and scope locks shared by both write paths
    locks: Arc<AccountLocks>,

    clock: Arc<dyn Clock>,

    metrics: Metrics,

    /// Configuration
    config: Config,
}

impl Ledger {
    /// Open ledger with configuration
    pub async fn open(config: Config) -> Result<Self> {
        Self::open_with_clock(config, Arc::new(SystemClock)).await
    }

    /// Open ledger reading time from `clock`
    pub async fn open_with_clock(config: Config, clock: Arc<dyn Clock>) -> Result<Self> {
        config.validate()?;

        let metrics = Metrics::new()?;
        let storage = Arc::new(Storage::open(&config)?);

        let writer = spawn_writer(
            storage.clone(),
            config.batching.max_batch_size,
            Duration::from_millis(config.batching.batch_timeout_ms),
            config.batching.enabled,
            metrics.clone(),
        )?;

        // One lock table for both books; keys never collide across books
        let locks = Arc::new(AccountLocks::new());

        let coordinator = TransferCoordinator::new(
            writer.clone(),
            storage.clone(),
            locks.clone(),
            clock.clone(),
            metrics.clone(),
        );

        let xp = &config.experience;
        let experience = ExperienceTracker::new(
            writer.clone(),
            storage.clone(),
            locks.clone(),
            CooldownGate::new(xp.cooldown()?),
            xp.min_xp_per_event..=xp.max_xp_per_event,
            metrics.clone(),
        );

        tracing::info!(
            data_dir = %config.data_dir.display(),
            cooldown_secs = xp.cooldown_secs,
            batching = config.batching.enabled,
            "Ledger opened"
        );

        Ok(Self {
            writer,
            storage,
            coordinator,
            experience,
            locks,
            clock,
            metrics,
            config,
        })
    }

    // Currency

    /// Credit an account
    pub async fn grant(
        &self,
        scope_id: ScopeId,
        account_id: AccountId,
        amount: Decimal,
        description: &str,
    ) -> Result<EntryId> {
        self.coordinator
            .grant(scope_id, account_id, amount, description)
            .await
    }

    /// Debit an account; fails with `InsufficientFunds` rather than overdraw
    pub async fn spend(
        &self,
        scope_id: ScopeId,
        account_id: AccountId,
        amount: Decimal,
        description: &str,
    ) -> Result<EntryId> {
        self.coordinator
            .spend(scope_id, account_id, amount, description)
            .await
    }

    /// Move currency between two members; returns (debit, credit) entry ids
    pub async fn transfer(
        &self,
        scope_id: ScopeId,
        from: AccountId,
        to: AccountId,
        amount: Decimal,
        description: &str,
    ) -> Result<(EntryId, EntryId)> {
        self.coordinator
            .transfer(scope_id, from, to, amount, description)
            .await
    }

    /// Current balance
    pub fn balance(&self, scope_id: ScopeId, account_id: AccountId) -> Result<Decimal> {
        self.coordinator.balance(scope_id, account_id)
    }

    /// Richest members of a scope
    pub fn top(&self, scope_id: ScopeId, limit: usize) -> Result<Vec<Standing>> {
        Ok(self.leaderboard(scope_id)?.top(limit).copied().collect())
    }

    /// Full currency leaderboard of a scope
    pub fn leaderboard(&self, scope_id: ScopeId) -> Result<Leaderboard> {
        let rows = self.storage.scope_amounts(Book::Currency, scope_id)?;
        Ok(Leaderboard::from_rows(rows))
    }

    /// Most recent currency entries, newest first
    pub fn history(
        &self,
        scope_id: ScopeId,
        account_id: AccountId,
        limit: usize,
    ) -> Result<Vec<Entry>> {
        if limit == 0 {
            return Ok(Vec::new());
        }

        let mut entries = self.storage.query(
            Book::Currency,
            scope_id,
            account_id,
            Order::NewestFirst,
            Some(limit),
        )?;
        // Commit order and wall-clock order can disagree if the clock steps back
        entries.sort_by(|a, b| b.timestamp_nanos.cmp(&a.timestamp_nanos));
        Ok(entries)
    }

    /// Verify every correlated pair of a scope nets to zero
    ///
    /// Returns false if any transfer is missing a leg, has two legs in the
    /// same direction, or the legs differ.
    pub fn check_transfer_integrity(&self, scope_id: ScopeId) -> Result<bool> {
        let entries = self.storage.scope_entries(Book::Currency, scope_id)?;

        let mut legs: BTreeMap<Uuid, Vec<&Entry>> = BTreeMap::new();
        for entry in &entries {
            if let Some(correlation_id) = entry.correlation_id {
                legs.entry(correlation_id).or_default().push(entry);
            }
        }

        let balanced = legs.values().all(|pair| is_balanced_pair(pair));

        if !balanced {
            tracing::warn!(scope = %scope_id, "Unbalanced transfer found");
        }

        Ok(balanced)
    }

    // Experience

    /// Grant experience for a message sent at `event_time`, unless on cooldown
    pub async fn record_experience_event(
        &self,
        scope_id: ScopeId,
        account_id: AccountId,
        event_time: DateTime<Utc>,
    ) -> Result<ExperienceOutcome> {
        self.experience
            .record_event(scope_id, account_id, event_time)
            .await
    }

    /// Grant experience for a message sent now
    pub async fn record_message(
        &self,
        scope_id: ScopeId,
        account_id: AccountId,
    ) -> Result<ExperienceOutcome> {
        self.record_experience_event(scope_id, account_id, self.clock.now())
            .await
    }

    /// Level and progress
    pub fn rank(&self, scope_id: ScopeId, account_id: AccountId) -> Result<Rank> {
        self.experience.rank(scope_id, account_id)
    }

    /// Accumulated experience over time, oldest first
    pub fn rank_history(
        &self,
        scope_id: ScopeId,
        account_id: AccountId,
    ) -> Result<Vec<ProgressPoint>> {
        self.experience.rank_history(scope_id, account_id)
    }

    /// Most recent experience entries, newest first
    pub fn experience_history(
        &self,
        scope_id: ScopeId,
        account_id: AccountId,
        limit: usize,
    ) -> Result<Vec<Entry>> {
        if limit == 0 {
            return Ok(Vec::new());
        }
        self.experience.history(scope_id, account_id, limit)
    }

    /// Most experienced members of a scope
    pub fn top_experience(&self, scope_id: ScopeId, limit: usize) -> Result<Vec<Standing>> {
        Ok(self
            .experience
            .leaderboard(scope_id)?
            .top(limit)
            .copied()
            .collect())
    }

    // Administration

    /// Delete every entry of a scope (community removed)
    ///
    /// Waits for in-flight operations on the scope and holds off new ones
    /// until the entries and cached cooldowns are gone.
    pub async fn purge_scope(&self, scope_id: ScopeId) -> Result<usize> {
        let _scope = self.locks.acquire_scope(scope_id).await;
        let removed = self.writer.purge_scope(scope_id).await?;
        self.experience.gate().forget_scope(scope_id);
        Ok(removed)
    }

    /// Storage statistics
    pub fn stats(&self) -> Result<StorageStats> {
        self.storage.stats()
    }

    /// Metrics of this instance
    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }

    /// Configuration in use
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Commit pending writes immediately
    pub async fn flush(&self) -> Result<()> {
        self.writer.flush().await
    }

    /// Shutdown ledger
    pub async fn shutdown(self) -> Result<()> {
        self.writer.shutdown().await
    }
}

/// One debit and one credit of equal size
fn is_balanced_pair(legs: &[&Entry]) -> bool {
    match legs {
        [a, b] => {
            a.is_debit() != b.is_debit()
                && aggregate::total([a.amount, b.amount]).is_zero()
        }
        _ => false,
    }
}
