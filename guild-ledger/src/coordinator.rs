//! Transfer coordinator
//!
//! Owns the currency write path. Each operation validates its input, takes the
//! serialization boundary of every account it touches, reads the balance it
//! depends on, and hands the resulting entries to the writer as one unit. The
//! boundary is held until the writer confirms the commit, so no other spend on
//! the same account can observe the pre-write balance.

use crate::{
    actor::WriterHandle,
    aggregate,
    clock::Clock,
    locks::{AccountGuard, AccountLocks},
    metrics::Metrics,
    types::{AccountId, AccountKey, Book, EntryId, PendingEntry, ScopeId},
    Error, Result, Storage,
};
use rust_decimal::Decimal;
use std::sync::Arc;
use uuid::Uuid;

/// Grant, spend and transfer with the no-overdraft guarantee
#[derive(Debug, Clone)]
pub struct TransferCoordinator {
    writer: WriterHandle,
    storage: Arc<Storage>,
    locks: Arc<AccountLocks>,
    clock: Arc<dyn Clock>,
    metrics: Metrics,
}

impl TransferCoordinator {
    /// Create coordinator over a writer and its storage
    pub fn new(
        writer: WriterHandle,
        storage: Arc<Storage>,
        locks: Arc<AccountLocks>,
        clock: Arc<dyn Clock>,
        metrics: Metrics,
    ) -> Self {
        Self {
            writer,
            storage,
            locks,
            clock,
            metrics,
        }
    }

    /// Current balance from committed entries
    pub fn balance(&self, scope_id: ScopeId, account_id: AccountId) -> Result<Decimal> {
        let amounts = self.storage.amounts(Book::Currency, scope_id, account_id)?;
        Ok(aggregate::total(amounts))
    }

    /// Credit an account
    pub async fn grant(
        &self,
        scope_id: ScopeId,
        account_id: AccountId,
        amount: Decimal,
        description: &str,
    ) -> Result<EntryId> {
        validate_amount(amount)?;
        validate_description(description)?;

        let guard = self.locks.acquire(AccountKey::currency(scope_id, account_id)).await;

        let credit = self.entry(scope_id, account_id, amount, description, None)?;
        let entry_id = self.commit_one(&guard, credit).await?;

        tracing::debug!(
            scope = %scope_id,
            account = %account_id,
            amount = %amount,
            entry_id = %entry_id,
            "Granted"
        );

        Ok(entry_id)
    }

    /// Debit an account if its balance covers `amount`
    pub async fn spend(
        &self,
        scope_id: ScopeId,
        account_id: AccountId,
        amount: Decimal,
        description: &str,
    ) -> Result<EntryId> {
        validate_amount(amount)?;
        validate_description(description)?;

        let guard = self.locks.acquire(AccountKey::currency(scope_id, account_id)).await;

        self.ensure_funds(scope_id, account_id, amount)?;

        let debit = self.entry(scope_id, account_id, -amount, description, None)?;
        let entry_id = self.commit_one(&guard, debit).await?;

        tracing::debug!(
            scope = %scope_id,
            account = %account_id,
            amount = %amount,
            entry_id = %entry_id,
            "Spent"
        );

        Ok(entry_id)
    }

    /// Move `amount` between two accounts as one atomic pair of entries
    ///
    /// Returns the (debit, credit) entry ids.
    pub async fn transfer(
        &self,
        scope_id: ScopeId,
        from: AccountId,
        to: AccountId,
        amount: Decimal,
        description: &str,
    ) -> Result<(EntryId, EntryId)> {
        if from == to {
            return Err(Error::SelfTransfer(from));
        }
        validate_amount(amount)?;
        validate_description(description)?;

        let guard = self
            .locks
            .acquire_all([
                AccountKey::currency(scope_id, from),
                AccountKey::currency(scope_id, to),
            ])
            .await;

        self.ensure_funds(scope_id, from, amount)?;

        let correlation_id = Uuid::now_v7();
        let debit = self.entry(scope_id, from, -amount, description, Some(correlation_id))?;
        let credit = self.entry(scope_id, to, amount, description, Some(correlation_id))?;

        let ids = commit(&self.writer, &guard, vec![debit, credit]).await?;
        let (debit_id, credit_id) = match ids.as_slice() {
            [debit_id, credit_id] => (*debit_id, *credit_id),
            other => {
                return Err(Error::InvariantViolation(format!(
                    "Transfer committed {} entries instead of 2",
                    other.len()
                )))
            }
        };

        self.metrics.record_transfer();
        tracing::info!(
            scope = %scope_id,
            from = %from,
            to = %to,
            amount = %amount,
            correlation_id = %correlation_id,
            "Transfer committed"
        );

        Ok((debit_id, credit_id))
    }

    /// Caller must hold the account's boundary
    fn ensure_funds(&self, scope_id: ScopeId, account_id: AccountId, amount: Decimal) -> Result<()> {
        let balance = self.balance(scope_id, account_id)?;
        if balance < amount {
            self.metrics.record_insufficient_funds();
            tracing::warn!(
                scope = %scope_id,
                account = %account_id,
                balance = %balance,
                requested = %amount,
                "Insufficient funds"
            );
            return Err(Error::InsufficientFunds {
                balance,
                requested: amount,
            });
        }
        Ok(())
    }

    fn entry(
        &self,
        scope_id: ScopeId,
        account_id: AccountId,
        amount: Decimal,
        description: &str,
        correlation_id: Option<Uuid>,
    ) -> Result<PendingEntry> {
        Ok(PendingEntry {
            book: Book::Currency,
            scope_id,
            account_id,
            amount,
            description: description.trim().to_string(),
            timestamp_nanos: now_nanos(self.clock.as_ref())?,
            correlation_id,
        })
    }

    async fn commit_one(&self, guard: &AccountGuard, entry: PendingEntry) -> Result<EntryId> {
        commit(&self.writer, guard, vec![entry])
            .await?
            .first()
            .copied()
            .ok_or_else(|| Error::InvariantViolation("Append returned no entry id".to_string()))
    }
}

/// Append entries whose accounts are all held by `guard`
pub(crate) async fn commit(
    writer: &WriterHandle,
    guard: &AccountGuard,
    entries: Vec<PendingEntry>,
) -> Result<Vec<EntryId>> {
    if let Some(entry) = entries.iter().find(|entry| !guard.covers(&entry.key())) {
        return Err(Error::InvariantViolation(format!(
            "Append to {:?} without holding its lock",
            entry.key()
        )));
    }
    writer.append(entries).await
}

/// Current clock reading in Unix nanoseconds
pub(crate) fn now_nanos(clock: &dyn Clock) -> Result<i64> {
    clock
        .now()
        .timestamp_nanos_opt()
        .ok_or_else(|| Error::InvariantViolation("Clock outside representable range".to_string()))
}

fn validate_amount(amount: Decimal) -> Result<()> {
    if amount <= Decimal::ZERO {
        return Err(Error::InvalidAmount(amount));
    }
    Ok(())
}

pub(crate) fn validate_description(description: &str) -> Result<()> {
    if description.trim().is_empty() {
        return Err(Error::InvalidDescription(
            "Description must not be empty".to_string(),
        ));
    }
    Ok(())
}
