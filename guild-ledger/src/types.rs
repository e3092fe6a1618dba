//! Core types for the ledger
//!
//! All types are designed for:
//! - Deterministic serialization (bincode)
//! - Exact arithmetic (Decimal for amounts)
//! - Total ordering of account keys (lock acquisition order)

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Community (guild) identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ScopeId(u64);

impl ScopeId {
    /// Create new scope ID
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    /// Raw identifier
    pub const fn get(self) -> u64 {
        self.0
    }
}

impl From<u64> for ScopeId {
    fn from(id: u64) -> Self {
        Self(id)
    }
}

impl fmt::Display for ScopeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Member identifier, unique within a scope
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct AccountId(u64);

impl AccountId {
    /// Create new account ID
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    /// Raw identifier
    pub const fn get(self) -> u64 {
        self.0
    }
}

impl From<u64> for AccountId {
    fn from(id: u64) -> Self {
        Self(id)
    }
}

impl fmt::Display for AccountId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Monotonically increasing entry identifier, assigned at commit
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct EntryId(u64);

impl EntryId {
    /// Create from raw sequence number
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    /// Raw sequence number
    pub const fn get(self) -> u64 {
        self.0
    }

    /// Next identifier in sequence
    pub const fn next(self) -> Self {
        Self(self.0 + 1)
    }
}

impl fmt::Display for EntryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Which derived aggregate an entry contributes to
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum Book {
    /// Member-to-member currency (balance)
    Currency = 1,
    /// Message experience (level)
    Experience = 2,
}

impl Book {
    /// Stable byte tag used in storage keys
    pub fn tag(self) -> u8 {
        self as u8
    }

    /// All books, in tag order
    pub const ALL: [Book; 2] = [Book::Currency, Book::Experience];
}

/// Serialization boundary key: one per (book, scope, account)
///
/// The derived `Ord` is the global lock acquisition order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct AccountKey {
    /// Book
    pub book: Book,
    /// Scope
    pub scope_id: ScopeId,
    /// Account
    pub account_id: AccountId,
}

impl AccountKey {
    /// Create a key
    pub fn new(book: Book, scope_id: ScopeId, account_id: AccountId) -> Self {
        Self {
            book,
            scope_id,
            account_id,
        }
    }

    /// Currency key shorthand
    pub fn currency(scope_id: ScopeId, account_id: AccountId) -> Self {
        Self::new(Book::Currency, scope_id, account_id)
    }

    /// Experience key shorthand
    pub fn experience(scope_id: ScopeId, account_id: AccountId) -> Self {
        Self::new(Book::Experience, scope_id, account_id)
    }
}

/// Entry awaiting commit (no identifier yet)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingEntry {
    /// Book this entry belongs to
    pub book: Book,
    /// Community
    pub scope_id: ScopeId,
    /// Member
    pub account_id: AccountId,
    /// Signed amount (credit > 0, debit < 0)
    pub amount: Decimal,
    /// Free-text reason, never empty
    pub description: String,
    /// Creation time (nanoseconds since Unix epoch)
    pub timestamp_nanos: i64,
    /// Links the legs of a two-sided operation
    pub correlation_id: Option<Uuid>,
}

impl PendingEntry {
    /// Attach the committed identifier
    pub fn commit(self, entry_id: EntryId) -> Entry {
        Entry {
            entry_id,
            book: self.book,
            scope_id: self.scope_id,
            account_id: self.account_id,
            amount: self.amount,
            description: self.description,
            timestamp_nanos: self.timestamp_nanos,
            correlation_id: self.correlation_id,
        }
    }

    /// Serialization boundary this entry falls under
    pub fn key(&self) -> AccountKey {
        AccountKey::new(self.book, self.scope_id, self.account_id)
    }
}

/// Immutable ledger entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entry {
    /// Commit sequence number
    pub entry_id: EntryId,
    /// Book this entry belongs to
    pub book: Book,
    /// Community
    pub scope_id: ScopeId,
    /// Member
    pub account_id: AccountId,
    /// Signed amount (credit > 0, debit < 0)
    pub amount: Decimal,
    /// Free-text reason, never empty
    pub description: String,
    /// Creation time (nanoseconds since Unix epoch)
    pub timestamp_nanos: i64,
    /// Links the legs of a two-sided operation
    pub correlation_id: Option<Uuid>,
}

impl Entry {
    /// Creation time as a UTC datetime
    pub fn timestamp(&self) -> DateTime<Utc> {
        DateTime::from_timestamp_nanos(self.timestamp_nanos)
    }

    /// Serialization boundary this entry falls under
    pub fn key(&self) -> AccountKey {
        AccountKey::new(self.book, self.scope_id, self.account_id)
    }

    /// Whether this entry decreases the account
    pub fn is_debit(&self) -> bool {
        self.amount.is_sign_negative() && !self.amount.is_zero()
    }
}

/// One row of a leaderboard
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Standing {
    /// Member
    pub account_id: AccountId,
    /// Balance or accumulated experience
    pub total: Decimal,
}

/// Level progress for one member
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rank {
    /// Current level
    pub level: u64,
    /// Experience earned inside the current level
    pub xp_in_level: u64,
    /// Experience the current level spans
    pub xp_for_next_level: u64,
    /// Accumulated experience
    pub total_xp: u64,
}

impl Rank {
    /// Experience still missing before the next level
    pub fn xp_remaining(&self) -> u64 {
        self.xp_for_next_level - self.xp_in_level
    }
}

/// Accumulated experience after one entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressPoint {
    /// Time of the entry
    pub at: DateTime<Utc>,
    /// Experience accumulated up to and including the entry
    pub total_xp: u64,
}

/// Why an experience event was turned away
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RejectReason {
    /// Inside the cooldown window of the last accepted event
    Cooldown {
        /// Earliest time a new event would be admitted
        retry_at: DateTime<Utc>,
    },
}

/// Result of `record_experience_event`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExperienceOutcome {
    /// Entry appended
    Accepted {
        /// Committed entry
        entry_id: EntryId,
        /// Experience granted by this event
        xp_granted: u64,
        /// Level before the event
        level_before: u64,
        /// Level after the event
        level_after: u64,
    },
    /// Nothing appended
    Rejected(RejectReason),
}

impl ExperienceOutcome {
    /// Whether the event was recorded
    pub fn is_accepted(&self) -> bool {
        matches!(self, ExperienceOutcome::Accepted { .. })
    }

    /// New level if the event crossed a level threshold
    pub fn level_up(&self) -> Option<u64> {
        match self {
            ExperienceOutcome::Accepted {
                level_before,
                level_after,
                ..
            } if level_after > level_before => Some(*level_after),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_account_key_order_is_book_scope_account() {
        let a = AccountKey::currency(ScopeId::new(1), AccountId::new(9));
        let b = AccountKey::currency(ScopeId::new(2), AccountId::new(1));
        let c = AccountKey::experience(ScopeId::new(1), AccountId::new(1));
        assert!(a < b);
        assert!(b < c);
    }

    #[test]
    fn test_pending_commit_keeps_fields() {
        let pending = PendingEntry {
            book: Book::Currency,
            scope_id: ScopeId::new(7),
            account_id: AccountId::new(42),
            amount: Decimal::new(-2500, 2),
            description: "Sent to 43".to_string(),
            timestamp_nanos: 1_000,
            correlation_id: Some(Uuid::now_v7()),
        };

        let entry = pending.clone().commit(EntryId::new(5));
        assert_eq!(entry.entry_id, EntryId::new(5));
        assert_eq!(entry.amount, pending.amount);
        assert_eq!(entry.correlation_id, pending.correlation_id);
        assert!(entry.is_debit());
        assert_eq!(entry.key(), pending.key());
    }

    #[test]
    fn test_level_up_detection() {
        let outcome = ExperienceOutcome::Accepted {
            entry_id: EntryId::new(1),
            xp_granted: 20,
            level_before: 0,
            level_after: 1,
        };
        assert_eq!(outcome.level_up(), Some(1));

        let same = ExperienceOutcome::Accepted {
            entry_id: EntryId::new(2),
            xp_granted: 20,
            level_before: 1,
            level_after: 1,
        };
        assert_eq!(same.level_up(), None);
        assert!(same.is_accepted());
    }
}
