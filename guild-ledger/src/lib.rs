//! Guild Ledger
//!
//! Event-sourced ledger behind a community bot's currency and experience
//! features. Balances, experience totals, levels and leaderboards are all
//! derived from one append-only log of signed entries keyed by
//! (scope, account).
//!
//! # Architecture
//!
//! - **Event Sourcing**: Every aggregate is folded from immutable entries
//! - **Single Writer**: One writer task assigns entry ids and commits batches
//! - **Account Locks**: Check-and-append runs under a per-account lock, taken in key order
//! - **Group Commit**: Concurrent appends share one durable `WriteBatch`

#![forbid(unsafe_code)]
//!
//! # Invariants
//!
//! - No overdraft: a currency balance never goes below zero
//! - Conservation: a transfer's two legs commit together and net to zero
//! - At most one accepted experience event per account per cooldown window
//! - Level is a monotonic function of accumulated experience

#![warn(
    missing_docs,
    rust_2018_idioms,
    missing_debug_implementations,
    clippy::all
)]

pub mod types;
pub mod storage;
pub mod ledger;
pub mod error;
pub mod actor;
pub mod config;
pub mod metrics;
pub mod aggregate;
pub mod level;
pub mod locks;
pub mod coordinator;
pub mod cooldown;
pub mod experience;
pub mod clock;

// Re-exports
pub use error::{Error, Result};
pub use types::{
    AccountId, AccountKey, Book, Entry, EntryId, ExperienceOutcome, PendingEntry,
    ProgressPoint, Rank, RejectReason, ScopeId, Standing,
};
pub use ledger::Ledger;
pub use config::Config;
pub use storage::{Order, Storage};
pub use clock::{Clock, ManualClock, SystemClock};
pub use metrics::Metrics;
