//! Per-account serialization boundaries
//!
//! Every check-then-append sequence runs while holding the lock of each
//! account it reads or writes. Locks for a multi-account operation are taken
//! in ascending [`AccountKey`] order, whatever order the request names them
//! in, so two transfers in opposite directions cannot deadlock.
//!
//! Each scope also has a reader/writer lock. Account holders take it shared
//! before their account locks; purging a scope takes it exclusive, so a purge
//! never interleaves with a balance check and its append.

use crate::types::{AccountKey, ScopeId};
use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard, OwnedRwLockReadGuard, OwnedRwLockWriteGuard, RwLock};

/// Registry of account and scope locks
#[derive(Debug, Default)]
pub struct AccountLocks {
    locks: DashMap<AccountKey, Arc<Mutex<()>>>,
    scopes: DashMap<ScopeId, Arc<RwLock<()>>>,
}

impl AccountLocks {
    /// Create empty registry
    pub fn new() -> Self {
        Self::default()
    }

    fn lock_for(&self, key: AccountKey) -> Arc<Mutex<()>> {
        self.locks.entry(key).or_default().clone()
    }

    fn scope_lock_for(&self, scope_id: ScopeId) -> Arc<RwLock<()>> {
        self.scopes.entry(scope_id).or_default().clone()
    }

    /// Hold one account
    pub async fn acquire(&self, key: AccountKey) -> AccountGuard {
        self.acquire_all([key]).await
    }

    /// Hold several accounts, in global key order
    pub async fn acquire_all<I>(&self, keys: I) -> AccountGuard
    where
        I: IntoIterator<Item = AccountKey>,
    {
        let mut keys: Vec<AccountKey> = keys.into_iter().collect();
        keys.sort_unstable();
        keys.dedup();

        let mut scope_ids: Vec<ScopeId> = keys.iter().map(|key| key.scope_id).collect();
        scope_ids.sort_unstable();
        scope_ids.dedup();

        // No DashMap shard lock may be held across these awaits
        let mut scopes = Vec::with_capacity(scope_ids.len());
        for scope_id in scope_ids {
            let lock = self.scope_lock_for(scope_id);
            scopes.push(lock.read_owned().await);
        }

        let mut guards = Vec::with_capacity(keys.len());
        for key in &keys {
            let lock = self.lock_for(*key);
            guards.push(lock.lock_owned().await);
        }

        AccountGuard {
            keys,
            _guards: guards,
            _scopes: scopes,
        }
    }

    /// Hold a whole scope, waiting out every account holder inside it
    pub async fn acquire_scope(&self, scope_id: ScopeId) -> ScopeGuard {
        let lock = self.scope_lock_for(scope_id);
        ScopeGuard {
            scope_id,
            _guard: lock.write_owned().await,
        }
    }

    /// Number of accounts that have ever been locked
    pub fn len(&self) -> usize {
        self.locks.len()
    }

    /// Whether no account has been locked yet
    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }
}

/// Held boundaries; released on drop
#[derive(Debug)]
pub struct AccountGuard {
    keys: Vec<AccountKey>,
    // Field order is drop order: accounts are released before their scopes
    _guards: Vec<OwnedMutexGuard<()>>,
    _scopes: Vec<OwnedRwLockReadGuard<()>>,
}

impl AccountGuard {
    /// Whether this guard covers `key`
    pub fn covers(&self, key: &AccountKey) -> bool {
        self.keys.binary_search(key).is_ok()
    }
}

/// Exclusive hold on a scope; released on drop
#[derive(Debug)]
pub struct ScopeGuard {
    scope_id: ScopeId,
    _guard: OwnedRwLockWriteGuard<()>,
}

impl ScopeGuard {
    /// Scope held
    pub fn scope_id(&self) -> ScopeId {
        self.scope_id
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::AccountId;
    use std::time::Duration;

    fn key(account: u64) -> AccountKey {
        AccountKey::currency(ScopeId::new(1), AccountId::new(account))
    }

    #[tokio::test]
    async fn test_acquire_sorts_and_dedups() {
        let locks = AccountLocks::new();
        let guard = locks.acquire_all([key(9), key(2), key(9)]).await;

        assert!(guard.covers(&key(2)));
        assert!(guard.covers(&key(9)));
        assert!(!guard.covers(&key(3)));
        assert_eq!(locks.len(), 2);
    }

    #[tokio::test]
    async fn test_second_holder_waits() {
        let locks = Arc::new(AccountLocks::new());
        let guard = locks.acquire(key(1)).await;

        let contender = {
            let locks = locks.clone();
            tokio::spawn(async move {
                let _guard = locks.acquire(key(1)).await;
            })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!contender.is_finished());

        drop(guard);
        contender.await.unwrap();
    }

    #[tokio::test]
    async fn test_scope_hold_waits_for_account_holders() {
        let locks = Arc::new(AccountLocks::new());
        let guard = locks.acquire(key(1)).await;

        let purge = {
            let locks = locks.clone();
            tokio::spawn(async move {
                let scope = locks.acquire_scope(ScopeId::new(1)).await;
                assert_eq!(scope.scope_id(), ScopeId::new(1));
            })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!purge.is_finished());

        drop(guard);
        purge.await.unwrap();
    }

    #[tokio::test]
    async fn test_account_holders_wait_for_scope_hold() {
        let locks = Arc::new(AccountLocks::new());
        let scope = locks.acquire_scope(ScopeId::new(1)).await;

        let contender = {
            let locks = locks.clone();
            tokio::spawn(async move {
                let _guard = locks.acquire(key(1)).await;
            })
        };

        // Other scopes are unaffected
        let other = AccountKey::currency(ScopeId::new(2), AccountId::new(1));
        let _other = locks.acquire(other).await;

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!contender.is_finished());

        drop(scope);
        contender.await.unwrap();
    }

    #[tokio::test]
    async fn test_same_scope_holders_do_not_block_each_other() {
        let locks = AccountLocks::new();
        let _first = locks.acquire(key(1)).await;

        let second = tokio::time::timeout(Duration::from_secs(1), locks.acquire(key(2))).await;
        assert!(second.is_ok());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_opposite_order_requests_do_not_deadlock() {
        let locks = Arc::new(AccountLocks::new());
        let mut tasks = Vec::new();

        for i in 0..200 {
            let locks = locks.clone();
            tasks.push(tokio::spawn(async move {
                let pair = if i % 2 == 0 {
                    [key(1), key(2)]
                } else {
                    [key(2), key(1)]
                };
                let _guard = locks.acquire_all(pair).await;
                tokio::task::yield_now().await;
            }));
        }

        let all = join_all(tasks);
        tokio::time::timeout(Duration::from_secs(5), all)
            .await
            .expect("lock ordering deadlocked");
    }

    async fn join_all(tasks: Vec<tokio::task::JoinHandle<()>>) {
        for task in tasks {
            task.await.unwrap();
        }
    }
}
