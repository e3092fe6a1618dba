//! Storage layer using RocksDB
//!
//! # Column Families
//!
//! - `entries` - Append-only entry log (key: entry_id, big-endian)
//! - `accounts` - Per-account index (key: book || scope || account || entry_id,
//!   value: 16-byte exact decimal amount)
//! - `meta` - Highest entry id ever committed, written in every append batch.
//!   Purging a scope never lowers it, so ids are not reissued after a restart.
//!
//! The account index keeps each account's rows contiguous and in commit order,
//! so balances, leaderboards and history are prefix scans that never touch the
//! `entries` family unless full entries are requested.

use crate::{
    error::{Error, Result},
    types::{AccountId, Book, Entry, EntryId, ScopeId},
    Config,
};
use rocksdb::{
    ColumnFamily, ColumnFamilyDescriptor, Direction, IteratorMode, Options, WriteBatch,
    WriteOptions, DB,
};
use rust_decimal::Decimal;

/// Column family names
const CF_ENTRIES: &str = "entries";
const CF_ACCOUNTS: &str = "accounts";
const CF_META: &str = "meta";

const KEY_HIGH_WATER: &[u8] = b"high_water_entry_id";

const SCOPE_PREFIX_LEN: usize = 1 + 8;
const ACCOUNT_PREFIX_LEN: usize = SCOPE_PREFIX_LEN + 8;
const ACCOUNT_KEY_LEN: usize = ACCOUNT_PREFIX_LEN + 8;

/// Scan direction for account queries
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Order {
    /// Ascending entry id
    OldestFirst,
    /// Descending entry id
    NewestFirst,
}

/// Storage wrapper for RocksDB
pub struct Storage {
    db: DB,
    sync_writes: bool,
}

impl std::fmt::Debug for Storage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Storage")
            .field("path", &self.db.path())
            .field("sync_writes", &self.sync_writes)
            .finish()
    }
}

impl Storage {
    /// Open or create database
    pub fn open(config: &Config) -> Result<Self> {
        let path = &config.data_dir;

        // Create directory if not exists
        std::fs::create_dir_all(path)?;

        // Database options
        let mut db_opts = Options::default();
        db_opts.create_if_missing(true);
        db_opts.create_missing_column_families(true);

        // Tuning from config
        db_opts.set_write_buffer_size(config.rocksdb.write_buffer_size_mb * 1024 * 1024);
        db_opts.set_max_write_buffer_number(config.rocksdb.max_write_buffer_number);
        db_opts.set_max_background_jobs(config.rocksdb.max_background_jobs);

        if config.rocksdb.enable_statistics {
            db_opts.enable_statistics();
        }

        let cf_descriptors = vec![
            ColumnFamilyDescriptor::new(CF_ENTRIES, Self::cf_options_entries()),
            ColumnFamilyDescriptor::new(CF_ACCOUNTS, Self::cf_options_accounts()),
            ColumnFamilyDescriptor::new(CF_META, Options::default()),
        ];

        let db = DB::open_cf_descriptors(&db_opts, path, cf_descriptors)?;

        tracing::info!(path = ?path, "Opened RocksDB ledger store");

        Ok(Self {
            db,
            sync_writes: config.rocksdb.sync_writes,
        })
    }

    /// Open an existing database without write access
    ///
    /// Every write returns `StorageUnavailable`. Used for offline inspection.
    pub fn open_read_only(config: &Config) -> Result<Self> {
        let db = DB::open_cf_for_read_only(
            &Options::default(),
            &config.data_dir,
            [CF_ENTRIES, CF_ACCOUNTS, CF_META],
            false,
        )?;

        tracing::info!(path = ?config.data_dir, "Opened RocksDB ledger store read-only");

        Ok(Self {
            db,
            sync_writes: false,
        })
    }

    // Column family options

    fn cf_options_entries() -> Options {
        let mut opts = Options::default();
        opts.set_compression_type(rocksdb::DBCompressionType::Zstd);
        opts.set_bottommost_compression_type(rocksdb::DBCompressionType::Zstd);
        opts
    }

    fn cf_options_accounts() -> Options {
        let mut opts = Options::default();
        // Scanned on every balance read
        opts.set_compression_type(rocksdb::DBCompressionType::Lz4);
        let mut block_opts = rocksdb::BlockBasedOptions::default();
        block_opts.set_bloom_filter(10.0, false);
        opts.set_block_based_table_factory(&block_opts);
        opts
    }

    fn cf_handle(&self, name: &str) -> Result<&ColumnFamily> {
        self.db
            .cf_handle(name)
            .ok_or_else(|| Error::StorageUnavailable(format!("Column family {} not found", name)))
    }

    fn write_options(&self) -> WriteOptions {
        let mut opts = WriteOptions::default();
        opts.set_sync(self.sync_writes);
        opts
    }

    // Write path

    /// Append entries (atomic: all rows land or none do)
    pub fn append_batch(&self, entries: &[Entry]) -> Result<()> {
        if entries.is_empty() {
            return Ok(());
        }

        let cf_entries = self.cf_handle(CF_ENTRIES)?;
        let cf_accounts = self.cf_handle(CF_ACCOUNTS)?;
        let cf_meta = self.cf_handle(CF_META)?;
        let mut batch = WriteBatch::default();
        let mut high_water = self.high_water()?;

        for entry in entries {
            high_water = high_water.max(Some(entry.entry_id));
            let value = bincode::serialize(entry)?;
            batch.put_cf(cf_entries, entry.entry_id.get().to_be_bytes(), &value);
            batch.put_cf(
                cf_accounts,
                Self::account_key(entry.book, entry.scope_id, entry.account_id, entry.entry_id),
                entry.amount.serialize(),
            );
        }

        if let Some(high_water) = high_water {
            batch.put_cf(cf_meta, KEY_HIGH_WATER, high_water.get().to_be_bytes());
        }

        self.db.write_opt(batch, &self.write_options())?;

        tracing::debug!(
            count = entries.len(),
            first_entry_id = %entries[0].entry_id,
            "Entries appended"
        );

        Ok(())
    }

    /// Remove every entry of a scope across all books (cascade on scope removal)
    pub fn purge_scope(&self, scope_id: ScopeId) -> Result<usize> {
        let cf_entries = self.cf_handle(CF_ENTRIES)?;
        let cf_accounts = self.cf_handle(CF_ACCOUNTS)?;
        let mut batch = WriteBatch::default();
        let mut removed = 0usize;

        for book in Book::ALL {
            let prefix = Self::scope_prefix(book, scope_id);
            for item in self.scan(&prefix, Direction::Forward)? {
                let (key, _) = item?;
                let entry_id = Self::decode_entry_id(&key)?;
                batch.delete_cf(cf_accounts, &key);
                batch.delete_cf(cf_entries, entry_id.get().to_be_bytes());
                removed += 1;
            }
        }

        if removed > 0 {
            self.db.write_opt(batch, &self.write_options())?;
        }

        tracing::info!(scope = %scope_id, removed, "Scope purged");

        Ok(removed)
    }

    // Read path

    /// Get entry by ID
    pub fn get_entry(&self, entry_id: EntryId) -> Result<Option<Entry>> {
        let cf = self.cf_handle(CF_ENTRIES)?;

        match self.db.get_cf(cf, entry_id.get().to_be_bytes())? {
            Some(value) => Ok(Some(bincode::deserialize(&value)?)),
            None => Ok(None),
        }
    }

    /// Highest entry ID ever committed, including purged entries
    pub fn last_entry_id(&self) -> Result<Option<EntryId>> {
        Ok(self.high_water()?.max(self.log_tail()?))
    }

    fn high_water(&self) -> Result<Option<EntryId>> {
        let cf = self.cf_handle(CF_META)?;

        match self.db.get_cf(cf, KEY_HIGH_WATER)? {
            Some(value) => {
                let bytes: [u8; 8] = value[..].try_into().map_err(|_| {
                    Error::InvariantViolation(format!("Malformed high-water mark of {} bytes", value.len()))
                })?;
                Ok(Some(EntryId::new(u64::from_be_bytes(bytes))))
            }
            None => Ok(None),
        }
    }

    /// Highest entry ID still present in the log
    fn log_tail(&self) -> Result<Option<EntryId>> {
        let cf = self.cf_handle(CF_ENTRIES)?;

        match self.db.iterator_cf(cf, IteratorMode::End).next() {
            Some(item) => {
                let (key, _) = item?;
                let bytes: [u8; 8] = key[..].try_into().map_err(|_| {
                    Error::InvariantViolation(format!("Malformed entry key of {} bytes", key.len()))
                })?;
                Ok(Some(EntryId::new(u64::from_be_bytes(bytes))))
            }
            None => Ok(None),
        }
    }

    /// Entries of one account in commit order (or reverse), up to `limit`
    pub fn query(
        &self,
        book: Book,
        scope_id: ScopeId,
        account_id: AccountId,
        order: Order,
        limit: Option<usize>,
    ) -> Result<Vec<Entry>> {
        let prefix = Self::account_prefix(book, scope_id, account_id);
        let direction = match order {
            Order::OldestFirst => Direction::Forward,
            Order::NewestFirst => Direction::Reverse,
        };
        let limit = limit.unwrap_or(usize::MAX);

        let mut entries = Vec::new();
        for item in self.scan(&prefix, direction)?.take(limit) {
            let (key, _) = item?;
            let entry_id = Self::decode_entry_id(&key)?;
            let entry = self.get_entry(entry_id)?.ok_or_else(|| {
                Error::InvariantViolation(format!("Index references missing entry {}", entry_id))
            })?;
            entries.push(entry);
        }

        Ok(entries)
    }

    /// Most recent entry of one account
    pub fn latest(
        &self,
        book: Book,
        scope_id: ScopeId,
        account_id: AccountId,
    ) -> Result<Option<Entry>> {
        let mut entries = self.query(book, scope_id, account_id, Order::NewestFirst, Some(1))?;
        Ok(entries.pop())
    }

    /// Amounts of one account in commit order
    pub fn amounts(
        &self,
        book: Book,
        scope_id: ScopeId,
        account_id: AccountId,
    ) -> Result<Vec<Decimal>> {
        let prefix = Self::account_prefix(book, scope_id, account_id);

        let result = self.scan(&prefix, Direction::Forward)?
            .map(|item| {
                let (_, value) = item?;
                Self::decode_amount(&value)
            })
            .collect();
        result
    }

    /// Every (account, amount) row of a scope, grouped by account ascending
    pub fn scope_amounts(&self, book: Book, scope_id: ScopeId) -> Result<Vec<(AccountId, Decimal)>> {
        let prefix = Self::scope_prefix(book, scope_id);

        let result = self.scan(&prefix, Direction::Forward)?
            .map(|item| {
                let (key, value) = item?;
                Ok((Self::decode_account_id(&key)?, Self::decode_amount(&value)?))
            })
            .collect();
        result
    }

    /// Every entry of a scope, grouped by account ascending
    pub fn scope_entries(&self, book: Book, scope_id: ScopeId) -> Result<Vec<Entry>> {
        let prefix = Self::scope_prefix(book, scope_id);

        let result = self.scan(&prefix, Direction::Forward)?
            .map(|item| {
                let (key, _) = item?;
                let entry_id = Self::decode_entry_id(&key)?;
                self.get_entry(entry_id)?.ok_or_else(|| {
                    Error::InvariantViolation(format!("Index references missing entry {}", entry_id))
                })
            })
            .collect();
        result
    }

    fn scan<'a>(
        &'a self,
        prefix: &'a [u8],
        direction: Direction,
    ) -> Result<impl Iterator<Item = Result<(Box<[u8]>, Box<[u8]>)>> + 'a> {
        let cf = self.cf_handle(CF_ACCOUNTS)?;

        // Reverse scans seek to the largest key sharing the prefix
        let mut start = prefix.to_vec();
        if matches!(direction, Direction::Reverse) {
            start.resize(ACCOUNT_KEY_LEN, 0xFF);
        }

        let iter = self.db.iterator_cf(cf, IteratorMode::From(start.as_slice(), direction));

        Ok(iter
            .map(|item| item.map_err(Error::from))
            .take_while(move |item| match item {
                Ok((key, _)) => key.starts_with(prefix),
                Err(_) => true,
            }))
    }

    // Key helpers

    fn scope_prefix(book: Book, scope_id: ScopeId) -> Vec<u8> {
        let mut key = Vec::with_capacity(ACCOUNT_KEY_LEN);
        key.push(book.tag());
        key.extend_from_slice(&scope_id.get().to_be_bytes());
        key
    }

    fn account_prefix(book: Book, scope_id: ScopeId, account_id: AccountId) -> Vec<u8> {
        let mut key = Self::scope_prefix(book, scope_id);
        key.extend_from_slice(&account_id.get().to_be_bytes());
        key
    }

    fn account_key(book: Book, scope_id: ScopeId, account_id: AccountId, entry_id: EntryId) -> Vec<u8> {
        let mut key = Self::account_prefix(book, scope_id, account_id);
        key.extend_from_slice(&entry_id.get().to_be_bytes());
        key
    }

    fn key_u64(key: &[u8], offset: usize) -> Result<u64> {
        if key.len() != ACCOUNT_KEY_LEN {
            return Err(Error::InvariantViolation(format!(
                "Malformed account index key of {} bytes",
                key.len()
            )));
        }
        let mut bytes = [0u8; 8];
        bytes.copy_from_slice(&key[offset..offset + 8]);
        Ok(u64::from_be_bytes(bytes))
    }

    fn decode_account_id(key: &[u8]) -> Result<AccountId> {
        Self::key_u64(key, SCOPE_PREFIX_LEN).map(AccountId::new)
    }

    fn decode_entry_id(key: &[u8]) -> Result<EntryId> {
        Self::key_u64(key, ACCOUNT_PREFIX_LEN).map(EntryId::new)
    }

    fn decode_amount(value: &[u8]) -> Result<Decimal> {
        let bytes: [u8; 16] = value.try_into().map_err(|_| {
            Error::InvariantViolation(format!("Malformed amount of {} bytes", value.len()))
        })?;
        Ok(Decimal::deserialize(bytes))
    }

    // Statistics

    /// Get storage statistics
    pub fn stats(&self) -> Result<StorageStats> {
        let cf_entries = self.cf_handle(CF_ENTRIES)?;

        let approximate_entries = self
            .db
            .property_int_value_cf(cf_entries, "rocksdb.estimate-num-keys")?
            .unwrap_or(0);

        Ok(StorageStats {
            approximate_entries,
            last_entry_id: self.last_entry_id()?,
        })
    }
}

/// Storage statistics
#[derive(Debug, Clone)]
pub struct StorageStats {
    /// RocksDB key estimate for the entry log
    pub approximate_entries: u64,
    /// Highest committed entry ID
    pub last_entry_id: Option<EntryId>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Config;
    use tempfile::TempDir;

    fn test_storage() -> (Storage, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let mut config = Config::default();
        config.data_dir = temp_dir.path().to_path_buf();
        config.rocksdb.sync_writes = false;
        (Storage::open(&config).unwrap(), temp_dir)
    }

    fn entry(id: u64, book: Book, scope: u64, account: u64, cents: i64) -> Entry {
        Entry {
            entry_id: EntryId::new(id),
            book,
            scope_id: ScopeId::new(scope),
            account_id: AccountId::new(account),
            amount: Decimal::new(cents, 2),
            description: "Income".to_string(),
            timestamp_nanos: id as i64 * 1_000,
            correlation_id: None,
        }
    }

    #[test]
    fn test_storage_open_empty() {
        let (storage, _temp) = test_storage();
        assert_eq!(storage.last_entry_id().unwrap(), None);
        assert!(storage.db.cf_handle(CF_ENTRIES).is_some());
        assert!(storage.db.cf_handle(CF_ACCOUNTS).is_some());
        assert!(storage.db.cf_handle(CF_META).is_some());
    }

    #[test]
    fn test_append_and_get_entry() {
        let (storage, _temp) = test_storage();
        let e = entry(1, Book::Currency, 10, 100, 10000);

        storage.append_batch(&[e.clone()]).unwrap();

        assert_eq!(storage.get_entry(EntryId::new(1)).unwrap(), Some(e));
        assert_eq!(storage.get_entry(EntryId::new(2)).unwrap(), None);
        assert_eq!(storage.last_entry_id().unwrap(), Some(EntryId::new(1)));
    }

    #[test]
    fn test_query_orders_and_limits() {
        let (storage, _temp) = test_storage();
        let entries: Vec<Entry> = (1..=5)
            .map(|id| entry(id, Book::Currency, 10, 100, id as i64 * 100))
            .collect();
        storage.append_batch(&entries).unwrap();
        // Neighbouring accounts must not leak into the scan
        storage
            .append_batch(&[
                entry(6, Book::Currency, 10, 99, 1),
                entry(7, Book::Currency, 10, 101, 1),
                entry(8, Book::Experience, 10, 100, 2000),
            ])
            .unwrap();

        let newest = storage
            .query(Book::Currency, ScopeId::new(10), AccountId::new(100), Order::NewestFirst, Some(3))
            .unwrap();
        let ids: Vec<u64> = newest.iter().map(|e| e.entry_id.get()).collect();
        assert_eq!(ids, vec![5, 4, 3]);

        let oldest = storage
            .query(Book::Currency, ScopeId::new(10), AccountId::new(100), Order::OldestFirst, None)
            .unwrap();
        let ids: Vec<u64> = oldest.iter().map(|e| e.entry_id.get()).collect();
        assert_eq!(ids, vec![1, 2, 3, 4, 5]);

        let latest = storage
            .latest(Book::Experience, ScopeId::new(10), AccountId::new(100))
            .unwrap()
            .unwrap();
        assert_eq!(latest.entry_id, EntryId::new(8));
    }

    #[test]
    fn test_scope_amounts_grouped_by_account() {
        let (storage, _temp) = test_storage();
        storage
            .append_batch(&[
                entry(1, Book::Currency, 1, 30, 100),
                entry(2, Book::Currency, 1, 10, 200),
                entry(3, Book::Currency, 1, 30, -50),
                entry(4, Book::Currency, 2, 10, 999),
            ])
            .unwrap();

        let rows = storage.scope_amounts(Book::Currency, ScopeId::new(1)).unwrap();
        assert_eq!(
            rows,
            vec![
                (AccountId::new(10), Decimal::new(200, 2)),
                (AccountId::new(30), Decimal::new(100, 2)),
                (AccountId::new(30), Decimal::new(-50, 2)),
            ]
        );

        let entries = storage.scope_entries(Book::Currency, ScopeId::new(1)).unwrap();
        let ids: Vec<u64> = entries.iter().map(|e| e.entry_id.get()).collect();
        assert_eq!(ids, vec![2, 1, 3]);
    }

    #[test]
    fn test_purge_scope_leaves_other_scopes() {
        let (storage, _temp) = test_storage();
        storage
            .append_batch(&[
                entry(1, Book::Currency, 1, 10, 100),
                entry(2, Book::Experience, 1, 10, 2000),
                entry(3, Book::Currency, 2, 10, 100),
            ])
            .unwrap();

        assert_eq!(storage.purge_scope(ScopeId::new(1)).unwrap(), 2);
        assert_eq!(storage.last_entry_id().unwrap(), Some(EntryId::new(3)));

        assert!(storage.scope_amounts(Book::Currency, ScopeId::new(1)).unwrap().is_empty());
        assert!(storage.scope_amounts(Book::Experience, ScopeId::new(1)).unwrap().is_empty());
        assert_eq!(storage.get_entry(EntryId::new(1)).unwrap(), None);
        assert_eq!(
            storage.amounts(Book::Currency, ScopeId::new(2), AccountId::new(10)).unwrap(),
            vec![Decimal::new(100, 2)]
        );
    }

    #[test]
    fn test_entries_survive_reopen() {
        let temp_dir = TempDir::new().unwrap();
        let mut config = Config::default();
        config.data_dir = temp_dir.path().to_path_buf();

        {
            let storage = Storage::open(&config).unwrap();
            storage.append_batch(&[entry(41, Book::Currency, 1, 1, 500)]).unwrap();
        }

        let storage = Storage::open(&config).unwrap();
        assert_eq!(storage.last_entry_id().unwrap(), Some(EntryId::new(41)));
        assert_eq!(storage.stats().unwrap().last_entry_id, Some(EntryId::new(41)));
    }

    #[test]
    fn test_purging_newest_scope_keeps_high_water() {
        let temp_dir = TempDir::new().unwrap();
        let mut config = Config::default();
        config.data_dir = temp_dir.path().to_path_buf();

        {
            let storage = Storage::open(&config).unwrap();
            storage
                .append_batch(&[
                    entry(1, Book::Currency, 1, 10, 100),
                    entry(2, Book::Currency, 2, 10, 100),
                ])
                .unwrap();
            storage.purge_scope(ScopeId::new(2)).unwrap();
        }

        let storage = Storage::open(&config).unwrap();
        assert_eq!(storage.get_entry(EntryId::new(2)).unwrap(), None);
        assert_eq!(storage.last_entry_id().unwrap(), Some(EntryId::new(2)));
    }

    #[test]
    fn test_read_only_rejects_writes() {
        let temp_dir = TempDir::new().unwrap();
        let mut config = Config::default();
        config.data_dir = temp_dir.path().to_path_buf();

        {
            let storage = Storage::open(&config).unwrap();
            storage.append_batch(&[entry(1, Book::Currency, 1, 10, 100)]).unwrap();
        }

        let storage = Storage::open_read_only(&config).unwrap();
        let err = storage
            .append_batch(&[entry(2, Book::Currency, 1, 10, 100)])
            .unwrap_err();
        assert!(matches!(err, Error::StorageUnavailable(_)));
        assert!(err.is_retryable());
        assert_eq!(storage.last_entry_id().unwrap(), Some(EntryId::new(1)));
        assert_eq!(storage.get_entry(EntryId::new(2)).unwrap(), None);
    }
}
