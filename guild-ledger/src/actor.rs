//! Single-writer append actor
//!
//! Every durable write goes through one Tokio task:
//! - Entry ids come from one counter, so they are strictly increasing
//! - Concurrent requests are grouped into one RocksDB `WriteBatch` (group commit)
//! - Callers are answered only after their batch is on disk
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────┐
//! │        Transfer coordinator / experience path         │
//! │        (holding the affected account locks)           │
//! └─────────────────────┬────────────────────────────────┘
//!                       │
//!                       │ WriterMessage::Append
//!                       ▼
//! ┌──────────────────────────────────────────────────────┐
//! │               WriterHandle (Clone)                    │
//! │         Sends messages to actor mailbox               │
//! └─────────────────────┬────────────────────────────────┘
//!                       │
//!                       │ mpsc::channel (bounded)
//!                       ▼
//! ┌──────────────────────────────────────────────────────┐
//! │                 Writer (Single Task)                  │
//! │  ┌────────────────────────────────────────────────┐  │
//! │  │ Pending: Vec<(entries, reply)>                 │  │
//! │  │ Timer: timeout or max entries → flush_batch()  │  │
//! │  └────────────────────────────────────────────────┘  │
//! │                       │                               │
//! │                       ▼                               │
//! │           Storage::append_batch()                     │
//! │      (one WriteBatch, then every reply is sent)       │
//! └───────────────────────────────────────────────────────┘
//! ```

use crate::metrics::Metrics;
use crate::types::{EntryId, PendingEntry, ScopeId};
use crate::{Error, Result, Storage};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{mpsc, oneshot};
use tokio::time::{interval, Duration};

/// Message sent to the writer
#[derive(Debug)]
pub enum WriterMessage {
    /// Commit entries as one all-or-nothing unit
    Append {
        /// Entries in commit order
        entries: Vec<PendingEntry>,
        /// Assigned ids, sent once durable
        response: oneshot::Sender<Result<Vec<EntryId>>>,
    },

    /// Delete every entry of a scope
    PurgeScope {
        /// Scope to remove
        scope_id: ScopeId,
        /// Number of entries removed
        response: oneshot::Sender<Result<usize>>,
    },

    /// Commit pending appends now
    Flush {
        /// Flush outcome
        response: oneshot::Sender<Result<()>>,
    },

    /// Flush and stop
    Shutdown {
        /// Sent after the final flush
        response: oneshot::Sender<Result<()>>,
    },
}

struct PendingAppend {
    entries: Vec<PendingEntry>,
    response: oneshot::Sender<Result<Vec<EntryId>>>,
}

/// Actor that owns the write path
pub struct Writer {
    /// Storage backend
    storage: Arc<Storage>,

    /// Mailbox for incoming messages
    mailbox: mpsc::Receiver<WriterMessage>,

    /// Requests waiting for the next commit
    pending: Vec<PendingAppend>,

    /// Entries across all pending requests
    pending_entries: usize,

    /// Id for the next committed entry
    next_entry_id: EntryId,

    /// Maximum batch size (entries)
    max_batch_size: usize,

    /// Batch timeout
    batch_timeout: Duration,

    /// Group commit enabled
    batching_enabled: bool,

    metrics: Metrics,
}

impl std::fmt::Debug for Writer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Writer")
            .field("pending_entries", &self.pending_entries)
            .field("next_entry_id", &self.next_entry_id)
            .field("batching_enabled", &self.batching_enabled)
            .finish()
    }
}

impl Writer {
    /// Create new actor, resuming the id sequence from storage
    pub fn new(
        storage: Arc<Storage>,
        mailbox: mpsc::Receiver<WriterMessage>,
        max_batch_size: usize,
        batch_timeout: Duration,
        batching_enabled: bool,
        metrics: Metrics,
    ) -> Result<Self> {
        let next_entry_id = storage
            .last_entry_id()?
            .map(EntryId::next)
            .unwrap_or(EntryId::new(1));

        Ok(Self {
            storage,
            mailbox,
            pending: Vec::new(),
            pending_entries: 0,
            next_entry_id,
            max_batch_size,
            batch_timeout,
            batching_enabled,
            metrics,
        })
    }

    /// Run the actor event loop
    pub async fn run(mut self) {
        let mut batch_timer = interval(self.batch_timeout.max(Duration::from_millis(1)));
        batch_timer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        let mut shutdown = None;

        loop {
            tokio::select! {
                Some(msg) = self.mailbox.recv() => {
                    if let WriterMessage::Shutdown { response } = msg {
                        shutdown = Some((response, self.flush_batch()));
                        break;
                    }

                    self.handle_message(msg);

                    if !self.batching_enabled || self.pending_entries >= self.max_batch_size {
                        if let Err(e) = self.flush_batch() {
                            tracing::error!(error = %e, "Error flushing batch");
                        }
                    }
                }

                _ = batch_timer.tick(), if self.batching_enabled && !self.pending.is_empty() => {
                    if let Err(e) = self.flush_batch() {
                        tracing::error!(error = %e, "Error flushing batch on timeout");
                    }
                }

                // Every handle dropped
                else => {
                    if let Err(e) = self.flush_batch() {
                        tracing::error!(error = %e, "Error flushing final batch");
                    }
                    break;
                }
            }
        }

        tracing::debug!(next_entry_id = %self.next_entry_id, "Writer stopped");

        // Store is released before shutdown is acknowledged
        drop(self);
        if let Some((response, result)) = shutdown {
            let _ = response.send(result);
        }
    }

    fn handle_message(&mut self, msg: WriterMessage) {
        match msg {
            WriterMessage::Append { entries, response } => {
                if entries.is_empty() {
                    let _ = response.send(Ok(Vec::new()));
                    return;
                }
                self.pending_entries += entries.len();
                self.pending.push(PendingAppend { entries, response });
            }

            WriterMessage::PurgeScope { scope_id, response } => {
                // Appends queued before the purge land first, then go with it
                let result = self.flush_batch().and_then(|_| self.storage.purge_scope(scope_id));
                let _ = response.send(result);
            }

            WriterMessage::Flush { response } => {
                let _ = response.send(self.flush_batch());
            }

            WriterMessage::Shutdown { .. } => {
                // Handled in run loop
            }
        }
    }

    /// Commit every pending request in one write batch
    fn flush_batch(&mut self) -> Result<()> {
        if self.pending.is_empty() {
            return Ok(());
        }

        let started = Instant::now();
        let requests = std::mem::take(&mut self.pending);
        let mut committed = Vec::with_capacity(self.pending_entries);
        let mut replies = Vec::with_capacity(requests.len());
        let mut next = self.next_entry_id;
        self.pending_entries = 0;

        for PendingAppend { entries, response } in requests {
            let ids: Vec<EntryId> = entries
                .into_iter()
                .map(|entry| {
                    let id = next;
                    next = next.next();
                    committed.push(entry.commit(id));
                    id
                })
                .collect();
            replies.push((ids, response));
        }

        tracing::debug!(
            requests = replies.len(),
            entries = committed.len(),
            "Flushing batch"
        );

        match self.storage.append_batch(&committed) {
            Ok(()) => {
                self.next_entry_id = next;
                self.metrics.record_commit(committed.len(), started.elapsed().as_secs_f64());
                for (ids, response) in replies {
                    let _ = response.send(Ok(ids));
                }
                Ok(())
            }
            Err(e) => {
                let reason = e.to_string();
                for (_, response) in replies {
                    let _ = response.send(Err(Error::StorageUnavailable(reason.clone())));
                }
                Err(e)
            }
        }
    }
}

/// Handle for sending messages to the writer
#[derive(Debug, Clone)]
pub struct WriterHandle {
    sender: mpsc::Sender<WriterMessage>,
}

impl WriterHandle {
    /// Create new handle
    pub fn new(sender: mpsc::Sender<WriterMessage>) -> Self {
        Self { sender }
    }

    async fn request<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<Result<T>>) -> WriterMessage,
    ) -> Result<T> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(build(tx))
            .await
            .map_err(|_| Error::Concurrency("Writer mailbox closed".to_string()))?;

        rx.await
            .map_err(|_| Error::Concurrency("Response channel closed".to_string()))?
    }

    /// Commit entries atomically; returns their ids once durable
    pub async fn append(&self, entries: Vec<PendingEntry>) -> Result<Vec<EntryId>> {
        self.request(|response| WriterMessage::Append { entries, response })
            .await
    }

    /// Delete every entry of a scope
    pub async fn purge_scope(&self, scope_id: ScopeId) -> Result<usize> {
        self.request(|response| WriterMessage::PurgeScope { scope_id, response })
            .await
    }

    /// Commit pending appends now
    pub async fn flush(&self) -> Result<()> {
        self.request(|response| WriterMessage::Flush { response }).await
    }

    /// Flush and stop the writer
    pub async fn shutdown(&self) -> Result<()> {
        self.request(|response| WriterMessage::Shutdown { response })
            .await
    }
}

/// Spawn the writer
pub fn spawn_writer(
    storage: Arc<Storage>,
    max_batch_size: usize,
    batch_timeout: Duration,
    batching_enabled: bool,
    metrics: Metrics,
) -> Result<WriterHandle> {
    let (tx, rx) = mpsc::channel(1000); // Bounded channel for backpressure
    let writer = Writer::new(
        storage,
        rx,
        max_batch_size,
        batch_timeout,
        batching_enabled,
        metrics,
    )?;

    tokio::spawn(writer.run());

    Ok(WriterHandle::new(tx))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{AccountId, Book};
    use crate::Config;
    use rust_decimal::Decimal;
    use tempfile::TempDir;

    fn open_storage() -> (Arc<Storage>, TempDir) {
        let temp_dir = tempfile::tempdir().unwrap();
        let mut config = Config::default();
        config.data_dir = temp_dir.path().to_path_buf();
        config.rocksdb.sync_writes = false;
        (Arc::new(Storage::open(&config).unwrap()), temp_dir)
    }

    fn pending(account: u64, cents: i64) -> PendingEntry {
        PendingEntry {
            book: Book::Currency,
            scope_id: ScopeId::new(1),
            account_id: AccountId::new(account),
            amount: Decimal::new(cents, 2),
            description: "Income".to_string(),
            timestamp_nanos: 0,
            correlation_id: None,
        }
    }

    #[tokio::test]
    async fn test_writer_spawn_and_shutdown() {
        let (storage, _temp) = open_storage();
        let handle = spawn_writer(storage, 100, Duration::from_millis(10), true, Metrics::default())
            .unwrap();

        handle.shutdown().await.unwrap();
        assert!(handle.flush().await.is_err());
    }

    #[tokio::test]
    async fn test_append_is_durable_on_return() {
        let (storage, _temp) = open_storage();
        let handle = spawn_writer(
            storage.clone(),
            100,
            Duration::from_millis(50),
            true,
            Metrics::default(),
        )
        .unwrap();

        let ids = handle.append(vec![pending(1, -500), pending(2, 500)]).await.unwrap();
        assert_eq!(ids, vec![EntryId::new(1), EntryId::new(2)]);

        // No explicit flush: the reply itself implies the commit
        assert!(storage.get_entry(ids[0]).unwrap().is_some());
        assert!(storage.get_entry(ids[1]).unwrap().is_some());

        handle.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_concurrent_appends_get_distinct_ids() {
        let (storage, _temp) = open_storage();
        let handle = spawn_writer(
            storage.clone(),
            8,
            Duration::from_millis(5),
            true,
            Metrics::default(),
        )
        .unwrap();

        let mut tasks = Vec::new();
        for account in 0..20u64 {
            let handle = handle.clone();
            tasks.push(tokio::spawn(async move {
                handle.append(vec![pending(account, 100)]).await.unwrap()
            }));
        }

        let mut ids = Vec::new();
        for task in tasks {
            ids.extend(task.await.unwrap());
        }
        ids.sort();
        ids.dedup();
        assert_eq!(ids.len(), 20);
        assert_eq!(storage.last_entry_id().unwrap(), Some(EntryId::new(20)));

        handle.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_sequence_resumes_after_restart() {
        let (storage, _temp) = open_storage();

        let handle = spawn_writer(storage.clone(), 1, Duration::from_millis(5), false, Metrics::default())
            .unwrap();
        handle.append(vec![pending(1, 100), pending(1, 100)]).await.unwrap();
        handle.shutdown().await.unwrap();

        let handle = spawn_writer(storage, 1, Duration::from_millis(5), false, Metrics::default())
            .unwrap();
        let ids = handle.append(vec![pending(1, 100)]).await.unwrap();
        assert_eq!(ids, vec![EntryId::new(3)]);

        handle.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_failed_batch_fails_every_request_and_keeps_sequence() {
        let temp_dir = tempfile::tempdir().unwrap();
        let mut config = Config::default();
        config.data_dir = temp_dir.path().to_path_buf();
        config.rocksdb.sync_writes = false;

        {
            let storage = Storage::open(&config).unwrap();
            storage.append_batch(&[pending(1, 100).commit(EntryId::new(1))]).unwrap();
        }

        // Writes against a read-only store fail inside RocksDB
        let storage = Arc::new(Storage::open_read_only(&config).unwrap());
        let (_tx, rx) = mpsc::channel(1);
        let mut writer = Writer::new(
            storage.clone(),
            rx,
            100,
            Duration::from_secs(10),
            true,
            Metrics::default(),
        )
        .unwrap();
        assert_eq!(writer.next_entry_id, EntryId::new(2));

        let mut replies = Vec::new();
        for account in 0..3u64 {
            let (response, reply) = oneshot::channel();
            writer.handle_message(WriterMessage::Append {
                entries: vec![pending(account, 100), pending(account, -100)],
                response,
            });
            replies.push(reply);
        }

        assert!(matches!(writer.flush_batch(), Err(Error::StorageUnavailable(_))));

        for reply in replies {
            assert!(matches!(reply.await.unwrap(), Err(Error::StorageUnavailable(_))));
        }
        assert!(writer.pending.is_empty());
        assert_eq!(writer.pending_entries, 0);
        assert_eq!(writer.next_entry_id, EntryId::new(2));
        assert_eq!(storage.last_entry_id().unwrap(), Some(EntryId::new(1)));
        assert_eq!(storage.get_entry(EntryId::new(2)).unwrap(), None);
    }
}
