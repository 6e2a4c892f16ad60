//! Durable FIFO queue backed by RocksDB.
//!
//! This module provides the [`DurableQueue`], the crash-safe hand-off between
//! the ingestion and egestion workers. Records are durable the moment `put`
//! returns and are removed exactly once by `get`.
//!
//! # Key Design
//!
//! - Keys: `u64` sequence numbers, big-endian so lexicographic order is
//!   insertion order
//! - Values: JSON-encoded records
//! - Head/tail positions recovered at open by seeking to the first/last key
//! - Writes and dequeue deletes use a synced WAL, so a record put before a
//!   crash is still there after restart, and a record handed out by `get` is
//!   never handed out again
//!
//! # Concurrency
//!
//! One store instance is shared by every handle attached to the same path
//! (see [`StoreCoordinator`]). `put` and `get` are safe from independent
//! threads; an empty-queue `get` parks on a condvar until a producer puts.
//!
//! [`StoreCoordinator`]: coordinator::StoreCoordinator

pub mod coordinator;

use crate::error::{Error, Result};
use mqflux_core::Record;
use parking_lot::{Condvar, Mutex};
use rocksdb::{DBWithThreadMode, IteratorMode, MultiThreaded, Options, WriteOptions};
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info};

/// Handle to the durable queue.
///
/// Cheap to clone; all clones attached to the same store path share one
/// underlying RocksDB instance.
#[derive(Clone)]
pub struct DurableQueue {
    inner: Arc<StoreInner>,
}

/// The shared store behind every handle for one path.
pub(crate) struct StoreInner {
    db: DBWithThreadMode<MultiThreaded>,
    state: Mutex<QueueState>,
    available: Condvar,
}

/// Head/tail positions. `head == tail` means empty.
struct QueueState {
    /// Sequence number of the next record to dequeue.
    head: u64,
    /// Sequence number the next `put` will use.
    tail: u64,
}

impl StoreInner {
    /// Open or create the store at the given path.
    ///
    /// First-open creates the directory and the RocksDB structures; a
    /// subsequent open of an existing store recovers the head/tail positions
    /// from the persisted keys. Callers go through
    /// [`StoreCoordinator::guarded_open`], which serializes this.
    ///
    /// [`StoreCoordinator::guarded_open`]: coordinator::StoreCoordinator::guarded_open
    pub(crate) fn open(path: &Path) -> Result<Self> {
        info!("Opening queue store at {}", path.display());
        std::fs::create_dir_all(path)?;

        let mut opts = Options::default();
        opts.create_if_missing(true);

        // The queue holds transient records, not billions of keys: a modest
        // write buffer keeps memory down while the synced WAL carries durability.
        opts.set_write_buffer_size(8 * 1024 * 1024);
        opts.set_compression_type(rocksdb::DBCompressionType::Lz4);
        opts.increase_parallelism(num_cpus::get() as i32);

        let db = DBWithThreadMode::<MultiThreaded>::open(&opts, path)?;

        let (head, tail) = recover_positions(&db)?;
        if head != tail {
            info!(
                "Recovered {} queued records (sequence {}..{})",
                tail - head,
                head,
                tail
            );
        }

        Ok(Self {
            db,
            state: Mutex::new(QueueState { head, tail }),
            available: Condvar::new(),
        })
    }
}

impl DurableQueue {
    pub(crate) fn attach(inner: Arc<StoreInner>) -> Self {
        Self { inner }
    }

    /// Append a record to the tail of the queue.
    ///
    /// The record is durable before this call returns: the write goes through
    /// a synced WAL, so the caller may assume it survives a crash immediately
    /// after return. Never blocks on capacity; the queue is bounded only by
    /// disk.
    pub fn put(&self, record: &Record) -> Result<()> {
        let value = serde_json::to_vec(record)?;

        let mut state = self.inner.state.lock();
        let key = state.tail.to_be_bytes();
        self.inner.db.put_opt(key, value, &sync_writes())?;
        state.tail += 1;
        debug!("Enqueued record at sequence {}", state.tail - 1);

        self.inner.available.notify_one();
        Ok(())
    }

    /// Remove and return the head record, blocking while the queue is empty.
    ///
    /// Strict FIFO relative to `put` order. The record is gone from the store
    /// the moment this returns; a crash after that loses the in-flight record
    /// but nothing still queued.
    pub fn get(&self) -> Result<Record> {
        let mut state = self.inner.state.lock();
        while state.head == state.tail {
            self.inner.available.wait(&mut state);
        }
        self.take_head(&mut state)
    }

    /// Like [`get`], but gives up after `timeout` and returns `Ok(None)`.
    ///
    /// This is the variant the egestion loop calls so it can observe the
    /// shutdown flag while the queue sits empty.
    ///
    /// [`get`]: DurableQueue::get
    pub fn get_timeout(&self, timeout: Duration) -> Result<Option<Record>> {
        let deadline = Instant::now() + timeout;
        let mut state = self.inner.state.lock();
        while state.head == state.tail {
            if self
                .inner
                .available
                .wait_until(&mut state, deadline)
                .timed_out()
            {
                return Ok(None);
            }
        }
        self.take_head(&mut state).map(Some)
    }

    /// Number of records currently queued.
    pub fn len(&self) -> usize {
        let state = self.inner.state.lock();
        (state.tail - state.head) as usize
    }

    /// Whether the queue is currently empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Dequeue the record at the head position. Caller holds the state lock
    /// and has checked the queue is non-empty.
    fn take_head(&self, state: &mut QueueState) -> Result<Record> {
        let key = state.head.to_be_bytes();

        let value = self
            .inner
            .db
            .get(key)?
            .ok_or_else(|| Error::Corrupt(format!("missing head record {}", state.head)))?;

        // Synced delete: once handed out, a record must not reappear after a
        // crash. The in-flight copy is the egestion worker's to lose.
        self.inner.db.delete_opt(key, &sync_writes())?;
        state.head += 1;

        let record: Record = serde_json::from_slice(&value)?;
        Ok(record)
    }
}

/// Write options with a synced WAL.
fn sync_writes() -> WriteOptions {
    let mut opts = WriteOptions::default();
    opts.set_sync(true);
    opts
}

/// Recover the head/tail positions from the persisted keys.
fn recover_positions(db: &DBWithThreadMode<MultiThreaded>) -> Result<(u64, u64)> {
    let first = match db.iterator(IteratorMode::Start).next() {
        Some(entry) => entry?,
        None => return Ok((0, 0)),
    };
    let head = decode_seq(&first.0)?;

    let last = db
        .iterator(IteratorMode::End)
        .next()
        .ok_or_else(|| Error::Corrupt("store has a first key but no last key".to_string()))??;
    let tail = decode_seq(&last.0)? + 1;

    Ok((head, tail))
}

/// Decode a big-endian `u64` sequence key.
fn decode_seq(key: &[u8]) -> Result<u64> {
    let bytes: [u8; 8] = key
        .try_into()
        .map_err(|_| Error::Corrupt(format!("unexpected key length {}", key.len())))?;
    Ok(u64::from_be_bytes(bytes))
}

#[cfg(test)]
mod tests {
    use super::coordinator::StoreCoordinator;
    use super::*;
    use mqflux_core::FieldValue;
    use tempfile::TempDir;

    fn test_record(n: i64) -> Record {
        let mut record = Record {
            measurement: "temp".to_string(),
            tags: Default::default(),
            fields: Default::default(),
        };
        record.tags.insert("room".to_string(), "a".to_string());
        record
            .fields
            .insert("value".to_string(), FieldValue::Integer(n));
        record
    }

    #[test]
    fn test_put_get_roundtrip() {
        let tmp = TempDir::new().unwrap();
        let coordinator = StoreCoordinator::new();
        let queue = coordinator.guarded_open(tmp.path()).unwrap();

        queue.put(&test_record(1)).unwrap();
        assert_eq!(queue.len(), 1);

        let record = queue.get().unwrap();
        assert_eq!(record, test_record(1));
        assert!(queue.is_empty());
    }

    #[test]
    fn test_fifo_order() {
        let tmp = TempDir::new().unwrap();
        let coordinator = StoreCoordinator::new();
        let queue = coordinator.guarded_open(tmp.path()).unwrap();

        for n in 0..50 {
            queue.put(&test_record(n)).unwrap();
        }
        for n in 0..50 {
            assert_eq!(queue.get().unwrap(), test_record(n));
        }
        assert!(queue.is_empty());
    }

    #[test]
    fn test_records_survive_reopen() {
        let tmp = TempDir::new().unwrap();

        {
            let coordinator = StoreCoordinator::new();
            let queue = coordinator.guarded_open(tmp.path()).unwrap();
            for n in 0..5 {
                queue.put(&test_record(n)).unwrap();
            }
            // Dropped without any get: simulates a crash before forwarding.
        }

        let coordinator = StoreCoordinator::new();
        let queue = coordinator.guarded_open(tmp.path()).unwrap();
        assert_eq!(queue.len(), 5);
        for n in 0..5 {
            assert_eq!(queue.get().unwrap(), test_record(n));
        }
    }

    #[test]
    fn test_dequeued_records_not_redelivered_after_reopen() {
        let tmp = TempDir::new().unwrap();

        {
            let coordinator = StoreCoordinator::new();
            let queue = coordinator.guarded_open(tmp.path()).unwrap();
            queue.put(&test_record(1)).unwrap();
            queue.put(&test_record(2)).unwrap();
            let _ = queue.get().unwrap();
        }

        let coordinator = StoreCoordinator::new();
        let queue = coordinator.guarded_open(tmp.path()).unwrap();
        assert_eq!(queue.len(), 1);
        assert_eq!(queue.get().unwrap(), test_record(2));
    }

    #[test]
    fn test_sequence_continues_after_reopen() {
        let tmp = TempDir::new().unwrap();

        {
            let coordinator = StoreCoordinator::new();
            let queue = coordinator.guarded_open(tmp.path()).unwrap();
            queue.put(&test_record(1)).unwrap();
        }

        let coordinator = StoreCoordinator::new();
        let queue = coordinator.guarded_open(tmp.path()).unwrap();
        queue.put(&test_record(2)).unwrap();

        assert_eq!(queue.get().unwrap(), test_record(1));
        assert_eq!(queue.get().unwrap(), test_record(2));
    }

    #[test]
    fn test_get_timeout_on_empty_queue() {
        let tmp = TempDir::new().unwrap();
        let coordinator = StoreCoordinator::new();
        let queue = coordinator.guarded_open(tmp.path()).unwrap();

        let got = queue.get_timeout(Duration::from_millis(50)).unwrap();
        assert!(got.is_none());
    }

    #[test]
    fn test_get_blocks_until_put() {
        let tmp = TempDir::new().unwrap();
        let coordinator = StoreCoordinator::new();
        let queue = coordinator.guarded_open(tmp.path()).unwrap();

        let consumer_queue = queue.clone();
        let consumer = std::thread::spawn(move || consumer_queue.get().unwrap());

        std::thread::sleep(Duration::from_millis(100));
        queue.put(&test_record(7)).unwrap();

        assert_eq!(consumer.join().unwrap(), test_record(7));
    }

    #[test]
    fn test_concurrent_producer_consumer_preserves_order() {
        let tmp = TempDir::new().unwrap();
        let coordinator = StoreCoordinator::new();
        let queue = coordinator.guarded_open(tmp.path()).unwrap();

        let consumer_queue = queue.clone();
        let consumer = std::thread::spawn(move || {
            (0..100)
                .map(|_| consumer_queue.get().unwrap())
                .collect::<Vec<_>>()
        });

        for n in 0..100 {
            queue.put(&test_record(n)).unwrap();
        }

        let received = consumer.join().unwrap();
        for (n, record) in received.iter().enumerate() {
            assert_eq!(*record, test_record(n as i64));
        }
        assert!(queue.is_empty());
    }
}
