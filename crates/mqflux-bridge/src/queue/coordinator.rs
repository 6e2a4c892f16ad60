//! Initialization coordinator for the shared queue store.
//!
//! The ingestion and egestion workers each open the queue store at startup,
//! independently and possibly at the same instant. RocksDB refuses a second
//! in-process open of the same path (its LOCK file), and first-time structure
//! creation must not race. All opens therefore funnel through
//! [`StoreCoordinator::guarded_open`]: one critical section in which the
//! first caller initializes the store and every later caller attaches to the
//! already-open instance. The per-operation `put`/`get` calls afterwards take
//! no part in this lock; the store is safe for concurrent use once open.

use crate::error::Result;
use crate::queue::{DurableQueue, StoreInner};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Weak};
use tracing::debug;

/// Serializes first-open of queue stores across workers.
///
/// Holds weak references: a store closes when the last worker handle drops,
/// so a later `guarded_open` of the same path re-initializes from disk.
pub struct StoreCoordinator {
    stores: Mutex<HashMap<PathBuf, Weak<StoreInner>>>,
}

impl StoreCoordinator {
    /// Create a coordinator with no open stores.
    pub fn new() -> Self {
        Self {
            stores: Mutex::new(HashMap::new()),
        }
    }

    /// Open the queue store at `path`, initializing it if this is the first
    /// open.
    ///
    /// Exactly one caller performs on-disk structure creation; concurrent
    /// callers block until it completes, then attach to the same store.
    ///
    /// # Errors
    ///
    /// Initialization failure (unwritable directory, corrupt store) is a
    /// fatal storage fault: the worker that received it must not start its
    /// job loop.
    pub fn guarded_open(&self, path: &Path) -> Result<DurableQueue> {
        let mut stores = self.stores.lock();

        if let Some(existing) = stores.get(path).and_then(Weak::upgrade) {
            debug!("Attaching to already-open queue store at {}", path.display());
            return Ok(DurableQueue::attach(existing));
        }

        let inner = Arc::new(StoreInner::open(path)?);
        stores.insert(path.to_path_buf(), Arc::downgrade(&inner));
        Ok(DurableQueue::attach(inner))
    }
}

impl Default for StoreCoordinator {
    fn default() -> Self {
        Self::new()
    }
}
