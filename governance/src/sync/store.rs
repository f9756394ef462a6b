//! Durable "syncing" markers.
//!
//! A marker `syncing_<proposal id> = "1"` is written when a transaction for
//! that proposal is submitted and removed once the backend confirms it. If
//! the process goes away in between, the marker is how the next session
//! knows which proposals still need polling.
//!
//! The store is a plain keyed string store injected into the poller, never
//! reached through a global. [`MemoryMarkerStore`] lives as long as the
//! process, [`SledMarkerStore`] survives restarts.

use parking_lot::RwLock;
use sled::{Db, Tree};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use crate::config::{sync_marker_key, SYNC_MARKER_PREFIX, SYNC_MARKER_VALUE};
use crate::error::Result;

/// Name of the sled tree holding the markers.
const MARKER_TREE: &str = "sync_markers";

/// Keyed string storage: get, set and clear by key.
pub trait MarkerStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>>;

    fn set(&self, key: &str, value: &str) -> Result<()>;

    /// Removing an absent key is not an error.
    fn clear(&self, key: &str) -> Result<()>;

    /// All keys starting with `prefix`, in key order.
    fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>>;
}

// ---------------------------------------------------------------------------
// In-memory store
// ---------------------------------------------------------------------------

/// Session-scoped store. Gone when the process exits.
#[derive(Debug, Default)]
pub struct MemoryMarkerStore {
    entries: RwLock<BTreeMap<String, String>>,
}

impl MemoryMarkerStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl MarkerStore for MemoryMarkerStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.entries.read().get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        self.entries.write().insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn clear(&self, key: &str) -> Result<()> {
        self.entries.write().remove(key);
        Ok(())
    }

    fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>> {
        Ok(self
            .entries
            .read()
            .range(prefix.to_string()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(k, _)| k.clone())
            .collect())
    }
}

// ---------------------------------------------------------------------------
// sled store
// ---------------------------------------------------------------------------

/// Markers persisted in a sled tree. Every write is flushed before
/// returning, so a marker that was acknowledged is on disk.
#[derive(Debug, Clone)]
pub struct SledMarkerStore {
    db: Db,
    tree: Tree,
}

/// Attempts at taking the database file lock before giving up.
const LOCK_ATTEMPTS: u32 = 20;

/// Pause between lock attempts.
const LOCK_RETRY_DELAY: Duration = Duration::from_millis(25);

impl SledMarkerStore {
    /// Opens (or creates) the database at `path`.
    ///
    /// sled's background I/O threads can hold the file lock for a moment
    /// after the previous handle on the same path was dropped, so lock
    /// contention is retried briefly before it is reported.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let mut attempt = 1;
        loop {
            match sled::open(path) {
                Ok(db) => return Self::from_db(db),
                Err(e) if is_lock_contention(&e) && attempt < LOCK_ATTEMPTS => {
                    debug!(path = %path.display(), attempt, "marker store locked, retrying");
                    attempt += 1;
                    std::thread::sleep(LOCK_RETRY_DELAY);
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// A throwaway database removed on drop.
    pub fn open_temporary() -> Result<Self> {
        Self::from_db(sled::Config::new().temporary(true).open()?)
    }

    fn from_db(db: Db) -> Result<Self> {
        let tree = db.open_tree(MARKER_TREE)?;
        Ok(Self { db, tree })
    }
}

fn is_lock_contention(err: &sled::Error) -> bool {
    matches!(err, sled::Error::Io(io) if io.to_string().contains("could not acquire lock"))
}

impl MarkerStore for SledMarkerStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self
            .tree
            .get(key.as_bytes())?
            .map(|v| String::from_utf8_lossy(&v).into_owned()))
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        self.tree.insert(key.as_bytes(), value.as_bytes())?;
        self.db.flush()?;
        Ok(())
    }

    fn clear(&self, key: &str) -> Result<()> {
        self.tree.remove(key.as_bytes())?;
        self.db.flush()?;
        Ok(())
    }

    fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>> {
        self.tree
            .scan_prefix(prefix.as_bytes())
            .keys()
            .map(|k| Ok(String::from_utf8_lossy(&k?).into_owned()))
            .collect()
    }
}

// ---------------------------------------------------------------------------
// SyncMarkers
// ---------------------------------------------------------------------------

/// Proposal-level view over a [`MarkerStore`].
#[derive(Clone)]
pub struct SyncMarkers {
    store: Arc<dyn MarkerStore>,
}

impl SyncMarkers {
    pub fn new(store: Arc<dyn MarkerStore>) -> Self {
        Self { store }
    }

    /// Markers kept only for the life of the process.
    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryMarkerStore::new()))
    }

    pub fn mark(&self, proposal_id: &str) -> Result<()> {
        self.store.set(&sync_marker_key(proposal_id), SYNC_MARKER_VALUE)
    }

    pub fn is_marked(&self, proposal_id: &str) -> Result<bool> {
        Ok(self.store.get(&sync_marker_key(proposal_id))?.as_deref() == Some(SYNC_MARKER_VALUE))
    }

    pub fn clear(&self, proposal_id: &str) -> Result<()> {
        self.store.clear(&sync_marker_key(proposal_id))
    }

    /// Ids of every proposal with a marker set.
    pub fn pending_ids(&self) -> Result<Vec<String>> {
        let mut ids = Vec::new();
        for key in self.store.keys_with_prefix(SYNC_MARKER_PREFIX)? {
            if self.store.get(&key)?.as_deref() == Some(SYNC_MARKER_VALUE) {
                ids.push(key[SYNC_MARKER_PREFIX.len()..].to_string());
            }
        }
        Ok(ids)
    }
}
