//! Read-through cache for lazily decoded per-field structures.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::RwLock;
use rustc_hash::FxHashMap;

use crate::error::{Error, Result};

/// Immutable values keyed by data-file offset, built on first access.
///
/// Builds run outside the lock. When two threads race on the same key both
/// build, the first insert wins and the other copy is dropped; every caller
/// gets the published value. Once closed, nothing is inserted again.
pub(crate) struct LazyCache<V> {
    state: RwLock<CacheState<V>>,
    builds: AtomicU64,
}

struct CacheState<V> {
    map: FxHashMap<u64, Arc<V>>,
    closed: bool,
}

impl<V> LazyCache<V> {
    pub(crate) fn new() -> Self {
        Self {
            state: RwLock::new(CacheState {
                map: FxHashMap::default(),
                closed: false,
            }),
            builds: AtomicU64::new(0),
        }
    }

    pub(crate) fn get_or_try_insert_with<F>(&self, key: u64, build: F) -> Result<Arc<V>>
    where
        F: FnOnce() -> Result<V>,
    {
        {
            let state = self.state.read();
            if state.closed {
                return Err(Error::AlreadyClosed);
            }
            if let Some(value) = state.map.get(&key) {
                return Ok(Arc::clone(value));
            }
        }
        let built = Arc::new(build()?);
        self.builds.fetch_add(1, Ordering::Relaxed);
        let mut state = self.state.write();
        // A close may have landed while building.
        if state.closed {
            return Err(Error::AlreadyClosed);
        }
        Ok(Arc::clone(state.map.entry(key).or_insert(built)))
    }

    pub(crate) fn len(&self) -> usize {
        self.state.read().map.len()
    }

    /// Number of times a value was built, including discarded race losers.
    pub(crate) fn builds(&self) -> u64 {
        self.builds.load(Ordering::Relaxed)
    }

    pub(crate) fn ram_bytes_used(&self, size_of: impl Fn(&V) -> usize) -> usize {
        self.state.read().map.values().map(|v| size_of(v)).sum()
    }

    /// Drop every cached value and refuse further inserts.
    pub(crate) fn close(&self) {
        let mut state = self.state.write();
        state.closed = true;
        state.map.clear();
    }
}
