//! Source-keyed handle cache with flush-all eviction.
//!
//! Two stores, one per handle kind, each bounded by the configured capacity.
//! Eviction frees a whole store at once; there is no per-entry recency
//! tracking. A native allocation failure flushes the affected store and the
//! build is retried exactly once, so a worker survives engine memory
//! exhaustion without restarting.
//!
//! With caching disabled the cache still mediates every construct and
//! release, which keeps the release discipline in one place: an operation
//! releases the handles it obtained, and the release is a no-op whenever the
//! cache owns them.

use std::collections::hash_map::Entry;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use serde::Serialize;
use tracing::{debug, trace, warn};

use super::factory::HandleFactory;
use super::handle::{HandleKind, ManagedHandle};
use super::{ChemEngine, EngineResult};
use crate::config::CacheOptions;

type Store<H> = HashMap<String, Arc<ManagedHandle<H>>>;

/// Snapshot of cache state and counters
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheStats {
    /// Whether handles outlive their operation
    pub enabled: bool,
    /// Per-store capacity
    pub capacity: usize,
    /// Live entries in the plain store
    pub plain_len: usize,
    /// Live entries in the query store
    pub query_len: usize,
    /// Lookups served from a store
    pub hits: u64,
    /// Lookups that had to build
    pub misses: u64,
    /// Store flushes (eviction, recovery, shutdown)
    pub flushes: u64,
    /// Allocation failures recovered by flush-and-retry
    pub recoveries: u64,
}

/// Bounded, self-healing cache of native handles keyed by source text
pub struct HandleCache<E: ChemEngine> {
    enabled: bool,
    capacity: usize,
    plain: Mutex<Store<E::Handle>>,
    query: Mutex<Store<E::Handle>>,
    factory: HandleFactory<E>,
    hits: AtomicU64,
    misses: AtomicU64,
    flushes: AtomicU64,
    recoveries: AtomicU64,
}

impl<E: ChemEngine> HandleCache<E> {
    /// Create a cache over an engine
    pub fn new(engine: Arc<E>, options: &CacheOptions) -> Self {
        Self {
            enabled: options.enabled,
            capacity: options.capacity,
            plain: Mutex::new(HashMap::new()),
            query: Mutex::new(HashMap::new()),
            factory: HandleFactory::new(engine),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            flushes: AtomicU64::new(0),
            recoveries: AtomicU64::new(0),
        }
    }

    /// The engine behind this cache
    pub fn engine(&self) -> &Arc<E> {
        self.factory.engine()
    }

    /// The factory and its construct/destroy counters
    pub fn factory(&self) -> &HandleFactory<E> {
        &self.factory
    }

    /// Whether handles outlive their operation
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    fn store(&self, kind: HandleKind) -> &Mutex<Store<E::Handle>> {
        match kind {
            HandleKind::Plain => &self.plain,
            HandleKind::Query => &self.query,
        }
    }

    /// Cached handle for `source`, or build one.
    ///
    /// `Ok(None)` means the source does not parse and nothing was cached.
    /// An allocation failure flushes the store for this kind and the build
    /// is retried once; a second failure propagates.
    pub fn get_or_create(
        &self,
        source: &str,
        kind: HandleKind,
    ) -> EngineResult<Option<Arc<ManagedHandle<E::Handle>>>> {
        if self.enabled {
            if let Some(handle) = self.lookup(source, kind) {
                self.hits.fetch_add(1, Ordering::Relaxed);
                trace!(kind = %kind, source = %source, "cache hit");
                return Ok(Some(handle));
            }
        }
        self.misses.fetch_add(1, Ordering::Relaxed);

        let handle = match self.build_with_recovery(source, kind)? {
            Some(handle) => handle,
            None => return Ok(None),
        };

        if self.enabled {
            return Ok(Some(self.insert_or_existing(source, handle, kind)));
        }
        Ok(Some(handle))
    }

    /// Batch form of [`get_or_create`](Self::get_or_create).
    ///
    /// Before building anything new, the store is flushed whole if the new
    /// entries would push it past capacity. Outputs line up with `sources`;
    /// unparseable entries come back as `None`.
    pub fn get_or_create_batch(
        &self,
        sources: &[String],
        kind: HandleKind,
    ) -> EngineResult<Vec<Option<Arc<ManagedHandle<E::Handle>>>>> {
        if self.enabled {
            let new_count = {
                let store = self.store(kind).lock();
                let missing: HashSet<&str> = sources
                    .iter()
                    .map(String::as_str)
                    .filter(|source| match store.get(*source) {
                        Some(handle) => handle.is_released(),
                        None => true,
                    })
                    .collect();
                if store.len() + missing.len() > self.capacity {
                    Some(missing.len())
                } else {
                    None
                }
            };
            if let Some(new_count) = new_count {
                debug!(
                    kind = %kind,
                    new = new_count,
                    capacity = self.capacity,
                    "batch would overflow store, flushing first"
                );
                self.flush_kind(kind);
            }
        }

        sources
            .iter()
            .map(|source| self.get_or_create(source, kind))
            .collect()
    }

    /// Release a handle obtained from this cache.
    ///
    /// Cache-owned handles are left alone; with caching disabled the handle
    /// is destroyed. Releasing twice is a no-op either way.
    pub fn release(&self, handle: &Arc<ManagedHandle<E::Handle>>) {
        if self.enabled {
            trace!(kind = %handle.kind(), "cache-owned handle, release skipped");
            return;
        }
        self.factory.destroy(handle);
    }

    /// Destroy every handle of one kind and empty its store
    pub fn flush_kind(&self, kind: HandleKind) {
        let mut store = self.store(kind).lock();
        self.flush_locked(&mut store, kind);
    }

    /// Destroy every handle in both stores
    pub fn flush_all(&self) {
        self.flush_kind(HandleKind::Plain);
        self.flush_kind(HandleKind::Query);
    }

    /// Entries currently stored for a kind
    pub fn len(&self, kind: HandleKind) -> usize {
        self.store(kind).lock().len()
    }

    /// True when both stores are empty
    pub fn is_empty(&self) -> bool {
        self.len(HandleKind::Plain) == 0 && self.len(HandleKind::Query) == 0
    }

    /// Lookups served from a store
    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    /// Lookups that had to build
    pub fn misses(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }

    /// Store flushes so far
    pub fn flushes(&self) -> u64 {
        self.flushes.load(Ordering::Relaxed)
    }

    /// Allocation failures recovered by flush-and-retry
    pub fn recoveries(&self) -> u64 {
        self.recoveries.load(Ordering::Relaxed)
    }

    /// Snapshot of state and counters
    pub fn stats(&self) -> CacheStats {
        CacheStats {
            enabled: self.enabled,
            capacity: self.capacity,
            plain_len: self.len(HandleKind::Plain),
            query_len: self.len(HandleKind::Query),
            hits: self.hits(),
            misses: self.misses(),
            flushes: self.flushes(),
            recoveries: self.recoveries(),
        }
    }

    fn lookup(&self, source: &str, kind: HandleKind) -> Option<Arc<ManagedHandle<E::Handle>>> {
        let mut store = self.store(kind).lock();
        match store.get(source) {
            Some(handle) if !handle.is_released() => Some(Arc::clone(handle)),
            Some(_) => {
                // stale entry from a flush that raced a borrower
                store.remove(source);
                None
            }
            None => None,
        }
    }

    fn build_with_recovery(
        &self,
        source: &str,
        kind: HandleKind,
    ) -> EngineResult<Option<Arc<ManagedHandle<E::Handle>>>> {
        match self.factory.build(source, kind) {
            Ok(built) => Ok(built),
            Err(err) if err.is_allocation() => {
                warn!(
                    kind = %kind,
                    error = %err,
                    "handle allocation failed, flushing store and retrying"
                );
                self.flush_kind(kind);
                self.recoveries.fetch_add(1, Ordering::Relaxed);
                self.factory.build(source, kind)
            }
            Err(err) => Err(err),
        }
    }

    fn insert_or_existing(
        &self,
        source: &str,
        handle: Arc<ManagedHandle<E::Handle>>,
        kind: HandleKind,
    ) -> Arc<ManagedHandle<E::Handle>> {
        let mut store = self.store(kind).lock();

        if store.len() >= self.capacity && !store.contains_key(source) {
            debug!(kind = %kind, capacity = self.capacity, "store full, flushing before insert");
            self.flush_locked(&mut store, kind);
        }

        match store.entry(source.to_string()) {
            Entry::Occupied(mut occupied) => {
                if occupied.get().is_released() {
                    occupied.insert(Arc::clone(&handle));
                    handle
                } else {
                    // transient duplicate build for the same key; keep the
                    // cached one and drop ours
                    let existing = Arc::clone(occupied.get());
                    drop(store);
                    self.factory.destroy(&handle);
                    existing
                }
            }
            Entry::Vacant(vacant) => {
                vacant.insert(Arc::clone(&handle));
                handle
            }
        }
    }

    fn flush_locked(&self, store: &mut Store<E::Handle>, kind: HandleKind) {
        let count = store.len();
        for (_, handle) in store.drain() {
            self.factory.destroy(&handle);
        }
        self.flushes.fetch_add(1, Ordering::Relaxed);
        debug!(kind = %kind, count = count, "flushed handle store");
    }
}
