//! Connection Pool Registry
//!
//! Bounded least-recently-used map from connection string to a live pool.
//! The registry caps the number of pools (and therefore outbound connections)
//! held by one process, across every database it talks to.
//!
//! # Eviction
//! Inserting a key beyond capacity evicts the least-recently-used entry and
//! closes its pool before `get_pool` returns. Closing stops new checkouts;
//! connections already checked out finish their work normally. A later lookup
//! of the evicted key builds a brand-new pool.
//!
//! # Concurrency
//! The LRU sits behind one `std::sync::Mutex` that is never held across an
//! `.await` (pool construction is synchronous). Evicted pools are closed after
//! the lock is released. Callers hold no locks.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::num::NonZeroUsize;
use std::sync::{Mutex, MutexGuard, PoisonError};

use lru::LruCache;
use tracing::{debug, info};

use crate::engine::Backend;
use crate::error::{AskError, Result};

/// Bounded LRU cache of connection pools, keyed by connection string
pub struct PoolRegistry<B: Backend> {
    backend: B,
    max_connections: usize,
    pools: Mutex<LruCache<String, B::Pool>>,
}

impl<B: Backend> PoolRegistry<B> {
    /// Create an empty registry.
    ///
    /// `capacity` bounds the number of pools, `max_connections` the size of each.
    pub fn new(backend: B, capacity: usize, max_connections: usize) -> Result<Self> {
        let capacity = NonZeroUsize::new(capacity)
            .ok_or_else(|| AskError::config_error("pool_capacity must be at least 1"))?;
        if max_connections == 0 {
            return Err(AskError::config_error("pool_max_connections must be at least 1"));
        }

        Ok(Self { backend, max_connections, pools: Mutex::new(LruCache::new(capacity)) })
    }

    /// Backend used to build pools and introspectors
    pub const fn backend(&self) -> &B {
        &self.backend
    }

    pub fn capacity(&self) -> usize {
        self.lock().cap().get()
    }

    fn lock(&self) -> MutexGuard<'_, LruCache<String, B::Pool>> {
        self.pools.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Return the pool for `connection_string`, building it on first use.
    ///
    /// A hit promotes the entry to most-recently-used. Construction failures
    /// are returned as-is; nothing is inserted and nothing is retried.
    pub fn get_pool(&self, connection_string: &str) -> Result<B::Pool> {
        let (pool, evicted) = {
            let mut pools = self.lock();

            if let Some(pool) = pools.get(connection_string) {
                debug!(pool = %fingerprint(connection_string), "pool cache hit");
                return Ok(pool.clone());
            }

            let pool = self.backend.create_pool(connection_string, self.max_connections)?;
            info!(
                pool = %fingerprint(connection_string),
                max_connections = self.max_connections,
                "created connection pool"
            );

            // The key is absent, so anything pushed out is the LRU entry
            let evicted = pools.push(connection_string.to_string(), pool.clone());
            (pool, evicted)
        };

        if let Some((key, old)) = evicted {
            self.backend.close_pool(&old);
            info!(pool = %fingerprint(&key), "evicted least-recently-used pool");
        }

        Ok(pool)
    }

    /// Whether a pool exists for `connection_string` (does not promote it)
    pub fn contains(&self, connection_string: &str) -> bool {
        self.lock().contains(connection_string)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Close and forget every pool (process shutdown)
    pub fn close_all(&self) {
        let drained: Vec<(String, B::Pool)> = {
            let mut pools = self.lock();
            std::iter::from_fn(|| pools.pop_lru()).collect()
        };

        for (key, pool) in &drained {
            self.backend.close_pool(pool);
            debug!(pool = %fingerprint(key), "closed connection pool");
        }

        if !drained.is_empty() {
            info!(count = drained.len(), "closed all connection pools");
        }
    }
}

/// Short stable identifier for a connection string.
///
/// Connection strings may carry credentials and are never logged directly.
#[must_use]
pub fn fingerprint(connection_string: &str) -> String {
    let mut hasher = DefaultHasher::new();
    connection_string.hash(&mut hasher);
    format!("{:08x}", hasher.finish() & 0xffff_ffff)
}
