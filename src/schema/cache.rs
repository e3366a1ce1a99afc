//! Relation Card Cache
//!
//! Per-connection-string, time-bounded cache of introspected relation cards.
//! Refresh is synchronous: the first request that observes a missing or stale
//! entry introspects and replaces the entry. Concurrent refreshes of the same
//! key are allowed; the last write wins.
//!
//! Entries live in a `moka` cache bounded by count and TTL. Each snapshot also
//! carries its own build instant, and a stale snapshot is never served even
//! if the cache has not expired it yet.

use std::sync::Arc;
use std::time::Duration;

use moka::future::Cache;
use tokio::time::Instant;
use tracing::{debug, info};

use crate::engine::{RelationCard, SchemaIntrospector};
use crate::error::Result;
use crate::pool::fingerprint;
use crate::schema::introspect_cards;

/// One immutable schema snapshot
#[derive(Debug)]
pub struct CardSnapshot {
    pub built_at: Instant,
    pub cards: Arc<[RelationCard]>,
}

impl CardSnapshot {
    pub fn new(cards: Vec<RelationCard>) -> Self {
        Self { built_at: Instant::now(), cards: cards.into() }
    }

    #[must_use]
    pub fn age(&self) -> Duration {
        self.built_at.elapsed()
    }

    /// A snapshot older than `ttl` is never served
    #[must_use]
    pub fn is_fresh(&self, ttl: Duration) -> bool {
        self.age() <= ttl
    }
}

pub struct CardCache {
    ttl: Duration,
    entries: Cache<String, Arc<CardSnapshot>>,
}

impl CardCache {
    /// Cache holding at most `max_entries` snapshots, each for at most `ttl`
    #[must_use]
    pub fn new(ttl: Duration, max_entries: u64) -> Self {
        let entries = Cache::builder().max_capacity(max_entries).time_to_live(ttl).build();
        Self { ttl, entries }
    }

    pub const fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Return fresh cards for `connection_string`, introspecting if needed.
    ///
    /// A failed introspection leaves any existing entry untouched.
    pub async fn get_cards<I: SchemaIntrospector>(
        &self,
        connection_string: &str,
        introspector: &I,
    ) -> Result<Arc<CardSnapshot>> {
        if let Some(snapshot) = self.lookup(connection_string).await {
            debug!(pool = %fingerprint(connection_string), "card cache hit");
            return Ok(snapshot);
        }

        let cards = introspect_cards(introspector).await?;
        let snapshot = Arc::new(CardSnapshot::new(cards));
        info!(
            pool = %fingerprint(connection_string),
            relations = snapshot.cards.len(),
            "refreshed relation cards"
        );

        self.entries.insert(connection_string.to_string(), Arc::clone(&snapshot)).await;

        Ok(snapshot)
    }

    async fn lookup(&self, connection_string: &str) -> Option<Arc<CardSnapshot>> {
        self.entries.get(connection_string).await.filter(|s| s.is_fresh(self.ttl))
    }

    /// Drop the entry for one connection string
    pub async fn invalidate(&self, connection_string: &str) -> bool {
        self.entries.remove(connection_string).await.is_some()
    }

    pub fn clear(&self) {
        self.entries.invalidate_all();
    }

    /// Number of live entries (expired and invalidated ones are skipped)
    pub fn len(&self) -> usize {
        self.entries.iter().count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{
        QueryRows, RelationKind, RelationRef, RelationshipEdge, SqlParam,
    };
    use crate::error::AskError;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    #[derive(Default)]
    struct CountingIntrospector {
        list_calls: AtomicUsize,
        fail_describe: AtomicBool,
    }

    impl SchemaIntrospector for CountingIntrospector {
        async fn test_connection(&self) -> Result<()> {
            Ok(())
        }

        async fn list_relations(&self) -> Result<Vec<RelationRef>> {
            self.list_calls.fetch_add(1, Ordering::SeqCst);
            Ok(vec![
                RelationRef::new("public", "customers", RelationKind::Table),
                RelationRef::new("public", "orders", RelationKind::Table),
            ])
        }

        async fn describe_relation(&self, relation: &RelationRef) -> Result<RelationCard> {
            if self.fail_describe.load(Ordering::SeqCst) && relation.name == "orders" {
                return Err(AskError::introspection_failed("orders vanished"));
            }
            Ok(RelationCard::new(relation.qualified_name(), relation.kind, Vec::new(), Some(5)))
        }

        async fn list_relationships(&self) -> Result<Vec<RelationshipEdge>> {
            Ok(vec![RelationshipEdge {
                from_relation: "public.orders".into(),
                from_column: "customer_id".into(),
                to_relation: "public.customers".into(),
                to_column: "id".into(),
            }])
        }

        fn set_timeout_ms(&self, _timeout_ms: u64) {}

        fn set_max_rows(&self, _max_rows: u64) {}

        async fn run_select(&self, _sql: &str, _params: &[SqlParam]) -> Result<QueryRows> {
            Ok(QueryRows::default())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_hit_within_ttl_returns_same_snapshot() {
        let cache = CardCache::new(Duration::from_secs(60), 8);
        let introspector = CountingIntrospector::default();

        let first = cache.get_cards("db://a", &introspector).await.unwrap();
        tokio::time::advance(Duration::from_secs(59)).await;
        let second = cache.get_cards("db://a", &introspector).await.unwrap();

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(introspector.list_calls.load(Ordering::SeqCst), 1);
        assert_eq!(first.cards[1].join_hints.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stale_entry_refreshed_once() {
        let cache = CardCache::new(Duration::from_secs(60), 8);
        let introspector = CountingIntrospector::default();

        let first = cache.get_cards("db://a", &introspector).await.unwrap();
        tokio::time::advance(Duration::from_secs(61)).await;
        let second = cache.get_cards("db://a", &introspector).await.unwrap();
        let third = cache.get_cards("db://a", &introspector).await.unwrap();

        assert!(!Arc::ptr_eq(&first, &second));
        assert!(Arc::ptr_eq(&second, &third));
        assert!(second.built_at > first.built_at);
        assert_eq!(introspector.list_calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_refresh_caches_nothing() {
        let cache = CardCache::new(Duration::from_secs(60), 8);
        let introspector = CountingIntrospector::default();
        introspector.fail_describe.store(true, Ordering::SeqCst);

        let err = cache.get_cards("db://a", &introspector).await.unwrap_err();
        assert_eq!(err.error_code(), "INTROSPECTION_FAILED");
        assert!(cache.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_invalidate_forces_refresh() {
        let cache = CardCache::new(Duration::from_secs(60), 8);
        let introspector = CountingIntrospector::default();

        cache.get_cards("db://a", &introspector).await.unwrap();
        assert!(cache.invalidate("db://a").await);
        assert!(!cache.invalidate("db://a").await);
        cache.get_cards("db://a", &introspector).await.unwrap();

        assert_eq!(introspector.list_calls.load(Ordering::SeqCst), 2);
        cache.clear();
        assert_eq!(cache.len(), 0);
    }

    #[tokio::test]
    async fn test_entries_kept_per_connection_string() {
        let cache = CardCache::new(Duration::from_secs(60), 8);
        let introspector = CountingIntrospector::default();

        let a = cache.get_cards("db://a", &introspector).await.unwrap();
        let b = cache.get_cards("db://b", &introspector).await.unwrap();
        let a_again = cache.get_cards("db://a", &introspector).await.unwrap();

        assert!(!Arc::ptr_eq(&a, &b));
        assert!(Arc::ptr_eq(&a, &a_again));
        assert_eq!(cache.len(), 2);
        assert_eq!(introspector.list_calls.load(Ordering::SeqCst), 2);
    }
}
