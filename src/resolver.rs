//! Batched external-id -> canonical-id resolution.
//!
//! The single source of truth for cross-provider identity. Callers resolve
//! every external ID a batch needs before writing any of that batch, so all
//! references resolve against the store's state at batch start.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use uuid::Uuid;

use crate::cache::{Clock, TtlCache};
use crate::models::EntityKind;
use crate::store::CanonicalStore;

const CACHE_MAX_ENTRIES: usize = 10_000;

pub struct IdentityResolver {
    // Positive mappings only: a canonical ID never changes once assigned, so a
    // cached hit cannot go stale. Misses are always re-queried.
    cache: TtlCache<(EntityKind, String), Uuid>,
}

impl IdentityResolver {
    pub fn new(cache_ttl: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            cache: TtlCache::new(cache_ttl, CACHE_MAX_ENTRIES, clock),
        }
    }

    /// Resolve a set of external IDs for one entity kind. Only IDs known to
    /// the store appear in the result; unknown IDs are absent, never an error.
    pub async fn resolve<S: CanonicalStore + ?Sized>(
        &self,
        store: &S,
        kind: EntityKind,
        external_ids: &HashSet<String>,
    ) -> Result<HashMap<String, Uuid>> {
        self.cache.clear_expired().await;

        let mut resolved = HashMap::with_capacity(external_ids.len());
        let mut misses = Vec::new();

        for ext in external_ids {
            match self.cache.get(&(kind, ext.clone())).await {
                Some(id) => {
                    resolved.insert(ext.clone(), id);
                }
                None => misses.push(ext.clone()),
            }
        }

        if !misses.is_empty() {
            let fetched = store.resolve_external_ids(kind, &misses).await?;
            for (ext, id) in &fetched {
                self.cache.insert((kind, ext.clone()), *id).await;
            }
            resolved.extend(fetched);
        }

        Ok(resolved)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::SystemClock;
    use crate::models::{FetchLogEntry, MatchRow, OddsRow, PlayerRow, PlayerStatRow, TeamRow};
    use crate::store::MemStore;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Delegating store that counts resolution round trips.
    struct CountingStore {
        inner: MemStore,
        resolve_calls: AtomicUsize,
    }

    #[async_trait]
    impl CanonicalStore for CountingStore {
        async fn resolve_external_ids(
            &self,
            kind: EntityKind,
            external_ids: &[String],
        ) -> Result<HashMap<String, Uuid>> {
            self.resolve_calls.fetch_add(1, Ordering::SeqCst);
            self.inner.resolve_external_ids(kind, external_ids).await
        }

        async fn insert_team(&self, row: &TeamRow) -> Result<()> {
            self.inner.insert_team(row).await
        }
        async fn update_team(&self, row: &TeamRow) -> Result<()> {
            self.inner.update_team(row).await
        }
        async fn insert_player(&self, row: &PlayerRow) -> Result<()> {
            self.inner.insert_player(row).await
        }
        async fn update_player(&self, row: &PlayerRow) -> Result<()> {
            self.inner.update_player(row).await
        }
        async fn insert_match(&self, row: &MatchRow) -> Result<()> {
            self.inner.insert_match(row).await
        }
        async fn update_match(&self, row: &MatchRow) -> Result<()> {
            self.inner.update_match(row).await
        }
        async fn upsert_player_stat(&self, row: &PlayerStatRow) -> Result<()> {
            self.inner.upsert_player_stat(row).await
        }
        async fn append_odds(&self, row: &OddsRow) -> Result<()> {
            self.inner.append_odds(row).await
        }
        async fn insert_fetch_log(&self, entry: &FetchLogEntry) -> Result<()> {
            self.inner.insert_fetch_log(entry).await
        }
    }

    fn team_row(external_id: &str) -> TeamRow {
        TeamRow {
            id: Uuid::new_v4(),
            external_id: external_id.to_string(),
            name: external_id.to_string(),
            slug: None,
            logo_url: None,
            country: None,
            source: "pandascore".to_string(),
        }
    }

    fn ids(values: &[&str]) -> HashSet<String> {
        values.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test]
    async fn known_ids_resolve_and_unknown_ids_are_absent() {
        let store = MemStore::new();
        let row = team_row("101");
        store.insert_team(&row).await.unwrap();

        let resolver =
            IdentityResolver::new(Duration::from_secs(60), Arc::new(SystemClock));
        let mapping = resolver
            .resolve(&store, EntityKind::Team, &ids(&["101", "999"]))
            .await
            .unwrap();

        assert_eq!(mapping.get("101"), Some(&row.id));
        assert!(!mapping.contains_key("999"));
    }

    #[tokio::test]
    async fn repeat_resolution_of_known_ids_is_served_from_cache() {
        let store = CountingStore {
            inner: MemStore::new(),
            resolve_calls: AtomicUsize::new(0),
        };
        store.inner.insert_team(&team_row("101")).await.unwrap();

        let resolver =
            IdentityResolver::new(Duration::from_secs(60), Arc::new(SystemClock));

        resolver
            .resolve(&store, EntityKind::Team, &ids(&["101"]))
            .await
            .unwrap();
        let mapping = resolver
            .resolve(&store, EntityKind::Team, &ids(&["101"]))
            .await
            .unwrap();

        assert_eq!(mapping.len(), 1);
        assert_eq!(store.resolve_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn misses_are_requeried_every_time() {
        let store = CountingStore {
            inner: MemStore::new(),
            resolve_calls: AtomicUsize::new(0),
        };

        let resolver =
            IdentityResolver::new(Duration::from_secs(60), Arc::new(SystemClock));

        resolver
            .resolve(&store, EntityKind::Team, &ids(&["404"]))
            .await
            .unwrap();
        resolver
            .resolve(&store, EntityKind::Team, &ids(&["404"]))
            .await
            .unwrap();

        assert_eq!(store.resolve_calls.load(Ordering::SeqCst), 2);
    }
}
