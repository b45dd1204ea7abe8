//! In-memory canonical store, used by tests and `--dry-run`.
//!
//! Mirrors the Postgres backend's contract: unique external IDs per entity
//! kind, compound-key replacement for player stats, append-only odds.

use std::collections::HashMap;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::models::{
    EntityKind, FetchLogEntry, MatchRow, OddsRow, PlayerRow, PlayerStatRow, TeamRow,
};
use crate::store::CanonicalStore;

#[derive(Default)]
struct Inner {
    ids: HashMap<(EntityKind, String), Uuid>,
    teams: HashMap<Uuid, TeamRow>,
    players: HashMap<Uuid, PlayerRow>,
    matches: HashMap<Uuid, MatchRow>,
    stats: HashMap<(Uuid, Uuid, Option<String>), PlayerStatRow>,
    odds: Vec<OddsRow>,
    fetch_log: Vec<FetchLogEntry>,
}

#[derive(Default)]
pub struct MemStore {
    inner: RwLock<Inner>,
}

impl MemStore {
    pub fn new() -> Self {
        Self::default()
    }
}

/// Row accessors backing the test suites.
#[cfg(test)]
impl MemStore {
    pub async fn team(&self, id: Uuid) -> Option<TeamRow> {
        self.inner.read().await.teams.get(&id).cloned()
    }

    pub async fn team_count(&self) -> usize {
        self.inner.read().await.teams.len()
    }

    pub async fn team_by_external(&self, external_id: &str) -> Option<TeamRow> {
        let inner = self.inner.read().await;
        let id = inner.ids.get(&(EntityKind::Team, external_id.to_string()))?;
        inner.teams.get(id).cloned()
    }

    pub async fn player_by_external(&self, external_id: &str) -> Option<PlayerRow> {
        let inner = self.inner.read().await;
        let id = inner.ids.get(&(EntityKind::Player, external_id.to_string()))?;
        inner.players.get(id).cloned()
    }

    pub async fn match_by_external(&self, external_id: &str) -> Option<MatchRow> {
        let inner = self.inner.read().await;
        let id = inner.ids.get(&(EntityKind::Match, external_id.to_string()))?;
        inner.matches.get(id).cloned()
    }

    pub async fn stat(
        &self,
        player_id: Uuid,
        match_id: Uuid,
        map_name: Option<&str>,
    ) -> Option<PlayerStatRow> {
        let key = (player_id, match_id, map_name.map(str::to_string));
        self.inner.read().await.stats.get(&key).cloned()
    }

    pub async fn stat_count(&self) -> usize {
        self.inner.read().await.stats.len()
    }

    pub async fn odds(&self) -> Vec<OddsRow> {
        self.inner.read().await.odds.clone()
    }

    pub async fn fetch_log(&self) -> Vec<FetchLogEntry> {
        self.inner.read().await.fetch_log.clone()
    }
}

#[async_trait]
impl CanonicalStore for MemStore {
    async fn resolve_external_ids(
        &self,
        kind: EntityKind,
        external_ids: &[String],
    ) -> Result<HashMap<String, Uuid>> {
        let inner = self.inner.read().await;
        Ok(external_ids
            .iter()
            .filter_map(|ext| {
                inner
                    .ids
                    .get(&(kind, ext.clone()))
                    .map(|id| (ext.clone(), *id))
            })
            .collect())
    }

    async fn insert_team(&self, row: &TeamRow) -> Result<()> {
        let mut inner = self.inner.write().await;
        let key = (EntityKind::Team, row.external_id.clone());
        if inner.ids.contains_key(&key) {
            return Err(anyhow!("duplicate team external_id {}", row.external_id));
        }
        inner.ids.insert(key, row.id);
        inner.teams.insert(row.id, row.clone());
        Ok(())
    }

    async fn update_team(&self, row: &TeamRow) -> Result<()> {
        let mut inner = self.inner.write().await;
        match inner.teams.get_mut(&row.id) {
            Some(existing) => {
                *existing = row.clone();
                Ok(())
            }
            None => Err(anyhow!("no team with id {}", row.id)),
        }
    }

    async fn insert_player(&self, row: &PlayerRow) -> Result<()> {
        let mut inner = self.inner.write().await;
        let key = (EntityKind::Player, row.external_id.clone());
        if inner.ids.contains_key(&key) {
            return Err(anyhow!("duplicate player external_id {}", row.external_id));
        }
        inner.ids.insert(key, row.id);
        inner.players.insert(row.id, row.clone());
        Ok(())
    }

    async fn update_player(&self, row: &PlayerRow) -> Result<()> {
        let mut inner = self.inner.write().await;
        match inner.players.get_mut(&row.id) {
            Some(existing) => {
                *existing = row.clone();
                Ok(())
            }
            None => Err(anyhow!("no player with id {}", row.id)),
        }
    }

    async fn insert_match(&self, row: &MatchRow) -> Result<()> {
        let mut inner = self.inner.write().await;
        let key = (EntityKind::Match, row.external_id.clone());
        if inner.ids.contains_key(&key) {
            return Err(anyhow!("duplicate match external_id {}", row.external_id));
        }
        inner.ids.insert(key, row.id);
        inner.matches.insert(row.id, row.clone());
        Ok(())
    }

    async fn update_match(&self, row: &MatchRow) -> Result<()> {
        let mut inner = self.inner.write().await;
        match inner.matches.get_mut(&row.id) {
            Some(existing) => {
                *existing = row.clone();
                Ok(())
            }
            None => Err(anyhow!("no match with id {}", row.id)),
        }
    }

    async fn upsert_player_stat(&self, row: &PlayerStatRow) -> Result<()> {
        let mut inner = self.inner.write().await;
        let key = (row.player_id, row.match_id, row.map_name.clone());
        inner.stats.insert(key, row.clone());
        Ok(())
    }

    async fn append_odds(&self, row: &OddsRow) -> Result<()> {
        let mut inner = self.inner.write().await;
        inner.odds.push(row.clone());
        Ok(())
    }

    async fn insert_fetch_log(&self, entry: &FetchLogEntry) -> Result<()> {
        let mut inner = self.inner.write().await;
        inner.fetch_log.push(entry.clone());
        Ok(())
    }
}
