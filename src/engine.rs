//! Reconciliation and upsert engine.
//!
//! Per entity-type batch: one batched lookup classifies records as existing
//! or new, foreign-key references are rewritten from provider external IDs to
//! canonical IDs, then each record is inserted or updated. A write error on
//! one record is logged and skipped; it never aborts the rest of the batch.

use std::collections::{HashMap, HashSet};

use anyhow::Result;
use tracing::warn;
use uuid::Uuid;

use crate::models::{
    EntityKind, MatchRecord, MatchRow, OddsRecord, OddsRow, PlayerRecord, PlayerRow,
    PlayerStatRecord, PlayerStatRow, TeamRecord, TeamRow,
};
use crate::resolver::IdentityResolver;
use crate::store::CanonicalStore;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UpsertCounts {
    pub inserted: u64,
    pub updated: u64,
}

/// Rewrite one foreign-key-shaped field: an unresolved reference is dropped
/// to null rather than failing the record.
fn rewrite_ref(external_id: &Option<String>, mapping: &HashMap<String, Uuid>) -> Option<Uuid> {
    external_id
        .as_ref()
        .and_then(|ext| mapping.get(ext).copied())
}

pub struct UpsertEngine<S> {
    store: S,
    resolver: IdentityResolver,
}

impl<S: CanonicalStore> UpsertEngine<S> {
    pub fn new(store: S, resolver: IdentityResolver) -> Self {
        Self { store, resolver }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub async fn upsert_teams(&self, teams: &[TeamRecord]) -> Result<UpsertCounts> {
        let mut counts = UpsertCounts::default();
        if teams.is_empty() {
            return Ok(counts);
        }

        let batch_ids: Vec<String> = teams.iter().map(|t| t.external_id.clone()).collect();
        let existing = self
            .store
            .resolve_external_ids(EntityKind::Team, &batch_ids)
            .await?;

        for team in teams {
            let known_id = existing.get(&team.external_id).copied();
            let row = TeamRow {
                id: known_id.unwrap_or_else(Uuid::new_v4),
                external_id: team.external_id.clone(),
                name: team.name.clone(),
                slug: team.slug.clone(),
                logo_url: team.logo_url.clone(),
                country: team.country.clone(),
                source: team.source.clone(),
            };

            let result = if known_id.is_some() {
                self.store.update_team(&row).await
            } else {
                self.store.insert_team(&row).await
            };
            match result {
                Ok(()) if known_id.is_some() => counts.updated += 1,
                Ok(()) => counts.inserted += 1,
                Err(e) => warn!("Skipping team {}: {:#}", team.external_id, e),
            }
        }

        Ok(counts)
    }

    pub async fn upsert_players(&self, players: &[PlayerRecord]) -> Result<UpsertCounts> {
        let mut counts = UpsertCounts::default();
        if players.is_empty() {
            return Ok(counts);
        }

        // Resolve every referenced team before any write in this batch.
        let team_refs: HashSet<String> = players
            .iter()
            .filter_map(|p| p.team_external_id.clone())
            .collect();
        let team_mapping = self
            .resolver
            .resolve(&self.store, EntityKind::Team, &team_refs)
            .await?;

        let batch_ids: Vec<String> = players.iter().map(|p| p.external_id.clone()).collect();
        let existing = self
            .store
            .resolve_external_ids(EntityKind::Player, &batch_ids)
            .await?;

        for player in players {
            let known_id = existing.get(&player.external_id).copied();
            let row = PlayerRow {
                id: known_id.unwrap_or_else(Uuid::new_v4),
                external_id: player.external_id.clone(),
                name: player.name.clone(),
                real_name: player.real_name.clone(),
                team_id: rewrite_ref(&player.team_external_id, &team_mapping),
                country: player.country.clone(),
                source: player.source.clone(),
            };

            let result = if known_id.is_some() {
                self.store.update_player(&row).await
            } else {
                self.store.insert_player(&row).await
            };
            match result {
                Ok(()) if known_id.is_some() => counts.updated += 1,
                Ok(()) => counts.inserted += 1,
                Err(e) => warn!("Skipping player {}: {:#}", player.external_id, e),
            }
        }

        Ok(counts)
    }

    pub async fn upsert_matches(&self, matches: &[MatchRecord]) -> Result<UpsertCounts> {
        let mut counts = UpsertCounts::default();
        if matches.is_empty() {
            return Ok(counts);
        }

        let team_refs: HashSet<String> = matches
            .iter()
            .flat_map(|m| {
                [
                    m.team1_external_id.clone(),
                    m.team2_external_id.clone(),
                    m.winner_external_id.clone(),
                ]
            })
            .flatten()
            .collect();
        let team_mapping = self
            .resolver
            .resolve(&self.store, EntityKind::Team, &team_refs)
            .await?;

        let batch_ids: Vec<String> = matches.iter().map(|m| m.external_id.clone()).collect();
        let existing = self
            .store
            .resolve_external_ids(EntityKind::Match, &batch_ids)
            .await?;

        for record in matches {
            let known_id = existing.get(&record.external_id).copied();
            let row = MatchRow {
                id: known_id.unwrap_or_else(Uuid::new_v4),
                external_id: record.external_id.clone(),
                tournament_name: record.tournament_name.clone(),
                tournament_id: record.tournament_id.clone(),
                team1_id: rewrite_ref(&record.team1_external_id, &team_mapping),
                team2_id: rewrite_ref(&record.team2_external_id, &team_mapping),
                winner_id: rewrite_ref(&record.winner_external_id, &team_mapping),
                team1_score: record.team1_score,
                team2_score: record.team2_score,
                best_of: record.best_of,
                status: record.status.clone(),
                scheduled_at: record.scheduled_at,
                started_at: record.started_at,
                ended_at: record.ended_at,
                source: record.source.clone(),
                raw: record.raw.clone(),
            };

            let result = if known_id.is_some() {
                self.store.update_match(&row).await
            } else {
                self.store.insert_match(&row).await
            };
            match result {
                Ok(()) if known_id.is_some() => counts.updated += 1,
                Ok(()) => counts.inserted += 1,
                Err(e) => warn!("Skipping match {}: {:#}", record.external_id, e),
            }
        }

        Ok(counts)
    }

    /// Player stats require both foreign keys; a record whose player or match
    /// cannot be resolved is skipped and counts toward neither total.
    pub async fn insert_player_stats(&self, stats: &[PlayerStatRecord]) -> Result<u64> {
        if stats.is_empty() {
            return Ok(0);
        }

        let match_refs: HashSet<String> =
            stats.iter().map(|s| s.match_external_id.clone()).collect();
        let player_refs: HashSet<String> =
            stats.iter().map(|s| s.player_external_id.clone()).collect();
        let match_mapping = self
            .resolver
            .resolve(&self.store, EntityKind::Match, &match_refs)
            .await?;
        let player_mapping = self
            .resolver
            .resolve(&self.store, EntityKind::Player, &player_refs)
            .await?;

        let mut inserted = 0;
        for stat in stats {
            let (Some(match_id), Some(player_id)) = (
                match_mapping.get(&stat.match_external_id).copied(),
                player_mapping.get(&stat.player_external_id).copied(),
            ) else {
                continue;
            };

            let row = PlayerStatRow {
                id: Uuid::new_v4(),
                match_id,
                player_id,
                map_name: stat.map_name.clone(),
                kills: stat.kills,
                deaths: stat.deaths,
                assists: stat.assists,
                headshots: stat.headshots,
                adr: stat.adr,
                rating: stat.rating,
                source: stat.source.clone(),
                raw: stat.raw.clone(),
            };

            match self.store.upsert_player_stat(&row).await {
                Ok(()) => inserted += 1,
                Err(e) => warn!(
                    "Skipping stat for player {} in match {}: {:#}",
                    stat.player_external_id, stat.match_external_id, e
                ),
            }
        }

        Ok(inserted)
    }

    /// Odds carry no idempotency key: every resolved record appends a row.
    /// Odds whose match is unknown are skipped.
    pub async fn insert_odds(&self, odds: &[OddsRecord]) -> Result<u64> {
        if odds.is_empty() {
            return Ok(0);
        }

        let match_refs: HashSet<String> = odds
            .iter()
            .filter_map(|o| o.match_external_id.clone())
            .collect();
        let match_mapping = self
            .resolver
            .resolve(&self.store, EntityKind::Match, &match_refs)
            .await?;

        let mut inserted = 0;
        for record in odds {
            let Some(match_id) = rewrite_ref(&record.match_external_id, &match_mapping) else {
                continue;
            };

            let row = OddsRow {
                id: Uuid::new_v4(),
                match_id,
                bookmaker: record.bookmaker.clone(),
                market_type: record.market_type.clone(),
                selection: record.selection.clone(),
                odds_decimal: record.odds_decimal,
                line: record.line,
                is_live: record.is_live,
                source: record.source.clone(),
                fetched_at: record.fetched_at,
            };

            match self.store.append_odds(&row).await {
                Ok(()) => inserted += 1,
                Err(e) => warn!("Skipping odds row for {}: {:#}", record.bookmaker, e),
            }
        }

        Ok(inserted)
    }
}
