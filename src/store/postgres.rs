//! Postgres-backed canonical store.

use std::collections::HashMap;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use tracing::{info, warn};
use uuid::Uuid;

use crate::models::{
    EntityKind, FetchLogEntry, MatchRow, OddsRow, PlayerRow, PlayerStatRow, TeamRow,
};
use crate::store::CanonicalStore;

pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    /// Connect with bounded exponential-backoff retries.
    pub async fn connect(database_url: &str) -> Result<Self> {
        let pool = Self::connect_with_retry(database_url, 5).await?;
        Ok(Self { pool })
    }

    async fn connect_with_retry(url: &str, max_retries: u32) -> Result<PgPool> {
        let mut attempt = 0;
        loop {
            match PgPoolOptions::new()
                .max_connections(10)
                .acquire_timeout(Duration::from_secs(10))
                .connect(url)
                .await
            {
                Ok(pool) => {
                    info!("Connected to PostgreSQL");
                    return Ok(pool);
                }
                Err(e) => {
                    attempt += 1;
                    if attempt >= max_retries {
                        return Err(anyhow!(
                            "Failed to connect to database after {} attempts: {}",
                            max_retries,
                            e
                        ));
                    }
                    warn!("Database connection attempt {} failed: {}. Retrying...", attempt, e);
                    tokio::time::sleep(Duration::from_secs(2u64.pow(attempt))).await;
                }
            }
        }
    }

    pub async fn run_migrations(&self) -> Result<()> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .context("Failed to run database migrations")?;
        info!("Database migrations applied");
        Ok(())
    }
}

#[async_trait]
impl CanonicalStore for PgStore {
    async fn resolve_external_ids(
        &self,
        kind: EntityKind,
        external_ids: &[String],
    ) -> Result<HashMap<String, Uuid>> {
        if external_ids.is_empty() {
            return Ok(HashMap::new());
        }

        // Table names come from a fixed enum, never from input.
        let sql = format!(
            "SELECT external_id, id FROM {} WHERE external_id = ANY($1)",
            kind.table()
        );
        let rows: Vec<(String, Uuid)> = sqlx::query_as(&sql)
            .bind(external_ids)
            .fetch_all(&self.pool)
            .await
            .with_context(|| format!("Failed to resolve external ids in {}", kind.table()))?;

        Ok(rows.into_iter().collect())
    }

    async fn insert_team(&self, row: &TeamRow) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO cs2_teams (id, external_id, name, slug, logo_url, country, source)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(row.id)
        .bind(&row.external_id)
        .bind(&row.name)
        .bind(&row.slug)
        .bind(&row.logo_url)
        .bind(&row.country)
        .bind(&row.source)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn update_team(&self, row: &TeamRow) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE cs2_teams SET
                name = $2, slug = $3, logo_url = $4, country = $5, source = $6,
                updated_at = now()
            WHERE id = $1
            "#,
        )
        .bind(row.id)
        .bind(&row.name)
        .bind(&row.slug)
        .bind(&row.logo_url)
        .bind(&row.country)
        .bind(&row.source)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn insert_player(&self, row: &PlayerRow) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO cs2_players (id, external_id, name, real_name, team_id, country, source)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(row.id)
        .bind(&row.external_id)
        .bind(&row.name)
        .bind(&row.real_name)
        .bind(row.team_id)
        .bind(&row.country)
        .bind(&row.source)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn update_player(&self, row: &PlayerRow) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE cs2_players SET
                name = $2, real_name = $3, team_id = $4, country = $5, source = $6,
                updated_at = now()
            WHERE id = $1
            "#,
        )
        .bind(row.id)
        .bind(&row.name)
        .bind(&row.real_name)
        .bind(row.team_id)
        .bind(&row.country)
        .bind(&row.source)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn insert_match(&self, row: &MatchRow) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO cs2_matches (
                id, external_id, tournament_name, tournament_id,
                team1_id, team2_id, winner_id, team1_score, team2_score, best_of,
                status, scheduled_at, started_at, ended_at, source, raw_data
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16)
            "#,
        )
        .bind(row.id)
        .bind(&row.external_id)
        .bind(&row.tournament_name)
        .bind(&row.tournament_id)
        .bind(row.team1_id)
        .bind(row.team2_id)
        .bind(row.winner_id)
        .bind(row.team1_score)
        .bind(row.team2_score)
        .bind(row.best_of)
        .bind(&row.status)
        .bind(row.scheduled_at)
        .bind(row.started_at)
        .bind(row.ended_at)
        .bind(&row.source)
        .bind(&row.raw)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn update_match(&self, row: &MatchRow) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE cs2_matches SET
                tournament_name = $2, tournament_id = $3,
                team1_id = $4, team2_id = $5, winner_id = $6,
                team1_score = $7, team2_score = $8, best_of = $9,
                status = $10, scheduled_at = $11, started_at = $12, ended_at = $13,
                source = $14, raw_data = $15, updated_at = now()
            WHERE id = $1
            "#,
        )
        .bind(row.id)
        .bind(&row.tournament_name)
        .bind(&row.tournament_id)
        .bind(row.team1_id)
        .bind(row.team2_id)
        .bind(row.winner_id)
        .bind(row.team1_score)
        .bind(row.team2_score)
        .bind(row.best_of)
        .bind(&row.status)
        .bind(row.scheduled_at)
        .bind(row.started_at)
        .bind(row.ended_at)
        .bind(&row.source)
        .bind(&row.raw)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn upsert_player_stat(&self, row: &PlayerStatRow) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO cs2_player_stats (
                id, match_id, player_id, map_name,
                kills, deaths, assists, headshots, adr, rating, source, raw_data
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            ON CONFLICT (player_id, match_id, map_name) DO UPDATE SET
                kills = EXCLUDED.kills,
                deaths = EXCLUDED.deaths,
                assists = EXCLUDED.assists,
                headshots = EXCLUDED.headshots,
                adr = EXCLUDED.adr,
                rating = EXCLUDED.rating,
                source = EXCLUDED.source,
                raw_data = EXCLUDED.raw_data
            "#,
        )
        .bind(row.id)
        .bind(row.match_id)
        .bind(row.player_id)
        .bind(&row.map_name)
        .bind(row.kills)
        .bind(row.deaths)
        .bind(row.assists)
        .bind(row.headshots)
        .bind(row.adr)
        .bind(row.rating)
        .bind(&row.source)
        .bind(&row.raw)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn append_odds(&self, row: &OddsRow) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO cs2_odds (
                id, match_id, bookmaker, market_type, selection,
                odds_decimal, line, is_live, source, fetched_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            "#,
        )
        .bind(row.id)
        .bind(row.match_id)
        .bind(&row.bookmaker)
        .bind(&row.market_type)
        .bind(&row.selection)
        .bind(row.odds_decimal)
        .bind(row.line)
        .bind(row.is_live)
        .bind(&row.source)
        .bind(row.fetched_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn insert_fetch_log(&self, entry: &FetchLogEntry) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO data_fetch_log (
                source, endpoint, status,
                records_fetched, records_inserted, records_updated,
                error_message, duration_ms
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(&entry.source)
        .bind(&entry.endpoint)
        .bind(&entry.status)
        .bind(entry.records_fetched)
        .bind(entry.records_inserted)
        .bind(entry.records_updated)
        .bind(&entry.error_message)
        .bind(entry.duration_ms)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
