//! Canonical store backends.
//!
//! The upsert engine talks to a [`CanonicalStore`] trait so the same
//! reconciliation logic runs against Postgres in production and the in-memory
//! backend in tests and `--dry-run`.

use std::collections::HashMap;

use anyhow::Result;
use async_trait::async_trait;
use uuid::Uuid;

use crate::models::{
    EntityKind, FetchLogEntry, MatchRow, OddsRow, PlayerRow, PlayerStatRow, TeamRow,
};

mod memory;
mod postgres;

pub use memory::MemStore;
pub use postgres::PgStore;

#[async_trait]
pub trait CanonicalStore: Send + Sync {
    /// Batched lookup from external IDs to canonical IDs for one entity kind.
    /// Only IDs present in the store appear in the result; missing keys are
    /// simply absent, never an error.
    async fn resolve_external_ids(
        &self,
        kind: EntityKind,
        external_ids: &[String],
    ) -> Result<HashMap<String, Uuid>>;

    async fn insert_team(&self, row: &TeamRow) -> Result<()>;
    async fn update_team(&self, row: &TeamRow) -> Result<()>;

    async fn insert_player(&self, row: &PlayerRow) -> Result<()>;
    async fn update_player(&self, row: &PlayerRow) -> Result<()>;

    async fn insert_match(&self, row: &MatchRow) -> Result<()>;
    async fn update_match(&self, row: &MatchRow) -> Result<()>;

    /// Insert-or-replace on the `(player_id, match_id, map_name)` compound
    /// key; conflict handling is the store's own.
    async fn upsert_player_stat(&self, row: &PlayerStatRow) -> Result<()>;

    /// Append-only; odds carry no idempotency key.
    async fn append_odds(&self, row: &OddsRow) -> Result<()>;

    async fn insert_fetch_log(&self, entry: &FetchLogEntry) -> Result<()>;
}
