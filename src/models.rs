//! Normalized records handed over by the provider fetchers, and the
//! canonical rows they reconcile into.
//!
//! Normalized records carry provider-local external IDs; canonical rows carry
//! service-generated UUIDs with foreign keys already rewritten. Every
//! canonical row keeps the `(source, external_id)` pair of its last writer.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Canonical match statuses the provider adapters map into. Unrecognized
/// provider values pass through unchanged, so status stays a string.
pub mod status {
    pub const UPCOMING: &str = "upcoming";
    pub const LIVE: &str = "live";
    pub const FINISHED: &str = "finished";
    pub const CANCELED: &str = "canceled";
}

/// Entity kinds addressable by a provider-scoped external ID.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntityKind {
    Team,
    Player,
    Match,
}

impl EntityKind {
    pub fn table(&self) -> &'static str {
        match self {
            EntityKind::Team => "cs2_teams",
            EntityKind::Player => "cs2_players",
            EntityKind::Match => "cs2_matches",
        }
    }
}

// ==================== NORMALIZED RECORDS ====================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TeamRecord {
    pub external_id: String,
    pub name: String,
    pub slug: Option<String>,
    pub logo_url: Option<String>,
    pub country: Option<String>,
    pub source: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlayerRecord {
    pub external_id: String,
    pub name: String,
    pub real_name: Option<String>,
    pub team_external_id: Option<String>,
    pub country: Option<String>,
    pub source: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MatchRecord {
    pub external_id: String,
    pub tournament_name: Option<String>,
    pub tournament_id: Option<String>,
    pub team1_external_id: Option<String>,
    pub team2_external_id: Option<String>,
    pub winner_external_id: Option<String>,
    pub team1_score: Option<i32>,
    pub team2_score: Option<i32>,
    pub best_of: Option<i32>,
    pub status: String,
    pub scheduled_at: Option<DateTime<Utc>>,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
    pub source: String,
    pub raw: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlayerStatRecord {
    pub match_external_id: String,
    pub player_external_id: String,
    pub map_name: Option<String>,
    pub kills: i32,
    pub deaths: i32,
    pub assists: i32,
    pub headshots: Option<i32>,
    pub adr: Option<f64>,
    pub rating: Option<f64>,
    pub source: String,
    pub raw: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OddsRecord {
    pub match_external_id: Option<String>,
    pub bookmaker: String,
    pub market_type: String,
    pub selection: String,
    pub odds_decimal: f64,
    pub line: Option<f64>,
    pub is_live: bool,
    pub source: String,
    pub fetched_at: DateTime<Utc>,
}

// ==================== CANONICAL ROWS ====================

#[derive(Debug, Clone)]
pub struct TeamRow {
    pub id: Uuid,
    pub external_id: String,
    pub name: String,
    pub slug: Option<String>,
    pub logo_url: Option<String>,
    pub country: Option<String>,
    pub source: String,
}

#[derive(Debug, Clone)]
pub struct PlayerRow {
    pub id: Uuid,
    pub external_id: String,
    pub name: String,
    pub real_name: Option<String>,
    pub team_id: Option<Uuid>,
    pub country: Option<String>,
    pub source: String,
}

#[derive(Debug, Clone)]
pub struct MatchRow {
    pub id: Uuid,
    pub external_id: String,
    pub tournament_name: Option<String>,
    pub tournament_id: Option<String>,
    pub team1_id: Option<Uuid>,
    pub team2_id: Option<Uuid>,
    pub winner_id: Option<Uuid>,
    pub team1_score: Option<i32>,
    pub team2_score: Option<i32>,
    pub best_of: Option<i32>,
    pub status: String,
    pub scheduled_at: Option<DateTime<Utc>>,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
    pub source: String,
    pub raw: Value,
}

#[derive(Debug, Clone)]
pub struct PlayerStatRow {
    pub id: Uuid,
    pub match_id: Uuid,
    pub player_id: Uuid,
    pub map_name: Option<String>,
    pub kills: i32,
    pub deaths: i32,
    pub assists: i32,
    pub headshots: Option<i32>,
    pub adr: Option<f64>,
    pub rating: Option<f64>,
    pub source: String,
    pub raw: Value,
}

#[derive(Debug, Clone)]
pub struct OddsRow {
    pub id: Uuid,
    pub match_id: Uuid,
    pub bookmaker: String,
    pub market_type: String,
    pub selection: String,
    pub odds_decimal: f64,
    pub line: Option<f64>,
    pub is_live: bool,
    pub source: String,
    pub fetched_at: DateTime<Utc>,
}

/// One audit row per provider run, written by the orchestrator.
#[derive(Debug, Clone, Serialize)]
pub struct FetchLogEntry {
    pub source: String,
    pub endpoint: String,
    pub status: String,
    pub records_fetched: i64,
    pub records_inserted: i64,
    pub records_updated: i64,
    pub error_message: Option<String>,
    pub duration_ms: i64,
}
