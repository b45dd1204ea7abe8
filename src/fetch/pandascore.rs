//! PandaScore fetcher.
//!
//! Docs: https://developers.pandascore.co/

use anyhow::{anyhow, Result};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::Value;
use tracing::warn;

use crate::config::{Config, PANDASCORE_BASE_URL, PANDASCORE_GAME};
use crate::fetch::{FetchError, MatchDataProvider, MatchWindow, Transport};
use crate::models::{status, MatchRecord, PlayerRecord, PlayerStatRecord, TeamRecord};

pub const SOURCE: &str = "pandascore";

const PER_PAGE: u32 = 100;
// Pages of match history walked during a full sync.
const HISTORY_PAGES: u32 = 5;

#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
struct ApiTeam {
    id: i64,
    name: String,
    slug: Option<String>,
    image_url: Option<String>,
    location: Option<String>,
}

#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
struct ApiPlayer {
    id: i64,
    name: String,
    first_name: Option<String>,
    last_name: Option<String>,
    current_team: Option<ApiTeamRef>,
    nationality: Option<String>,
}

#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
struct ApiTeamRef {
    id: i64,
}

#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
struct ApiMatch {
    id: i64,
    league: Option<ApiLeague>,
    opponents: Vec<ApiOpponentSlot>,
    results: Vec<ApiResultEntry>,
    winner: Option<ApiWinner>,
    number_of_games: Option<i32>,
    status: Option<String>,
    scheduled_at: Option<DateTime<Utc>>,
    begin_at: Option<DateTime<Utc>>,
    end_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
struct ApiLeague {
    id: Option<i64>,
    name: Option<String>,
}

#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
struct ApiOpponentSlot {
    opponent: Option<ApiTeamRef>,
}

#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
struct ApiResultEntry {
    score: Option<i32>,
}

#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
struct ApiWinner {
    id: Option<i64>,
}

#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
struct ApiMatchDetail {
    games: Vec<ApiGame>,
}

#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
struct ApiGame {
    map: Option<ApiMap>,
    players: Vec<Value>,
}

#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
struct ApiMap {
    name: Option<String>,
}

#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
struct ApiGamePlayer {
    player: Option<ApiPlayerRef>,
    kills: Option<i32>,
    deaths: Option<i32>,
    assists: Option<i32>,
    headshots: Option<i32>,
    adr: Option<f64>,
}

#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
struct ApiPlayerRef {
    id: i64,
}

pub struct PandaScore {
    transport: Transport,
    api_key: String,
}

impl PandaScore {
    pub fn new(config: &Config) -> Result<Self> {
        let api_key = config
            .pandascore_api_key
            .clone()
            .ok_or_else(|| anyhow!("PANDASCORE_API_KEY is not set"))?;
        let transport = Transport::new(
            PANDASCORE_BASE_URL,
            config.rate_limit_interval,
            config.http_timeout,
        )?;
        Ok(Self { transport, api_key })
    }
}

#[async_trait::async_trait]
impl MatchDataProvider for PandaScore {
    fn source(&self) -> &'static str {
        SOURCE
    }

    fn auth_headers(&self) -> Vec<(&'static str, String)> {
        vec![("Authorization", format!("Bearer {}", self.api_key))]
    }

    async fn fetch_teams(&self) -> Result<Vec<TeamRecord>, FetchError> {
        let path = format!("/{PANDASCORE_GAME}/teams");
        let query = [
            ("page", "1".to_string()),
            ("per_page", PER_PAGE.to_string()),
        ];
        let teams: Vec<ApiTeam> = self
            .transport
            .get_json(&path, &query, &self.auth_headers())
            .await?;

        Ok(teams
            .into_iter()
            .map(|team| TeamRecord {
                external_id: team.id.to_string(),
                name: team.name,
                slug: team.slug,
                logo_url: team.image_url,
                country: team.location,
                source: SOURCE.to_string(),
            })
            .collect())
    }

    async fn fetch_players(&self) -> Result<Vec<PlayerRecord>, FetchError> {
        let path = format!("/{PANDASCORE_GAME}/players");
        let query = [
            ("page", "1".to_string()),
            ("per_page", PER_PAGE.to_string()),
        ];
        let players: Vec<ApiPlayer> = self
            .transport
            .get_json(&path, &query, &self.auth_headers())
            .await?;

        Ok(players.into_iter().map(parse_player).collect())
    }

    async fn fetch_matches(&self, window: MatchWindow) -> Result<Vec<MatchRecord>, FetchError> {
        let (path, query) = match window {
            MatchWindow::Upcoming => (
                format!("/{PANDASCORE_GAME}/matches/upcoming"),
                vec![("per_page", PER_PAGE.to_string())],
            ),
            MatchWindow::Live => (format!("/{PANDASCORE_GAME}/matches/running"), vec![]),
            MatchWindow::Past { page } => (
                format!("/{PANDASCORE_GAME}/matches/past"),
                vec![
                    ("page", page.to_string()),
                    ("per_page", PER_PAGE.to_string()),
                ],
            ),
        };

        let payload: Vec<Value> = self
            .transport
            .get_json(&path, &query, &self.auth_headers())
            .await?;

        payload
            .iter()
            .map(|value| parse_match(value).map_err(FetchError::Decode))
            .collect()
    }

    async fn fetch_match_stats(
        &self,
        match_external_id: &str,
    ) -> Result<Vec<PlayerStatRecord>, FetchError> {
        let path = format!("/matches/{match_external_id}");
        let payload: Value = self
            .transport
            .get_json(&path, &[], &self.auth_headers())
            .await?;
        let detail: ApiMatchDetail = serde_json::from_value(payload)?;

        let mut stats = Vec::new();
        for game in &detail.games {
            let map_name = game.map.as_ref().and_then(|m| m.name.clone());

            for raw in &game.players {
                let parsed: ApiGamePlayer = serde_json::from_value(raw.clone())?;
                let Some(player) = parsed.player else {
                    warn!("Match {} stat line without a player id", match_external_id);
                    continue;
                };
                stats.push(PlayerStatRecord {
                    match_external_id: match_external_id.to_string(),
                    player_external_id: player.id.to_string(),
                    map_name: map_name.clone(),
                    kills: parsed.kills.unwrap_or(0),
                    deaths: parsed.deaths.unwrap_or(0),
                    assists: parsed.assists.unwrap_or(0),
                    headshots: parsed.headshots,
                    adr: parsed.adr,
                    rating: None,
                    source: SOURCE.to_string(),
                    raw: raw.clone(),
                });
            }
        }

        Ok(stats)
    }

    fn history_pages(&self) -> u32 {
        HISTORY_PAGES
    }
}

fn parse_player(player: ApiPlayer) -> PlayerRecord {
    let full_name = format!(
        "{} {}",
        player.first_name.as_deref().unwrap_or_default(),
        player.last_name.as_deref().unwrap_or_default()
    );
    let real_name = Some(full_name.trim().to_string()).filter(|s| !s.is_empty());

    PlayerRecord {
        external_id: player.id.to_string(),
        name: player.name,
        real_name,
        team_external_id: player.current_team.map(|t| t.id.to_string()),
        country: player.nationality,
        source: SOURCE.to_string(),
    }
}

fn parse_match(value: &Value) -> Result<MatchRecord, serde_json::Error> {
    let m: ApiMatch = serde_json::from_value(value.clone())?;

    let team1 = m
        .opponents
        .first()
        .and_then(|slot| slot.opponent.as_ref());
    let team2 = m.opponents.get(1).and_then(|slot| slot.opponent.as_ref());

    Ok(MatchRecord {
        external_id: m.id.to_string(),
        tournament_name: m.league.as_ref().and_then(|l| l.name.clone()),
        tournament_id: m.league.as_ref().and_then(|l| l.id).map(|id| id.to_string()),
        team1_external_id: team1.map(|t| t.id.to_string()),
        team2_external_id: team2.map(|t| t.id.to_string()),
        winner_external_id: m.winner.as_ref().and_then(|w| w.id).map(|id| id.to_string()),
        team1_score: m.results.first().and_then(|r| r.score),
        team2_score: m.results.get(1).and_then(|r| r.score),
        best_of: m.number_of_games,
        status: map_status(m.status.as_deref().unwrap_or_default()),
        scheduled_at: m.scheduled_at,
        started_at: m.begin_at,
        ended_at: m.end_at,
        source: SOURCE.to_string(),
        raw: value.clone(),
    })
}

/// Map PandaScore's match status into the canonical set. Unrecognized values
/// pass through unchanged.
fn map_status(value: &str) -> String {
    match value {
        "not_started" => status::UPCOMING.to_string(),
        "running" => status::LIVE.to_string(),
        "finished" => status::FINISHED.to_string(),
        "canceled" => status::CANCELED.to_string(),
        other => other.to_string(),
    }
}
