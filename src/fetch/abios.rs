//! Abios Gaming fetcher.
//!
//! Docs: https://docs.abiosgaming.com/
//!
//! Abios IDs are prefixed with `abios_` so provider external-id namespaces
//! never overlap.

use std::collections::HashMap;

use anyhow::{anyhow, Result};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::Value;
use tracing::warn;

use crate::config::{Config, ABIOS_BASE_URL, ABIOS_GAME_ID};
use crate::fetch::{FetchError, MatchDataProvider, MatchWindow, Transport};
use crate::models::{status, MatchRecord, PlayerRecord, PlayerStatRecord, TeamRecord};

pub const SOURCE: &str = "abios";

const PER_PAGE: u32 = 50;

fn ext_id(id: i64) -> String {
    format!("abios_{id}")
}

#[derive(Debug, Deserialize, Clone)]
struct ApiEnvelope<T> {
    #[serde(default)]
    data: Vec<T>,
}

#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
struct ApiAccessToken {
    access_token: String,
}

#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
struct ApiTeam {
    id: i64,
    name: String,
    short_name: Option<String>,
    images: Option<ApiImages>,
    country: Option<ApiCountry>,
}

#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
struct ApiImages {
    default: Option<String>,
}

#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
struct ApiCountry {
    name: Option<String>,
}

#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
struct ApiPlayer {
    id: i64,
    nick_name: String,
    first_name: Option<String>,
    last_name: Option<String>,
    team: Option<ApiTeamRef>,
    country: Option<ApiCountry>,
}

#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
struct ApiTeamRef {
    id: i64,
}

#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
struct ApiSeries {
    id: i64,
    tournament: Option<ApiTournament>,
    rosters: Vec<ApiRoster>,
    scores: HashMap<String, i32>,
    lifecycle: Option<String>,
    start: Option<DateTime<Utc>>,
    end: Option<DateTime<Utc>>,
    format: Option<ApiFormat>,
}

#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
struct ApiTournament {
    id: Option<i64>,
    title: Option<String>,
}

#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
struct ApiRoster {
    team: Option<ApiTeamRef>,
}

#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
struct ApiFormat {
    best_of: Option<i32>,
}

#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
struct ApiPlayerStat {
    player: Option<ApiPlayerRef>,
    kills: Option<i32>,
    deaths: Option<i32>,
    assists: Option<i32>,
    headshots: Option<i32>,
    adr: Option<f64>,
    rating: Option<f64>,
}

#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
struct ApiPlayerRef {
    id: i64,
}

pub struct Abios {
    transport: Transport,
    client_id: String,
    client_secret: String,
    access_token: Option<String>,
}

impl Abios {
    pub fn new(config: &Config) -> Result<Self> {
        let client_id = config
            .abios_client_id
            .clone()
            .ok_or_else(|| anyhow!("ABIOS_CLIENT_ID is not set"))?;
        let client_secret = config
            .abios_client_secret
            .clone()
            .ok_or_else(|| anyhow!("ABIOS_CLIENT_SECRET is not set"))?;
        let transport = Transport::new(
            ABIOS_BASE_URL,
            config.rate_limit_interval,
            config.http_timeout,
        )?;
        Ok(Self {
            transport,
            client_id,
            client_secret,
            access_token: None,
        })
    }

    fn game_filter(&self) -> (&'static str, String) {
        ("filter[game_id]", ABIOS_GAME_ID.to_string())
    }
}

#[async_trait::async_trait]
impl MatchDataProvider for Abios {
    fn source(&self) -> &'static str {
        SOURCE
    }

    /// OAuth client-credentials token exchange, run once per sync.
    async fn authenticate(&mut self) -> Result<(), FetchError> {
        let form = [
            ("grant_type", "client_credentials".to_string()),
            ("client_id", self.client_id.clone()),
            ("client_secret", self.client_secret.clone()),
        ];
        let token: ApiAccessToken = self
            .transport
            .post_form("/oauth/access_token", &form, &[])
            .await?;
        self.access_token = Some(token.access_token);
        Ok(())
    }

    fn auth_headers(&self) -> Vec<(&'static str, String)> {
        self.access_token
            .as_ref()
            .map(|token| ("Authorization", format!("Bearer {token}")))
            .into_iter()
            .collect()
    }

    async fn fetch_teams(&self) -> Result<Vec<TeamRecord>, FetchError> {
        let query = [
            self.game_filter(),
            ("page", "1".to_string()),
            ("per_page", PER_PAGE.to_string()),
        ];
        let envelope: ApiEnvelope<ApiTeam> = self
            .transport
            .get_json("/teams", &query, &self.auth_headers())
            .await?;

        Ok(envelope
            .data
            .into_iter()
            .map(|team| TeamRecord {
                external_id: ext_id(team.id),
                name: team.name,
                slug: team.short_name,
                logo_url: team.images.and_then(|i| i.default),
                country: team.country.and_then(|c| c.name),
                source: SOURCE.to_string(),
            })
            .collect())
    }

    async fn fetch_players(&self) -> Result<Vec<PlayerRecord>, FetchError> {
        let query = [
            self.game_filter(),
            ("page", "1".to_string()),
            ("per_page", PER_PAGE.to_string()),
        ];
        let envelope: ApiEnvelope<ApiPlayer> = self
            .transport
            .get_json("/players", &query, &self.auth_headers())
            .await?;

        Ok(envelope.data.into_iter().map(parse_player).collect())
    }

    async fn fetch_matches(&self, window: MatchWindow) -> Result<Vec<MatchRecord>, FetchError> {
        let lifecycle = match window {
            MatchWindow::Upcoming => "upcoming",
            MatchWindow::Live => "live",
            MatchWindow::Past { .. } => "over",
        };
        let page = match window {
            MatchWindow::Past { page } => page,
            _ => 1,
        };
        let query = [
            self.game_filter(),
            ("filter[lifecycle]", lifecycle.to_string()),
            ("page", page.to_string()),
            ("per_page", PER_PAGE.to_string()),
        ];

        let envelope: ApiEnvelope<Value> = self
            .transport
            .get_json("/series", &query, &self.auth_headers())
            .await?;

        envelope
            .data
            .iter()
            .map(|value| parse_series(value).map_err(FetchError::Decode))
            .collect()
    }

    async fn fetch_match_stats(
        &self,
        match_external_id: &str,
    ) -> Result<Vec<PlayerStatRecord>, FetchError> {
        let series_id = match_external_id
            .strip_prefix("abios_")
            .unwrap_or(match_external_id);
        let path = format!("/series/{series_id}/players/stats");

        // Stats are not available for every series; treat a failed fetch as
        // an empty result rather than aborting the run.
        let envelope: ApiEnvelope<Value> =
            match self.transport.get_json(&path, &[], &self.auth_headers()).await {
                Ok(envelope) => envelope,
                Err(e) => {
                    warn!("No stats for series {}: {:#}", series_id, e);
                    return Ok(Vec::new());
                }
            };

        let mut stats = Vec::new();
        for raw in &envelope.data {
            let parsed: ApiPlayerStat = serde_json::from_value(raw.clone())?;
            let Some(player) = parsed.player else {
                warn!("Series {} stat line without a player id", series_id);
                continue;
            };
            stats.push(PlayerStatRecord {
                match_external_id: match_external_id.to_string(),
                player_external_id: ext_id(player.id),
                map_name: None,
                kills: parsed.kills.unwrap_or(0),
                deaths: parsed.deaths.unwrap_or(0),
                assists: parsed.assists.unwrap_or(0),
                headshots: parsed.headshots,
                adr: parsed.adr,
                rating: parsed.rating,
                source: SOURCE.to_string(),
                raw: raw.clone(),
            });
        }

        Ok(stats)
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
        external_id: ext_id(player.id),
        name: player.nick_name,
        real_name,
        team_external_id: player.team.map(|t| ext_id(t.id)),
        country: player.country.and_then(|c| c.name),
        source: SOURCE.to_string(),
    }
}

fn parse_series(value: &Value) -> Result<MatchRecord, serde_json::Error> {
    let series: ApiSeries = serde_json::from_value(value.clone())?;

    let team1 = series.rosters.first().and_then(|r| r.team.as_ref());
    let team2 = series.rosters.get(1).and_then(|r| r.team.as_ref());
    let score_of = |team: Option<&ApiTeamRef>| {
        team.and_then(|t| series.scores.get(&t.id.to_string())).copied()
    };
    let team1_score = score_of(team1);
    let team2_score = score_of(team2);

    // Abios does not report the winner directly; derive it from final scores.
    let mut winner_id = None;
    if series.lifecycle.as_deref() == Some("over") {
        if let (Some(t1), Some(t2)) = (team1, team2) {
            let s1 = team1_score.unwrap_or(0);
            let s2 = team2_score.unwrap_or(0);
            if s1 > s2 {
                winner_id = Some(t1.id);
            } else if s2 > s1 {
                winner_id = Some(t2.id);
            }
        }
    }

    Ok(MatchRecord {
        external_id: ext_id(series.id),
        tournament_name: series.tournament.as_ref().and_then(|t| t.title.clone()),
        tournament_id: series
            .tournament
            .as_ref()
            .and_then(|t| t.id)
            .map(|id| id.to_string()),
        team1_external_id: team1.map(|t| ext_id(t.id)),
        team2_external_id: team2.map(|t| ext_id(t.id)),
        winner_external_id: winner_id.map(ext_id),
        team1_score,
        team2_score,
        best_of: series.format.as_ref().and_then(|f| f.best_of),
        status: map_lifecycle(series.lifecycle.as_deref().unwrap_or_default()),
        scheduled_at: series.start,
        started_at: None,
        ended_at: series.end,
        source: SOURCE.to_string(),
        raw: value.clone(),
    })
}

/// Map the Abios lifecycle into the canonical status set. Unrecognized
/// values pass through unchanged.
fn map_lifecycle(value: &str) -> String {
    match value {
        "upcoming" => status::UPCOMING.to_string(),
        "live" => status::LIVE.to_string(),
        "over" => status::FINISHED.to_string(),
        "deleted" => status::CANCELED.to_string(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn lifecycle_maps_into_the_canonical_set() {
        assert_eq!(map_lifecycle("upcoming"), status::UPCOMING);
        assert_eq!(map_lifecycle("live"), status::LIVE);
        assert_eq!(map_lifecycle("over"), status::FINISHED);
        assert_eq!(map_lifecycle("deleted"), status::CANCELED);
        assert_eq!(map_lifecycle("postponed"), "postponed");
    }

    #[test]
    fn series_winner_is_derived_from_final_scores() {
        let value = json!({
            "id": 5501,
            "tournament": {"id": 88, "title": "ESL Pro League"},
            "rosters": [
                {"team": {"id": 12}},
                {"team": {"id": 34}}
            ],
            "scores": {"12": 1, "34": 2},
            "lifecycle": "over",
            "start": "2026-02-10T16:00:00Z",
            "end": "2026-02-10T19:00:00Z",
            "format": {"best_of": 3}
        });

        let record = parse_series(&value).unwrap();
        assert_eq!(record.external_id, "abios_5501");
        assert_eq!(record.team1_external_id.as_deref(), Some("abios_12"));
        assert_eq!(record.team2_external_id.as_deref(), Some("abios_34"));
        assert_eq!(record.winner_external_id.as_deref(), Some("abios_34"));
        assert_eq!(record.team1_score, Some(1));
        assert_eq!(record.team2_score, Some(2));
        assert_eq!(record.status, status::FINISHED);
    }

    #[test]
    fn running_series_has_no_winner() {
        let value = json!({
            "id": 5502,
            "rosters": [
                {"team": {"id": 12}},
                {"team": {"id": 34}}
            ],
            "scores": {"12": 1, "34": 1},
            "lifecycle": "live"
        });

        let record = parse_series(&value).unwrap();
        assert!(record.winner_external_id.is_none());
        assert_eq!(record.status, status::LIVE);
    }

    #[test]
    fn player_external_ids_carry_the_provider_prefix() {
        let player = ApiPlayer {
            id: 901,
            nick_name: "dev1ce".to_string(),
            team: Some(ApiTeamRef { id: 77 }),
            ..Default::default()
        };
        let record = parse_player(player);
        assert_eq!(record.external_id, "abios_901");
        assert_eq!(record.team_external_id.as_deref(), Some("abios_77"));
    }
}
