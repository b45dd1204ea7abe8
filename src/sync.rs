//! Fetch/sync orchestration.
//!
//! One provider is synced fully before the next begins. Each provider run is
//! isolated: an error aborts the remainder of that run only, is recorded in
//! the audit log, and never rolls back entities written by earlier stages.

use std::time::Instant;

use anyhow::Result;
use tracing::{error, info, warn};

use crate::config::Config;
use crate::engine::{UpsertCounts, UpsertEngine};
use crate::fetch::{
    abios, oddspapi, pandascore, Abios, MatchDataProvider, MatchWindow, OddsPapi, OddsProvider,
    PandaScore,
};
use crate::models::{status, FetchLogEntry};
use crate::store::CanonicalStore;

pub const STATUS_SUCCESS: &str = "success";
pub const STATUS_ERROR: &str = "error";

// Bound on per-match stat fetches in one run; stats for the rest arrive on
// later runs once those matches show up again.
const MAX_STAT_MATCHES: usize = 20;

/// Aggregated outcome of one provider run.
#[derive(Debug, Clone)]
pub struct RunStats {
    pub status: String,
    pub records_fetched: u64,
    pub records_inserted: u64,
    pub records_updated: u64,
    pub error_message: Option<String>,
    started: Instant,
}

impl RunStats {
    pub fn new() -> Self {
        Self {
            status: STATUS_SUCCESS.to_string(),
            records_fetched: 0,
            records_inserted: 0,
            records_updated: 0,
            error_message: None,
            started: Instant::now(),
        }
    }

    pub fn is_error(&self) -> bool {
        self.status == STATUS_ERROR
    }

    fn absorb(&mut self, counts: UpsertCounts) {
        self.records_inserted += counts.inserted;
        self.records_updated += counts.updated;
    }

    pub fn to_log_entry(&self, source: &str, endpoint: &str) -> FetchLogEntry {
        FetchLogEntry {
            source: source.to_string(),
            endpoint: endpoint.to_string(),
            status: self.status.clone(),
            records_fetched: self.records_fetched as i64,
            records_inserted: self.records_inserted as i64,
            records_updated: self.records_updated as i64,
            error_message: self.error_message.clone(),
            duration_ms: self.started.elapsed().as_millis() as i64,
        }
    }
}

impl Default for RunStats {
    fn default() -> Self {
        Self::new()
    }
}

/// Which providers a pipeline invocation covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceFilter {
    All,
    Pandascore,
    Abios,
    Odds,
}

impl SourceFilter {
    fn includes(self, other: SourceFilter) -> bool {
        self == SourceFilter::All || self == other
    }
}

/// Run every selected provider in sequence. A provider that fails to
/// initialize or sync never blocks the remaining providers.
pub async fn run_pipeline<S: CanonicalStore>(
    engine: &UpsertEngine<S>,
    config: &Config,
    filter: SourceFilter,
    full_sync: bool,
) -> Vec<(String, RunStats)> {
    let mut runs = Vec::new();

    if filter.includes(SourceFilter::Pandascore) {
        let stats = match PandaScore::new(config) {
            Ok(mut provider) => sync_match_provider(engine, &mut provider, full_sync).await,
            Err(e) => fail_run(engine, pandascore::SOURCE, e).await,
        };
        runs.push((pandascore::SOURCE.to_string(), stats));
    }

    if filter.includes(SourceFilter::Abios) {
        let stats = match Abios::new(config) {
            Ok(mut provider) => sync_match_provider(engine, &mut provider, full_sync).await,
            Err(e) => fail_run(engine, abios::SOURCE, e).await,
        };
        runs.push((abios::SOURCE.to_string(), stats));
    }

    if filter.includes(SourceFilter::Odds) {
        let stats = match OddsPapi::new(config) {
            Ok(provider) => sync_odds_provider(engine, &provider).await,
            Err(e) => fail_run(engine, oddspapi::SOURCE, e).await,
        };
        runs.push((oddspapi::SOURCE.to_string(), stats));
    }

    runs
}

/// A provider that cannot even be constructed (missing credentials, bad
/// client setup) still produces an error run with its audit row.
async fn fail_run<S: CanonicalStore>(
    engine: &UpsertEngine<S>,
    source: &str,
    err: anyhow::Error,
) -> RunStats {
    error!("{} sync failed: {:#}", source, err);
    let mut stats = RunStats::new();
    stats.status = STATUS_ERROR.to_string();
    stats.error_message = Some(format!("{err:#}"));

    let entry = stats.to_log_entry(source, "error");
    if let Err(e) = engine.store().insert_fetch_log(&entry).await {
        warn!("Failed to write fetch log for {}: {:#}", source, e);
    }

    stats
}

/// Sync one match-data provider and write its audit row.
pub async fn sync_match_provider<S, P>(
    engine: &UpsertEngine<S>,
    provider: &mut P,
    full_sync: bool,
) -> RunStats
where
    S: CanonicalStore,
    P: MatchDataProvider + ?Sized,
{
    let source = provider.source();
    info!("=== {} sync ===", source);
    let mut stats = RunStats::new();

    let endpoint = match run_match_sync(engine, provider, full_sync, &mut stats).await {
        Ok(()) => {
            if full_sync {
                "full_sync"
            } else {
                "regular"
            }
        }
        Err(e) => {
            stats.status = STATUS_ERROR.to_string();
            stats.error_message = Some(format!("{e:#}"));
            error!("{} sync failed: {:#}", source, e);
            "error"
        }
    };

    let entry = stats.to_log_entry(source, endpoint);
    if let Err(e) = engine.store().insert_fetch_log(&entry).await {
        warn!("Failed to write fetch log for {}: {:#}", source, e);
    }

    stats
}

async fn run_match_sync<S, P>(
    engine: &UpsertEngine<S>,
    provider: &mut P,
    full_sync: bool,
    stats: &mut RunStats,
) -> Result<()>
where
    S: CanonicalStore,
    P: MatchDataProvider + ?Sized,
{
    provider.authenticate().await?;

    // Teams and players go first so matches and stats fetched later in this
    // run can resolve their references.
    let teams = provider.fetch_teams().await?;
    stats.records_fetched += teams.len() as u64;
    let counts = engine.upsert_teams(&teams).await?;
    stats.absorb(counts);
    info!("  Teams: {} inserted, {} updated", counts.inserted, counts.updated);

    let players = provider.fetch_players().await?;
    stats.records_fetched += players.len() as u64;
    let counts = engine.upsert_players(&players).await?;
    stats.absorb(counts);
    info!("  Players: {} inserted, {} updated", counts.inserted, counts.updated);

    let mut finished_matches: Vec<String> = Vec::new();
    let mut track_finished = |records: &[crate::models::MatchRecord]| {
        finished_matches.extend(
            records
                .iter()
                .filter(|m| m.status == status::FINISHED)
                .map(|m| m.external_id.clone()),
        );
    };

    let upcoming = provider.fetch_matches(MatchWindow::Upcoming).await?;
    stats.records_fetched += upcoming.len() as u64;
    let counts = engine.upsert_matches(&upcoming).await?;
    stats.absorb(counts);
    track_finished(&upcoming);
    info!("  Upcoming matches: {} inserted, {} updated", counts.inserted, counts.updated);

    let live = provider.fetch_matches(MatchWindow::Live).await?;
    stats.records_fetched += live.len() as u64;
    let counts = engine.upsert_matches(&live).await?;
    stats.absorb(counts);
    track_finished(&live);
    info!("  Live matches: {} inserted, {} updated", counts.inserted, counts.updated);

    if full_sync {
        for page in 1..=provider.history_pages() {
            let past = provider.fetch_matches(MatchWindow::Past { page }).await?;
            if past.is_empty() {
                break;
            }
            stats.records_fetched += past.len() as u64;
            let counts = engine.upsert_matches(&past).await?;
            stats.absorb(counts);
            track_finished(&past);
            info!("    Page {}: {} inserted, {} updated", page, counts.inserted, counts.updated);
        }
    }

    finished_matches.sort_unstable();
    finished_matches.dedup();
    finished_matches.truncate(MAX_STAT_MATCHES);
    if !finished_matches.is_empty() {
        let mut stat_records = Vec::new();
        for external_id in &finished_matches {
            stat_records.extend(provider.fetch_match_stats(external_id).await?);
        }
        stats.records_fetched += stat_records.len() as u64;
        let inserted = engine.insert_player_stats(&stat_records).await?;
        stats.records_inserted += inserted;
        info!("  Player stats: {} inserted", inserted);
    }

    Ok(())
}

/// Sync the odds provider and write its audit row.
pub async fn sync_odds_provider<S, P>(engine: &UpsertEngine<S>, provider: &P) -> RunStats
where
    S: CanonicalStore,
    P: OddsProvider + ?Sized,
{
    let source = provider.source();
    info!("=== {} sync ===", source);
    let mut stats = RunStats::new();

    let endpoint = match run_odds_sync(engine, provider, &mut stats).await {
        Ok(()) => "regular",
        Err(e) => {
            stats.status = STATUS_ERROR.to_string();
            stats.error_message = Some(format!("{e:#}"));
            error!("{} sync failed: {:#}", source, e);
            "error"
        }
    };

    let entry = stats.to_log_entry(source, endpoint);
    if let Err(e) = engine.store().insert_fetch_log(&entry).await {
        warn!("Failed to write fetch log for {}: {:#}", source, e);
    }

    stats
}

async fn run_odds_sync<S, P>(
    engine: &UpsertEngine<S>,
    provider: &P,
    stats: &mut RunStats,
) -> Result<()>
where
    S: CanonicalStore,
    P: OddsProvider + ?Sized,
{
    let odds = provider.fetch_odds(false).await?;
    stats.records_fetched += odds.len() as u64;
    let inserted = engine.insert_odds(&odds).await?;
    stats.records_inserted += inserted;
    info!("  Odds: {} inserted", inserted);

    let sharp = provider.fetch_sharp_odds().await?;
    stats.records_fetched += sharp.len() as u64;
    let inserted = engine.insert_odds(&sharp).await?;
    stats.records_inserted += inserted;
    info!("  Pinnacle lines: {} inserted", inserted);
    if let Some(margin) = oddspapi::average_h2h_vig(&sharp) {
        info!("  Sharp h2h margin: {:.2}%", margin);
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::SystemClock;
    use crate::fetch::FetchError;
    use crate::models::{MatchRecord, OddsRecord, PlayerRecord, PlayerStatRecord, TeamRecord};
    use crate::resolver::IdentityResolver;
    use crate::store::MemStore;
    use chrono::Utc;
    use serde_json::json;
    use std::collections::HashMap;
    use std::sync::Arc;
    use std::time::Duration;

    fn engine() -> UpsertEngine<MemStore> {
        UpsertEngine::new(
            MemStore::new(),
            IdentityResolver::new(Duration::from_secs(60), Arc::new(SystemClock)),
        )
    }

    #[derive(Default)]
    struct FakeProvider {
        teams: Vec<TeamRecord>,
        players: Vec<PlayerRecord>,
        upcoming: Vec<MatchRecord>,
        live: Vec<MatchRecord>,
        stats: HashMap<String, Vec<PlayerStatRecord>>,
        fail_on_players: bool,
    }

    #[async_trait::async_trait]
    impl MatchDataProvider for FakeProvider {
        fn source(&self) -> &'static str {
            "fake"
        }

        fn auth_headers(&self) -> Vec<(&'static str, String)> {
            Vec::new()
        }

        async fn fetch_teams(&self) -> Result<Vec<TeamRecord>, FetchError> {
            Ok(self.teams.clone())
        }

        async fn fetch_players(&self) -> Result<Vec<PlayerRecord>, FetchError> {
            if self.fail_on_players {
                return Err(FetchError::Status {
                    status: 500,
                    body: "upstream exploded".to_string(),
                });
            }
            Ok(self.players.clone())
        }

        async fn fetch_matches(&self, window: MatchWindow) -> Result<Vec<MatchRecord>, FetchError> {
            Ok(match window {
                MatchWindow::Upcoming => self.upcoming.clone(),
                MatchWindow::Live => self.live.clone(),
                MatchWindow::Past { .. } => Vec::new(),
            })
        }

        async fn fetch_match_stats(
            &self,
            match_external_id: &str,
        ) -> Result<Vec<PlayerStatRecord>, FetchError> {
            Ok(self.stats.get(match_external_id).cloned().unwrap_or_default())
        }
    }

    fn team(external_id: &str) -> TeamRecord {
        TeamRecord {
            external_id: external_id.to_string(),
            name: format!("team-{external_id}"),
            slug: None,
            logo_url: None,
            country: None,
            source: "fake".to_string(),
        }
    }

    fn player(external_id: &str) -> PlayerRecord {
        PlayerRecord {
            external_id: external_id.to_string(),
            name: format!("player-{external_id}"),
            real_name: None,
            team_external_id: None,
            country: None,
            source: "fake".to_string(),
        }
    }

    fn finished_match(external_id: &str, team1: &str) -> MatchRecord {
        MatchRecord {
            external_id: external_id.to_string(),
            tournament_name: None,
            tournament_id: None,
            team1_external_id: Some(team1.to_string()),
            team2_external_id: None,
            winner_external_id: None,
            team1_score: Some(2),
            team2_score: Some(0),
            best_of: Some(3),
            status: status::FINISHED.to_string(),
            scheduled_at: None,
            started_at: None,
            ended_at: Some(Utc::now()),
            source: "fake".to_string(),
            raw: json!({}),
        }
    }

    fn stat(match_ext: &str, player_ext: &str) -> PlayerStatRecord {
        PlayerStatRecord {
            match_external_id: match_ext.to_string(),
            player_external_id: player_ext.to_string(),
            map_name: Some("de_inferno".to_string()),
            kills: 21,
            deaths: 14,
            assists: 5,
            headshots: None,
            adr: None,
            rating: None,
            source: "fake".to_string(),
            raw: json!({}),
        }
    }

    #[tokio::test]
    async fn full_provider_run_ingests_entities_in_dependency_order() {
        let engine = engine();
        let mut provider = FakeProvider {
            teams: vec![team("t1")],
            players: vec![player("p1")],
            live: vec![finished_match("m1", "t1")],
            stats: HashMap::from([("m1".to_string(), vec![stat("m1", "p1")])]),
            ..Default::default()
        };

        let stats = sync_match_provider(&engine, &mut provider, false).await;

        assert_eq!(stats.status, STATUS_SUCCESS);
        // 1 team + 1 player + 1 match + 1 stat line
        assert_eq!(stats.records_fetched, 4);
        assert_eq!(stats.records_inserted, 4);
        assert_eq!(stats.records_updated, 0);

        // Stats resolved against the match and player written earlier in the run.
        assert_eq!(engine.store().stat_count().await, 1);
        let m = engine.store().match_by_external("m1").await.unwrap();
        assert!(m.team1_id.is_some());
    }

    #[tokio::test]
    async fn audit_row_is_written_for_successful_runs() {
        let engine = engine();
        let mut provider = FakeProvider {
            teams: vec![team("t1"), team("t2")],
            ..Default::default()
        };

        sync_match_provider(&engine, &mut provider, false).await;

        let log = engine.store().fetch_log().await;
        assert_eq!(log.len(), 1);
        assert_eq!(log[0].source, "fake");
        assert_eq!(log[0].endpoint, "regular");
        assert_eq!(log[0].status, STATUS_SUCCESS);
        assert_eq!(log[0].records_fetched, 2);
        assert_eq!(log[0].records_inserted, 2);
        assert!(log[0].error_message.is_none());
    }

    #[tokio::test]
    async fn provider_failure_is_logged_and_keeps_earlier_writes() {
        let engine = engine();
        let mut provider = FakeProvider {
            teams: vec![team("t1")],
            fail_on_players: true,
            ..Default::default()
        };

        let stats = sync_match_provider(&engine, &mut provider, false).await;

        assert!(stats.is_error());
        assert!(stats.error_message.as_deref().unwrap().contains("status 500"));

        // Teams written before the failure stay; no cross-entity rollback.
        assert_eq!(engine.store().team_count().await, 1);

        let log = engine.store().fetch_log().await;
        assert_eq!(log.len(), 1);
        assert_eq!(log[0].status, STATUS_ERROR);
        assert_eq!(log[0].endpoint, "error");
        assert!(log[0].error_message.is_some());
    }

    #[tokio::test]
    async fn provider_that_fails_to_construct_still_gets_an_error_audit_row() {
        let engine = engine();
        let config = Config {
            database_url: "postgres://unused".to_string(),
            pandascore_api_key: None,
            abios_client_id: None,
            abios_client_secret: None,
            oddspapi_api_key: None,
            rate_limit_interval: Duration::from_millis(10),
            http_timeout: Duration::from_secs(5),
            resolver_cache_ttl: Duration::from_secs(60),
            health_port: 0,
        };

        let runs = run_pipeline(&engine, &config, SourceFilter::Pandascore, false).await;

        assert_eq!(runs.len(), 1);
        assert_eq!(runs[0].0, "pandascore");
        assert!(runs[0].1.is_error());

        let log = engine.store().fetch_log().await;
        assert_eq!(log.len(), 1);
        assert_eq!(log[0].status, STATUS_ERROR);
        assert_eq!(log[0].endpoint, "error");
        assert!(log[0]
            .error_message
            .as_deref()
            .unwrap()
            .contains("PANDASCORE_API_KEY"));
    }

    #[tokio::test]
    async fn failed_provider_does_not_block_the_next_one() {
        let engine = engine();

        let mut broken = FakeProvider {
            teams: vec![team("t1")],
            fail_on_players: true,
            ..Default::default()
        };
        let broken_stats = sync_match_provider(&engine, &mut broken, false).await;
        assert!(broken_stats.is_error());

        let mut healthy = FakeProvider {
            teams: vec![team("t2")],
            ..Default::default()
        };
        let healthy_stats = sync_match_provider(&engine, &mut healthy, false).await;
        assert_eq!(healthy_stats.status, STATUS_SUCCESS);
        assert_eq!(engine.store().fetch_log().await.len(), 2);
    }

    struct FakeOdds {
        rounds: Vec<Vec<OddsRecord>>,
    }

    #[async_trait::async_trait]
    impl OddsProvider for FakeOdds {
        fn source(&self) -> &'static str {
            "fake-odds"
        }

        fn auth_headers(&self) -> Vec<(&'static str, String)> {
            Vec::new()
        }

        async fn fetch_odds(&self, _live: bool) -> Result<Vec<OddsRecord>, FetchError> {
            Ok(self.rounds.first().cloned().unwrap_or_default())
        }

        async fn fetch_sharp_odds(&self) -> Result<Vec<OddsRecord>, FetchError> {
            Ok(self.rounds.get(1).cloned().unwrap_or_default())
        }
    }

    #[tokio::test]
    async fn unresolvable_odds_show_up_as_a_fetched_inserted_gap() {
        let engine = engine();
        let mut provider = FakeProvider {
            teams: vec![team("t1")],
            live: vec![finished_match("m1", "t1")],
            ..Default::default()
        };
        sync_match_provider(&engine, &mut provider, false).await;

        let known = OddsRecord {
            match_external_id: Some("m1".to_string()),
            bookmaker: "pinnacle".to_string(),
            market_type: "h2h".to_string(),
            selection: "team-t1".to_string(),
            odds_decimal: 1.5,
            line: None,
            is_live: false,
            source: "fake-odds".to_string(),
            fetched_at: Utc::now(),
        };
        let unknown = OddsRecord {
            match_external_id: Some("other-provider-match".to_string()),
            ..known.clone()
        };

        let odds_provider = FakeOdds {
            rounds: vec![vec![known, unknown]],
        };
        let stats = sync_odds_provider(&engine, &odds_provider).await;

        assert_eq!(stats.status, STATUS_SUCCESS);
        assert_eq!(stats.records_fetched, 2);
        assert_eq!(stats.records_inserted, 1);
        assert_eq!(engine.store().odds().await.len(), 1);
    }
}
