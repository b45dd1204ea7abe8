//! OddsPapi fetcher for CS2 betting odds, including Pinnacle sharp lines.

use std::collections::HashMap;

use anyhow::{anyhow, Result};
use chrono::{DateTime, Utc};
use serde::Deserialize;

use crate::config::{Config, ODDSPAPI_BASE_URL};
use crate::fetch::{FetchError, OddsProvider, Transport};
use crate::models::OddsRecord;

pub const SOURCE: &str = "oddspapi";

const CS2_ODDS_PATH: &str = "/odds/esports/cs2";

#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
struct ApiOddsResponse {
    data: Vec<ApiEvent>,
}

#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
struct ApiEvent {
    event_id: Option<String>,
    bookmakers: Vec<ApiBookmaker>,
}

#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
struct ApiBookmaker {
    key: String,
    markets: Vec<ApiMarket>,
}

#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
struct ApiMarket {
    key: String,
    outcomes: Vec<ApiOutcome>,
}

#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
struct ApiOutcome {
    name: String,
    price: Option<f64>,
    point: Option<f64>,
}

pub struct OddsPapi {
    transport: Transport,
    api_key: String,
}

impl OddsPapi {
    pub fn new(config: &Config) -> Result<Self> {
        let api_key = config
            .oddspapi_api_key
            .clone()
            .ok_or_else(|| anyhow!("ODDSPAPI_API_KEY is not set"))?;
        let transport = Transport::new(
            ODDSPAPI_BASE_URL,
            config.rate_limit_interval,
            config.http_timeout,
        )?;
        Ok(Self { transport, api_key })
    }
}

#[async_trait::async_trait]
impl OddsProvider for OddsPapi {
    fn source(&self) -> &'static str {
        SOURCE
    }

    fn auth_headers(&self) -> Vec<(&'static str, String)> {
        vec![("X-Api-Key", self.api_key.clone())]
    }

    async fn fetch_odds(&self, live: bool) -> Result<Vec<OddsRecord>, FetchError> {
        let status = if live { "live" } else { "upcoming" };
        let query = [("status", status.to_string())];
        let response: ApiOddsResponse = self
            .transport
            .get_json(CS2_ODDS_PATH, &query, &self.auth_headers())
            .await?;

        Ok(parse_events(&response.data, live, None, Utc::now()))
    }

    /// Pinnacle lines specifically, for reference odds.
    async fn fetch_sharp_odds(&self) -> Result<Vec<OddsRecord>, FetchError> {
        let query = [("bookmakers", "pinnacle".to_string())];
        let response: ApiOddsResponse = self
            .transport
            .get_json(CS2_ODDS_PATH, &query, &self.auth_headers())
            .await?;

        Ok(parse_events(&response.data, false, Some("pinnacle"), Utc::now()))
    }
}

/// Implied probability of a decimal price.
pub fn implied_probability(odds_decimal: f64) -> f64 {
    if odds_decimal <= 0.0 {
        return 0.0;
    }
    1.0 / odds_decimal
}

/// Bookmaker margin of a two-way market, as a percentage.
pub fn vig(odds1: f64, odds2: f64) -> f64 {
    (implied_probability(odds1) + implied_probability(odds2) - 1.0) * 100.0
}

/// Average margin across the two-way h2h markets in a batch. Markets without
/// exactly two priced selections are skipped.
pub fn average_h2h_vig(records: &[OddsRecord]) -> Option<f64> {
    let mut markets: HashMap<(&str, &str), Vec<f64>> = HashMap::new();
    for record in records {
        let Some(match_ext) = record.match_external_id.as_deref() else {
            continue;
        };
        if record.market_type != "h2h" {
            continue;
        }
        markets
            .entry((match_ext, record.bookmaker.as_str()))
            .or_default()
            .push(record.odds_decimal);
    }

    let vigs: Vec<f64> = markets
        .values()
        .filter(|prices| prices.len() == 2)
        .map(|prices| vig(prices[0], prices[1]))
        .collect();
    if vigs.is_empty() {
        None
    } else {
        Some(vigs.iter().sum::<f64>() / vigs.len() as f64)
    }
}

fn parse_events(
    events: &[ApiEvent],
    is_live: bool,
    bookmaker_filter: Option<&str>,
    fetched_at: DateTime<Utc>,
) -> Vec<OddsRecord> {
    let mut odds = Vec::new();

    for event in events {
        for bookmaker in &event.bookmakers {
            if let Some(filter) = bookmaker_filter {
                if bookmaker.key != filter {
                    continue;
                }
            }

            for market in &bookmaker.markets {
                for outcome in &market.outcomes {
                    // An outcome without a price is unusable.
                    let Some(price) = outcome.price else {
                        continue;
                    };
                    odds.push(OddsRecord {
                        match_external_id: event.event_id.clone(),
                        bookmaker: bookmaker.key.clone(),
                        market_type: market.key.clone(),
                        selection: outcome.name.clone(),
                        odds_decimal: price,
                        line: outcome.point,
                        is_live,
                        source: SOURCE.to_string(),
                        fetched_at,
                    });
                }
            }
        }
    }

    odds
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample_events() -> Vec<ApiEvent> {
        let payload = json!({
            "data": [{
                "event_id": "evt-1",
                "home_team": "NAVI",
                "away_team": "FaZe",
                "bookmakers": [
                    {
                        "key": "pinnacle",
                        "markets": [{
                            "key": "h2h",
                            "outcomes": [
                                {"name": "NAVI", "price": 1.85},
                                {"name": "FaZe", "price": 2.02}
                            ]
                        }]
                    },
                    {
                        "key": "bet365",
                        "markets": [{
                            "key": "totals",
                            "outcomes": [
                                {"name": "Over", "price": 1.90, "point": 2.5},
                                {"name": "Under"}
                            ]
                        }]
                    }
                ]
            }]
        });
        let response: ApiOddsResponse = serde_json::from_value(payload).unwrap();
        response.data
    }

    #[test]
    fn every_priced_outcome_becomes_one_record() {
        let odds = parse_events(&sample_events(), false, None, Utc::now());
        // The priceless Under outcome is dropped.
        assert_eq!(odds.len(), 3);
        assert!(odds.iter().all(|o| o.match_external_id.as_deref() == Some("evt-1")));

        let over = odds.iter().find(|o| o.selection == "Over").unwrap();
        assert_eq!(over.line, Some(2.5));
        assert_eq!(over.market_type, "totals");
    }

    #[test]
    fn bookmaker_filter_keeps_only_sharp_lines() {
        let odds = parse_events(&sample_events(), false, Some("pinnacle"), Utc::now());
        assert_eq!(odds.len(), 2);
        assert!(odds.iter().all(|o| o.bookmaker == "pinnacle"));
    }

    #[test]
    fn live_flag_is_carried_onto_records() {
        let odds = parse_events(&sample_events(), true, None, Utc::now());
        assert!(odds.iter().all(|o| o.is_live));
    }

    #[test]
    fn implied_probability_inverts_the_price() {
        assert_eq!(implied_probability(2.0), 0.5);
        assert_eq!(implied_probability(0.0), 0.0);
        assert_eq!(implied_probability(-1.5), 0.0);
    }

    #[test]
    fn vig_of_a_fair_market_is_zero() {
        assert!((vig(2.0, 2.0)).abs() < 1e-9);
        // 1.9/1.9 is the classic -110/-110 book: ~5.26% margin.
        assert!((vig(1.9, 1.9) - 5.263).abs() < 0.01);
    }

    #[test]
    fn average_vig_only_counts_complete_h2h_markets() {
        let odds = parse_events(&sample_events(), false, None, Utc::now());
        // Only pinnacle's h2h market has two priced selections; the totals
        // market is ignored outright.
        let average = average_h2h_vig(&odds).unwrap();
        let expected = vig(1.85, 2.02);
        assert!((average - expected).abs() < 1e-9);

        assert!(average_h2h_vig(&[]).is_none());
    }
}
