//! Runtime configuration, loaded from the environment.

use std::env;
use std::time::Duration;

use anyhow::{anyhow, Result};

// API endpoints
pub const PANDASCORE_BASE_URL: &str = "https://api.pandascore.co";
pub const ABIOS_BASE_URL: &str = "https://api.abiosgaming.com/v3";
pub const ODDSPAPI_BASE_URL: &str = "https://api.oddspapi.io/v1";

// CS2 game scoping (the id namespace varies by API)
pub const PANDASCORE_GAME: &str = "csgo";
pub const ABIOS_GAME_ID: u32 = 5;

#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub pandascore_api_key: Option<String>,
    pub abios_client_id: Option<String>,
    pub abios_client_secret: Option<String>,
    pub oddspapi_api_key: Option<String>,
    /// Minimum delay between requests to one provider.
    pub rate_limit_interval: Duration,
    /// Per-request socket timeout.
    pub http_timeout: Duration,
    /// How long the identity resolver may reuse a positive external-id mapping.
    pub resolver_cache_ttl: Duration,
    pub health_port: u16,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let database_url = match env::var("DATABASE_URL") {
            Ok(v) if !v.trim().is_empty() => v,
            Ok(_) => return Err(anyhow!("DATABASE_URL is set but empty")),
            Err(_) => return Err(anyhow!("DATABASE_URL is not set")),
        };

        Ok(Self {
            database_url,
            pandascore_api_key: env_opt("PANDASCORE_API_KEY"),
            abios_client_id: env_opt("ABIOS_CLIENT_ID"),
            abios_client_secret: env_opt("ABIOS_CLIENT_SECRET"),
            oddspapi_api_key: env_opt("ODDSPAPI_API_KEY"),
            rate_limit_interval: Duration::from_millis(env_parsed("API_RATE_LIMIT_MS", 1000)),
            http_timeout: Duration::from_secs(env_parsed("HTTP_TIMEOUT_SECS", 30)),
            resolver_cache_ttl: Duration::from_secs(env_parsed("RESOLVER_CACHE_TTL_SECS", 1800)),
            health_port: env_parsed("HEALTH_PORT", 8083u16),
        })
    }
}

/// Non-empty environment value, or None.
fn env_opt(name: &str) -> Option<String> {
    env::var(name).ok().filter(|v| !v.trim().is_empty())
}

fn env_parsed<T: std::str::FromStr + Copy>(name: &str, default: T) -> T {
    env::var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
