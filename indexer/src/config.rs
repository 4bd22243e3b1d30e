//! Process configuration, resolved once from the environment.

use std::path::PathBuf;
use std::time::Duration;

use crate::database::DatabaseManagerConfig;

#[derive(Clone, Debug)]
pub struct IndexerConfig {
    pub api_port: u16,
    pub db: DatabaseManagerConfig,
}

impl IndexerConfig {
    pub fn from_env() -> Self {
        let database_path = std::env::var("DATABASE_URL")
            .map(|url| parse_database_path(&url))
            .unwrap_or_else(|_| {
                std::env::current_dir()
                    .unwrap_or_else(|_| PathBuf::from("."))
                    .join("ledger_indexer.db")
            });

        let api_port = env_parse("API_PORT").unwrap_or(3000);

        let mut db = DatabaseManagerConfig { database_path, ..Default::default() };
        if let Some(secs) = env_parse::<u64>("DB_CONNECT_TIMEOUT_SECS") {
            db.connect_timeout = Duration::from_secs(secs);
        }
        if let Some(secs) = env_parse::<u64>("DB_HEALTH_CHECK_SECS") {
            db.health_check_interval = Duration::from_secs(secs);
        }
        if let Some(cap) = env_parse::<u64>("DB_MAX_CONNECT_ATTEMPTS") {
            db.max_attempts = Some(cap);
        }

        Self { api_port, db }
    }
}

/// Accepts both a bare path and a `sqlite:` URL.
fn parse_database_path(url: &str) -> PathBuf {
    let stripped = url
        .strip_prefix("sqlite://")
        .or_else(|| url.strip_prefix("sqlite:"))
        .unwrap_or(url);
    PathBuf::from(stripped)
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|raw| raw.trim().parse().ok())
}
