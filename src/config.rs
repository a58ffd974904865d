//! Typed configuration, parsed once at startup from the environment inputs
//! in spec. Follows the teacher's `env_parse`/`*_from_env` pattern
//! (`db/mod.rs`, `rate_limit.rs`) rather than a config crate, since the
//! corpus never reaches for one.

use std::time::Duration;

const DEFAULT_AUTO_SAVE_INTERVAL_MS: u64 = 60_000;
const DEFAULT_VERSION_SNAPSHOT_EVERY_N_SAVES: u32 = 5;
const DEFAULT_MAX_VERSIONS_PER_BOARD: i64 = 50;
const DEFAULT_PRESENCE_TTL_S: u64 = 30;
const DEFAULT_EDIT_LOCK_TTL_S: u64 = 300;
const DEFAULT_SESSION_TTL_S: u64 = 86_400;
const DEFAULT_MAX_OBJECTS_PER_BOARD: usize = 2000;
const DEFAULT_MAX_BATCH_SIZE: usize = 50;
const DEFAULT_RATE_LIMIT_EVENTS_PER_S: usize = 60;
const DEFAULT_CURSOR_RATE_LIMIT_PER_S: usize = 25;
const DEFAULT_CHAT_HISTORY_LIMIT: usize = 50;
const DEFAULT_CHAT_HISTORY_TTL_S: u64 = 86_400;

/// Parse an environment variable, falling back to `default` if unset or
/// unparseable.
pub(crate) fn env_parse<T>(key: &str, default: T) -> T
where
T: std::str::FromStr + Copy,
{
    std::env::var(key).ok().and_then(|v| v.parse::<T>().ok()).unwrap_or(default)
}

fn env_bool(key: &str, default: bool) -> bool {
    std::env::var(key).ok().map(|v| matches!(v.to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on")).unwrap_or(default)
}

/// All environment-tunable knobs from spec, parsed once at startup.
#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub redis_url: String,
    pub auto_save_interval: Duration,
    pub version_snapshot_every_n_saves: u32,
    pub max_versions_per_board: i64,
    pub presence_ttl: Duration,
    pub edit_lock_ttl: Duration,
    pub session_ttl: Duration,
    pub max_objects_per_board: usize,
    pub max_batch_size: usize,
    pub rate_limit_events_per_s: usize,
    pub cursor_rate_limit_per_s: usize,
    pub chat_history_limit: usize,
    pub chat_history_ttl: Duration,
    /// When set, bearer tokens equal to this value map directly to a
    /// synthetic user identity instead of going through the identity
    /// provider.
    pub e2e_test_auth: bool,
}

impl Config {
    /// Load configuration from the environment. `DATABASE_URL` is required;
    /// everything else has a spec-documented default.
    ///
    /// # Errors
    ///
    /// Returns an error if `DATABASE_URL` is unset.
    pub fn from_env() -> Result<Self, ConfigError> {
        let database_url = std::env::var("DATABASE_URL").map_err(|_| ConfigError::MissingDatabaseUrl)?;
        let redis_url = std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://127.0.0.1:6379".to_owned());

        Ok(Self {
            database_url,
            redis_url,
            auto_save_interval: Duration::from_millis(env_parse("AUTO_SAVE_INTERVAL_MS", DEFAULT_AUTO_SAVE_INTERVAL_MS)),
            version_snapshot_every_n_saves: env_parse(
                "VERSION_SNAPSHOT_EVERY_N_SAVES",
                DEFAULT_VERSION_SNAPSHOT_EVERY_N_SAVES,
            ),
            max_versions_per_board: env_parse("MAX_VERSIONS_PER_BOARD", DEFAULT_MAX_VERSIONS_PER_BOARD),
            presence_ttl: Duration::from_secs(env_parse("PRESENCE_TTL_S", DEFAULT_PRESENCE_TTL_S)),
            edit_lock_ttl: Duration::from_secs(env_parse("EDIT_LOCK_TTL_S", DEFAULT_EDIT_LOCK_TTL_S)),
            session_ttl: Duration::from_secs(env_parse("SESSION_TTL_S", DEFAULT_SESSION_TTL_S)),
            max_objects_per_board: env_parse("MAX_OBJECTS_PER_BOARD", DEFAULT_MAX_OBJECTS_PER_BOARD),
            max_batch_size: env_parse("MAX_BATCH_SIZE", DEFAULT_MAX_BATCH_SIZE),
            rate_limit_events_per_s: env_parse("RATE_LIMIT_EVENTS_PER_S", DEFAULT_RATE_LIMIT_EVENTS_PER_S),
            cursor_rate_limit_per_s: env_parse("CURSOR_RATE_LIMIT_PER_S", DEFAULT_CURSOR_RATE_LIMIT_PER_S),
            chat_history_limit: env_parse("CHAT_HISTORY_LIMIT", DEFAULT_CHAT_HISTORY_LIMIT),
            chat_history_ttl: Duration::from_secs(env_parse("CHAT_HISTORY_TTL_S", DEFAULT_CHAT_HISTORY_TTL_S)),
            e2e_test_auth: env_bool("E2E_TEST_AUTH", false),
        })
    }

    /// A config with spec defaults and no real `DATABASE_URL`/`REDIS_URL`,
    /// for unit tests that never touch a live connection.
    #[must_use]
    pub fn for_tests() -> Self {
        Self {
            database_url: String::new(),
            redis_url: String::new(),
            auto_save_interval: Duration::from_millis(DEFAULT_AUTO_SAVE_INTERVAL_MS),
            version_snapshot_every_n_saves: DEFAULT_VERSION_SNAPSHOT_EVERY_N_SAVES,
            max_versions_per_board: DEFAULT_MAX_VERSIONS_PER_BOARD,
            presence_ttl: Duration::from_secs(DEFAULT_PRESENCE_TTL_S),
            edit_lock_ttl: Duration::from_secs(DEFAULT_EDIT_LOCK_TTL_S),
            session_ttl: Duration::from_secs(DEFAULT_SESSION_TTL_S),
            max_objects_per_board: DEFAULT_MAX_OBJECTS_PER_BOARD,
            max_batch_size: DEFAULT_MAX_BATCH_SIZE,
            rate_limit_events_per_s: DEFAULT_RATE_LIMIT_EVENTS_PER_S,
            cursor_rate_limit_per_s: DEFAULT_CURSOR_RATE_LIMIT_PER_S,
            chat_history_limit: DEFAULT_CHAT_HISTORY_LIMIT,
            chat_history_ttl: Duration::from_secs(DEFAULT_CHAT_HISTORY_TTL_S),
            e2e_test_auth: true,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("DATABASE_URL is required")]
    MissingDatabaseUrl,
}

#[cfg(test)]
#[path = "config_test.rs"]
mod tests;
