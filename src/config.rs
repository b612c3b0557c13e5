use serde::Deserialize;
use std::{fs, path::Path, time::Duration};

use crate::errors::ConfigError;
use crate::services::keygen::generated_id_lengths;

/// Length of the fixed read-only prefix (`"readonly-"`).
pub const READONLY_PREFIX_LEN: usize = 9;

/// Minimum number of random bytes behind any generated identifier.
pub const MIN_RANDOM_BYTES: usize = 8;

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct AppConfig {
    /// HTTP port to listen on.
    pub port: u16,

    /// Log level for tracing (e.g. "info", "debug").
    pub log_level: String,

    /// Path to the SQLite database file.
    pub database_path: String,

    pub server_version: String,

    /// Bounds for caller-supplied key names and for generated ids.
    pub min_key_length: usize,
    pub max_key_length: usize,

    /// Ignore caller-supplied names and always generate random keys.
    pub force_random_key: bool,

    /// Maximum value length (UTF-16 code units) accepted by PATCH /key.
    pub max_value_length: usize,

    /// Retention window, as an interval string ("30 days", "12 hours", "3600").
    ///
    /// Keys whose last access is older than this are removed:
    /// - once at startup
    /// - on an incoming request, at most once per `sweep_interval_seconds`
    ///
    /// If `None`, keys never expire.
    pub delete_data_after_time: Option<String>,

    /// Minimum time (seconds) between two request-triggered sweeps.
    pub sweep_interval_seconds: u64,

    /// Requests per second accepted from one client IP. `0` disables the limit.
    pub max_requests_per_sec: u32,

    /// Keys one client IP may create per `key_creation_ratelimit_time_window`.
    /// `0` disables the limit.
    pub key_creation_ratelimit_max_requests: u32,
    pub key_creation_ratelimit_time_window: String,

    /// Comma separated list of allowed CORS origins. `None` disables CORS.
    pub cors_origins: Option<String>,

    /// Drop the keys table at startup before recreating it.
    pub dangerous_delete_table: bool,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            port: 3000,
            log_level: "info".to_string(),
            database_path: "pairkv.sqlite3".to_string(),
            server_version: env!("CARGO_PKG_VERSION").to_string(),
            min_key_length: 3,
            max_key_length: 64,
            force_random_key: false,
            max_value_length: 65536,
            delete_data_after_time: None,
            sweep_interval_seconds: 3600,
            max_requests_per_sec: 5,
            key_creation_ratelimit_max_requests: 1,
            key_creation_ratelimit_time_window: "1 minute".to_string(),
            cors_origins: None,
            dangerous_delete_table: false,
        }
    }
}

impl AppConfig {
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let file = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;

        Ok(serde_json::from_str::<AppConfig>(&file)?)
    }

    /// Full startup load: optional `config.json`, then environment overrides,
    /// then validation.
    pub fn load(config_path: Option<&Path>) -> Result<Self, ConfigError> {
        let cfg = match config_path {
            Some(path) => Self::load_from_file(path)?,
            None => Self::default(),
        };

        let cfg = cfg.with_overrides(|var| std::env::var(var).ok())?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Apply overrides from a variable lookup (the process environment in
    /// production).
    pub fn with_overrides<F>(mut self, lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup("PORT") {
            self.port = parse_env("PORT", v)?;
        }
        if let Some(v) = lookup("LOG_LEVEL") {
            self.log_level = v;
        }
        if let Some(v) = lookup("DATABASE_PATH") {
            self.database_path = v;
        }
        if let Some(v) = lookup("MIN_KEY_LENGTH") {
            self.min_key_length = parse_env("MIN_KEY_LENGTH", v)?;
        }
        if let Some(v) = lookup("MAX_KEY_LENGTH") {
            self.max_key_length = parse_env("MAX_KEY_LENGTH", v)?;
        }
        if let Some(v) = lookup("FORCE_RANDOM_KEY") {
            self.force_random_key = parse_flag(&v);
        }
        if let Some(v) = lookup("MAX_VALUE_LENGTH") {
            self.max_value_length = parse_env("MAX_VALUE_LENGTH", v)?;
        }
        if let Some(v) = lookup("DELETE_DATA_AFTER_TIME") {
            self.delete_data_after_time = Some(v).filter(|s| !s.trim().is_empty());
        }
        if let Some(v) = lookup("SWEEP_INTERVAL_SECONDS") {
            self.sweep_interval_seconds = parse_env("SWEEP_INTERVAL_SECONDS", v)?;
        }
        if let Some(v) = lookup("MAX_REQUESTS_PER_SEC") {
            self.max_requests_per_sec = parse_env("MAX_REQUESTS_PER_SEC", v)?;
        }
        if let Some(v) = lookup("KEY_CREATION_RATELIMIT_MAX_REQUESTS") {
            self.key_creation_ratelimit_max_requests =
                parse_env("KEY_CREATION_RATELIMIT_MAX_REQUESTS", v)?;
        }
        if let Some(v) = lookup("KEY_CREATION_RATELIMIT_TIME_WINDOW") {
            self.key_creation_ratelimit_time_window = v;
        }
        if let Some(v) = lookup("CORS_ORIGINS") {
            self.cors_origins = Some(v).filter(|s| !s.trim().is_empty());
        }
        if let Some(v) = lookup("DANGEROUS_DELETE_TABLE") {
            self.dangerous_delete_table = parse_flag(&v);
        }
        Ok(self)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.min_key_length > self.max_key_length {
            return Err(ConfigError::Invalid(format!(
                "MIN_KEY_LENGTH ({}) exceeds MAX_KEY_LENGTH ({})",
                self.min_key_length, self.max_key_length
            )));
        }

        let smallest = READONLY_PREFIX_LEN + 2 * MIN_RANDOM_BYTES;
        if self.max_key_length < smallest {
            return Err(ConfigError::Invalid(format!(
                "MAX_KEY_LENGTH must be at least {smallest} to fit a read-only key"
            )));
        }

        let (rw_len, ro_len) = generated_id_lengths(self.max_key_length);
        if rw_len.min(ro_len) < self.min_key_length {
            return Err(ConfigError::Invalid(format!(
                "MIN_KEY_LENGTH ({}) is above the length of generated keys ({} / {}); \
                 lower it or change MAX_KEY_LENGTH",
                self.min_key_length, rw_len, ro_len
            )));
        }

        if self.sweep_interval_seconds == 0 {
            return Err(ConfigError::Invalid(
                "SWEEP_INTERVAL_SECONDS must be positive".to_string(),
            ));
        }

        if self.key_creation_ratelimit_max_requests > 0 && self.key_creation_window()?.is_zero() {
            return Err(ConfigError::Invalid(
                "KEY_CREATION_RATELIMIT_TIME_WINDOW must be positive".to_string(),
            ));
        }

        self.retention_window()?;
        Ok(())
    }

    pub fn key_creation_window(&self) -> Result<Duration, ConfigError> {
        parse_interval(&self.key_creation_ratelimit_time_window)
    }

    /// Parsed retention window; `None` disables eviction.
    pub fn retention_window(&self) -> Result<Option<Duration>, ConfigError> {
        self.delete_data_after_time
            .as_deref()
            .map(parse_interval)
            .transpose()
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_seconds)
    }
}

fn parse_env<T: std::str::FromStr>(var: &'static str, value: String) -> Result<T, ConfigError> {
    value
        .trim()
        .parse()
        .map_err(|_| ConfigError::Env { var, value })
}

fn parse_flag(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

/// Parse an interval such as `"30 days"`, `"1 hour 30 minutes"`, `"2h"` or a
/// bare number of seconds.
pub fn parse_interval(input: &str) -> Result<Duration, ConfigError> {
    let err = || ConfigError::Interval(input.to_string());

    let trimmed = input.trim();
    if let Ok(secs) = trimmed.parse::<u64>() {
        return Ok(Duration::from_secs(secs));
    }

    // Split "2h" into "2" "h" as well as "2 hours" into "2" "hours".
    let mut tokens: Vec<String> = Vec::new();
    for word in trimmed.split_whitespace() {
        let split = word.find(|c: char| !c.is_ascii_digit()).unwrap_or(word.len());
        let (num, unit) = word.split_at(split);
        if !num.is_empty() {
            tokens.push(num.to_string());
        }
        if !unit.is_empty() {
            tokens.push(unit.to_ascii_lowercase());
        }
    }

    if tokens.is_empty() || tokens.len() % 2 != 0 {
        return Err(err());
    }

    let mut total: u64 = 0;
    for pair in tokens.chunks(2) {
        let amount: u64 = pair[0].parse().map_err(|_| err())?;
        let unit = match pair[1].as_str() {
            "s" | "sec" | "secs" | "second" | "seconds" => 1,
            "m" | "min" | "mins" | "minute" | "minutes" => 60,
            "h" | "hr" | "hrs" | "hour" | "hours" => 60 * 60,
            "d" | "day" | "days" => 24 * 60 * 60,
            "w" | "week" | "weeks" => 7 * 24 * 60 * 60,
            _ => return Err(err()),
        };
        total = amount
            .checked_mul(unit)
            .and_then(|s| total.checked_add(s))
            .ok_or_else(err)?;
    }

    Ok(Duration::from_secs(total))
}
