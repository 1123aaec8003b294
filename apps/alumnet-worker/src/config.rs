//! Worker configuration loaded from environment variables.
//!
//! Loading is fail-fast: a missing `DATABASE_URL` or any malformed numeric
//! value stops the process with a message naming the variable.

use std::env;
use std::str::FromStr;
use std::time::Duration as StdDuration;

use alumnet_invites::InviteSettings;
use chrono::{Duration, Utc};
use thiserror::Error;

/// Configuration errors that can occur during environment loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingVar(String),

    #[error("Invalid value for {var}: {message}")]
    InvalidValue { var: String, message: String },
}

/// Application environment mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppEnvironment {
    Development,
    Production,
}

impl AppEnvironment {
    /// Parse an `APP_ENV` value. Unrecognized values mean `Development`.
    pub fn from_env_str(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "production" | "prod" => Self::Production,
            "development" | "dev" => Self::Development,
            other => {
                tracing::warn!(
                    value = other,
                    "Unrecognized APP_ENV value, defaulting to Development"
                );
                Self::Development
            }
        }
    }

    #[must_use]
    pub fn is_production(&self) -> bool {
        *self == Self::Production
    }
}

impl std::fmt::Display for AppEnvironment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Development => write!(f, "development"),
            Self::Production => write!(f, "production"),
        }
    }
}

/// Worker configuration.
#[derive(Debug, Clone)]
pub struct Config {
    pub app_env: AppEnvironment,
    pub database_url: String,
    pub db_max_connections: u32,
    /// Fallback log filter when `RUST_LOG` is unset.
    pub log_filter: String,
    /// Remote anomaly reviewer endpoint. The local heuristic reviewer is
    /// used when unset.
    pub reviewer_url: Option<String>,
    pub invite: InviteSettings,
}

impl Config {
    /// Load configuration from the process environment.
    ///
    /// # Required Variables
    ///
    /// - `DATABASE_URL` - `PostgreSQL` connection string
    ///
    /// # Optional Variables
    ///
    /// - `APP_ENV` - "development" (default) or "production"
    /// - `LOG_FILTER` - Log filter when `RUST_LOG` is unset (default: "info")
    /// - `DB_MAX_CONNECTIONS` - Pool size (default: 10)
    /// - `INVITE_TTL_DAYS` - Invite lifetime (default: 14)
    /// - `SEND_COOLDOWN_HOURS` - Minimum gap between sends (default: 24)
    /// - `SWEEP_INTERVAL_SECS` - Expiry sweep period (default: 86400)
    /// - `REVIEW_TIMEOUT_MS` - Anomaly review deadline (default: 5000)
    /// - `MAX_CONCURRENT_SENDS` - Bulk send fan-out (default: 8)
    /// - `MAX_UPLOAD_BYTES` - Largest accepted roster file (default: 10 MiB)
    /// - `MAX_UPLOAD_ROWS` - Most data rows per roster (default: 10000)
    /// - `REVIEW_SIMILARITY_THRESHOLD` - Duplicate similarity cut-off in
    ///   `0.0..=1.0` (default: 0.95)
    /// - `REVIEWER_URL` - Remote anomaly reviewer endpoint
    /// - `FRONTEND_BASE_URL` - Base of the accept link in invite mail
    pub fn from_env() -> Result<Self, ConfigError> {
        // Load .env file if present (development only)
        let _ = dotenvy::dotenv();
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build the configuration from an arbitrary variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let app_env =
            AppEnvironment::from_env_str(&get("APP_ENV").unwrap_or_else(|| "development".into()));

        let database_url =
            get("DATABASE_URL").ok_or_else(|| ConfigError::MissingVar("DATABASE_URL".into()))?;

        let log_filter = get("LOG_FILTER").unwrap_or_else(|| "info".to_string());
        let db_max_connections: u32 = parse_var(&get, "DB_MAX_CONNECTIONS", 10)?;

        let defaults = InviteSettings::default();
        let ttl_days: i64 = parse_var(&get, "INVITE_TTL_DAYS", defaults.invite_ttl.num_days())?;
        let cooldown_hours: i64 = parse_var(
            &get,
            "SEND_COOLDOWN_HOURS",
            defaults.send_cooldown.num_hours(),
        )?;
        let sweep_secs: u64 = parse_var(
            &get,
            "SWEEP_INTERVAL_SECS",
            defaults.sweep_interval.as_secs(),
        )?;
        let review_timeout_ms: u64 = parse_var(
            &get,
            "REVIEW_TIMEOUT_MS",
            u64::try_from(defaults.review_timeout.as_millis()).unwrap_or(u64::MAX),
        )?;
        let max_concurrent_sends: usize =
            parse_var(&get, "MAX_CONCURRENT_SENDS", defaults.max_concurrent_sends)?;
        let max_file_size: usize = parse_var(&get, "MAX_UPLOAD_BYTES", defaults.max_file_size)?;
        let max_rows: usize = parse_var(&get, "MAX_UPLOAD_ROWS", defaults.max_rows)?;
        let similarity_threshold: f64 = parse_var(
            &get,
            "REVIEW_SIMILARITY_THRESHOLD",
            defaults.similarity_threshold,
        )?;

        ensure_positive("INVITE_TTL_DAYS", ttl_days)?;
        ensure_positive("SWEEP_INTERVAL_SECS", sweep_secs)?;
        ensure_positive("REVIEW_TIMEOUT_MS", review_timeout_ms)?;
        ensure_positive("MAX_CONCURRENT_SENDS", max_concurrent_sends)?;
        ensure_positive("DB_MAX_CONNECTIONS", db_max_connections)?;
        ensure_positive("MAX_UPLOAD_BYTES", max_file_size)?;
        ensure_positive("MAX_UPLOAD_ROWS", max_rows)?;
        if cooldown_hours < 0 {
            return Err(ConfigError::InvalidValue {
                var: "SEND_COOLDOWN_HOURS".to_string(),
                message: "Must not be negative".to_string(),
            });
        }
        if !(0.0..=1.0).contains(&similarity_threshold) {
            return Err(ConfigError::InvalidValue {
                var: "REVIEW_SIMILARITY_THRESHOLD".to_string(),
                message: "Must be between 0.0 and 1.0".to_string(),
            });
        }

        let invite_ttl = to_offset("INVITE_TTL_DAYS", Duration::try_days(ttl_days))?;
        let send_cooldown = to_offset("SEND_COOLDOWN_HOURS", Duration::try_hours(cooldown_hours))?;

        let reviewer_url = get("REVIEWER_URL");
        if let Some(url) = &reviewer_url {
            validate_http_url("REVIEWER_URL", url)?;
        }

        let accept_base_url = match get("FRONTEND_BASE_URL") {
            Some(url) => {
                validate_http_url("FRONTEND_BASE_URL", &url)?;
                url.trim_end_matches('/').to_string()
            }
            None => defaults.accept_base_url.clone(),
        };
        if app_env.is_production() && accept_base_url.starts_with("http://localhost") {
            return Err(ConfigError::InvalidValue {
                var: "FRONTEND_BASE_URL".to_string(),
                message: "Must be set to a public URL in production".to_string(),
            });
        }

        Ok(Self {
            app_env,
            database_url,
            db_max_connections,
            log_filter,
            reviewer_url,
            invite: InviteSettings {
                invite_ttl,
                send_cooldown,
                review_timeout: StdDuration::from_millis(review_timeout_ms),
                max_concurrent_sends,
                sweep_interval: StdDuration::from_secs(sweep_secs),
                max_file_size,
                max_rows,
                similarity_threshold,
                accept_base_url,
                ..defaults
            },
        })
    }
}

fn parse_var<T, G>(get: &G, var: &str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
    G: Fn(&str) -> Option<String>,
{
    match get(var) {
        Some(raw) => raw.trim().parse().map_err(|e| ConfigError::InvalidValue {
            var: var.to_string(),
            message: format!("{e}"),
        }),
        None => Ok(default),
    }
}

fn ensure_positive<T>(var: &str, value: T) -> Result<(), ConfigError>
where
    T: PartialOrd + Default,
{
    if value > T::default() {
        Ok(())
    } else {
        Err(ConfigError::InvalidValue {
            var: var.to_string(),
            message: "Must be greater than zero".to_string(),
        })
    }
}

/// Accept a duration only if it can be added to the current time.
fn to_offset(var: &str, duration: Option<Duration>) -> Result<Duration, ConfigError> {
    duration
        .filter(|d| Utc::now().checked_add_signed(*d).is_some())
        .ok_or_else(|| ConfigError::InvalidValue {
            var: var.to_string(),
            message: "Out of range".to_string(),
        })
}

fn validate_http_url(var: &str, url: &str) -> Result<(), ConfigError> {
    if url.starts_with("https://") || url.starts_with("http://") {
        Ok(())
    } else {
        Err(ConfigError::InvalidValue {
            var: var.to_string(),
            message: format!("Must be an http(s) URL, got '{url}'"),
        })
    }
}
