//! Engine tunables.

use std::time::Duration as StdDuration;

use chrono::{Datelike, Duration, Utc};

use crate::parser::{ParseLimits, DEFAULT_MAX_FILE_SIZE, DEFAULT_MAX_ROWS};
use crate::review::DEFAULT_SIMILARITY_THRESHOLD;

/// Default invite lifetime before the sweeper expires it.
pub const DEFAULT_INVITE_TTL_DAYS: i64 = 14;

/// Minimum wait between two sends of the same invite.
pub const DEFAULT_SEND_COOLDOWN_HOURS: i64 = 24;

/// Upper bound on one anomaly review call.
pub const DEFAULT_REVIEW_TIMEOUT_MS: u64 = 5_000;

/// Concurrent mailer calls during `send_all`.
pub const DEFAULT_MAX_CONCURRENT_SENDS: usize = 8;

/// Sweeper cadence (daily).
pub const DEFAULT_SWEEP_INTERVAL_SECS: u64 = 86_400;

/// Earliest accepted graduation year.
pub const DEFAULT_MIN_GRAD_YEAR: i32 = 1950;

/// How many years past the current one a graduation year may be.
pub const DEFAULT_GRAD_YEARS_AHEAD: i32 = 8;

/// Engine-wide settings shared by the store, dispatcher and sweeper.
#[derive(Debug, Clone)]
pub struct InviteSettings {
    pub invite_ttl: Duration,
    pub send_cooldown: Duration,
    pub review_timeout: StdDuration,
    pub max_concurrent_sends: usize,
    pub sweep_interval: StdDuration,
    /// Largest accepted upload, in bytes.
    pub max_file_size: usize,
    /// Most data rows accepted in one upload.
    pub max_rows: usize,
    /// Name/email similarity at which the heuristic reviewer flags a
    /// probable duplicate.
    pub similarity_threshold: f64,
    /// Base of the link mailed to alumni; the raw token is appended.
    pub accept_base_url: String,
    pub mail_subject: String,
    pub min_grad_year: i32,
    pub max_grad_year: i32,
}

impl Default for InviteSettings {
    fn default() -> Self {
        Self {
            invite_ttl: Duration::days(DEFAULT_INVITE_TTL_DAYS),
            send_cooldown: Duration::hours(DEFAULT_SEND_COOLDOWN_HOURS),
            review_timeout: StdDuration::from_millis(DEFAULT_REVIEW_TIMEOUT_MS),
            max_concurrent_sends: DEFAULT_MAX_CONCURRENT_SENDS,
            sweep_interval: StdDuration::from_secs(DEFAULT_SWEEP_INTERVAL_SECS),
            max_file_size: DEFAULT_MAX_FILE_SIZE,
            max_rows: DEFAULT_MAX_ROWS,
            similarity_threshold: DEFAULT_SIMILARITY_THRESHOLD,
            accept_base_url: "http://localhost:3000".to_string(),
            mail_subject: "You're invited to the alumni network".to_string(),
            min_grad_year: DEFAULT_MIN_GRAD_YEAR,
            max_grad_year: Utc::now().year() + DEFAULT_GRAD_YEARS_AHEAD,
        }
    }
}

impl InviteSettings {
    #[must_use]
    pub fn parse_limits(&self) -> ParseLimits {
        ParseLimits {
            max_file_size: self.max_file_size,
            max_rows: self.max_rows,
        }
    }

    /// Accept link for a raw token.
    #[must_use]
    pub fn accept_url(&self, raw_token: &str) -> String {
        format!(
            "{}/invite/accept?token={}",
            self.accept_base_url.trim_end_matches('/'),
            raw_token
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let settings = InviteSettings::default();
        assert_eq!(settings.invite_ttl, Duration::days(14));
        assert_eq!(settings.send_cooldown, Duration::hours(24));
        assert_eq!(settings.min_grad_year, 1950);
        assert_eq!(settings.max_grad_year, Utc::now().year() + 8);
        assert_eq!(settings.parse_limits(), ParseLimits::default());
    }

    #[test]
    fn test_accept_url_trims_trailing_slash() {
        let settings = InviteSettings {
            accept_base_url: "https://alumni.example.edu/".to_string(),
            ..InviteSettings::default()
        };
        assert_eq!(
            settings.accept_url("abc"),
            "https://alumni.example.edu/invite/accept?token=abc"
        );
    }
}
