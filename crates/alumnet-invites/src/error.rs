//! Error taxonomy for invite operations.
//!
//! Row-level validation problems are not errors here; they are reported as
//! data in [`crate::ValidationResult`]. Everything in [`InviteError`] is fatal
//! to the single operation that raised it.

use alumnet_db::InviteStatus;
use chrono::Duration;
use thiserror::Error;

use crate::parser::ParseError;

/// Result alias for invite operations.
pub type InviteResult<T> = Result<T, InviteError>;

/// Invite engine errors.
#[derive(Debug, Error)]
pub enum InviteError {
    /// The upload could not be parsed. Nothing was persisted.
    #[error(transparent)]
    Parse(#[from] ParseError),

    /// Requested status change is not an edge of the lifecycle graph.
    #[error("Illegal transition from {from} to {to}")]
    IllegalTransition { from: InviteStatus, to: InviteStatus },

    /// A send happened too recently.
    #[error("Cooldown active: retry in {}", format_remaining(.remaining))]
    CooldownActive { remaining: Duration },

    /// Only `invited` rows may be sent.
    #[error("Invite is not sendable in status {status}")]
    NotSendable { status: InviteStatus },

    /// No invite carries this token.
    #[error("Invalid invitation token")]
    InvalidToken,

    /// The token was already redeemed, or the invite left `invited`.
    #[error("Invitation already consumed (status {status})")]
    AlreadyConsumed { status: InviteStatus },

    /// The invite is past its expiry.
    #[error("Invitation expired")]
    Expired,

    #[error("Invite not found")]
    NotFound,

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl InviteError {
    /// Stable snake_case code for callers that render their own messages.
    #[must_use]
    pub fn error_code(&self) -> &'static str {
        match self {
            InviteError::Parse(_) => "parse_error",
            InviteError::IllegalTransition { .. } => "illegal_transition",
            InviteError::CooldownActive { .. } => "cooldown_active",
            InviteError::NotSendable { .. } => "not_sendable",
            InviteError::InvalidToken => "invalid_token",
            InviteError::AlreadyConsumed { .. } => "already_consumed",
            InviteError::Expired => "expired",
            InviteError::NotFound => "not_found",
            InviteError::Database(_) => "database_error",
            InviteError::Internal(_) => "internal_error",
        }
    }

    /// Whether the same call may succeed later without any other change.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, InviteError::CooldownActive { .. })
    }
}

/// Render a remaining duration as `"3h 12m"`, `"45m 10s"` or `"8s"`.
#[must_use]
pub fn format_remaining(remaining: &Duration) -> String {
    let total = remaining.num_seconds().max(0);
    let hours = total / 3600;
    let minutes = (total % 3600) / 60;
    let seconds = total % 60;

    if hours > 0 {
        format!("{hours}h {minutes}m")
    } else if minutes > 0 {
        format!("{minutes}m {seconds}s")
    } else {
        format!("{seconds}s")
    }
}
