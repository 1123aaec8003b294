//! Worker error type.

use alumnet_db::DbError;
use alumnet_invites::{InviteError, ParseError, ReviewerError};
use thiserror::Error;

use crate::config::ConfigError;

pub type WorkerResult<T> = Result<T, WorkerError>;

#[derive(Debug, Error)]
pub enum WorkerError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Database(#[from] DbError),

    #[error(transparent)]
    Invite(#[from] InviteError),

    #[error("Failed to read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Reviewer setup failed: {0}")]
    Reviewer(#[from] ReviewerError),

    #[error("Output encoding failed: {0}")]
    Output(#[from] serde_json::Error),
}

impl From<ParseError> for WorkerError {
    fn from(err: ParseError) -> Self {
        Self::Invite(InviteError::Parse(err))
    }
}

impl WorkerError {
    /// Process exit code.
    #[must_use]
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Config(_) => 78,
            Self::Io { .. } => 66,
            Self::Invite(InviteError::Parse(_)) => 65,
            _ => 1,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_codes() {
        assert_eq!(
            WorkerError::from(ConfigError::MissingVar("DATABASE_URL".into())).exit_code(),
            78
        );
        assert_eq!(WorkerError::from(ParseError::Empty).exit_code(), 65);
        assert_eq!(WorkerError::from(InviteError::NotFound).exit_code(), 1);
    }
}
