//! Outbound mail contract.
//!
//! The engine hands a recipient, subject and template data to a [`Mailer`]
//! and records the returned message id. Rendering and transport live behind
//! the trait.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;
use uuid::Uuid;

/// Transport-assigned message id.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageId(pub String);

impl std::fmt::Display for MessageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Data the template needs to render an invitation.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InviteTemplateData {
    pub invite_id: Uuid,
    pub full_name: String,
    /// Contains the raw token; never log it.
    pub accept_url: String,
    pub expires_at: DateTime<Utc>,
    pub grad_year: Option<i32>,
}

impl std::fmt::Debug for InviteTemplateData {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InviteTemplateData")
            .field("invite_id", &self.invite_id)
            .field("full_name", &self.full_name)
            .field("accept_url", &"[REDACTED]")
            .field("expires_at", &self.expires_at)
            .field("grad_year", &self.grad_year)
            .finish()
    }
}

#[derive(Debug, Clone, Error)]
pub enum MailerError {
    #[error("Mail transport rejected the message: {0}")]
    Rejected(String),

    #[error("Mail transport unavailable: {0}")]
    Unavailable(String),
}

#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send(
        &self,
        to: &str,
        subject: &str,
        data: &InviteTemplateData,
    ) -> Result<MessageId, MailerError>;
}

/// Mailer that only logs. Used when no transport is configured.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogMailer;

#[async_trait]
impl Mailer for LogMailer {
    async fn send(
        &self,
        to: &str,
        subject: &str,
        data: &InviteTemplateData,
    ) -> Result<MessageId, MailerError> {
        let message_id = MessageId(format!("log-{}", Uuid::new_v4()));
        info!(
            to,
            subject,
            invite_id = %data.invite_id,
            message_id = %message_id,
            "Invitation mail logged (no transport configured)"
        );
        Ok(message_id)
    }
}
