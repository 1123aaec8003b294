//! Invite persistence and lifecycle authority.
//!
//! An [`InviteStore`] is the only writer of invites and audit records. Every
//! status-changing call writes exactly one audit record in the same atomic
//! unit as the change itself.
//!
//! Two backends ship with the crate:
//! - [`PgInviteStore`]: Postgres, using the partial unique index and
//!   conditional updates for atomicity.
//! - [`MemoryInviteStore`]: a single-lock in-process store for tests and
//!   dry runs.

mod memory;
mod postgres;

pub use memory::MemoryInviteStore;
pub use postgres::PgInviteStore;

use alumnet_db::{AuditRecord, CreateInvite, Invite, InviteStatus};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{InviteError, InviteResult};
use crate::validation::ValidatedRow;

/// Actor recorded for sweeper-driven expiry.
pub const SYSTEM_SWEEPER_ACTOR: &str = "system:expiry-sweeper";

/// Accepted rows from one upload, ready to persist.
#[derive(Debug, Clone)]
pub struct NewInviteBatch {
    pub batch_id: Uuid,
    pub invited_by: String,
    pub rows: Vec<ValidatedRow>,
    /// Extra context for the batch audit record (warnings, decisions,
    /// invalid rows). Counts are added by the store.
    pub details: serde_json::Value,
}

impl NewInviteBatch {
    pub fn new(invited_by: impl Into<String>, rows: Vec<ValidatedRow>) -> Self {
        Self {
            batch_id: Uuid::new_v4(),
            invited_by: invited_by.into(),
            rows,
            details: serde_json::json!({}),
        }
    }
}

/// A row that could not be inserted for a reason other than a duplicate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailedRow {
    pub row_index: u32,
    pub error: String,
}

/// Result of [`InviteStore::bulk_create`].
#[derive(Debug, Clone, Default)]
pub struct BulkCreateOutcome {
    pub batch_id: Uuid,
    pub inserted: Vec<Invite>,
    /// Rows whose `(college_email, college_domain)` already had a live invite.
    pub skipped: Vec<u32>,
    pub failed: Vec<FailedRow>,
}

impl BulkCreateOutcome {
    #[must_use]
    pub fn inserted_count(&self) -> usize {
        self.inserted.len()
    }
}

/// Where a disputed invite goes next.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DisputeResolution {
    Reinstate,
    Cancel,
}

impl DisputeResolution {
    #[must_use]
    pub fn target_status(self) -> InviteStatus {
        match self {
            DisputeResolution::Reinstate => InviteStatus::Invited,
            DisputeResolution::Cancel => InviteStatus::Cancelled,
        }
    }
}

/// Persistence and lifecycle operations for invites.
#[async_trait]
pub trait InviteStore: Send + Sync {
    /// Insert every row whose key has no live invite. Conflicts are skipped,
    /// other per-row failures are collected; neither aborts the batch. One
    /// `bulk_create` audit record summarizes the batch.
    async fn bulk_create(&self, batch: NewInviteBatch) -> InviteResult<BulkCreateOutcome>;

    async fn find(&self, id: Uuid) -> InviteResult<Invite>;

    /// `invited` invites, optionally limited to one upload batch, oldest first.
    async fn list_sendable(&self, batch_id: Option<Uuid>) -> InviteResult<Vec<Invite>>;

    /// Store a new token digest and bump `last_sent_at`.
    ///
    /// Re-checks status and cooldown atomically with the write; fails with
    /// `NotSendable` or `CooldownActive` without side effects.
    async fn mark_sent(&self, id: Uuid, token_hash: &str, actor: &str) -> InviteResult<Invite>;

    /// Redeem a raw token. The only path to `accepted`.
    async fn accept(&self, raw_token: &str) -> InviteResult<Invite>;

    /// Legal from `invited` or `disputed`.
    async fn cancel(&self, id: Uuid, actor: &str) -> InviteResult<Invite>;

    /// Legal from `invited` only.
    async fn dispute(&self, id: Uuid, actor: &str, reason: &str) -> InviteResult<Invite>;

    /// Legal from `disputed` only.
    async fn resolve_dispute(
        &self,
        id: Uuid,
        actor: &str,
        resolution: DisputeResolution,
    ) -> InviteResult<Invite>;

    /// Expire every `invited` row with `created_at + ttl < now`.
    ///
    /// Safe to run concurrently with itself: a row is returned by at most
    /// one call.
    async fn expire_stale(&self, now: DateTime<Utc>, ttl: Duration) -> InviteResult<Vec<Uuid>>;

    /// Audit records for an invite or batch, oldest first.
    async fn audit_trail(&self, target_id: Uuid) -> InviteResult<Vec<AuditRecord>>;
}

/// Batch positions ordered by `(college_email, college_domain)`.
///
/// Concurrent batches that take row locks in the same order cannot deadlock
/// on each other.
pub(crate) fn insertion_order(rows: &[ValidatedRow]) -> Vec<usize> {
    let mut order: Vec<usize> = (0..rows.len()).collect();
    order.sort_by(|&a, &b| {
        (&rows[a].college_email, &rows[a].college_domain)
            .cmp(&(&rows[b].college_email, &rows[b].college_domain))
    });
    order
}

pub(crate) fn create_invite(
    row: &ValidatedRow,
    batch_id: Uuid,
    invited_by: &str,
    now: DateTime<Utc>,
    ttl: Duration,
) -> CreateInvite {
    CreateInvite {
        batch_id: Some(batch_id),
        college_email: row.college_email.clone(),
        personal_email: row.personal_email.clone(),
        full_name: row.full_name.clone(),
        grad_year: row.grad_year,
        degree: row.degree.clone(),
        major: row.major.clone(),
        college_domain: row.college_domain.clone(),
        invited_by: invited_by.to_string(),
        created_at: now,
        expires_at: now + ttl,
    }
}

/// Time left before `invite` may be sent again, if any.
pub(crate) fn cooldown_remaining(
    invite: &Invite,
    now: DateTime<Utc>,
    cooldown: Duration,
) -> Option<Duration> {
    let ready_at = invite.last_sent_at? + cooldown;
    (now < ready_at).then(|| ready_at - now)
}

/// Explain why a conditional send update matched nothing.
pub(crate) fn send_rejection(
    invite: Option<&Invite>,
    now: DateTime<Utc>,
    cooldown: Duration,
) -> InviteError {
    match invite {
        None => InviteError::NotFound,
        Some(invite) if invite.status != InviteStatus::Invited => InviteError::NotSendable {
            status: invite.status,
        },
        Some(invite) if now > invite.expires_at => InviteError::Expired,
        Some(invite) => InviteError::CooldownActive {
            remaining: cooldown_remaining(invite, now, cooldown).unwrap_or_else(Duration::zero),
        },
    }
}

/// Explain why a token could not be redeemed.
///
/// An invite the sweeper already expired reports `Expired`, not
/// `AlreadyConsumed`.
pub(crate) fn accept_rejection(invite: Option<&Invite>, now: DateTime<Utc>) -> InviteError {
    match invite {
        None => InviteError::InvalidToken,
        Some(invite) if invite.status == InviteStatus::Expired => InviteError::Expired,
        Some(invite) if invite.status != InviteStatus::Invited => InviteError::AlreadyConsumed {
            status: invite.status,
        },
        Some(invite) if now > invite.expires_at => InviteError::Expired,
        Some(_) => InviteError::Internal("token redemption raced with another update".to_string()),
    }
}

/// Check `current -> to` against both the lifecycle graph and the
/// operation's allowed sources.
pub(crate) fn check_transition(
    current: InviteStatus,
    allowed_from: &[InviteStatus],
    to: InviteStatus,
) -> InviteResult<()> {
    if allowed_from.contains(&current) && current.can_transition_to(to) {
        Ok(())
    } else {
        Err(InviteError::IllegalTransition { from: current, to })
    }
}

pub(crate) fn transition_details(
    from: InviteStatus,
    to: InviteStatus,
    reason: Option<&str>,
) -> serde_json::Value {
    let mut details = serde_json::json!({
        "from": from.as_str(),
        "to": to.as_str(),
    });
    if let Some(reason) = reason {
        details["reason"] = serde_json::Value::String(reason.to_string());
    }
    details
}

pub(crate) fn bulk_audit_details(
    batch_details: &serde_json::Value,
    outcome: &BulkCreateOutcome,
    total_rows: usize,
) -> serde_json::Value {
    let mut details = match batch_details {
        serde_json::Value::Object(map) => serde_json::Value::Object(map.clone()),
        serde_json::Value::Null => serde_json::json!({}),
        other => serde_json::json!({ "context": other }),
    };
    details["rows"] = serde_json::json!(total_rows);
    details["inserted"] = serde_json::json!(outcome.inserted.len());
    details["skipped"] = serde_json::json!(outcome.skipped);
    details["failed"] = serde_json::json!(outcome.failed);
    details
}
