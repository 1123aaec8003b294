//! Postgres-backed [`InviteStore`].

use std::sync::Arc;

use alumnet_db::{
    is_deadlock, is_unique_violation, AuditAction, AuditRecord, CreateAuditRecord, DbPool, Invite,
    InviteStatus,
};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use sqlx::Connection;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::{
    accept_rejection, bulk_audit_details, check_transition, create_invite, insertion_order,
    send_rejection, transition_details, BulkCreateOutcome, DisputeResolution, FailedRow, InviteStore,
    NewInviteBatch, SYSTEM_SWEEPER_ACTOR,
};
use crate::clock::{Clock, SystemClock};
use crate::error::{InviteError, InviteResult};
use crate::settings::InviteSettings;
use crate::token::hash_token;

/// Invite store on a Postgres pool.
#[derive(Debug, Clone)]
pub struct PgInviteStore {
    pool: DbPool,
    clock: Arc<dyn Clock>,
    invite_ttl: Duration,
    send_cooldown: Duration,
}

impl PgInviteStore {
    #[must_use]
    pub fn new(pool: DbPool, settings: &InviteSettings) -> Self {
        Self::with_clock(pool, settings, Arc::new(SystemClock))
    }

    #[must_use]
    pub fn with_clock(pool: DbPool, settings: &InviteSettings, clock: Arc<dyn Clock>) -> Self {
        Self {
            pool,
            clock,
            invite_ttl: settings.invite_ttl,
            send_cooldown: settings.send_cooldown,
        }
    }

    #[must_use]
    pub fn pool(&self) -> &DbPool {
        &self.pool
    }

    /// Move `id` to `to` if its current status is in `allowed_from`.
    ///
    /// The row is locked for the duration of the transaction, so the
    /// recorded `from` status is the one actually replaced.
    async fn transition(
        &self,
        id: Uuid,
        allowed_from: &[InviteStatus],
        to: InviteStatus,
        dispute_reason: Option<&str>,
        actor: &str,
        action: AuditAction,
    ) -> InviteResult<Invite> {
        let now = self.clock.now();
        let mut tx = self.pool.inner().begin().await?;

        let current = Invite::find_by_id_for_update(&mut *tx, id)
            .await?
            .ok_or(InviteError::NotFound)?;
        check_transition(current.status, allowed_from, to)?;

        let updated = Invite::transition(&mut *tx, id, &[current.status], to, dispute_reason, now)
            .await?
            .ok_or_else(|| InviteError::Internal(format!("invite {id} changed while locked")))?;

        AuditRecord::insert(
            &mut *tx,
            &CreateAuditRecord::new(actor, action, id, now).with_details(transition_details(
                current.status,
                to,
                dispute_reason,
            )),
        )
        .await?;

        tx.commit().await?;

        info!(
            invite_id = %id,
            from = %current.status,
            to = %to,
            actor,
            "Invite status changed"
        );
        Ok(updated)
    }
}

#[async_trait]
impl InviteStore for PgInviteStore {
    async fn bulk_create(&self, batch: NewInviteBatch) -> InviteResult<BulkCreateOutcome> {
        let now = self.clock.now();
        let mut outcome = BulkCreateOutcome {
            batch_id: batch.batch_id,
            ..BulkCreateOutcome::default()
        };

        let mut tx = self.pool.inner().begin().await?;
        let mut inserted = Vec::new();

        // Each row runs in its own savepoint so a failing row rolls back
        // alone while the batch audit record still commits with the rest.
        for position in insertion_order(&batch.rows) {
            let row = &batch.rows[position];
            let data = create_invite(row, batch.batch_id, &batch.invited_by, now, self.invite_ttl);
            let mut savepoint = Connection::begin(&mut *tx).await?;

            match Invite::insert_if_absent(&mut *savepoint, &data).await {
                Ok(Some(invite)) => {
                    savepoint.commit().await?;
                    inserted.push((position, invite));
                }
                Ok(None) => {
                    savepoint.commit().await?;
                    debug!(row_index = row.row_index, "Live invite exists, skipping row");
                    outcome.skipped.push(row.row_index);
                }
                // A deadlock victim lost the same key to a concurrent batch.
                Err(e) if is_unique_violation(&e) || is_deadlock(&e) => {
                    savepoint.rollback().await?;
                    debug!(
                        row_index = row.row_index,
                        error = %e,
                        "Concurrent insert won, skipping row"
                    );
                    outcome.skipped.push(row.row_index);
                }
                Err(e) => {
                    savepoint.rollback().await?;
                    warn!(row_index = row.row_index, error = %e, "Failed to insert invite row");
                    outcome.failed.push(FailedRow {
                        row_index: row.row_index,
                        error: e.to_string(),
                    });
                }
            }
        }

        inserted.sort_by_key(|(position, _)| *position);
        outcome.inserted = inserted.into_iter().map(|(_, invite)| invite).collect();
        outcome.skipped.sort_unstable();
        outcome.failed.sort_by_key(|f| f.row_index);

        AuditRecord::insert(
            &mut *tx,
            &CreateAuditRecord::new(
                batch.invited_by.as_str(),
                AuditAction::BulkCreate,
                batch.batch_id,
                now,
            )
            .with_details(bulk_audit_details(&batch.details, &outcome, batch.rows.len())),
        )
        .await?;

        tx.commit().await?;

        info!(
            batch_id = %batch.batch_id,
            inserted = outcome.inserted.len(),
            skipped = outcome.skipped.len(),
            failed = outcome.failed.len(),
            "Bulk invite creation completed"
        );
        Ok(outcome)
    }

    async fn find(&self, id: Uuid) -> InviteResult<Invite> {
        Invite::find_by_id(self.pool.inner(), id)
            .await?
            .ok_or(InviteError::NotFound)
    }

    async fn list_sendable(&self, batch_id: Option<Uuid>) -> InviteResult<Vec<Invite>> {
        Ok(Invite::list_invited(self.pool.inner(), batch_id).await?)
    }

    async fn mark_sent(&self, id: Uuid, token_hash: &str, actor: &str) -> InviteResult<Invite> {
        let now = self.clock.now();
        let mut tx = self.pool.inner().begin().await?;

        let Some(invite) =
            Invite::mark_sent(&mut *tx, id, token_hash, now, now - self.send_cooldown).await?
        else {
            tx.rollback().await?;
            let current = Invite::find_by_id(self.pool.inner(), id).await?;
            return Err(send_rejection(current.as_ref(), now, self.send_cooldown));
        };

        AuditRecord::insert(
            &mut *tx,
            &CreateAuditRecord::new(actor, AuditAction::Send, id, now).with_details(
                serde_json::json!({
                    "to": invite.personal_email,
                    "sent_at": now,
                }),
            ),
        )
        .await?;

        tx.commit().await?;
        Ok(invite)
    }

    async fn accept(&self, raw_token: &str) -> InviteResult<Invite> {
        let now = self.clock.now();
        let token_hash = hash_token(raw_token);
        let mut tx = self.pool.inner().begin().await?;

        let Some(invite) = Invite::mark_accepted(&mut *tx, &token_hash, now).await? else {
            tx.rollback().await?;
            let current = Invite::find_by_token_hash(self.pool.inner(), &token_hash).await?;
            return Err(accept_rejection(current.as_ref(), now));
        };

        AuditRecord::insert(
            &mut *tx,
            &CreateAuditRecord::new(
                invite.college_email.as_str(),
                AuditAction::Accept,
                invite.id,
                now,
            )
            .with_details(transition_details(
                InviteStatus::Invited,
                InviteStatus::Accepted,
                None,
            )),
        )
        .await?;

        tx.commit().await?;

        info!(invite_id = %invite.id, "Invite accepted");
        Ok(invite)
    }

    async fn cancel(&self, id: Uuid, actor: &str) -> InviteResult<Invite> {
        self.transition(
            id,
            &[InviteStatus::Invited, InviteStatus::Disputed],
            InviteStatus::Cancelled,
            None,
            actor,
            AuditAction::Cancel,
        )
        .await
    }

    async fn dispute(&self, id: Uuid, actor: &str, reason: &str) -> InviteResult<Invite> {
        self.transition(
            id,
            &[InviteStatus::Invited],
            InviteStatus::Disputed,
            Some(reason),
            actor,
            AuditAction::Dispute,
        )
        .await
    }

    async fn resolve_dispute(
        &self,
        id: Uuid,
        actor: &str,
        resolution: DisputeResolution,
    ) -> InviteResult<Invite> {
        self.transition(
            id,
            &[InviteStatus::Disputed],
            resolution.target_status(),
            None,
            actor,
            AuditAction::ResolveDispute,
        )
        .await
    }

    async fn expire_stale(&self, now: DateTime<Utc>, ttl: Duration) -> InviteResult<Vec<Uuid>> {
        let mut tx = self.pool.inner().begin().await?;

        let expired = Invite::expire_created_before(&mut *tx, now - ttl, now).await?;
        for invite in &expired {
            AuditRecord::insert(
                &mut *tx,
                &CreateAuditRecord::new(SYSTEM_SWEEPER_ACTOR, AuditAction::Expire, invite.id, now)
                    .with_details(transition_details(
                        InviteStatus::Invited,
                        InviteStatus::Expired,
                        None,
                    )),
            )
            .await?;
        }

        tx.commit().await?;

        if !expired.is_empty() {
            info!(count = expired.len(), "Expired stale invites");
        }
        Ok(expired.into_iter().map(|i| i.id).collect())
    }

    async fn audit_trail(&self, target_id: Uuid) -> InviteResult<Vec<AuditRecord>> {
        Ok(AuditRecord::list_for_target(self.pool.inner(), target_id).await?)
    }
}
