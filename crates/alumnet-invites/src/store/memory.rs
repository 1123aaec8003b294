//! In-process [`InviteStore`].
//!
//! All state sits behind one mutex, so every operation is a single atomic
//! unit. Uniqueness is enforced by an index keyed like the Postgres partial
//! unique index.

use std::collections::HashMap;
use std::sync::Arc;

use alumnet_db::{AuditAction, AuditRecord, CreateAuditRecord, CreateInvite, Invite, InviteStatus};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use tracing::{debug, info};
use uuid::Uuid;

use super::{
    accept_rejection, bulk_audit_details, check_transition, cooldown_remaining, create_invite,
    send_rejection, transition_details, BulkCreateOutcome, DisputeResolution, InviteStore,
    NewInviteBatch, SYSTEM_SWEEPER_ACTOR,
};
use crate::clock::{Clock, SystemClock};
use crate::error::{InviteError, InviteResult};
use crate::settings::InviteSettings;
use crate::token::hash_token;

type LiveKey = (String, String);

#[derive(Debug, Default)]
struct State {
    invites: HashMap<Uuid, Invite>,
    /// `(college_email, college_domain)` of every non-cancelled invite.
    live_keys: HashMap<LiveKey, Uuid>,
    tokens: HashMap<String, Uuid>,
    audit: Vec<AuditRecord>,
    next_seq: i64,
}

impl State {
    fn append_audit(&mut self, data: CreateAuditRecord) -> AuditRecord {
        self.next_seq += 1;
        let record = AuditRecord {
            id: Uuid::new_v4(),
            seq: self.next_seq,
            actor: data.actor,
            action: data.action,
            target_id: data.target_id,
            details: data.details,
            at: data.at,
        };
        self.audit.push(record.clone());
        record
    }

    fn insert_if_absent(&mut self, data: CreateInvite) -> Option<Invite> {
        let key = (data.college_email.clone(), data.college_domain.clone());
        if self.live_keys.contains_key(&key) {
            return None;
        }

        let invite = Invite {
            id: Uuid::new_v4(),
            batch_id: data.batch_id,
            college_email: data.college_email,
            personal_email: data.personal_email,
            full_name: data.full_name,
            grad_year: data.grad_year,
            degree: data.degree,
            major: data.major,
            college_domain: data.college_domain,
            token: None,
            status: InviteStatus::Invited,
            invited_by: data.invited_by,
            dispute_reason: None,
            created_at: data.created_at,
            updated_at: data.created_at,
            last_sent_at: None,
            accepted_at: None,
            expires_at: data.expires_at,
        };
        self.live_keys.insert(key, invite.id);
        self.invites.insert(invite.id, invite.clone());
        Some(invite)
    }

    fn set_status(&mut self, id: Uuid, to: InviteStatus, now: DateTime<Utc>) -> Option<&mut Invite> {
        let invite = self.invites.get_mut(&id)?;
        invite.status = to;
        invite.updated_at = now;
        if to == InviteStatus::Cancelled {
            self.live_keys
                .remove(&(invite.college_email.clone(), invite.college_domain.clone()));
        }
        Some(invite)
    }
}

/// Invite store held in memory.
#[derive(Debug, Clone)]
pub struct MemoryInviteStore {
    state: Arc<Mutex<State>>,
    clock: Arc<dyn Clock>,
    invite_ttl: Duration,
    send_cooldown: Duration,
}

impl Default for MemoryInviteStore {
    fn default() -> Self {
        Self::new(&InviteSettings::default())
    }
}

impl MemoryInviteStore {
    #[must_use]
    pub fn new(settings: &InviteSettings) -> Self {
        Self::with_clock(settings, Arc::new(SystemClock))
    }

    #[must_use]
    pub fn with_clock(settings: &InviteSettings, clock: Arc<dyn Clock>) -> Self {
        Self {
            state: Arc::new(Mutex::new(State::default())),
            clock,
            invite_ttl: settings.invite_ttl,
            send_cooldown: settings.send_cooldown,
        }
    }

    /// Number of stored invites, optionally by status.
    #[must_use]
    pub fn count(&self, status: Option<InviteStatus>) -> usize {
        self.state
            .lock()
            .invites
            .values()
            .filter(|i| status.map_or(true, |s| i.status == s))
            .count()
    }

    /// Every audit record, in insertion order.
    #[must_use]
    pub fn audit_log(&self) -> Vec<AuditRecord> {
        self.state.lock().audit.clone()
    }

    fn transition(
        &self,
        id: Uuid,
        allowed_from: &[InviteStatus],
        to: InviteStatus,
        dispute_reason: Option<&str>,
        actor: &str,
        action: AuditAction,
    ) -> InviteResult<Invite> {
        let now = self.clock.now();
        let mut state = self.state.lock();

        let from = state
            .invites
            .get(&id)
            .map(|i| i.status)
            .ok_or(InviteError::NotFound)?;
        check_transition(from, allowed_from, to)?;

        let updated = {
            let invite = state
                .set_status(id, to, now)
                .ok_or(InviteError::NotFound)?;
            invite.dispute_reason = dispute_reason.map(str::to_string);
            invite.clone()
        };

        state.append_audit(
            CreateAuditRecord::new(actor, action, id, now)
                .with_details(transition_details(from, to, dispute_reason)),
        );

        info!(invite_id = %id, from = %from, to = %to, actor, "Invite status changed");
        Ok(updated)
    }
}

#[async_trait]
impl InviteStore for MemoryInviteStore {
    async fn bulk_create(&self, batch: NewInviteBatch) -> InviteResult<BulkCreateOutcome> {
        let now = self.clock.now();
        let mut outcome = BulkCreateOutcome {
            batch_id: batch.batch_id,
            ..BulkCreateOutcome::default()
        };

        let mut state = self.state.lock();
        for row in &batch.rows {
            let data = create_invite(row, batch.batch_id, &batch.invited_by, now, self.invite_ttl);
            match state.insert_if_absent(data) {
                Some(invite) => outcome.inserted.push(invite),
                None => {
                    debug!(row_index = row.row_index, "Live invite exists, skipping row");
                    outcome.skipped.push(row.row_index);
                }
            }
        }

        state.append_audit(
            CreateAuditRecord::new(
                batch.invited_by.as_str(),
                AuditAction::BulkCreate,
                batch.batch_id,
                now,
            )
            .with_details(bulk_audit_details(&batch.details, &outcome, batch.rows.len())),
        );

        info!(
            batch_id = %batch.batch_id,
            inserted = outcome.inserted.len(),
            skipped = outcome.skipped.len(),
            "Bulk invite creation completed"
        );
        Ok(outcome)
    }

    async fn find(&self, id: Uuid) -> InviteResult<Invite> {
        self.state
            .lock()
            .invites
            .get(&id)
            .cloned()
            .ok_or(InviteError::NotFound)
    }

    async fn list_sendable(&self, batch_id: Option<Uuid>) -> InviteResult<Vec<Invite>> {
        let state = self.state.lock();
        let mut invites: Vec<Invite> = state
            .invites
            .values()
            .filter(|i| i.status == InviteStatus::Invited)
            .filter(|i| batch_id.map_or(true, |b| i.batch_id == Some(b)))
            .cloned()
            .collect();
        invites.sort_by(|a, b| (a.created_at, a.id).cmp(&(b.created_at, b.id)));
        Ok(invites)
    }

    async fn mark_sent(&self, id: Uuid, token_hash: &str, actor: &str) -> InviteResult<Invite> {
        let now = self.clock.now();
        let mut state = self.state.lock();

        let sendable = state.invites.get(&id).is_some_and(|i| {
            i.status == InviteStatus::Invited
                && now <= i.expires_at
                && cooldown_remaining(i, now, self.send_cooldown).is_none()
        });
        if !sendable {
            return Err(send_rejection(state.invites.get(&id), now, self.send_cooldown));
        }

        let previous_token = state.invites.get(&id).and_then(|i| i.token.clone());
        if let Some(previous) = previous_token {
            state.tokens.remove(&previous);
        }
        state.tokens.insert(token_hash.to_string(), id);

        let updated = {
            let invite = state.invites.get_mut(&id).ok_or(InviteError::NotFound)?;
            invite.token = Some(token_hash.to_string());
            invite.last_sent_at = Some(now);
            invite.updated_at = now;
            invite.clone()
        };

        state.append_audit(
            CreateAuditRecord::new(actor, AuditAction::Send, id, now).with_details(
                serde_json::json!({
                    "to": updated.personal_email,
                    "sent_at": now,
                }),
            ),
        );
        Ok(updated)
    }

    async fn accept(&self, raw_token: &str) -> InviteResult<Invite> {
        let now = self.clock.now();
        let token_hash = hash_token(raw_token);
        let mut state = self.state.lock();

        let current = state
            .tokens
            .get(&token_hash)
            .and_then(|id| state.invites.get(id));
        let redeemable = current
            .is_some_and(|i| i.status == InviteStatus::Invited && now <= i.expires_at);
        if !redeemable {
            return Err(accept_rejection(current, now));
        }

        let id = state
            .tokens
            .get(&token_hash)
            .copied()
            .ok_or(InviteError::InvalidToken)?;
        let updated = {
            let invite = state
                .set_status(id, InviteStatus::Accepted, now)
                .ok_or(InviteError::InvalidToken)?;
            invite.accepted_at = Some(now);
            invite.clone()
        };

        state.append_audit(
            CreateAuditRecord::new(
                updated.college_email.as_str(),
                AuditAction::Accept,
                id,
                now,
            )
            .with_details(transition_details(
                InviteStatus::Invited,
                InviteStatus::Accepted,
                None,
            )),
        );

        info!(invite_id = %id, "Invite accepted");
        Ok(updated)
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
    }

    async fn expire_stale(&self, now: DateTime<Utc>, ttl: Duration) -> InviteResult<Vec<Uuid>> {
        let cutoff = now - ttl;
        let mut state = self.state.lock();

        let mut stale: Vec<(DateTime<Utc>, Uuid)> = state
            .invites
            .values()
            .filter(|i| i.status == InviteStatus::Invited && i.created_at < cutoff)
            .map(|i| (i.created_at, i.id))
            .collect();
        stale.sort();

        let mut expired = Vec::with_capacity(stale.len());
        for (_, id) in stale {
            if state.set_status(id, InviteStatus::Expired, now).is_some() {
                state.append_audit(
                    CreateAuditRecord::new(SYSTEM_SWEEPER_ACTOR, AuditAction::Expire, id, now)
                        .with_details(transition_details(
                            InviteStatus::Invited,
                            InviteStatus::Expired,
                            None,
                        )),
                );
                expired.push(id);
            }
        }

        if !expired.is_empty() {
            info!(count = expired.len(), "Expired stale invites");
        }
        Ok(expired)
    }

    async fn audit_trail(&self, target_id: Uuid) -> InviteResult<Vec<AuditRecord>> {
        Ok(self
            .state
            .lock()
            .audit
            .iter()
            .filter(|r| r.target_id == target_id)
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::validation::ValidatedRow;

    fn vrow(row_index: u32, college: &str) -> ValidatedRow {
        ValidatedRow {
            row_index,
            full_name: format!("Alumnus {row_index}"),
            college_email: college.to_string(),
            personal_email: format!("p{row_index}@gmail.com"),
            college_domain: college.split('@').nth(1).unwrap_or_default().to_string(),
            grad_year: Some(2018),
            degree: None,
            major: None,
        }
    }

    fn store() -> (MemoryInviteStore, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let store = MemoryInviteStore::with_clock(&InviteSettings::default(), clock.clone());
        (store, clock)
    }

    #[tokio::test]
    async fn test_bulk_create_skips_live_duplicates() {
        let (store, _) = store();
        let first = store
            .bulk_create(NewInviteBatch::new(
                "admin",
                vec![vrow(1, "a@x.edu"), vrow(2, "b@x.edu")],
            ))
            .await
            .unwrap();
        assert_eq!(first.inserted_count(), 2);

        let second = store
            .bulk_create(NewInviteBatch::new(
                "admin",
                vec![vrow(1, "a@x.edu"), vrow(2, "c@x.edu")],
            ))
            .await
            .unwrap();
        assert_eq!(second.inserted_count(), 1);
        assert_eq!(second.skipped, vec![1]);
        assert_eq!(store.count(None), 3);

        let trail = store.audit_trail(second.batch_id).await.unwrap();
        assert_eq!(trail.len(), 1);
        assert_eq!(trail[0].action, AuditAction::BulkCreate);
        assert_eq!(trail[0].details["inserted"], 1);
    }

    #[tokio::test]
    async fn test_cancel_frees_key_for_reupload() {
        let (store, _) = store();
        let outcome = store
            .bulk_create(NewInviteBatch::new("admin", vec![vrow(1, "a@x.edu")]))
            .await
            .unwrap();
        let id = outcome.inserted[0].id;

        store.cancel(id, "admin").await.unwrap();

        let again = store
            .bulk_create(NewInviteBatch::new("admin", vec![vrow(1, "a@x.edu")]))
            .await
            .unwrap();
        assert_eq!(again.inserted_count(), 1);
        assert_eq!(store.count(Some(InviteStatus::Cancelled)), 1);
        assert_eq!(store.count(Some(InviteStatus::Invited)), 1);
    }

    #[tokio::test]
    async fn test_mark_sent_enforces_cooldown() {
        let (store, clock) = store();
        let outcome = store
            .bulk_create(NewInviteBatch::new("admin", vec![vrow(1, "a@x.edu")]))
            .await
            .unwrap();
        let id = outcome.inserted[0].id;

        store.mark_sent(id, "hash-1", "admin").await.unwrap();

        clock.advance(Duration::hours(23));
        let err = store.mark_sent(id, "hash-2", "admin").await.unwrap_err();
        match err {
            InviteError::CooldownActive { remaining } => assert_eq!(remaining, Duration::hours(1)),
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(store.find(id).await.unwrap().token.as_deref(), Some("hash-1"));

        clock.advance(Duration::hours(1));
        let sent = store.mark_sent(id, "hash-2", "admin").await.unwrap();
        assert_eq!(sent.token.as_deref(), Some("hash-2"));
        assert_eq!(sent.status, InviteStatus::Invited);
    }

    #[tokio::test]
    async fn test_dispute_round_trip() {
        let (store, _) = store();
        let outcome = store
            .bulk_create(NewInviteBatch::new("admin", vec![vrow(1, "a@x.edu")]))
            .await
            .unwrap();
        let id = outcome.inserted[0].id;

        let disputed = store.dispute(id, "admin", "wrong person").await.unwrap();
        assert_eq!(disputed.status, InviteStatus::Disputed);
        assert_eq!(disputed.dispute_reason.as_deref(), Some("wrong person"));

        let err = store.dispute(id, "admin", "again").await.unwrap_err();
        assert!(matches!(
            err,
            InviteError::IllegalTransition {
                from: InviteStatus::Disputed,
                to: InviteStatus::Disputed
            }
        ));

        let reinstated = store
            .resolve_dispute(id, "admin", DisputeResolution::Reinstate)
            .await
            .unwrap();
        assert_eq!(reinstated.status, InviteStatus::Invited);
        assert_eq!(reinstated.dispute_reason, None);

        let err = store
            .resolve_dispute(id, "admin", DisputeResolution::Cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, InviteError::IllegalTransition { .. }));
    }

    #[tokio::test]
    async fn test_unknown_invite() {
        let (store, _) = store();
        assert!(matches!(
            store.cancel(Uuid::new_v4(), "admin").await,
            Err(InviteError::NotFound)
        ));
        assert!(matches!(
            store.mark_sent(Uuid::new_v4(), "h", "admin").await,
            Err(InviteError::NotFound)
        ));
        assert!(matches!(
            store.accept("nope").await,
            Err(InviteError::InvalidToken)
        ));
    }
}
