//! Send and resend orchestration.
//!
//! A send is: check status, expiry and cooldown, mint a token, persist it through
//! [`InviteStore::mark_sent`], then hand off to the [`Mailer`]. A mailer
//! failure after the store write still consumes the cooldown; it is reported
//! in the [`SendOutcome`].

use std::sync::Arc;

use alumnet_db::{Invite, InviteStatus};
use serde::Serialize;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::clock::{Clock, SystemClock};
use crate::error::{InviteError, InviteResult};
use crate::mailer::{InviteTemplateData, Mailer, MessageId};
use crate::settings::InviteSettings;
use crate::store::{cooldown_remaining, InviteStore};
use crate::token::generate_token;

/// What happened at the mail transport.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum DeliveryStatus {
    Delivered { message_id: MessageId },
    /// The invite was marked sent but the mail did not go out.
    Failed { error: String },
}

/// Result of a successful [`DispatchCoordinator::send`].
#[derive(Debug, Clone)]
pub struct SendOutcome {
    /// The invite after `mark_sent`.
    pub invite: Invite,
    pub delivery: DeliveryStatus,
}

impl SendOutcome {
    #[must_use]
    pub fn delivered(&self) -> bool {
        matches!(self.delivery, DeliveryStatus::Delivered { .. })
    }
}

/// Aggregate result of [`DispatchCoordinator::send_all`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SendAllSummary {
    pub sent: usize,
    pub failed: usize,
    /// Not sendable, expired or still on cooldown.
    pub skipped: usize,
    pub failures: Vec<(Uuid, String)>,
}

/// Coordinates invite sends against a store and a mailer.
#[derive(Clone)]
pub struct DispatchCoordinator {
    store: Arc<dyn InviteStore>,
    mailer: Arc<dyn Mailer>,
    clock: Arc<dyn Clock>,
    settings: Arc<InviteSettings>,
}

impl std::fmt::Debug for DispatchCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DispatchCoordinator")
            .field("clock", &self.clock)
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

impl DispatchCoordinator {
    pub fn new(
        store: Arc<dyn InviteStore>,
        mailer: Arc<dyn Mailer>,
        settings: InviteSettings,
    ) -> Self {
        Self::with_clock(store, mailer, settings, Arc::new(SystemClock))
    }

    pub fn with_clock(
        store: Arc<dyn InviteStore>,
        mailer: Arc<dyn Mailer>,
        settings: InviteSettings,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            store,
            mailer,
            clock,
            settings: Arc::new(settings),
        }
    }

    /// Whether `invite` could be sent right now.
    fn precheck(&self, invite: &Invite) -> InviteResult<()> {
        if invite.status != InviteStatus::Invited {
            return Err(InviteError::NotSendable {
                status: invite.status,
            });
        }
        let now = self.clock.now();
        // Past its TTL but not yet swept.
        if now > invite.expires_at {
            return Err(InviteError::Expired);
        }
        if let Some(remaining) = cooldown_remaining(invite, now, self.settings.send_cooldown) {
            return Err(InviteError::CooldownActive { remaining });
        }
        Ok(())
    }

    /// Send or resend one invite.
    ///
    /// Fails with `NotSendable`, `Expired` or `CooldownActive` before any
    /// side effect.
    /// Once the store accepts the send, mailer problems are reported in the
    /// outcome rather than as an error.
    pub async fn send(&self, invite_id: Uuid, actor: &str) -> InviteResult<SendOutcome> {
        let invite = self.store.find(invite_id).await?;
        self.precheck(&invite)?;

        let token = generate_token();
        let invite = self.store.mark_sent(invite_id, &token.hash, actor).await?;

        let data = InviteTemplateData {
            invite_id: invite.id,
            full_name: invite.full_name.clone(),
            accept_url: self.settings.accept_url(&token.raw),
            expires_at: invite.expires_at,
            grad_year: invite.grad_year,
        };

        let delivery = match self
            .mailer
            .send(&invite.personal_email, &self.settings.mail_subject, &data)
            .await
        {
            Ok(message_id) => {
                info!(invite_id = %invite.id, message_id = %message_id, "Invitation sent");
                DeliveryStatus::Delivered { message_id }
            }
            Err(e) => {
                warn!(
                    invite_id = %invite.id,
                    error = %e,
                    "Invitation marked sent but delivery failed"
                );
                DeliveryStatus::Failed {
                    error: e.to_string(),
                }
            }
        };

        Ok(SendOutcome { invite, delivery })
    }

    /// Send every eligible invite in `pending`.
    ///
    /// Invites that are not `invited`, have expired or are on cooldown are
    /// skipped up front. The rest are sent concurrently, at most
    /// `max_concurrent_sends` at a time; one failure never cancels another.
    pub async fn send_all(&self, pending: Vec<Invite>, actor: &str) -> SendAllSummary {
        let mut summary = SendAllSummary::default();
        let semaphore = Arc::new(Semaphore::new(self.settings.max_concurrent_sends.max(1)));
        let mut join_set = JoinSet::new();

        for invite in pending {
            if let Err(e) = self.precheck(&invite) {
                debug!(invite_id = %invite.id, reason = %e, "Skipping invite");
                summary.skipped += 1;
                continue;
            }

            let coordinator = self.clone();
            let semaphore = Arc::clone(&semaphore);
            let actor = actor.to_string();
            join_set.spawn(async move {
                let result = match semaphore.acquire_owned().await {
                    Ok(_permit) => coordinator.send(invite.id, &actor).await,
                    Err(e) => Err(InviteError::Internal(format!("send limiter closed: {e}"))),
                };
                (invite.id, result)
            });
        }

        while let Some(joined) = join_set.join_next().await {
            match joined {
                Ok((_, Ok(outcome))) => match outcome.delivery {
                    DeliveryStatus::Delivered { .. } => summary.sent += 1,
                    DeliveryStatus::Failed { error } => {
                        summary.failed += 1;
                        summary.failures.push((outcome.invite.id, error));
                    }
                },
                Ok((
                    _,
                    Err(
                        InviteError::CooldownActive { .. }
                        | InviteError::NotSendable { .. }
                        | InviteError::Expired,
                    ),
                )) => {
                    summary.skipped += 1;
                }
                Ok((invite_id, Err(e))) => {
                    warn!(invite_id = %invite_id, error = %e, "Invite send failed");
                    summary.failed += 1;
                    summary.failures.push((invite_id, e.to_string()));
                }
                Err(e) => {
                    warn!(error = %e, "Send task panicked");
                    summary.failed += 1;
                }
            }
        }

        info!(
            sent = summary.sent,
            failed = summary.failed,
            skipped = summary.skipped,
            "Bulk send completed"
        );
        summary
    }
}
