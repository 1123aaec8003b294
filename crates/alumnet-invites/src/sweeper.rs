//! Scheduled expiry sweep.
//!
//! Each cycle:
//! 1. Expires `invited` rows older than the invite TTL through
//!    [`InviteStore::expire_stale`].
//! 2. Asks the account lifecycle collaborator to hard-delete accounts whose
//!    deactivation grace period has passed.
//!
//! The steps are independent: a failure in one is logged and counted and the
//! other still runs. Overlapping cycles are fine: `expire_stale` reports a
//! row at most once.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration as StdDuration;

use async_trait::async_trait;
use chrono::Duration;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::clock::{Clock, SystemClock};
use crate::settings::InviteSettings;
use crate::store::InviteStore;

/// An account removed by the lifecycle collaborator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeletedAccount {
    pub id: Uuid,
    pub email: String,
}

#[derive(Debug, Error)]
pub enum AccountLifecycleError {
    #[error("Account lifecycle service failed: {0}")]
    Service(String),
}

/// Narrow interface to the account subsystem. The sweeper never touches
/// account rows directly.
#[async_trait]
pub trait AccountLifecycle: Send + Sync {
    async fn hard_delete_expired_accounts(
        &self,
    ) -> Result<Vec<DeletedAccount>, AccountLifecycleError>;
}

/// Lifecycle that never deletes anything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopAccountLifecycle;

#[async_trait]
impl AccountLifecycle for NoopAccountLifecycle {
    async fn hard_delete_expired_accounts(
        &self,
    ) -> Result<Vec<DeletedAccount>, AccountLifecycleError> {
        Ok(Vec::new())
    }
}

/// Statistics from one sweep cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    pub expired: Vec<Uuid>,
    pub hard_deleted: Vec<DeletedAccount>,
    pub errors: usize,
}

impl SweepReport {
    pub fn merge(&mut self, other: SweepReport) {
        self.expired.extend(other.expired);
        self.hard_deleted.extend(other.hard_deleted);
        self.errors += other.errors;
    }

    #[must_use]
    pub fn total_actions(&self) -> usize {
        self.expired.len() + self.hard_deleted.len()
    }
}

/// Timer-driven expiry job.
pub struct ExpirySweeper {
    store: Arc<dyn InviteStore>,
    accounts: Arc<dyn AccountLifecycle>,
    clock: Arc<dyn Clock>,
    invite_ttl: Duration,
    interval: StdDuration,
}

impl ExpirySweeper {
    #[must_use]
    pub fn new(
        store: Arc<dyn InviteStore>,
        accounts: Arc<dyn AccountLifecycle>,
        settings: &InviteSettings,
    ) -> Self {
        Self::with_clock(store, accounts, settings, Arc::new(SystemClock))
    }

    #[must_use]
    pub fn with_clock(
        store: Arc<dyn InviteStore>,
        accounts: Arc<dyn AccountLifecycle>,
        settings: &InviteSettings,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            store,
            accounts,
            clock,
            invite_ttl: settings.invite_ttl,
            interval: settings.sweep_interval,
        }
    }

    /// Run a single sweep cycle. Idempotent.
    #[instrument(skip(self))]
    pub async fn run_once(&self) -> SweepReport {
        let mut report = SweepReport::default();
        let now = self.clock.now();

        match self.store.expire_stale(now, self.invite_ttl).await {
            Ok(ids) => report.expired = ids,
            Err(e) => {
                warn!(error = %e, "Failed to expire stale invites");
                report.errors += 1;
            }
        }

        match self.accounts.hard_delete_expired_accounts().await {
            Ok(accounts) => report.hard_deleted = accounts,
            Err(e) => {
                warn!(error = %e, "Failed to hard-delete expired accounts");
                report.errors += 1;
            }
        }

        if report.total_actions() > 0 {
            info!(
                expired = report.expired.len(),
                hard_deleted = report.hard_deleted.len(),
                errors = report.errors,
                "Completed expiry sweep"
            );
        } else {
            debug!(errors = report.errors, "Expiry sweep complete, no actions taken");
        }

        report
    }

    /// Run a cycle every interval until `shutdown` resolves.
    ///
    /// The first cycle runs immediately. Returns the merged report of every
    /// cycle that ran.
    pub async fn run_until<F>(&self, shutdown: F) -> SweepReport
    where
        F: Future<Output = ()>,
    {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        tokio::pin!(shutdown);

        let mut total = SweepReport::default();
        loop {
            tokio::select! {
                () = &mut shutdown => {
                    info!("Expiry sweeper stopping");
                    break;
                }
                _ = ticker.tick() => {
                    total.merge(self.run_once().await);
                }
            }
        }
        total
    }
}
