//! Alumni invite model.
//!
//! One row tracks one alumnus from bulk upload to platform access. The
//! `(college_email, college_domain)` pair is unique among non-cancelled rows,
//! enforced by a partial unique index rather than by application checks.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgExecutor};
use uuid::Uuid;

/// Invite lifecycle state.
///
/// ```text
/// invited  --accept-->            accepted  (terminal)
/// invited  --cancel-->            cancelled (terminal)
/// invited  --dispute-->           disputed
/// invited  --sweep-->             expired   (terminal)
/// disputed --resolve(cancel)-->   cancelled (terminal)
/// disputed --resolve(reinstate)--> invited
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InviteStatus {
    Invited,
    Accepted,
    Cancelled,
    Disputed,
    Expired,
}

impl InviteStatus {
    /// Every status, in declaration order.
    pub const ALL: [InviteStatus; 5] = [
        InviteStatus::Invited,
        InviteStatus::Accepted,
        InviteStatus::Cancelled,
        InviteStatus::Disputed,
        InviteStatus::Expired,
    ];

    /// Column representation.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            InviteStatus::Invited => "invited",
            InviteStatus::Accepted => "accepted",
            InviteStatus::Cancelled => "cancelled",
            InviteStatus::Disputed => "disputed",
            InviteStatus::Expired => "expired",
        }
    }

    /// Terminal states have no outgoing edges.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(
            self,
            InviteStatus::Accepted | InviteStatus::Cancelled | InviteStatus::Expired
        )
    }

    /// Whether `self -> next` is an edge of the lifecycle graph.
    #[must_use]
    pub const fn can_transition_to(&self, next: InviteStatus) -> bool {
        matches!(
            (self, next),
            (InviteStatus::Invited, InviteStatus::Accepted)
                | (InviteStatus::Invited, InviteStatus::Cancelled)
                | (InviteStatus::Invited, InviteStatus::Disputed)
                | (InviteStatus::Invited, InviteStatus::Expired)
                | (InviteStatus::Disputed, InviteStatus::Cancelled)
                | (InviteStatus::Disputed, InviteStatus::Invited)
        )
    }

    /// Statuses from which `next` is reachable in one step.
    #[must_use]
    pub fn predecessors_of(next: InviteStatus) -> Vec<InviteStatus> {
        Self::ALL
            .into_iter()
            .filter(|from| from.can_transition_to(next))
            .collect()
    }
}

impl std::fmt::Display for InviteStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for InviteStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "invited" => Ok(InviteStatus::Invited),
            "accepted" => Ok(InviteStatus::Accepted),
            "cancelled" => Ok(InviteStatus::Cancelled),
            "disputed" => Ok(InviteStatus::Disputed),
            "expired" => Ok(InviteStatus::Expired),
            _ => Err(format!("Invalid invite status: {s}")),
        }
    }
}

impl TryFrom<String> for InviteStatus {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

/// A durable alumni invite.
#[derive(Debug, Clone, PartialEq, FromRow, Serialize, Deserialize)]
pub struct Invite {
    /// Opaque identifier.
    pub id: Uuid,

    /// Upload batch that created this invite.
    pub batch_id: Option<Uuid>,

    /// Lower-cased institutional address; half of the uniqueness key.
    pub college_email: String,

    /// Lower-cased personal address; invitations are mailed here.
    pub personal_email: String,

    pub full_name: String,
    pub grad_year: Option<i32>,
    pub degree: Option<String>,
    pub major: Option<String>,

    /// Domain part of `college_email`; half of the uniqueness key.
    pub college_domain: String,

    /// SHA-256 hex digest of the current single-use token.
    ///
    /// `None` until the first send. The raw token is never stored.
    #[serde(skip_serializing)]
    pub token: Option<String>,

    #[sqlx(try_from = "String")]
    pub status: InviteStatus,

    /// Actor who ran the upload.
    pub invited_by: String,

    /// Set while the invite is disputed.
    pub dispute_reason: Option<String>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub last_sent_at: Option<DateTime<Utc>>,
    pub accepted_at: Option<DateTime<Utc>>,
    pub expires_at: DateTime<Utc>,
}

/// Data required to insert a new invite. Status is always `invited`.
#[derive(Debug, Clone)]
pub struct CreateInvite {
    pub batch_id: Option<Uuid>,
    pub college_email: String,
    pub personal_email: String,
    pub full_name: String,
    pub grad_year: Option<i32>,
    pub degree: Option<String>,
    pub major: Option<String>,
    pub college_domain: String,
    pub invited_by: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl Invite {
    /// Insert unless a live invite already holds the same
    /// `(college_email, college_domain)` key.
    ///
    /// Returns `None` on conflict. Two concurrent callers racing on the same
    /// key resolve to exactly one inserted row.
    pub async fn insert_if_absent<'e, E>(
        executor: E,
        data: &CreateInvite,
    ) -> Result<Option<Self>, sqlx::Error>
    where
        E: PgExecutor<'e>,
    {
        sqlx::query_as(
            r"
            INSERT INTO invites
                (batch_id, college_email, personal_email, full_name, grad_year, degree,
                 major, college_domain, status, invited_by, created_at, updated_at, expires_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, 'invited', $9, $10, $10, $11)
            ON CONFLICT (college_email, college_domain) WHERE status <> 'cancelled'
            DO NOTHING
            RETURNING *
            ",
        )
        .bind(data.batch_id)
        .bind(&data.college_email)
        .bind(&data.personal_email)
        .bind(&data.full_name)
        .bind(data.grad_year)
        .bind(&data.degree)
        .bind(&data.major)
        .bind(&data.college_domain)
        .bind(&data.invited_by)
        .bind(data.created_at)
        .bind(data.expires_at)
        .fetch_optional(executor)
        .await
    }

    /// Find an invite by ID.
    pub async fn find_by_id<'e, E>(executor: E, id: Uuid) -> Result<Option<Self>, sqlx::Error>
    where
        E: PgExecutor<'e>,
    {
        sqlx::query_as("SELECT * FROM invites WHERE id = $1")
            .bind(id)
            .fetch_optional(executor)
            .await
    }

    /// Find an invite by ID and lock the row until the transaction ends.
    pub async fn find_by_id_for_update<'e, E>(
        executor: E,
        id: Uuid,
    ) -> Result<Option<Self>, sqlx::Error>
    where
        E: PgExecutor<'e>,
    {
        sqlx::query_as("SELECT * FROM invites WHERE id = $1 FOR UPDATE")
            .bind(id)
            .fetch_optional(executor)
            .await
    }

    /// Find an invite by token digest.
    pub async fn find_by_token_hash<'e, E>(
        executor: E,
        token_hash: &str,
    ) -> Result<Option<Self>, sqlx::Error>
    where
        E: PgExecutor<'e>,
    {
        sqlx::query_as("SELECT * FROM invites WHERE token = $1")
            .bind(token_hash)
            .fetch_optional(executor)
            .await
    }

    /// List `invited` rows, optionally restricted to one upload batch.
    pub async fn list_invited<'e, E>(
        executor: E,
        batch_id: Option<Uuid>,
    ) -> Result<Vec<Self>, sqlx::Error>
    where
        E: PgExecutor<'e>,
    {
        sqlx::query_as(
            r"
            SELECT * FROM invites
            WHERE status = 'invited' AND ($1::uuid IS NULL OR batch_id = $1)
            ORDER BY created_at ASC, id ASC
            ",
        )
        .bind(batch_id)
        .fetch_all(executor)
        .await
    }

    /// Record a send: store the new token digest and bump `last_sent_at`.
    ///
    /// Compare-and-set: the row is only touched while it is `invited`,
    /// unexpired at `now`, and its previous send is at or before
    /// `cooldown_cutoff`. Returns `None` otherwise, so concurrent sends
    /// cannot both succeed.
    pub async fn mark_sent<'e, E>(
        executor: E,
        id: Uuid,
        token_hash: &str,
        now: DateTime<Utc>,
        cooldown_cutoff: DateTime<Utc>,
    ) -> Result<Option<Self>, sqlx::Error>
    where
        E: PgExecutor<'e>,
    {
        sqlx::query_as(
            r"
            UPDATE invites
            SET token = $2, last_sent_at = $3, updated_at = $3
            WHERE id = $1
              AND status = 'invited'
              AND expires_at >= $3
              AND (last_sent_at IS NULL OR last_sent_at <= $4)
            RETURNING *
            ",
        )
        .bind(id)
        .bind(token_hash)
        .bind(now)
        .bind(cooldown_cutoff)
        .fetch_optional(executor)
        .await
    }

    /// Redeem a token.
    ///
    /// Only an `invited`, unexpired row matches, so a token can be redeemed
    /// once. The digest is kept so later attempts can be told apart from
    /// unknown tokens.
    pub async fn mark_accepted<'e, E>(
        executor: E,
        token_hash: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<Self>, sqlx::Error>
    where
        E: PgExecutor<'e>,
    {
        sqlx::query_as(
            r"
            UPDATE invites
            SET status = 'accepted', accepted_at = $2, updated_at = $2
            WHERE token = $1 AND status = 'invited' AND expires_at >= $2
            RETURNING *
            ",
        )
        .bind(token_hash)
        .bind(now)
        .fetch_optional(executor)
        .await
    }

    /// Move a row to `to` if its current status is one of `from`.
    ///
    /// `dispute_reason` replaces the stored reason (pass `None` to clear it).
    pub async fn transition<'e, E>(
        executor: E,
        id: Uuid,
        from: &[InviteStatus],
        to: InviteStatus,
        dispute_reason: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<Option<Self>, sqlx::Error>
    where
        E: PgExecutor<'e>,
    {
        let from: Vec<String> = from.iter().map(|s| s.as_str().to_string()).collect();

        sqlx::query_as(
            r"
            UPDATE invites
            SET status = $3, dispute_reason = $4, updated_at = $5
            WHERE id = $1 AND status = ANY($2)
            RETURNING *
            ",
        )
        .bind(id)
        .bind(from)
        .bind(to.as_str())
        .bind(dispute_reason)
        .bind(now)
        .fetch_optional(executor)
        .await
    }

    /// Expire every `invited` row created before `created_before`.
    ///
    /// Rows already moved by an overlapping call no longer match the
    /// `status = 'invited'` predicate, so they are never returned twice.
    pub async fn expire_created_before<'e, E>(
        executor: E,
        created_before: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<Vec<Self>, sqlx::Error>
    where
        E: PgExecutor<'e>,
    {
        sqlx::query_as(
            r"
            UPDATE invites
            SET status = 'expired', updated_at = $2
            WHERE status = 'invited' AND created_at < $1
            RETURNING *
            ",
        )
        .bind(created_before)
        .bind(now)
        .fetch_all(executor)
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_round_trip_through_str() {
        for status in InviteStatus::ALL {
            assert_eq!(status.as_str().parse::<InviteStatus>().unwrap(), status);
        }
        assert!("pending".parse::<InviteStatus>().is_err());
    }

    #[test]
    fn test_legal_edges() {
        use InviteStatus::*;
        let legal = [
            (Invited, Accepted),
            (Invited, Cancelled),
            (Invited, Disputed),
            (Invited, Expired),
            (Disputed, Cancelled),
            (Disputed, Invited),
        ];
        for from in InviteStatus::ALL {
            for to in InviteStatus::ALL {
                assert_eq!(
                    from.can_transition_to(to),
                    legal.contains(&(from, to)),
                    "{from} -> {to}"
                );
            }
        }
    }

    #[test]
    fn test_accepted_only_reachable_from_invited() {
        assert_eq!(
            InviteStatus::predecessors_of(InviteStatus::Accepted),
            vec![InviteStatus::Invited]
        );
        assert_eq!(
            InviteStatus::predecessors_of(InviteStatus::Cancelled),
            vec![InviteStatus::Invited, InviteStatus::Disputed]
        );
    }

    #[test]
    fn test_terminal_states_have_no_edges() {
        for status in InviteStatus::ALL.into_iter().filter(InviteStatus::is_terminal) {
            assert!(InviteStatus::ALL
                .into_iter()
                .all(|next| !status.can_transition_to(next)));
        }
    }
}
