//! Append-only audit trail for invite mutations.
//!
//! The table carries a trigger that rejects UPDATE and DELETE, so records
//! here can only ever be inserted and read.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgExecutor};
use uuid::Uuid;

/// Mutation recorded by an audit entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditAction {
    BulkCreate,
    Send,
    Accept,
    Cancel,
    Dispute,
    ResolveDispute,
    Expire,
}

impl AuditAction {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            AuditAction::BulkCreate => "bulk_create",
            AuditAction::Send => "send",
            AuditAction::Accept => "accept",
            AuditAction::Cancel => "cancel",
            AuditAction::Dispute => "dispute",
            AuditAction::ResolveDispute => "resolve_dispute",
            AuditAction::Expire => "expire",
        }
    }
}

impl std::fmt::Display for AuditAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for AuditAction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "bulk_create" => Ok(AuditAction::BulkCreate),
            "send" => Ok(AuditAction::Send),
            "accept" => Ok(AuditAction::Accept),
            "cancel" => Ok(AuditAction::Cancel),
            "dispute" => Ok(AuditAction::Dispute),
            "resolve_dispute" => Ok(AuditAction::ResolveDispute),
            "expire" => Ok(AuditAction::Expire),
            _ => Err(format!("Invalid audit action: {s}")),
        }
    }
}

impl TryFrom<String> for AuditAction {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

/// A stored audit entry.
#[derive(Debug, Clone, PartialEq, FromRow, Serialize, Deserialize)]
pub struct AuditRecord {
    pub id: Uuid,
    /// Monotonic insertion order; ties on `at` are broken by this.
    pub seq: i64,
    pub actor: String,
    #[sqlx(try_from = "String")]
    pub action: AuditAction,
    /// Invite or batch the action applied to.
    pub target_id: Uuid,
    pub details: serde_json::Value,
    pub at: DateTime<Utc>,
}

/// Data for a new audit entry.
#[derive(Debug, Clone)]
pub struct CreateAuditRecord {
    pub actor: String,
    pub action: AuditAction,
    pub target_id: Uuid,
    pub details: serde_json::Value,
    pub at: DateTime<Utc>,
}

impl CreateAuditRecord {
    pub fn new(
        actor: impl Into<String>,
        action: AuditAction,
        target_id: Uuid,
        at: DateTime<Utc>,
    ) -> Self {
        Self {
            actor: actor.into(),
            action,
            target_id,
            details: serde_json::json!({}),
            at,
        }
    }

    #[must_use]
    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = details;
        self
    }
}

impl AuditRecord {
    /// Append an entry. Call inside the same transaction as the mutation it
    /// describes.
    pub async fn insert<'e, E>(executor: E, data: &CreateAuditRecord) -> Result<Self, sqlx::Error>
    where
        E: PgExecutor<'e>,
    {
        sqlx::query_as(
            r"
            INSERT INTO audit_records (actor, action, target_id, details, at)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING *
            ",
        )
        .bind(&data.actor)
        .bind(data.action.as_str())
        .bind(data.target_id)
        .bind(&data.details)
        .bind(data.at)
        .fetch_one(executor)
        .await
    }

    /// Entries for one target, oldest first.
    pub async fn list_for_target<'e, E>(
        executor: E,
        target_id: Uuid,
    ) -> Result<Vec<Self>, sqlx::Error>
    where
        E: PgExecutor<'e>,
    {
        sqlx::query_as("SELECT * FROM audit_records WHERE target_id = $1 ORDER BY seq ASC")
            .bind(target_id)
            .fetch_all(executor)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_action_parse() {
        for action in [
            AuditAction::BulkCreate,
            AuditAction::Send,
            AuditAction::Accept,
            AuditAction::Cancel,
            AuditAction::Dispute,
            AuditAction::ResolveDispute,
            AuditAction::Expire,
        ] {
            assert_eq!(action.to_string().parse::<AuditAction>().unwrap(), action);
        }
        assert!("delete".parse::<AuditAction>().is_err());
    }

    #[test]
    fn test_create_defaults_to_empty_details() {
        let record = CreateAuditRecord::new("admin", AuditAction::Send, Uuid::new_v4(), Utc::now());
        assert_eq!(record.details, serde_json::json!({}));
    }
}
