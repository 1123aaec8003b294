//! Row models for invites and their audit trail.

pub mod audit_record;
pub mod invite;

pub use audit_record::{AuditAction, AuditRecord, CreateAuditRecord};
pub use invite::{CreateInvite, Invite, InviteStatus};
