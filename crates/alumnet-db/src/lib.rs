//! Persistence layer for alumni invites.
//!
//! Holds the row models (`Invite`, `AuditRecord`), their SQL as associated
//! functions, the embedded migrations, and a thin connection pool wrapper.
//!
//! # Example
//!
//! ```rust,ignore
//! use alumnet_db::{run_migrations, DbPool};
//!
//! let pool = DbPool::connect("postgres://localhost/alumnet").await?;
//! run_migrations(&pool).await?;
//! ```

pub mod error;
pub mod migrations;
pub mod models;
pub mod pool;

pub use error::{is_deadlock, is_unique_violation, DbError};
pub use migrations::run_migrations;
pub use models::{
    AuditAction, AuditRecord, CreateAuditRecord, CreateInvite, Invite, InviteStatus,
};
pub use pool::DbPool;
