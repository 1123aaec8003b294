//! Alumni invite engine.
//!
//! Takes an uploaded roster from raw bytes to durable invites:
//!
//! ```text
//! bytes -> parser -> validation -> review -> resolver -> InviteStore::bulk_create
//!                                                       |
//!                     DispatchCoordinator::send --------+--> Mailer
//!                     ExpirySweeper (timer) ------------+--> AccountLifecycle
//! ```
//!
//! Every state change goes through an [`InviteStore`], which is the only
//! writer of invites and audit records. The Postgres backend relies on the
//! database's unique index and conditional updates for atomicity; the
//! in-memory backend provides the same guarantees under one lock.

pub mod clock;
pub mod dispatch;
pub mod error;
pub mod mailer;
pub mod parser;
pub mod pipeline;
pub mod resolver;
pub mod review;
pub mod settings;
pub mod store;
pub mod sweeper;
pub mod token;
pub mod validation;

pub use clock::{Clock, ManualClock, SystemClock};
pub use dispatch::{DeliveryStatus, DispatchCoordinator, SendAllSummary, SendOutcome};
pub use error::{InviteError, InviteResult};
pub use mailer::{InviteTemplateData, LogMailer, Mailer, MailerError, MessageId};
pub use parser::{parse_upload, CandidateRow, CsvDelimiter, ParseError, ParseLimits, UploadFormat};
pub use pipeline::{CommitOutcome, IngestionPreview, IngestionService};
pub use resolver::{resolve_decisions, Decision, Resolution, ReviewDecision};
pub use review::{
    review_with_timeout, AnomalyReviewer, HeuristicReviewer, RemoteAnomalyReviewer,
    ReviewOutcome, ReviewReport, ReviewRequest, ReviewerError, Warning, WarningKind,
};
pub use settings::InviteSettings;
pub use store::{
    BulkCreateOutcome, DisputeResolution, FailedRow, InviteStore, MemoryInviteStore,
    NewInviteBatch, PgInviteStore,
};
pub use sweeper::{
    AccountLifecycle, AccountLifecycleError, DeletedAccount, ExpirySweeper, NoopAccountLifecycle,
    SweepReport,
};
pub use validation::{validate_row, validate_rows, ValidatedRow, ValidationResult, ValidationRules};

pub use alumnet_db::{AuditAction, AuditRecord, Invite, InviteStatus};
