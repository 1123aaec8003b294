//! Upload ingestion: parse, validate, review, then commit.
//!
//! Split in two so an administrator can look at the preview (row errors,
//! warnings, default decisions) and supply overrides before anything is
//! persisted. Parse failures abort in [`IngestionService::preview`], before
//! any store call.

use std::collections::BTreeSet;
use std::sync::Arc;

use alumnet_db::Invite;
use serde::Serialize;
use tracing::info;
use uuid::Uuid;

use crate::error::InviteResult;
use crate::parser::{parse_upload, UploadFormat};
use crate::resolver::{resolve_decisions, Decision, Resolution};
use crate::review::{review_with_timeout, AnomalyReviewer, ReviewOutcome, ReviewRequest, Warning};
use crate::settings::InviteSettings;
use crate::store::{FailedRow, InviteStore, NewInviteBatch};
use crate::validation::{validate_rows, ValidatedRow, ValidationResult, ValidationRules};

/// Everything known about an upload before commit.
#[derive(Debug, Clone, Serialize)]
pub struct IngestionPreview {
    pub batch_id: Uuid,
    pub expected_domain: Option<String>,
    pub validation: Vec<ValidationResult>,
    pub valid_rows: Vec<ValidatedRow>,
    pub warnings: Vec<Warning>,
    /// Set when the reviewer failed or timed out.
    pub advisory: Option<String>,
}

impl IngestionPreview {
    #[must_use]
    pub fn invalid(&self) -> Vec<&ValidationResult> {
        self.validation.iter().filter(|r| !r.valid).collect()
    }

    /// Decisions as they would be with no overrides.
    #[must_use]
    pub fn default_resolution(&self) -> Resolution {
        resolve_decisions(&self.valid_rows, &self.warnings, &BTreeSet::new())
    }
}

/// Result of committing a preview.
#[derive(Debug, Clone)]
pub struct CommitOutcome {
    pub batch_id: Uuid,
    pub resolution: Resolution,
    pub inserted: Vec<Invite>,
    pub skipped: Vec<u32>,
    pub failed: Vec<FailedRow>,
}

impl CommitOutcome {
    #[must_use]
    pub fn excluded(&self) -> Vec<u32> {
        self.resolution.excluded_rows()
    }
}

/// Drives an upload through the pipeline into an [`InviteStore`].
#[derive(Clone)]
pub struct IngestionService {
    store: Arc<dyn InviteStore>,
    reviewer: Arc<dyn AnomalyReviewer>,
    settings: InviteSettings,
}

impl IngestionService {
    pub fn new(
        store: Arc<dyn InviteStore>,
        reviewer: Arc<dyn AnomalyReviewer>,
        settings: InviteSettings,
    ) -> Self {
        Self {
            store,
            reviewer,
            settings,
        }
    }

    /// Parse, validate and review an upload. Persists nothing.
    ///
    /// Size and row limits come from the settings.
    pub async fn preview(
        &self,
        data: &[u8],
        format: UploadFormat,
        expected_domain: Option<&str>,
    ) -> InviteResult<IngestionPreview> {
        let rows = parse_upload(data, format, &self.settings.parse_limits())?;
        let validation = validate_rows(&rows, &ValidationRules::from(&self.settings));
        let valid_rows: Vec<ValidatedRow> =
            validation.iter().filter_map(|r| r.data.clone()).collect();

        let ReviewOutcome { warnings, advisory } = if valid_rows.is_empty() {
            ReviewOutcome::default()
        } else {
            let request = ReviewRequest {
                expected_domain: expected_domain.map(str::to_string),
                rows: valid_rows.clone(),
            };
            review_with_timeout(self.reviewer.as_ref(), &request, self.settings.review_timeout)
                .await
        };

        let preview = IngestionPreview {
            batch_id: Uuid::new_v4(),
            expected_domain: expected_domain.map(str::to_string),
            validation,
            valid_rows,
            warnings,
            advisory,
        };

        info!(
            batch_id = %preview.batch_id,
            rows = rows.len(),
            valid = preview.valid_rows.len(),
            warnings = preview.warnings.len(),
            degraded = preview.advisory.is_some(),
            "Upload previewed"
        );
        Ok(preview)
    }

    /// Apply overrides and persist the accepted rows.
    ///
    /// `overrides` lists row indices whose default decision the
    /// administrator toggled.
    pub async fn commit(
        &self,
        preview: IngestionPreview,
        overrides: &BTreeSet<u32>,
        invited_by: &str,
    ) -> InviteResult<CommitOutcome> {
        let resolution = resolve_decisions(&preview.valid_rows, &preview.warnings, overrides);

        let invalid_rows: Vec<serde_json::Value> = preview
            .invalid()
            .into_iter()
            .map(|r| serde_json::json!({ "row_index": r.row_index, "errors": r.errors }))
            .collect();
        let decisions: Vec<_> = resolution.decisions.values().collect();
        let details = serde_json::json!({
            "expected_domain": preview.expected_domain,
            "invalid_rows": invalid_rows,
            "warnings": preview.warnings,
            "decisions": decisions,
            "advisory": preview.advisory,
            "excluded": resolution
                .decisions
                .values()
                .filter(|d| d.decision == Decision::Exclude)
                .count(),
        });

        let outcome = self
            .store
            .bulk_create(NewInviteBatch {
                batch_id: preview.batch_id,
                invited_by: invited_by.to_string(),
                rows: resolution.accepted.clone(),
                details,
            })
            .await?;

        Ok(CommitOutcome {
            batch_id: outcome.batch_id,
            resolution,
            inserted: outcome.inserted,
            skipped: outcome.skipped,
            failed: outcome.failed,
        })
    }
}
