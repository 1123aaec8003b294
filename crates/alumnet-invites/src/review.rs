//! Anomaly review.
//!
//! Reviewers inspect the full batch of valid rows and return advisory
//! [`Warning`]s. They never mutate rows and never block persistence; a
//! reviewer that fails or times out degrades to "no warnings" through
//! [`review_with_timeout`].

use std::collections::{HashMap, HashSet};
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use strsim::jaro_winkler;
use thiserror::Error;
use tracing::{debug, warn};

use crate::validation::ValidatedRow;

/// Default similarity at or above which two rows count as probable duplicates.
pub const DEFAULT_SIMILARITY_THRESHOLD: f64 = 0.95;

/// Local parts that usually mean a made-up address.
const PLACEHOLDER_LOCAL_PARTS: [&str; 7] = [
    "test", "example", "noreply", "no-reply", "admin", "null", "none",
];

/// Kind of anomaly found.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WarningKind {
    ProbableDuplicate,
    DomainMismatch,
    SuspiciousPattern,
    /// Anything a remote reviewer reports that this crate does not model.
    #[serde(other)]
    Other,
}

/// Advisory finding attached to one row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Warning {
    pub row_index: u32,
    #[serde(rename = "type")]
    pub kind: WarningKind,
    pub message: String,
}

impl Warning {
    pub fn new(row_index: u32, kind: WarningKind, message: impl Into<String>) -> Self {
        Self {
            row_index,
            kind,
            message: message.into(),
        }
    }
}

/// Reviewer input.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReviewRequest {
    /// Institution domain to compare against; the first row's domain when absent.
    pub expected_domain: Option<String>,
    pub rows: Vec<ValidatedRow>,
}

impl ReviewRequest {
    /// Reject input no reviewer can interpret.
    pub fn validate(&self) -> Result<(), ReviewerError> {
        let mut seen = HashSet::with_capacity(self.rows.len());
        for row in &self.rows {
            if row.row_index == 0 {
                return Err(ReviewerError::MalformedInput(
                    "row_index must be 1-based".to_string(),
                ));
            }
            if !seen.insert(row.row_index) {
                return Err(ReviewerError::MalformedInput(format!(
                    "duplicate row_index {}",
                    row.row_index
                )));
            }
        }
        Ok(())
    }

    fn effective_domain(&self) -> Option<String> {
        self.expected_domain
            .as_deref()
            .map(|d| d.trim().trim_start_matches('@').to_lowercase())
            .filter(|d| !d.is_empty())
            .or_else(|| self.rows.first().map(|r| r.college_domain.clone()))
    }
}

/// Reviewer output.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReviewReport {
    pub warnings: Vec<Warning>,
}

#[derive(Debug, Error)]
pub enum ReviewerError {
    #[error("Malformed review input: {0}")]
    MalformedInput(String),

    #[error("Remote reviewer failed: {0}")]
    Remote(String),

    #[error("Reviewer timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },
}

/// Pluggable anomaly detection.
///
/// Implementations must be deterministic for a given row order and must only
/// return `Err` for malformed input or transport failure, never for findings.
#[async_trait]
pub trait AnomalyReviewer: Send + Sync {
    async fn review(&self, request: &ReviewRequest) -> Result<ReviewReport, ReviewerError>;

    /// Short name for logs.
    fn name(&self) -> &'static str;
}

/// Outcome of a bounded review: warnings, or an advisory explaining why
/// there are none.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReviewOutcome {
    pub warnings: Vec<Warning>,
    pub advisory: Option<String>,
}

/// Run `reviewer` with a deadline. Never fails.
pub async fn review_with_timeout(
    reviewer: &dyn AnomalyReviewer,
    request: &ReviewRequest,
    timeout: Duration,
) -> ReviewOutcome {
    let result = tokio::time::timeout(timeout, reviewer.review(request))
        .await
        .unwrap_or_else(|_| {
            Err(ReviewerError::Timeout {
                timeout_ms: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
            })
        });

    match result {
        Ok(report) => {
            debug!(
                reviewer = reviewer.name(),
                warnings = report.warnings.len(),
                "Anomaly review completed"
            );
            ReviewOutcome {
                warnings: report.warnings,
                advisory: None,
            }
        }
        Err(e) => {
            warn!(reviewer = reviewer.name(), error = %e, "Anomaly review unavailable");
            ReviewOutcome {
                warnings: Vec::new(),
                advisory: Some(format!(
                    "Automated review unavailable ({e}); rows were not checked for anomalies."
                )),
            }
        }
    }
}

/// In-process heuristic reviewer.
///
/// Flags, per row:
/// - `probable_duplicate` on a later row whose college or personal email
///   repeats an earlier row, or whose normalized `name|college_email` key is
///   string-similar to one;
/// - `domain_mismatch` when the college domain differs from the expected one;
/// - `suspicious_pattern` for digits in the name or placeholder addresses.
#[derive(Debug, Clone)]
pub struct HeuristicReviewer {
    similarity_threshold: f64,
}

impl Default for HeuristicReviewer {
    fn default() -> Self {
        Self {
            similarity_threshold: DEFAULT_SIMILARITY_THRESHOLD,
        }
    }
}

impl HeuristicReviewer {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_similarity_threshold(mut self, threshold: f64) -> Self {
        self.similarity_threshold = threshold.clamp(0.0, 1.0);
        self
    }

    /// Synchronous core of [`AnomalyReviewer::review`].
    pub fn review_rows(&self, request: &ReviewRequest) -> Result<ReviewReport, ReviewerError> {
        request.validate()?;

        let expected_domain = request.effective_domain();
        let mut warnings = Vec::new();

        let mut college_seen: HashMap<&str, u32> = HashMap::new();
        let mut personal_seen: HashMap<&str, u32> = HashMap::new();
        // Similarity is only computed within a block sharing the name's
        // first character and the college domain.
        let mut blocks: HashMap<(Option<char>, &str), Vec<(u32, String)>> = HashMap::new();

        for row in &request.rows {
            let key = similarity_key(row);
            let block_key = (key.chars().next(), row.college_domain.as_str());

            if let Some(message) = self.duplicate_of(
                row,
                &key,
                &college_seen,
                &personal_seen,
                blocks.get(&block_key),
            ) {
                warnings.push(Warning::new(
                    row.row_index,
                    WarningKind::ProbableDuplicate,
                    message,
                ));
            }

            college_seen
                .entry(row.college_email.as_str())
                .or_insert(row.row_index);
            personal_seen
                .entry(row.personal_email.as_str())
                .or_insert(row.row_index);
            blocks.entry(block_key).or_default().push((row.row_index, key));

            if let Some(expected) = expected_domain.as_deref() {
                if row.college_domain != expected {
                    warnings.push(Warning::new(
                        row.row_index,
                        WarningKind::DomainMismatch,
                        format!(
                            "college email domain '{}' differs from expected '{expected}'",
                            row.college_domain
                        ),
                    ));
                }
            }

            if row.full_name.chars().any(|c| c.is_ascii_digit()) {
                warnings.push(Warning::new(
                    row.row_index,
                    WarningKind::SuspiciousPattern,
                    "name contains digits",
                ));
            }

            for email in [&row.college_email, &row.personal_email] {
                if is_placeholder_address(email) {
                    warnings.push(Warning::new(
                        row.row_index,
                        WarningKind::SuspiciousPattern,
                        format!("'{email}' looks like a placeholder address"),
                    ));
                }
            }
        }

        Ok(ReviewReport { warnings })
    }

    fn duplicate_of(
        &self,
        row: &ValidatedRow,
        key: &str,
        college_seen: &HashMap<&str, u32>,
        personal_seen: &HashMap<&str, u32>,
        block: Option<&Vec<(u32, String)>>,
    ) -> Option<String> {
        if let Some(first) = college_seen.get(row.college_email.as_str()) {
            return Some(format!(
                "college email '{}' already appears in row {first}",
                row.college_email
            ));
        }

        if let Some(first) = personal_seen.get(row.personal_email.as_str()) {
            return Some(format!(
                "personal email '{}' already appears in row {first}",
                row.personal_email
            ));
        }

        block?.iter().find_map(|(other_index, other_key)| {
            let score = jaro_winkler(key, other_key);
            (score >= self.similarity_threshold)
                .then(|| format!("closely matches row {other_index} (similarity {score:.2})"))
        })
    }
}

#[async_trait]
impl AnomalyReviewer for HeuristicReviewer {
    async fn review(&self, request: &ReviewRequest) -> Result<ReviewReport, ReviewerError> {
        self.review_rows(request)
    }

    fn name(&self) -> &'static str {
        "heuristic"
    }
}

fn similarity_key(row: &ValidatedRow) -> String {
    let name: String = row
        .full_name
        .to_lowercase()
        .chars()
        .filter(|c| c.is_alphanumeric() || c.is_whitespace())
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ");
    format!("{name}|{}", row.college_email)
}

fn is_placeholder_address(email: &str) -> bool {
    let local = email.split('@').next().unwrap_or_default();
    let base = local.split('+').next().unwrap_or_default();
    PLACEHOLDER_LOCAL_PARTS.contains(&base)
}

/// Reviewer that delegates to an HTTP service.
///
/// POSTs the [`ReviewRequest`] as JSON and expects a [`ReviewReport`] body.
#[derive(Debug, Clone)]
pub struct RemoteAnomalyReviewer {
    client: reqwest::Client,
    endpoint: String,
}

impl RemoteAnomalyReviewer {
    pub fn new(endpoint: impl Into<String>) -> Result<Self, ReviewerError> {
        let client = reqwest::Client::builder()
            .build()
            .map_err(|e| ReviewerError::Remote(format!("failed to build HTTP client: {e}")))?;
        Ok(Self::with_client(client, endpoint))
    }

    pub fn with_client(client: reqwest::Client, endpoint: impl Into<String>) -> Self {
        Self {
            client,
            endpoint: endpoint.into(),
        }
    }
}

#[async_trait]
impl AnomalyReviewer for RemoteAnomalyReviewer {
    async fn review(&self, request: &ReviewRequest) -> Result<ReviewReport, ReviewerError> {
        request.validate()?;

        debug!(endpoint = %self.endpoint, rows = request.rows.len(), "Calling remote reviewer");

        let response = self
            .client
            .post(&self.endpoint)
            .json(request)
            .send()
            .await
            .map_err(|e| ReviewerError::Remote(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(ReviewerError::Remote(format!(
                "reviewer returned status {status}"
            )));
        }

        response
            .json::<ReviewReport>()
            .await
            .map_err(|e| ReviewerError::Remote(format!("invalid reviewer response: {e}")))
    }

    fn name(&self) -> &'static str {
        "remote"
    }
}
