//! Merges reviewer warnings with administrator overrides into final
//! per-row decisions.
//!
//! Pure and replayable: the audit trail stores warnings and decisions, and
//! re-running with the same inputs must reproduce the same result.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::review::{Warning, WarningKind};
use crate::validation::ValidatedRow;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Decision {
    Accept,
    Exclude,
}

impl Decision {
    #[must_use]
    pub fn inverted(self) -> Self {
        match self {
            Decision::Accept => Decision::Exclude,
            Decision::Exclude => Decision::Accept,
        }
    }
}

/// Final decision for one row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReviewDecision {
    pub row_index: u32,
    pub decision: Decision,
    /// Whether an administrator toggled the default.
    pub overridden: bool,
}

/// Resolver output.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resolution {
    pub decisions: BTreeMap<u32, ReviewDecision>,
    /// Rows whose decision is `accept`, in input order.
    pub accepted: Vec<ValidatedRow>,
}

impl Resolution {
    #[must_use]
    pub fn excluded_rows(&self) -> Vec<u32> {
        self.decisions
            .values()
            .filter(|d| d.decision == Decision::Exclude)
            .map(|d| d.row_index)
            .collect()
    }
}

/// Default decision for a row given its warnings.
#[must_use]
pub fn default_decision(row_index: u32, warnings: &[Warning]) -> Decision {
    let flagged = warnings
        .iter()
        .any(|w| w.row_index == row_index && w.kind == WarningKind::ProbableDuplicate);
    if flagged {
        Decision::Exclude
    } else {
        Decision::Accept
    }
}

/// Resolve decisions.
///
/// Rows default to `accept`; rows with a `probable_duplicate` warning default
/// to `exclude`; rows listed in `overrides` get the inverse of their default.
/// Overrides naming rows that are not in `rows` are ignored.
#[must_use]
pub fn resolve_decisions(
    rows: &[ValidatedRow],
    warnings: &[Warning],
    overrides: &BTreeSet<u32>,
) -> Resolution {
    let mut resolution = Resolution::default();

    for row in rows {
        let default = default_decision(row.row_index, warnings);
        let overridden = overrides.contains(&row.row_index);
        let decision = if overridden { default.inverted() } else { default };

        resolution.decisions.insert(
            row.row_index,
            ReviewDecision {
                row_index: row.row_index,
                decision,
                overridden,
            },
        );

        if decision == Decision::Accept {
            resolution.accepted.push(row.clone());
        }
    }

    resolution
}
