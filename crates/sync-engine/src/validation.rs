// crates/sync-engine/src/validation.rs
//! Schema checks over resolved rows
//!
//! Missing `assignee`, `hours` or `date` is a warning. A present but
//! non-numeric `hours` or an unparsable `date` is an error and marks the
//! whole batch invalid. Rows are never modified.

use crate::conflict::ResolvedRow;
use crate::error::{SyncError, SyncResult};
use serde::{Deserialize, Serialize};
use sheetsync_core::{parse_timestamp, IdentityKey, ASSIGNEE, DATE, HOURS};

/// Fields every resolved row should carry
pub const EXPECTED_FIELDS: [&str; 3] = [ASSIGNEE, HOURS, DATE];

/// One finding against one row
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationIssue {
    pub id: IdentityKey,
    pub field: String,
    pub message: String,
}

impl ValidationIssue {
    fn new(id: &IdentityKey, field: &str, message: impl Into<String>) -> Self {
        Self {
            id: id.clone(),
            field: field.to_string(),
            message: message.into(),
        }
    }
}

/// Result of validating a resolved batch
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationReport {
    pub is_valid: bool,
    pub errors: Vec<ValidationIssue>,
    pub warnings: Vec<ValidationIssue>,
    /// Number of rows inspected
    pub checked: usize,
}

impl ValidationReport {
    /// Converts a failed report into [`SyncError::Validation`]
    pub fn into_result(self) -> SyncResult<Self> {
        if self.is_valid {
            return Ok(self);
        }
        let summary = self
            .errors
            .iter()
            .map(|e| format!("{} {}: {}", e.id, e.field, e.message))
            .collect::<Vec<_>>()
            .join("; ");
        Err(SyncError::Validation(summary))
    }
}

/// Validates resolved rows without changing them
pub fn validate_resolution(rows: &[ResolvedRow]) -> ValidationReport {
    let mut errors = Vec::new();
    let mut warnings = Vec::new();

    for entry in rows {
        let row = &entry.data;

        for field in EXPECTED_FIELDS {
            if !row.has(field) {
                warnings.push(ValidationIssue::new(&entry.id, field, "missing field"));
            }
        }

        if row.has(HOURS) && row.number(HOURS).is_none() {
            errors.push(ValidationIssue::new(&entry.id, HOURS, "hours must be numeric"));
        }

        if let Some(date) = row.get(DATE).filter(|_| row.has(DATE)) {
            if parse_timestamp(date).is_none() {
                errors.push(ValidationIssue::new(&entry.id, DATE, "unparsable date"));
            }
        }
    }

    ValidationReport {
        is_valid: errors.is_empty(),
        errors,
        warnings,
        checked: rows.len(),
    }
}
