// crates/core/src/lib.rs
//! Row model shared by the sheet sync crates
//!
//! - `Row`: field name to scalar value for one volunteer activity record
//! - `IdentityKey`: `assignee|date|project|branch` composite key
//! - Row and dataset checksums used as change gates
//! - Date parsing for spreadsheet cells
//!
//! # Example
//!
//! ```rust
//! use sheetsync_core::{Row, ASSIGNEE, BRANCH, DATE, HOURS, PROJECT};
//!
//! let row = Row::new()
//!     .with(ASSIGNEE, "Ana")
//!     .with(DATE, "2025-01-01")
//!     .with(PROJECT, "Pantry")
//!     .with(BRANCH, "North")
//!     .with(HOURS, 2);
//!
//! assert_eq!(row.identity_key().as_str(), "Ana|2025-01-01|Pantry|North");
//! ```

mod checksum;
mod error;
mod row;
mod time;

pub use checksum::{dataset_checksum, row_checksum};
pub use error::{CoreError, CoreResult};
pub use row::{
    number_value, render_value, IdentityKey, Row, ASSIGNEE, BRANCH, DATE, HOURS, IS_MEMBER,
    PROJECT, REQUIRED_FIELDS,
};
pub use time::{parse_date, parse_timestamp};

/// Cell value as delivered by the remote source
pub type CellValue = serde_json::Value;
