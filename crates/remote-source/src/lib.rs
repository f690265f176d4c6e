// crates/remote-source/src/lib.rs
//! Remote tabular sources for the sync engine
//!
//! - `RemoteSource`: authenticate, then fetch header + rows for a range
//! - `SheetsSource`: HTTP client for the spreadsheet values API
//! - `MemorySource`: in-process grid for embedding hosts and tests
//! - `FetchedRange::into_rows`: header normalization and row mapping
//!
//! # Example
//!
//! ```rust
//! use sheetsync_source::{FetchedRange, SourceConfig};
//! use serde_json::json;
//!
//! let range = FetchedRange::from_values(vec![
//!     vec![json!("Assignee"), json!("Hours")],
//!     vec![json!("Ana"), json!(2)],
//! ]);
//! let rows = range.into_rows(&SourceConfig::new("sheet-id").column_map);
//! assert_eq!(rows[0].number("hours"), Some(2.0));
//! ```

mod config;
mod error;
mod memory;
mod range;
mod sheets;
mod traits;

pub use config::{Credentials, SourceConfig, SourceConfigUpdate, DEFAULT_RANGE};
pub use error::{SourceError, SourceResult};
pub use memory::MemorySource;
pub use range::{normalize_header, FetchedRange};
pub use sheets::{SheetsClientConfig, SheetsSource, DEFAULT_BASE_URL};
pub use traits::RemoteSource;
