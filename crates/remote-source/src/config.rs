// crates/remote-source/src/config.rs
//! Credentials and source addressing

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Default range read when none is configured
pub const DEFAULT_RANGE: &str = "Sheet1!A1:Z";

/// Credentials presented to the remote source
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credentials {
    /// API key for public or key-restricted sheets
    #[serde(default)]
    pub api_key: Option<String>,
    /// OAuth bearer token
    #[serde(default)]
    pub access_token: Option<String>,
}

impl Credentials {
    /// Credentials carrying an API key
    pub fn api_key(key: impl Into<String>) -> Self {
        Self {
            api_key: Some(key.into()),
            access_token: None,
        }
    }

    /// Credentials carrying a bearer token
    pub fn access_token(token: impl Into<String>) -> Self {
        Self {
            api_key: None,
            access_token: Some(token.into()),
        }
    }

    /// Returns true if neither secret is present
    pub fn is_empty(&self) -> bool {
        let blank = |s: &Option<String>| s.as_deref().map_or(true, |v| v.trim().is_empty());
        blank(&self.api_key) && blank(&self.access_token)
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let redact = |s: &Option<String>| s.as_ref().map(|_| "<redacted>");
        f.debug_struct("Credentials")
            .field("api_key", &redact(&self.api_key))
            .field("access_token", &redact(&self.access_token))
            .finish()
    }
}

/// Which spreadsheet range to poll
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceConfig {
    /// Spreadsheet identifier
    pub spreadsheet_id: String,
    /// A1-notation range including the header row
    #[serde(default = "default_range")]
    pub range: String,
    /// Normalized header name to row field name
    #[serde(default)]
    pub column_map: BTreeMap<String, String>,
}

fn default_range() -> String {
    DEFAULT_RANGE.to_string()
}

impl SourceConfig {
    /// Creates a config for the default range
    pub fn new(spreadsheet_id: impl Into<String>) -> Self {
        Self {
            spreadsheet_id: spreadsheet_id.into(),
            range: default_range(),
            column_map: BTreeMap::new(),
        }
    }

    /// Sets the range
    pub fn with_range(mut self, range: impl Into<String>) -> Self {
        self.range = range.into();
        self
    }

    /// Maps a normalized header onto a row field
    pub fn with_column(mut self, header: impl Into<String>, field: impl Into<String>) -> Self {
        self.column_map.insert(header.into(), field.into());
        self
    }

    /// Key under which snapshots of this range are stored
    pub fn source_key(&self) -> String {
        format!("{}:{}", self.spreadsheet_id, self.range)
    }

    /// Returns true if a spreadsheet id is present
    pub fn is_configured(&self) -> bool {
        !self.spreadsheet_id.trim().is_empty()
    }

    /// Applies the fields set in `update`
    pub fn merge(&mut self, update: SourceConfigUpdate) {
        if let Some(id) = update.spreadsheet_id {
            self.spreadsheet_id = id;
        }
        if let Some(range) = update.range {
            self.range = range;
        }
        if let Some(map) = update.column_map {
            self.column_map = map;
        }
    }
}

/// Partial source configuration for runtime updates
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct SourceConfigUpdate {
    pub spreadsheet_id: Option<String>,
    pub range: Option<String>,
    pub column_map: Option<BTreeMap<String, String>>,
}
