// crates/sync-engine/src/config.rs
//! Engine configuration and settings file loading

use crate::conflict::ConflictStrategy;
use crate::error::{SyncError, SyncResult};
use serde::{Deserialize, Serialize};
use sheetsync_resilience::BackoffPolicy;
use sheetsync_source::{Credentials, SourceConfig};
use std::fmt;
use std::fs;
use std::path::Path;
use std::time::Duration;

/// Environment variable consulted for an API key
pub const API_KEY_ENV: &str = "SHEETSYNC_API_KEY";
/// Environment variable consulted for a bearer token
pub const ACCESS_TOKEN_ENV: &str = "SHEETSYNC_ACCESS_TOKEN";

/// Validation error for a specific config field
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    /// Path to the field (e.g., "sync.poll_interval_ms")
    pub field: String,
    /// Human-readable error message
    pub message: String,
    /// The invalid value, if available
    pub value: Option<String>,
}

impl ValidationError {
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
            value: None,
        }
    }

    pub fn with_value(
        field: impl Into<String>,
        message: impl Into<String>,
        value: impl ToString,
    ) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
            value: Some(value.to_string()),
        }
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.value {
            Some(v) => write!(f, "{}: {} (got: {})", self.field, self.message, v),
            None => write!(f, "{}: {}", self.field, self.message),
        }
    }
}

/// Polling, retry and conflict settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Delay between successful polls in milliseconds
    #[serde(alias = "poll_interval")]
    pub poll_interval_ms: u64,

    /// Consecutive failures tolerated before the engine fails
    pub max_retries: u32,

    /// Backoff growth factor per consecutive failure
    pub backoff_multiplier: f64,

    /// Strategy applied to contested rows
    pub conflict_strategy: ConflictStrategy,

    /// Upper bound on one remote fetch in milliseconds
    #[serde(alias = "fetch_timeout")]
    pub fetch_timeout_ms: u64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 30_000,
            max_retries: 3,
            backoff_multiplier: 2.0,
            conflict_strategy: ConflictStrategy::LatestWins,
            fetch_timeout_ms: 30_000,
        }
    }
}

impl SyncConfig {
    /// Parses engine settings from a flat TOML document
    pub fn from_toml_str(contents: &str) -> SyncResult<Self> {
        Ok(toml::from_str(contents)?)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_millis(self.fetch_timeout_ms)
    }

    /// Retry schedule derived from the poll interval
    pub fn backoff(&self) -> BackoffPolicy {
        BackoffPolicy::new(self.poll_interval(), self.max_retries)
            .with_multiplier(self.backoff_multiplier)
    }

    /// Returns every problem found; empty means valid
    pub fn validate(&self) -> Result<(), Vec<ValidationError>> {
        let mut errors = Vec::new();

        if self.poll_interval_ms == 0 {
            errors.push(ValidationError::with_value(
                "sync.poll_interval_ms",
                "must be greater than zero",
                self.poll_interval_ms,
            ));
        }
        if self.max_retries == 0 {
            errors.push(ValidationError::with_value(
                "sync.max_retries",
                "must be at least 1",
                self.max_retries,
            ));
        }
        if !self.backoff_multiplier.is_finite() || self.backoff_multiplier < 1.0 {
            errors.push(ValidationError::with_value(
                "sync.backoff_multiplier",
                "must be at least 1.0",
                self.backoff_multiplier,
            ));
        }
        if self.fetch_timeout_ms == 0 {
            errors.push(ValidationError::with_value(
                "sync.fetch_timeout_ms",
                "must be greater than zero",
                self.fetch_timeout_ms,
            ));
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }

    /// Validates and folds the errors into one [`SyncError::Configuration`]
    pub fn ensure_valid(&self) -> SyncResult<()> {
        self.validate().map_err(|errors| {
            SyncError::Configuration(
                errors
                    .iter()
                    .map(ToString::to_string)
                    .collect::<Vec<_>>()
                    .join("; "),
            )
        })
    }

    /// Applies the fields set in `update`
    pub fn merge(&mut self, update: SyncConfigUpdate) {
        if let Some(v) = update.poll_interval_ms {
            self.poll_interval_ms = v;
        }
        if let Some(v) = update.max_retries {
            self.max_retries = v;
        }
        if let Some(v) = update.backoff_multiplier {
            self.backoff_multiplier = v;
        }
        if let Some(v) = update.conflict_strategy {
            self.conflict_strategy = v;
        }
        if let Some(v) = update.fetch_timeout_ms {
            self.fetch_timeout_ms = v;
        }
    }
}

/// Partial engine configuration for runtime updates
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct SyncConfigUpdate {
    pub poll_interval_ms: Option<u64>,
    pub max_retries: Option<u32>,
    pub backoff_multiplier: Option<f64>,
    pub conflict_strategy: Option<ConflictStrategy>,
    pub fetch_timeout_ms: Option<u64>,
}

impl SyncConfigUpdate {
    pub fn poll_interval_ms(mut self, ms: u64) -> Self {
        self.poll_interval_ms = Some(ms);
        self
    }

    pub fn max_retries(mut self, retries: u32) -> Self {
        self.max_retries = Some(retries);
        self
    }

    pub fn backoff_multiplier(mut self, multiplier: f64) -> Self {
        self.backoff_multiplier = Some(multiplier);
        self
    }

    pub fn conflict_strategy(mut self, strategy: ConflictStrategy) -> Self {
        self.conflict_strategy = Some(strategy);
        self
    }

    pub fn fetch_timeout_ms(mut self, ms: u64) -> Self {
        self.fetch_timeout_ms = Some(ms);
        self
    }
}

/// Contents of a `sheetsync.toml` settings file
///
/// ```toml
/// [sync]
/// poll_interval_ms = 30000
/// conflict_strategy = "merge_fields"
///
/// [source]
/// spreadsheet_id = "1AbC..."
/// range = "Hours!A1:H"
///
/// [credentials]
/// api_key = "..."
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineSettings {
    #[serde(default)]
    pub sync: SyncConfig,
    pub source: SourceConfig,
    #[serde(default)]
    pub credentials: Credentials,
}

impl EngineSettings {
    /// Parses settings without consulting the environment
    pub fn from_toml_str(contents: &str) -> SyncResult<Self> {
        Ok(toml::from_str(contents)?)
    }

    /// Reads settings from `path`, filling missing credentials from
    /// `SHEETSYNC_API_KEY` / `SHEETSYNC_ACCESS_TOKEN`
    pub fn load(path: impl AsRef<Path>) -> SyncResult<Self> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path).map_err(|e| SyncError::ConfigRead {
            path: path.to_path_buf(),
            source: e,
        })?;

        let mut settings = Self::from_toml_str(&contents)?;
        settings.apply_env_credentials(
            std::env::var(API_KEY_ENV).ok(),
            std::env::var(ACCESS_TOKEN_ENV).ok(),
        );

        log::info!("Settings loaded from {}", path.display());
        Ok(settings)
    }

    /// Uses the given secrets for whichever credential fields are unset
    pub fn apply_env_credentials(&mut self, api_key: Option<String>, access_token: Option<String>) {
        let usable = |v: Option<String>| v.filter(|s| !s.trim().is_empty());
        if self.credentials.api_key.is_none() {
            self.credentials.api_key = usable(api_key);
        }
        if self.credentials.access_token.is_none() {
            self.credentials.access_token = usable(access_token);
        }
    }

    /// Validates engine and source settings together
    pub fn validate(&self) -> Result<(), Vec<ValidationError>> {
        let mut errors = self.sync.validate().err().unwrap_or_default();

        if !self.source.is_configured() {
            errors.push(ValidationError::new("source.spreadsheet_id", "must not be empty"));
        }
        if self.source.range.trim().is_empty() {
            errors.push(ValidationError::new("source.range", "must not be empty"));
        }
        if self.credentials.is_empty() {
            errors.push(ValidationError::new(
                "credentials",
                format!("set api_key or access_token, or export {}", API_KEY_ENV),
            ));
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}
