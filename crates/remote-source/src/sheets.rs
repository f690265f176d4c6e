// crates/remote-source/src/sheets.rs
//! HTTP source for the spreadsheet values API

use crate::config::{Credentials, SourceConfig};
use crate::error::{SourceError, SourceResult};
use crate::range::FetchedRange;
use crate::traits::RemoteSource;
use reqwest::{Client as ReqwestClient, StatusCode, Url};
use serde::Deserialize;
use serde_json::Value;
use std::sync::RwLock;
use std::time::Duration;

/// Public endpoint of the spreadsheet values API
pub const DEFAULT_BASE_URL: &str = "https://sheets.googleapis.com";

/// HTTP client configuration
#[derive(Debug, Clone)]
pub struct SheetsClientConfig {
    /// API root, overridable for proxies and test servers
    pub base_url: String,
    /// Request timeout
    pub timeout: Duration,
    /// User agent string
    pub user_agent: String,
}

impl Default for SheetsClientConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            timeout: Duration::from_secs(30),
            user_agent: format!("sheetsync/{}", env!("CARGO_PKG_VERSION")),
        }
    }
}

#[derive(Debug, Deserialize)]
struct ValueRange {
    #[serde(default)]
    values: Vec<Vec<Value>>,
}

#[derive(Debug, Default, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    error: ApiError,
}

#[derive(Debug, Default, Deserialize)]
struct ApiError {
    #[serde(default)]
    message: String,
    #[serde(default)]
    status: String,
    #[serde(default)]
    details: Vec<ErrorDetail>,
}

#[derive(Debug, Deserialize)]
struct ErrorDetail {
    #[serde(default)]
    reason: Option<String>,
}

/// Reasons the API reports for a rejected key or token
const AUTH_REASONS: &[&str] = &["API_KEY_INVALID", "API_KEY_EXPIRED"];

/// Maps a non-success response onto a source error
///
/// Invalid keys come back as 400 with an `API_KEY_INVALID` reason rather
/// than 401, so the body decides the category as well as the status.
fn status_error(status: StatusCode, body: &str) -> SourceError {
    let parsed: ErrorBody = serde_json::from_str(body).unwrap_or_default();
    let api = parsed.error;

    let detail = if api.message.is_empty() {
        status.canonical_reason().unwrap_or("Unknown").to_string()
    } else {
        api.message.clone()
    };
    let message = format!("HTTP {}: {}", status.as_u16(), detail);

    let rejected_key = api
        .details
        .iter()
        .filter_map(|d| d.reason.as_deref())
        .any(|reason| AUTH_REASONS.contains(&reason));

    if status == StatusCode::UNAUTHORIZED
        || status == StatusCode::FORBIDDEN
        || api.status == "UNAUTHENTICATED"
        || api.status == "PERMISSION_DENIED"
        || rejected_key
    {
        SourceError::Authentication(message)
    } else {
        SourceError::Fetch(message)
    }
}

/// Reads ranges from the spreadsheet values API
pub struct SheetsSource {
    inner: ReqwestClient,
    config: SheetsClientConfig,
    credentials: RwLock<Option<Credentials>>,
}

impl SheetsSource {
    /// Creates a source with default configuration
    pub fn new() -> SourceResult<Self> {
        Self::with_config(SheetsClientConfig::default())
    }

    /// Creates a source with custom configuration
    pub fn with_config(config: SheetsClientConfig) -> SourceResult<Self> {
        Url::parse(&config.base_url)
            .map_err(|e| SourceError::Configuration(format!("invalid base url: {}", e)))?;

        let client = ReqwestClient::builder()
            .timeout(config.timeout)
            .user_agent(&config.user_agent)
            .build()
            .map_err(|e| SourceError::Configuration(e.to_string()))?;

        Ok(Self {
            inner: client,
            config,
            credentials: RwLock::new(None),
        })
    }

    /// Builds the values URL for a range
    pub fn values_url(&self, source: &SourceConfig, credentials: &Credentials) -> SourceResult<Url> {
        if !source.is_configured() {
            return Err(SourceError::Configuration(
                "spreadsheet id is required".to_string(),
            ));
        }

        let mut url = Url::parse(&self.config.base_url)
            .map_err(|e| SourceError::Configuration(format!("invalid base url: {}", e)))?;

        url.path_segments_mut()
            .map_err(|_| SourceError::Configuration("base url cannot hold a path".to_string()))?
            .pop_if_empty()
            .extend(["v4", "spreadsheets", source.spreadsheet_id.trim(), "values"])
            .push(&source.range);

        {
            let mut query = url.query_pairs_mut();
            query.append_pair("majorDimension", "ROWS");
            query.append_pair("valueRenderOption", "UNFORMATTED_VALUE");
            query.append_pair("dateTimeRenderOption", "FORMATTED_STRING");
            if let Some(key) = credentials.api_key.as_deref().filter(|k| !k.trim().is_empty()) {
                query.append_pair("key", key);
            }
        }

        Ok(url)
    }

    fn current_credentials(&self) -> SourceResult<Credentials> {
        self.credentials
            .read()
            .map_err(|_| SourceError::Fetch("credential lock poisoned".to_string()))?
            .clone()
            .ok_or_else(|| SourceError::Authentication("not authenticated".to_string()))
    }
}

impl RemoteSource for SheetsSource {
    async fn authenticate(&self, credentials: &Credentials) -> SourceResult<()> {
        if credentials.is_empty() {
            return Err(SourceError::Authentication(
                "an api key or access token is required".to_string(),
            ));
        }

        let mut stored = self
            .credentials
            .write()
            .map_err(|_| SourceError::Authentication("credential lock poisoned".to_string()))?;
        *stored = Some(credentials.clone());

        log::debug!("Stored credentials for {}", self.config.base_url);
        Ok(())
    }

    async fn fetch_rows(&self, config: &SourceConfig) -> SourceResult<FetchedRange> {
        let credentials = self.current_credentials()?;
        let url = self.values_url(config, &credentials)?;

        let mut request = self.inner.get(url);
        if let Some(token) = credentials.access_token.as_deref().filter(|t| !t.trim().is_empty()) {
            request = request.bearer_auth(token);
        }

        let response = request.send().await?;
        let status = response.status();

        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(status_error(status, &body));
        }

        let body: ValueRange = response
            .json()
            .await
            .map_err(|e| SourceError::InvalidResponse(e.to_string()))?;

        let range = FetchedRange::from_values(body.values);
        log::debug!(
            "Fetched {} rows from {}",
            range.len(),
            config.source_key()
        );
        Ok(range)
    }

    fn name(&self) -> &str {
        "sheets"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_values_url_with_api_key() {
        let source = SheetsSource::new().expect("Failed to create source");
        let config = SourceConfig::new("sheet-123").with_range("Volunteer Hours!A1:F");

        let url = source
            .values_url(&config, &Credentials::api_key("k-1"))
            .unwrap();

        assert_eq!(url.host_str(), Some("sheets.googleapis.com"));
        assert!(url.path().starts_with("/v4/spreadsheets/sheet-123/values/"));
        assert!(url.path().contains("Volunteer%20Hours"));
        assert!(url.query().unwrap().contains("key=k-1"));
        assert!(url.query().unwrap().contains("valueRenderOption=UNFORMATTED_VALUE"));
    }

    #[test]
    fn test_values_url_with_token_has_no_key() {
        let source = SheetsSource::new().expect("Failed to create source");
        let url = source
            .values_url(&SourceConfig::new("abc"), &Credentials::access_token("t"))
            .unwrap();
        assert!(!url.query().unwrap().contains("key="));
    }

    #[test]
    fn test_values_url_requires_id() {
        let source = SheetsSource::new().expect("Failed to create source");
        let result = source.values_url(&SourceConfig::new("  "), &Credentials::api_key("k"));
        assert!(matches!(result, Err(SourceError::Configuration(_))));
    }

    #[test]
    fn test_invalid_base_url() {
        let config = SheetsClientConfig {
            base_url: "not a url".to_string(),
            ..Default::default()
        };
        assert!(SheetsSource::with_config(config).is_err());
    }

    #[tokio::test]
    async fn test_authenticate_rejects_empty_credentials() {
        let source = SheetsSource::new().expect("Failed to create source");
        let result = source.authenticate(&Credentials::default()).await;
        assert!(matches!(result, Err(SourceError::Authentication(_))));
    }

    #[tokio::test]
    async fn test_fetch_requires_authentication() {
        let source = SheetsSource::new().expect("Failed to create source");
        let result = source.fetch_rows(&SourceConfig::new("abc")).await;
        assert!(matches!(result, Err(SourceError::Authentication(_))));
    }

    #[test]
    fn test_invalid_api_key_is_authentication_error() {
        let body = r#"{
            "error": {
                "code": 400,
                "message": "API key not valid. Please pass a valid API key.",
                "status": "INVALID_ARGUMENT",
                "details": [{
                    "@type": "type.googleapis.com/google.rpc.ErrorInfo",
                    "reason": "API_KEY_INVALID",
                    "domain": "googleapis.com"
                }]
            }
        }"#;

        match status_error(StatusCode::BAD_REQUEST, body) {
            SourceError::Authentication(message) => {
                assert!(message.starts_with("HTTP 400"));
                assert!(message.contains("API key not valid"));
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn test_unauthenticated_status_is_authentication_error() {
        let body = r#"{"error": {"code": 400, "message": "bad token", "status": "UNAUTHENTICATED"}}"#;
        assert!(matches!(
            status_error(StatusCode::BAD_REQUEST, body),
            SourceError::Authentication(_)
        ));
    }

    #[test]
    fn test_other_bad_request_is_fetch_error() {
        let body = r#"{"error": {"code": 400, "message": "Unable to parse range: Nope!A1", "status": "INVALID_ARGUMENT"}}"#;
        match status_error(StatusCode::BAD_REQUEST, body) {
            SourceError::Fetch(message) => assert!(message.contains("Unable to parse range")),
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn test_status_error_without_body() {
        assert!(matches!(
            status_error(StatusCode::FORBIDDEN, ""),
            SourceError::Authentication(_)
        ));
        match status_error(StatusCode::SERVICE_UNAVAILABLE, "<html>down</html>") {
            SourceError::Fetch(message) => assert_eq!(message, "HTTP 503: Service Unavailable"),
            other => panic!("unexpected error: {:?}", other),
        }
    }
}
