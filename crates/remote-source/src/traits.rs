// crates/remote-source/src/traits.rs
//! Remote tabular source trait

use crate::config::{Credentials, SourceConfig};
use crate::error::SourceResult;
use crate::range::FetchedRange;
use std::future::Future;

/// A remote store that serves a header row plus data rows for a range
///
/// Implementations must report rejected credentials as
/// [`SourceError::Authentication`](crate::SourceError::Authentication) so
/// callers can stop retrying, and transient failures as
/// [`SourceError::Fetch`](crate::SourceError::Fetch).
pub trait RemoteSource: Send + Sync {
    /// Validates and stores credentials for later fetches
    fn authenticate(
        &self,
        credentials: &Credentials,
    ) -> impl Future<Output = SourceResult<()>> + Send;

    /// Fetches the current contents of the configured range
    fn fetch_rows(
        &self,
        config: &SourceConfig,
    ) -> impl Future<Output = SourceResult<FetchedRange>> + Send;

    /// Short name used in log lines
    fn name(&self) -> &str;
}
