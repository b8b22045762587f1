use async_trait::async_trait;

use aisle_core::domain::search::{SearchItem, SearchQuery};
use aisle_core::errors::SearchBackendError;

/// One ranked retrieval call. Only the gateway holds a backend.
#[async_trait]
pub trait SearchBackend: Send + Sync {
    async fn search(&self, query: &SearchQuery) -> Result<Vec<SearchItem>, SearchBackendError>;
}

/// Stands in when no search endpoint is configured; every call fails so the
/// gateway answers from cache or the static set.
#[derive(Clone, Copy, Debug, Default)]
pub struct UnconfiguredSearchBackend;

#[async_trait]
impl SearchBackend for UnconfiguredSearchBackend {
    async fn search(&self, _query: &SearchQuery) -> Result<Vec<SearchItem>, SearchBackendError> {
        Err(SearchBackendError::Unavailable("no search endpoint configured".to_string()))
    }
}
