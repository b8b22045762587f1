use async_trait::async_trait;
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use tracing::warn;

use aisle_core::domain::search::{SearchItem, SearchQuery};
use aisle_core::errors::SearchBackendError;

use crate::backend::SearchBackend;

/// Ranked retrieval over HTTP: `POST {base_url}/search` with
/// `{query, alpha, limit}`, answered by `{items: [...]}`.
///
/// No client-level timeout is set; the gateway bounds every attempt.
#[derive(Clone)]
pub struct HttpSearchBackend {
    client: Client,
    endpoint: String,
    api_key: Option<SecretString>,
}

#[derive(Serialize)]
struct SearchRequestBody<'a> {
    query: &'a str,
    alpha: f64,
    limit: usize,
}

#[derive(Deserialize)]
struct SearchResponseBody {
    #[serde(default)]
    items: Vec<SearchItem>,
}

impl HttpSearchBackend {
    pub fn new(base_url: &str, api_key: Option<SecretString>) -> Self {
        Self::with_client(Client::new(), base_url, api_key)
    }

    pub fn with_client(client: Client, base_url: &str, api_key: Option<SecretString>) -> Self {
        let endpoint = format!("{}/search", base_url.trim_end_matches('/'));
        Self { client, endpoint, api_key }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

impl std::fmt::Debug for HttpSearchBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpSearchBackend")
            .field("endpoint", &self.endpoint)
            .field("api_key", &self.api_key.as_ref().map(|_| "[redacted]"))
            .finish()
    }
}

#[async_trait]
impl SearchBackend for HttpSearchBackend {
    async fn search(&self, query: &SearchQuery) -> Result<Vec<SearchItem>, SearchBackendError> {
        let body = SearchRequestBody { query: &query.text, alpha: query.alpha, limit: query.limit };
        let mut request = self.client.post(&self.endpoint).json(&body);
        if let Some(api_key) = &self.api_key {
            request = request.bearer_auth(api_key.expose_secret());
        }

        let response = request
            .send()
            .await
            .map_err(|error| SearchBackendError::Unavailable(error.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            warn!(
                event_name = "search.backend_http_status",
                endpoint = %self.endpoint,
                status = %status,
                "search backend returned non-success status"
            );
            return Err(SearchBackendError::Unavailable(format!("http status {status}")));
        }

        let decoded = response
            .json::<SearchResponseBody>()
            .await
            .map_err(|error| SearchBackendError::InvalidResponse(error.to_string()))?;

        let mut items = decoded.items;
        items.truncate(query.limit);
        Ok(items)
    }
}
