use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};

#[async_trait]
pub trait LlmClient: Send + Sync {
    async fn complete(&self, prompt: &str) -> Result<String>;
}

/// Completion over a local Ollama server (`POST /api/generate`), asking for
/// a single non-streamed JSON reply.
#[derive(Clone, Debug)]
pub struct OllamaClient {
    client: Client,
    endpoint: String,
    model: String,
}

#[derive(Serialize)]
struct GenerateRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    stream: bool,
    format: &'a str,
}

#[derive(Deserialize)]
struct GenerateResponse {
    response: String,
}

impl OllamaClient {
    pub fn new(base_url: &str, model: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            endpoint: format!("{}/api/generate", base_url.trim_end_matches('/')),
            model: model.into(),
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub fn model(&self) -> &str {
        &self.model
    }
}

#[async_trait]
impl LlmClient for OllamaClient {
    async fn complete(&self, prompt: &str) -> Result<String> {
        let request =
            GenerateRequest { model: &self.model, prompt, stream: false, format: "json" };

        let response = self
            .client
            .post(&self.endpoint)
            .json(&request)
            .send()
            .await
            .with_context(|| format!("ollama request to {} failed", self.endpoint))?
            .error_for_status()
            .context("ollama returned an error status")?;

        let body = response
            .json::<GenerateResponse>()
            .await
            .context("ollama response body was not the expected json")?;
        Ok(body.response)
    }
}

#[cfg(test)]
mod tests {
    use super::{LlmClient, OllamaClient};

    #[test]
    fn endpoint_targets_generate_api() {
        let client = OllamaClient::new("http://localhost:11434/", "llama3.1");
        assert_eq!(client.endpoint(), "http://localhost:11434/api/generate");
        assert_eq!(client.model(), "llama3.1");
    }

    #[tokio::test]
    async fn unreachable_server_is_an_error() {
        let client = OllamaClient::new("http://127.0.0.1:1", "llama3.1");
        let error = client.complete("hi").await.expect_err("nothing listens on port 1");
        assert!(error.to_string().contains("ollama request"));
    }
}
