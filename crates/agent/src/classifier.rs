//! The external classifier capability and its provider adapters.
//!
//! Providers never bound their own latency; the router wraps every call in
//! its configured timeout. A chain of providers shares that one budget.

use std::sync::Arc;

use async_trait::async_trait;
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use tracing::debug;

use aisle_core::domain::classification::{
    ClassificationResult, ClassificationTier, Entity, EntityKind, Intent,
};
use aisle_core::domain::session::ClassifierContext;
use aisle_core::domain::utterance::Utterance;
use aisle_core::errors::ClassifierError;

use crate::llm::LlmClient;

#[async_trait]
pub trait Classifier: Send + Sync {
    fn name(&self) -> &str;

    async fn classify(
        &self,
        utterance: &Utterance,
        context: &ClassifierContext,
    ) -> Result<ClassificationResult, ClassifierError>;
}

/// Wire shape shared by the LLM and HTTP adapters.
#[derive(Clone, Debug, Deserialize)]
pub struct ClassifierReply {
    pub intent: String,
    pub confidence: f64,
    #[serde(default = "neutral_alpha")]
    pub alpha: f64,
    #[serde(default)]
    pub entities: Vec<ReplyEntity>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct ReplyEntity {
    #[serde(alias = "type")]
    pub kind: String,
    pub value: String,
}

fn neutral_alpha() -> f64 {
    0.5
}

impl ClassifierReply {
    /// Unknown intent labels become `unknown`; entities of unknown kinds are
    /// dropped. Classifiers may not claim item references.
    pub fn into_result(self) -> ClassificationResult {
        let entities = self
            .entities
            .into_iter()
            .filter_map(|entity| {
                let kind = EntityKind::from_label(&entity.kind)?;
                let value = entity.value.trim();
                (kind != EntityKind::ItemRef && !value.is_empty()).then(|| Entity::new(kind, value))
            })
            .collect();

        ClassificationResult::new(
            Intent::from_label(&self.intent),
            self.confidence,
            self.alpha,
            entities,
            ClassificationTier::Classifier,
        )
    }
}

pub struct LlmClassifier {
    client: Arc<dyn LlmClient>,
    name: String,
}

impl LlmClassifier {
    pub fn new(client: Arc<dyn LlmClient>) -> Self {
        Self { client, name: "llm".to_string() }
    }

    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }
}

pub fn build_prompt(utterance: &Utterance, context: &ClassifierContext) -> String {
    let context_json = serde_json::to_string(context).unwrap_or_else(|_| "{}".to_string());
    let message_json =
        serde_json::to_string(utterance.text()).unwrap_or_else(|_| "\"\"".to_string());

    format!(
        "You classify messages sent to a grocery shopping assistant.\n\
         Reply with one JSON object and nothing else:\n\
         {{\"intent\": \"search|add_to_cart|remove_from_cart|update_quantity|view_cart|checkout|product_question|greeting|unknown\", \
         \"confidence\": 0.0-1.0, \
         \"alpha\": 0.0-1.0 (0 = exact keyword match, 1 = descriptive semantic match), \
         \"entities\": [{{\"kind\": \"product|brand|category|quantity|ordinal\", \"value\": \"...\"}}]}}\n\
         Conversation context: {context_json}\n\
         Message: {message_json}\n"
    )
}

/// Extracts the outermost JSON object from a model reply, tolerating prose
/// or code fences around it.
pub fn parse_llm_reply(raw: &str) -> Result<ClassifierReply, ClassifierError> {
    let start = raw.find('{');
    let end = raw.rfind('}');
    let json = match (start, end) {
        (Some(start), Some(end)) if start < end => &raw[start..=end],
        _ => {
            return Err(ClassifierError::InvalidResponse("reply contains no json object".to_string()))
        }
    };

    serde_json::from_str::<ClassifierReply>(json)
        .map_err(|error| ClassifierError::InvalidResponse(error.to_string()))
}

#[async_trait]
impl Classifier for LlmClassifier {
    fn name(&self) -> &str {
        &self.name
    }

    async fn classify(
        &self,
        utterance: &Utterance,
        context: &ClassifierContext,
    ) -> Result<ClassificationResult, ClassifierError> {
        let prompt = build_prompt(utterance, context);
        let raw = self
            .client
            .complete(&prompt)
            .await
            .map_err(|error| ClassifierError::Unavailable(format!("{error:#}")))?;
        Ok(parse_llm_reply(&raw)?.into_result())
    }
}

/// Calls a classification service: `POST {base_url}/classify` with
/// `{text, context}`.
#[derive(Clone)]
pub struct HttpClassifier {
    client: Client,
    endpoint: String,
    api_key: Option<SecretString>,
}

#[derive(Serialize)]
struct ClassifyRequest<'a> {
    text: &'a str,
    context: &'a ClassifierContext,
}

impl HttpClassifier {
    pub fn new(base_url: &str, api_key: Option<SecretString>) -> Self {
        Self {
            client: Client::new(),
            endpoint: format!("{}/classify", base_url.trim_end_matches('/')),
            api_key,
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl Classifier for HttpClassifier {
    fn name(&self) -> &str {
        "http"
    }

    async fn classify(
        &self,
        utterance: &Utterance,
        context: &ClassifierContext,
    ) -> Result<ClassificationResult, ClassifierError> {
        let mut request =
            self.client.post(&self.endpoint).json(&ClassifyRequest { text: utterance.text(), context });
        if let Some(api_key) = &self.api_key {
            request = request.bearer_auth(api_key.expose_secret());
        }

        let response =
            request.send().await.map_err(|error| ClassifierError::Unavailable(error.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            return Err(ClassifierError::Unavailable(format!("http status {status}")));
        }

        let reply = response
            .json::<ClassifierReply>()
            .await
            .map_err(|error| ClassifierError::InvalidResponse(error.to_string()))?;
        Ok(reply.into_result())
    }
}

/// Ordered providers; the first success wins.
pub struct ClassifierChain {
    providers: Vec<Arc<dyn Classifier>>,
}

impl ClassifierChain {
    pub fn new(providers: Vec<Arc<dyn Classifier>>) -> Self {
        Self { providers }
    }

    pub fn len(&self) -> usize {
        self.providers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }
}

#[async_trait]
impl Classifier for ClassifierChain {
    fn name(&self) -> &str {
        "chain"
    }

    async fn classify(
        &self,
        utterance: &Utterance,
        context: &ClassifierContext,
    ) -> Result<ClassificationResult, ClassifierError> {
        let mut last_error = ClassifierError::NotConfigured;
        for provider in &self.providers {
            match provider.classify(utterance, context).await {
                Ok(result) => return Ok(result),
                Err(error) => {
                    debug!(
                        event_name = "router.classifier_provider_failed",
                        provider = provider.name(),
                        error = %error,
                        "classifier provider failed; trying next"
                    );
                    last_error = error;
                }
            }
        }
        Err(last_error)
    }
}
