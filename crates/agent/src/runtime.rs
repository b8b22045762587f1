use std::sync::Arc;
use std::time::Duration;

use secrecy::SecretString;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info};

use aisle_core::config::{AppConfig, ClassifierProvider, TelemetrySinkKind};
use aisle_core::errors::RoutingError;
use aisle_core::session::SessionContextStore;
use aisle_core::telemetry::{NoopTelemetrySink, TelemetrySink, TracingTelemetrySink};
use aisle_search::{
    GatewaySettings, HttpSearchBackend, ResilientSearchGateway, SearchBackend,
    UnconfiguredSearchBackend,
};

use crate::classifier::{Classifier, ClassifierChain, HttpClassifier, LlmClassifier};
use crate::llm::OllamaClient;
use crate::orchestrator::{OrchestratorSettings, ParallelQueryOrchestrator, RouteRequest, RoutedDecision};
use crate::router::{RouterSettings, TieredIntentRouter};

/// Everything one process needs to answer shopper utterances, wired from
/// an [`AppConfig`].
pub struct AgentRuntime {
    router: Arc<TieredIntentRouter>,
    gateway: Arc<ResilientSearchGateway>,
    sessions: Arc<SessionContextStore>,
    orchestrator: ParallelQueryOrchestrator,
    telemetry: Arc<dyn TelemetrySink>,
}

impl AgentRuntime {
    pub fn from_config(config: &AppConfig) -> Self {
        let telemetry: Arc<dyn TelemetrySink> = match config.telemetry.sink {
            TelemetrySinkKind::Noop => Arc::new(NoopTelemetrySink),
            TelemetrySinkKind::Tracing => Arc::new(TracingTelemetrySink),
        };
        Self::with_parts(config, build_classifier(config), build_search_backend(config), telemetry)
    }

    /// Wires the runtime around caller-supplied seams. Timings and limits
    /// still come from `config`.
    pub fn with_parts(
        config: &AppConfig,
        classifier: Option<Arc<dyn Classifier>>,
        backend: Arc<dyn SearchBackend>,
        telemetry: Arc<dyn TelemetrySink>,
    ) -> Self {
        let sessions = Arc::new(
            SessionContextStore::in_memory(config.session.store_settings())
                .with_telemetry(telemetry.clone()),
        );
        let gateway = Arc::new(
            ResilientSearchGateway::new(backend, GatewaySettings::from_config(&config.search))
                .with_telemetry(telemetry.clone()),
        );
        let router = Arc::new(
            TieredIntentRouter::new(classifier, RouterSettings::from_config(&config.router))
                .with_telemetry(telemetry.clone()),
        );
        let orchestrator = ParallelQueryOrchestrator::new(
            router.clone(),
            gateway.clone(),
            sessions.clone(),
            OrchestratorSettings::from_config(&config.orchestrator, config.search.default_limit),
        )
        .with_telemetry(telemetry.clone());

        info!(
            event_name = "system.runtime.ready",
            classifier = router.has_classifier(),
            search_configured = config.search.base_url.is_some(),
            deadline_ms = config.orchestrator.deadline_ms,
            "routing runtime assembled"
        );

        Self { router, gateway, sessions, orchestrator, telemetry }
    }

    pub async fn route(&self, request: RouteRequest) -> Result<RoutedDecision, RoutingError> {
        self.orchestrator.route(request).await
    }

    pub fn router(&self) -> &TieredIntentRouter {
        &self.router
    }

    pub fn gateway(&self) -> &ResilientSearchGateway {
        &self.gateway
    }

    pub fn sessions(&self) -> &SessionContextStore {
        &self.sessions
    }

    pub fn orchestrator(&self) -> &ParallelQueryOrchestrator {
        &self.orchestrator
    }

    pub fn telemetry(&self) -> Arc<dyn TelemetrySink> {
        self.telemetry.clone()
    }

    pub async fn evict_idle_sessions(&self) -> usize {
        self.sessions.evict_idle().await
    }

    /// Periodically drops idle sessions until the handle is aborted.
    pub fn spawn_session_janitor(&self, every: Duration) -> JoinHandle<()> {
        let sessions = self.sessions.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let removed = sessions.evict_idle().await;
                if removed > 0 {
                    debug!(event_name = "session.janitor.evicted", removed, "evicted idle sessions");
                }
            }
        })
    }
}

fn build_search_backend(config: &AppConfig) -> Arc<dyn SearchBackend> {
    match config.search.base_url.as_deref() {
        Some(base_url) => Arc::new(HttpSearchBackend::new(base_url, config.search.api_key.clone())),
        None => Arc::new(UnconfiguredSearchBackend),
    }
}

fn build_classifier(config: &AppConfig) -> Option<Arc<dyn Classifier>> {
    let classifier = &config.classifier;
    let primary = build_provider(
        classifier.provider,
        classifier.base_url.as_deref(),
        classifier.api_key.as_ref(),
        &classifier.model,
    );
    let secondary = classifier.fallback_provider.and_then(|provider| {
        build_provider(
            provider,
            classifier.fallback_base_url.as_deref(),
            classifier.api_key.as_ref(),
            &classifier.model,
        )
    });

    match (primary, secondary) {
        (Some(primary), Some(secondary)) => {
            Some(Arc::new(ClassifierChain::new(vec![primary, secondary])))
        }
        (primary, secondary) => primary.or(secondary),
    }
}

fn build_provider(
    provider: ClassifierProvider,
    base_url: Option<&str>,
    api_key: Option<&SecretString>,
    model: &str,
) -> Option<Arc<dyn Classifier>> {
    let base_url = base_url?;
    match provider {
        ClassifierProvider::None => None,
        ClassifierProvider::Http => Some(Arc::new(HttpClassifier::new(base_url, api_key.cloned()))),
        ClassifierProvider::Ollama => {
            let client = OllamaClient::new(base_url, model);
            Some(Arc::new(LlmClassifier::new(Arc::new(client)).named("ollama")))
        }
    }
}
