//! Entry point for one shopper utterance.
//!
//! Classification and a provisional search (using an alpha estimated from
//! the text alone) run concurrently under one outer deadline. The
//! provisional search is always polled first. Classification that misses
//! its sub-deadline is abandoned in favour of the fallback tier; a slow or
//! failed classification never discards a finished search. When the
//! authoritative alpha differs materially from the provisional one and time
//! remains, exactly one corrected search is issued.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::time::Instant;
use tracing::{debug, info, warn};
use uuid::Uuid;

use aisle_core::config::OrchestratorConfig;
use aisle_core::domain::classification::{unit_interval, ClassificationResult, ClassificationTier};
use aisle_core::domain::search::{ResultOrigin, SearchResultSet};
use aisle_core::domain::session::{SessionContext, Turn};
use aisle_core::domain::utterance::{SessionId, UserId, Utterance};
use aisle_core::errors::RoutingError;
use aisle_core::session::SessionContextStore;
use aisle_core::telemetry::{NoopTelemetrySink, TelemetryEvent, TelemetryKind, TelemetrySink};
use aisle_search::ResilientSearchGateway;

use crate::alpha::estimate_alpha;
use crate::router::TieredIntentRouter;

#[derive(Clone, Debug)]
pub struct OrchestratorSettings {
    pub deadline: Duration,
    pub classification_budget: Duration,
    pub alpha_materiality_threshold: f64,
    pub min_correction_budget: Duration,
    pub default_limit: usize,
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self {
            deadline: Duration::from_millis(800),
            classification_budget: Duration::from_millis(450),
            alpha_materiality_threshold: 0.2,
            min_correction_budget: Duration::from_millis(100),
            default_limit: 10,
        }
    }
}

impl OrchestratorSettings {
    pub fn from_config(config: &OrchestratorConfig, default_limit: usize) -> Self {
        Self {
            deadline: config.deadline(),
            classification_budget: config.classification_budget(),
            alpha_materiality_threshold: config.alpha_materiality_threshold,
            min_correction_budget: config.min_correction_budget(),
            default_limit,
        }
    }
}

/// Where the alpha of the returned results came from.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AlphaSource {
    Heuristic,
    Classification,
    Override,
}

impl AlphaSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Heuristic => "heuristic",
            Self::Classification => "classification",
            Self::Override => "override",
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct RouteOverrides {
    /// Replaces the estimated alpha and disables correction.
    pub alpha: Option<f64>,
    pub limit: Option<usize>,
    pub deadline: Option<Duration>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct RouteTimings {
    pub classification_ms: Option<u64>,
    pub provisional_search_ms: Option<u64>,
    pub corrected_search_ms: Option<u64>,
    pub total_ms: u64,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct RoutedDecision {
    pub correlation_id: String,
    pub classification: ClassificationResult,
    pub results: SearchResultSet,
    pub heuristic_alpha: f64,
    pub which_alpha_used: f64,
    pub alpha_source: AlphaSource,
    pub corrected: bool,
    pub classification_abandoned: bool,
    pub degraded: bool,
    pub timings: RouteTimings,
}

#[derive(Clone, Debug)]
pub struct RouteRequest {
    pub text: String,
    pub session_id: SessionId,
    pub user_id: Option<UserId>,
    pub overrides: RouteOverrides,
}

impl RouteRequest {
    pub fn new(text: impl Into<String>, session_id: SessionId) -> Self {
        Self { text: text.into(), session_id, user_id: None, overrides: RouteOverrides::default() }
    }

    pub fn with_user(mut self, user_id: Option<UserId>) -> Self {
        self.user_id = user_id;
        self
    }

    pub fn with_overrides(mut self, overrides: RouteOverrides) -> Self {
        self.overrides = overrides;
        self
    }
}

pub struct ParallelQueryOrchestrator {
    router: Arc<TieredIntentRouter>,
    gateway: Arc<ResilientSearchGateway>,
    sessions: Arc<SessionContextStore>,
    settings: OrchestratorSettings,
    telemetry: Arc<dyn TelemetrySink>,
}

impl ParallelQueryOrchestrator {
    pub fn new(
        router: Arc<TieredIntentRouter>,
        gateway: Arc<ResilientSearchGateway>,
        sessions: Arc<SessionContextStore>,
        settings: OrchestratorSettings,
    ) -> Self {
        Self { router, gateway, sessions, settings, telemetry: Arc::new(NoopTelemetrySink) }
    }

    pub fn with_telemetry(mut self, telemetry: Arc<dyn TelemetrySink>) -> Self {
        self.telemetry = telemetry;
        self
    }

    pub fn settings(&self) -> &OrchestratorSettings {
        &self.settings
    }

    /// Loads the session, routes within the deadline, then records the turn
    /// and any reusable results with whatever time is left.
    pub async fn route(&self, request: RouteRequest) -> Result<RoutedDecision, RoutingError> {
        let started = Instant::now();
        let deadline = request.overrides.deadline.unwrap_or(self.settings.deadline);
        let utterance = Utterance::new(request.text, request.session_id).with_user(request.user_id);

        let context = match tokio::time::timeout(deadline, self.sessions.get(utterance.session_id())).await {
            Ok(context) => context,
            Err(_) => SessionContext::new(utterance.session_id().clone(), self.sessions.settings().limits),
        };

        let remaining = deadline.saturating_sub(started.elapsed());
        let decision = self
            .run(&utterance, &context, remaining, &request.overrides, new_correlation_id())
            .await?;

        let write_budget = deadline.saturating_sub(started.elapsed());
        if write_budget.is_zero()
            || tokio::time::timeout(write_budget, self.record(&utterance, &decision)).await.is_err()
        {
            debug!(
                event_name = "orchestrator.session_write_skipped",
                correlation_id = %decision.correlation_id,
                session_id = %utterance.session_id(),
                "no time left to record the turn"
            );
        }

        Ok(decision)
    }

    pub async fn route_and_search(
        &self,
        utterance: &Utterance,
        context: &SessionContext,
        deadline: Duration,
    ) -> Result<RoutedDecision, RoutingError> {
        self.run(utterance, context, deadline, &RouteOverrides::default(), new_correlation_id()).await
    }

    pub async fn route_and_search_with(
        &self,
        utterance: &Utterance,
        context: &SessionContext,
        deadline: Duration,
        overrides: &RouteOverrides,
    ) -> Result<RoutedDecision, RoutingError> {
        self.run(utterance, context, deadline, overrides, new_correlation_id()).await
    }

    async fn run(
        &self,
        utterance: &Utterance,
        context: &SessionContext,
        deadline: Duration,
        overrides: &RouteOverrides,
        correlation_id: String,
    ) -> Result<RoutedDecision, RoutingError> {
        let started = Instant::now();
        let outer_deadline = started + deadline;
        let classification_deadline = started + self.settings.classification_budget.min(deadline);
        let text = utterance.text();
        let limit = overrides.limit.filter(|limit| *limit > 0).unwrap_or(self.settings.default_limit);

        let heuristic_alpha = estimate_alpha(text);
        let (provisional_alpha, provisional_source) = match overrides.alpha {
            Some(alpha) => (unit_interval(alpha), AlphaSource::Override),
            None => (heuristic_alpha, AlphaSource::Heuristic),
        };

        let search = self.gateway.search(text, provisional_alpha, limit);
        let classify = self.router.classify(utterance, context);
        let classification_timer = tokio::time::sleep_until(classification_deadline);
        let outer_timer = tokio::time::sleep_until(outer_deadline);
        tokio::pin!(search, classify, classification_timer, outer_timer);

        let mut timings = RouteTimings::default();
        let mut provisional: Option<SearchResultSet> = None;
        let mut classification: Option<ClassificationResult> = None;
        let mut abandoned = false;

        while provisional.is_none() || classification.is_none() {
            tokio::select! {
                biased;
                results = &mut search, if provisional.is_none() => {
                    timings.provisional_search_ms = Some(elapsed_ms(started));
                    provisional = Some(results);
                }
                result = &mut classify, if classification.is_none() => {
                    timings.classification_ms = Some(elapsed_ms(started));
                    classification = Some(result);
                }
                _ = &mut classification_timer, if classification.is_none() => {
                    warn!(
                        event_name = "orchestrator.classification_abandoned",
                        correlation_id = %correlation_id,
                        session_id = %utterance.session_id(),
                        budget_ms = self.settings.classification_budget.as_millis() as u64,
                        "classification missed its budget; using fallback tier"
                    );
                    abandoned = true;
                    classification = Some(self.router.fallback_only(utterance, context));
                }
                _ = &mut outer_timer => break,
            }
        }

        let Some(mut results) = provisional else {
            let elapsed = elapsed_ms(started);
            warn!(
                event_name = "orchestrator.deadline_exceeded",
                correlation_id = %correlation_id,
                session_id = %utterance.session_id(),
                deadline_ms = deadline.as_millis() as u64,
                elapsed_ms = elapsed,
                "deadline exhausted with no usable result"
            );
            self.telemetry.emit(
                TelemetryEvent::new(TelemetryKind::DeadlineExceeded)
                    .with_correlation(correlation_id.clone())
                    .with_session(utterance.session_id().to_string())
                    .with_metadata("deadline_ms", deadline.as_millis()),
            );
            return Err(RoutingError::OrchestratorDeadlineExceeded {
                deadline_ms: deadline.as_millis() as u64,
                elapsed_ms: elapsed,
                correlation_id,
            });
        };
        let classification = match classification {
            Some(classification) => classification,
            None => {
                abandoned = true;
                self.router.fallback_only(utterance, context)
            }
        };

        let mut which_alpha_used = provisional_alpha;
        let mut alpha_source = provisional_source;
        let mut corrected = false;

        let authoritative_alpha = classification.alpha();
        let material = (authoritative_alpha - provisional_alpha).abs()
            > self.settings.alpha_materiality_threshold;
        if provisional_source != AlphaSource::Override
            && material
            && classification.intent().uses_search_results()
        {
            let remaining = outer_deadline.saturating_duration_since(Instant::now());
            if remaining < self.settings.min_correction_budget {
                debug!(
                    event_name = "orchestrator.correction_skipped",
                    correlation_id = %correlation_id,
                    remaining_ms = remaining.as_millis() as u64,
                    "not enough time left for a corrected search"
                );
            } else {
                let correction =
                    self.gateway.search(text, authoritative_alpha, limit);
                match tokio::time::timeout_at(outer_deadline, correction).await {
                    Ok(corrected_results) => {
                        timings.corrected_search_ms = Some(elapsed_ms(started));
                        if corrected_results.is_degraded() && !results.is_degraded() {
                            debug!(
                                event_name = "orchestrator.correction_degraded",
                                correlation_id = %correlation_id,
                                origin = corrected_results.origin.as_str(),
                                "corrected search degraded; keeping live provisional results"
                            );
                        } else {
                            results = corrected_results;
                            which_alpha_used = authoritative_alpha;
                            alpha_source = AlphaSource::Classification;
                            corrected = true;
                            self.telemetry.emit(
                                TelemetryEvent::new(TelemetryKind::CorrectedSearch)
                                    .with_correlation(correlation_id.clone())
                                    .with_session(utterance.session_id().to_string())
                                    .with_metadata("provisional_alpha", provisional_alpha)
                                    .with_metadata("corrected_alpha", authoritative_alpha),
                            );
                        }
                    }
                    Err(_) => {
                        debug!(
                            event_name = "orchestrator.correction_abandoned",
                            correlation_id = %correlation_id,
                            "corrected search did not finish before the deadline"
                        );
                    }
                }
            }
        }

        let fallback_answered =
            classification.answered_by() == ClassificationTier::Fallback && !utterance.is_blank();
        let degraded = results.is_degraded() || abandoned || fallback_answered;
        timings.total_ms = elapsed_ms(started);

        info!(
            event_name = "orchestrator.route_completed",
            correlation_id = %correlation_id,
            session_id = %utterance.session_id(),
            intent = classification.intent().as_str(),
            tier = classification.tier().as_str(),
            answered_by = classification.answered_by().as_str(),
            alpha = which_alpha_used,
            alpha_source = alpha_source.as_str(),
            origin = results.origin.as_str(),
            degraded,
            total_ms = timings.total_ms,
            "route completed"
        );
        self.telemetry.emit(
            TelemetryEvent::new(TelemetryKind::RouteCompleted)
                .with_correlation(correlation_id.clone())
                .with_session(utterance.session_id().to_string())
                .with_metadata("tier", classification.tier().as_str())
                .with_metadata("degraded", degraded)
                .with_metadata("total_ms", timings.total_ms),
        );

        Ok(RoutedDecision {
            correlation_id,
            classification,
            results,
            heuristic_alpha,
            which_alpha_used,
            alpha_source,
            corrected,
            classification_abandoned: abandoned,
            degraded,
            timings,
        })
    }

    async fn record(&self, utterance: &Utterance, decision: &RoutedDecision) {
        if utterance.is_blank() {
            return;
        }
        let session_id = utterance.session_id();
        let intent = decision.classification.intent();

        let turn = self.sessions.record_turn(session_id, Turn::shopper(utterance.text(), Some(intent)));
        let results = async {
            let reusable = decision.results.origin != ResultOrigin::StaticFallback
                && !decision.results.is_empty();
            if intent.uses_search_results() && reusable {
                self.sessions.append_search_results(session_id, decision.results.items.clone()).await;
            }
        };
        let entities = async {
            let entities = decision.classification.entities();
            if !entities.is_empty() {
                self.sessions.remember_entities(session_id, entities.to_vec()).await;
            }
        };

        tokio::join!(turn, results, entities);
    }
}

fn new_correlation_id() -> String {
    format!("req_{}", Uuid::new_v4().simple())
}

fn elapsed_ms(started: Instant) -> u64 {
    started.elapsed().as_millis() as u64
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    use async_trait::async_trait;

    use aisle_core::domain::classification::{ClassificationResult, ClassificationTier, Intent};
    use aisle_core::domain::search::{ResultOrigin, SearchItem, SearchQuery};
    use aisle_core::domain::session::{ClassifierContext, SessionContext, SessionLimits};
    use aisle_core::domain::utterance::{SessionId, Utterance};
    use aisle_core::errors::{ClassifierError, RoutingError, SearchBackendError};
    use aisle_core::session::{SessionContextStore, SessionStoreSettings};
    use aisle_core::telemetry::{InMemoryTelemetrySink, TelemetryKind};
    use aisle_search::{GatewaySettings, ResilientSearchGateway, RetryPolicy, SearchBackend};

    use super::{
        AlphaSource, OrchestratorSettings, ParallelQueryOrchestrator, RouteOverrides, RouteRequest,
    };
    use crate::classifier::Classifier;
    use crate::router::{RouterSettings, TieredIntentRouter};

    /// Records the alpha of every call. Calls with alpha above
    /// `fail_above` fail; `delay` is applied before answering.
    struct RecordingBackend {
        alphas: Mutex<Vec<f64>>,
        delay: Duration,
        fail_above: Option<f64>,
    }

    impl RecordingBackend {
        fn new(delay: Duration, fail_above: Option<f64>) -> Arc<Self> {
            Arc::new(Self { alphas: Mutex::new(Vec::new()), delay, fail_above })
        }

        fn alphas(&self) -> Vec<f64> {
            self.alphas.lock().map(|alphas| alphas.clone()).unwrap_or_default()
        }
    }

    #[async_trait]
    impl SearchBackend for RecordingBackend {
        async fn search(&self, query: &SearchQuery) -> Result<Vec<SearchItem>, SearchBackendError> {
            if let Ok(mut alphas) = self.alphas.lock() {
                alphas.push(query.alpha);
            }
            tokio::time::sleep(self.delay).await;
            if self.fail_above.is_some_and(|limit| query.alpha > limit) {
                return Err(SearchBackendError::Unavailable("down".to_string()));
            }
            Ok((0..query.limit)
                .map(|index| SearchItem::new(format!("sku-{index}"), format!("{} {index}", query.text)))
                .collect())
        }
    }

    struct StubClassifier {
        intent: Intent,
        alpha: f64,
        delay: Duration,
    }

    #[async_trait]
    impl Classifier for StubClassifier {
        fn name(&self) -> &str {
            "stub"
        }

        async fn classify(
            &self,
            _utterance: &Utterance,
            _context: &ClassifierContext,
        ) -> Result<ClassificationResult, ClassifierError> {
            tokio::time::sleep(self.delay).await;
            Ok(ClassificationResult::new(
                self.intent,
                0.85,
                self.alpha,
                Vec::new(),
                ClassificationTier::Classifier,
            ))
        }
    }

    struct Fixture {
        orchestrator: ParallelQueryOrchestrator,
        backend: Arc<RecordingBackend>,
        sessions: Arc<SessionContextStore>,
        telemetry: InMemoryTelemetrySink,
    }

    fn fixture(
        classifier: Option<StubClassifier>,
        backend: Arc<RecordingBackend>,
        settings: OrchestratorSettings,
    ) -> Fixture {
        let telemetry = InMemoryTelemetrySink::default();
        let router = TieredIntentRouter::new(
            classifier.map(|classifier| Arc::new(classifier) as Arc<dyn Classifier>),
            RouterSettings { classifier_timeout: Duration::from_secs(1), ..RouterSettings::default() },
        );
        let gateway = ResilientSearchGateway::new(
            backend.clone(),
            GatewaySettings {
                retry: RetryPolicy { max_retries: 0, base_delay_ms: 0, max_delay_ms: 0 },
                ..GatewaySettings::default()
            },
        );
        let sessions = Arc::new(SessionContextStore::in_memory(SessionStoreSettings::default()));
        let orchestrator = ParallelQueryOrchestrator::new(
            Arc::new(router),
            Arc::new(gateway),
            sessions.clone(),
            settings,
        )
        .with_telemetry(Arc::new(telemetry.clone()));
        Fixture { orchestrator, backend, sessions, telemetry }
    }

    fn stub(intent: Intent, alpha: f64, delay_ms: u64) -> Option<StubClassifier> {
        Some(StubClassifier { intent, alpha, delay: Duration::from_millis(delay_ms) })
    }

    fn session() -> SessionContext {
        SessionContext::new(SessionId("s-1".to_string()), SessionLimits::default())
    }

    fn utterance(text: &str) -> Utterance {
        Utterance::new(text, SessionId("s-1".to_string()))
    }

    const DEADLINE: Duration = Duration::from_millis(800);

    #[tokio::test(start_paused = true)]
    async fn material_alpha_difference_triggers_one_corrected_search() {
        let fixture = fixture(
            stub(Intent::Search, 0.8, 20),
            RecordingBackend::new(Duration::from_millis(30), None),
            OrchestratorSettings::default(),
        );

        let decision = fixture
            .orchestrator
            .route_and_search(&utterance("oatly"), &session(), DEADLINE)
            .await
            .expect("routes within deadline");

        assert!((decision.heuristic_alpha - 0.3).abs() < 1e-9);
        assert_eq!(fixture.backend.alphas(), vec![0.3, 0.8]);
        assert_eq!(decision.which_alpha_used, 0.8);
        assert_eq!(decision.alpha_source, AlphaSource::Classification);
        assert!(decision.corrected);
        assert!(!decision.degraded);
        assert_eq!(decision.results.origin, ResultOrigin::Live);
        assert_eq!(fixture.telemetry.count(TelemetryKind::CorrectedSearch), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn small_alpha_difference_keeps_provisional_results() {
        let fixture = fixture(
            stub(Intent::Search, 0.4, 20),
            RecordingBackend::new(Duration::from_millis(30), None),
            OrchestratorSettings::default(),
        );

        let decision = fixture
            .orchestrator
            .route_and_search(&utterance("oatly"), &session(), DEADLINE)
            .await
            .expect("routes");

        assert_eq!(fixture.backend.alphas().len(), 1);
        assert_eq!(decision.alpha_source, AlphaSource::Heuristic);
        assert!(!decision.corrected);
    }

    #[tokio::test(start_paused = true)]
    async fn slow_classification_is_abandoned_but_search_survives() {
        let fixture = fixture(
            stub(Intent::Search, 0.9, 5_000),
            RecordingBackend::new(Duration::from_millis(30), None),
            OrchestratorSettings::default(),
        );

        let started = tokio::time::Instant::now();
        let decision = fixture
            .orchestrator
            .route_and_search(&utterance("oatly"), &session(), DEADLINE)
            .await
            .expect("partial result");

        assert!(decision.classification_abandoned);
        assert!(decision.degraded);
        assert_eq!(decision.classification.tier(), ClassificationTier::Fallback);
        assert_eq!(decision.results.origin, ResultOrigin::Live);
        assert_eq!(fixture.backend.alphas().len(), 1);
        assert!(started.elapsed() <= Duration::from_millis(460));
    }

    #[tokio::test(start_paused = true)]
    async fn cached_fallback_answer_stays_degraded() {
        let fixture = fixture(
            None,
            RecordingBackend::new(Duration::from_millis(10), None),
            OrchestratorSettings::default(),
        );
        let context = session();

        let first = fixture
            .orchestrator
            .route_and_search(&utterance("oatly"), &context, DEADLINE)
            .await
            .expect("routes");
        let second = fixture
            .orchestrator
            .route_and_search(&utterance("oatly"), &context, DEADLINE)
            .await
            .expect("routes");

        assert_eq!(first.classification.tier(), ClassificationTier::Fallback);
        assert!(first.degraded);
        assert_eq!(second.classification.tier(), ClassificationTier::ExactCache);
        assert_eq!(second.classification.answered_by(), ClassificationTier::Fallback);
        assert!(second.classification.same_decision(&first.classification));
        assert!(second.degraded);
    }

    #[tokio::test(start_paused = true)]
    async fn search_slower_than_deadline_is_the_only_error() {
        let fixture = fixture(
            stub(Intent::Search, 0.3, 10),
            RecordingBackend::new(Duration::from_secs(10), None),
            OrchestratorSettings::default(),
        );

        let started = tokio::time::Instant::now();
        let outcome = fixture
            .orchestrator
            .route_and_search(&utterance("oatly"), &session(), Duration::from_millis(100))
            .await;

        match outcome {
            Err(RoutingError::OrchestratorDeadlineExceeded { deadline_ms, .. }) => {
                assert_eq!(deadline_ms, 100)
            }
            other => panic!("expected deadline error, got {other:?}"),
        }
        assert!(started.elapsed() <= Duration::from_millis(100));
        assert_eq!(fixture.telemetry.count(TelemetryKind::DeadlineExceeded), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn backend_outage_degrades_without_error() {
        let fixture = fixture(
            stub(Intent::Search, 0.3, 10),
            RecordingBackend::new(Duration::from_millis(10), Some(0.0)),
            OrchestratorSettings::default(),
        );

        let decision = fixture
            .orchestrator
            .route_and_search(&utterance("oatly"), &session(), DEADLINE)
            .await
            .expect("degraded result");

        assert!(decision.degraded);
        assert_eq!(decision.results.origin, ResultOrigin::StaticFallback);
    }

    #[tokio::test(start_paused = true)]
    async fn degraded_correction_keeps_live_provisional_results() {
        let fixture = fixture(
            stub(Intent::Search, 0.8, 20),
            RecordingBackend::new(Duration::from_millis(10), Some(0.5)),
            OrchestratorSettings::default(),
        );

        let decision = fixture
            .orchestrator
            .route_and_search(&utterance("oatly"), &session(), DEADLINE)
            .await
            .expect("routes");

        assert_eq!(fixture.backend.alphas(), vec![0.3, 0.8]);
        assert_eq!(decision.results.origin, ResultOrigin::Live);
        assert_eq!(decision.which_alpha_used, 0.3);
        assert!(!decision.corrected);
    }

    #[tokio::test(start_paused = true)]
    async fn override_alpha_disables_correction() {
        let fixture = fixture(
            stub(Intent::Search, 0.1, 10),
            RecordingBackend::new(Duration::from_millis(10), None),
            OrchestratorSettings::default(),
        );
        let overrides = RouteOverrides { alpha: Some(0.7), ..RouteOverrides::default() };

        let decision = fixture
            .orchestrator
            .route_and_search_with(&utterance("oatly"), &session(), DEADLINE, &overrides)
            .await
            .expect("routes");

        assert_eq!(fixture.backend.alphas(), vec![0.7]);
        assert_eq!(decision.alpha_source, AlphaSource::Override);
        assert_eq!(decision.which_alpha_used, 0.7);
    }

    #[tokio::test(start_paused = true)]
    async fn cart_intents_skip_correction() {
        let fixture = fixture(
            stub(Intent::AddToCart, 0.95, 10),
            RecordingBackend::new(Duration::from_millis(10), None),
            OrchestratorSettings::default(),
        );

        let decision = fixture
            .orchestrator
            .route_and_search(&utterance("i'd like oatly too"), &session(), DEADLINE)
            .await
            .expect("routes");

        assert_eq!(decision.classification.intent(), Intent::AddToCart);
        assert_eq!(fixture.backend.alphas().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn correction_needs_minimum_budget() {
        let settings = OrchestratorSettings {
            classification_budget: Duration::from_millis(800),
            ..OrchestratorSettings::default()
        };
        let fixture = fixture(
            stub(Intent::Search, 0.9, 750),
            RecordingBackend::new(Duration::from_millis(10), None),
            settings,
        );

        let decision = fixture
            .orchestrator
            .route_and_search(&utterance("oatly"), &session(), DEADLINE)
            .await
            .expect("routes");

        assert_eq!(fixture.backend.alphas().len(), 1);
        assert!(!decision.corrected);
        assert!(!decision.classification_abandoned);
    }

    #[tokio::test(start_paused = true)]
    async fn empty_utterance_uses_fallback_tier() {
        let fixture = fixture(
            stub(Intent::Search, 0.9, 10),
            RecordingBackend::new(Duration::from_millis(10), None),
            OrchestratorSettings::default(),
        );

        let decision = fixture
            .orchestrator
            .route_and_search(&utterance("  "), &session(), DEADLINE)
            .await
            .expect("routes");

        assert_eq!(decision.classification.tier(), ClassificationTier::Fallback);
        assert_eq!(decision.classification.intent(), Intent::Unknown);
        assert!(decision.classification.confidence() <= 0.2);
        assert!(!decision.degraded);
    }

    #[tokio::test(start_paused = true)]
    async fn route_records_turn_and_results_in_session() {
        let fixture = fixture(
            stub(Intent::Search, 0.3, 10),
            RecordingBackend::new(Duration::from_millis(10), None),
            OrchestratorSettings::default(),
        );
        let session_id = SessionId("shopper-7".to_string());
        let overrides = RouteOverrides { limit: Some(4), ..RouteOverrides::default() };

        let decision = fixture
            .orchestrator
            .route(RouteRequest::new("oat milk", session_id.clone()).with_overrides(overrides))
            .await
            .expect("routes");
        assert_eq!(decision.results.len(), 4);

        let context = fixture.sessions.get(&session_id).await;
        assert_eq!(context.recent_result_count(), 4);
        assert_eq!(context.conversation_history().count(), 1);
        assert_eq!(context.last_intent(), Some(Intent::Search));

        let follow_up = fixture
            .orchestrator
            .route(RouteRequest::new("add the second one to my cart", session_id.clone()))
            .await
            .expect("routes");
        assert_eq!(follow_up.classification.intent(), Intent::AddToCart);
        assert_eq!(follow_up.classification.tier(), ClassificationTier::Heuristic);
        assert!(follow_up.classification.is_context_dependent());
    }
}
