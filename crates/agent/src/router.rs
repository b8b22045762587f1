//! Tiered intent classification: exact cache, heuristic rules, external
//! classifier, then the deterministic fallback. First success wins and
//! `classify` never fails.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, warn};

use aisle_core::cache::TtlCache;
use aisle_core::config::RouterConfig;
use aisle_core::domain::classification::{ClassificationResult, ClassificationTier, EntityKind};
use aisle_core::domain::session::SessionContext;
use aisle_core::domain::utterance::{SessionId, Utterance};
use aisle_core::errors::ClassifierError;
use aisle_core::telemetry::{NoopTelemetrySink, TelemetryEvent, TelemetryKind, TelemetrySink};

use crate::classifier::Classifier;
use crate::fallback::ContextualFallbackAnalyzer;
use crate::heuristics::HeuristicRules;

#[derive(Clone, Debug)]
pub struct RouterSettings {
    pub cache_ttl: Duration,
    pub cache_capacity: usize,
    pub cache_by_session: bool,
    pub cache_fallback_results: bool,
    pub classifier_timeout: Duration,
    pub heuristic_confidence: f64,
}

impl Default for RouterSettings {
    fn default() -> Self {
        Self {
            cache_ttl: Duration::from_secs(300),
            cache_capacity: 1024,
            cache_by_session: false,
            cache_fallback_results: true,
            classifier_timeout: Duration::from_millis(300),
            heuristic_confidence: 0.9,
        }
    }
}

impl RouterSettings {
    pub fn from_config(config: &RouterConfig) -> Self {
        Self {
            cache_ttl: config.cache_ttl(),
            cache_capacity: config.cache_capacity,
            cache_by_session: config.cache_by_session,
            cache_fallback_results: config.cache_fallback_results,
            classifier_timeout: config.classifier_timeout(),
            heuristic_confidence: config.heuristic_confidence,
        }
    }
}

/// Every key carries a fingerprint of the session state the heuristic and
/// fallback tiers read, so an answer given without results is never served
/// once results exist. Session-scoped entries are also bound to their session.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
enum CacheScope {
    Global,
    Session(SessionId),
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
struct ClassificationCacheKey {
    scope: CacheScope,
    context_fingerprint: u64,
    text: String,
}

pub struct TieredIntentRouter {
    cache: Mutex<TtlCache<ClassificationCacheKey, ClassificationResult>>,
    heuristics: HeuristicRules,
    classifier: Option<Arc<dyn Classifier>>,
    fallback: ContextualFallbackAnalyzer,
    settings: RouterSettings,
    telemetry: Arc<dyn TelemetrySink>,
}

impl TieredIntentRouter {
    pub fn new(classifier: Option<Arc<dyn Classifier>>, settings: RouterSettings) -> Self {
        Self {
            cache: Mutex::new(TtlCache::new(settings.cache_capacity, settings.cache_ttl)),
            heuristics: HeuristicRules::new(settings.heuristic_confidence),
            classifier,
            fallback: ContextualFallbackAnalyzer::new(),
            settings,
            telemetry: Arc::new(NoopTelemetrySink),
        }
    }

    pub fn with_telemetry(mut self, telemetry: Arc<dyn TelemetrySink>) -> Self {
        self.telemetry = telemetry;
        self
    }

    pub fn settings(&self) -> &RouterSettings {
        &self.settings
    }

    pub fn has_classifier(&self) -> bool {
        self.classifier.is_some()
    }

    pub async fn classify(&self, utterance: &Utterance, context: &SessionContext) -> ClassificationResult {
        let started = Instant::now();
        let normalized = utterance.normalized();

        if normalized.is_empty() {
            let result = self.fallback.analyze(&normalized, context).with_latency(elapsed_ms(started));
            self.report_tier(utterance, &result);
            return result;
        }

        if let Some(cached) = self.cache_lookup(&normalized, context, started) {
            self.emit(utterance, TelemetryKind::CacheHit);
            let result = cached.retagged(ClassificationTier::ExactCache, elapsed_ms(started));
            self.report_tier(utterance, &result);
            return result;
        }
        self.emit(utterance, TelemetryKind::CacheMiss);

        let result = match self.heuristics.evaluate(&normalized, context) {
            Some(result) => result,
            None => match self.call_classifier(utterance, context).await {
                Some(result) => result,
                None => self.fallback.analyze(&normalized, context),
            },
        };
        let result = result.with_latency(elapsed_ms(started));

        if result.tier() != ClassificationTier::Fallback || self.settings.cache_fallback_results {
            self.cache_store(normalized, context, &result);
        }
        self.report_tier(utterance, &result);
        result
    }

    /// Fallback-tier answer without touching the cache or any external
    /// dependency. Used when classification is abandoned at a deadline.
    pub fn fallback_only(&self, utterance: &Utterance, context: &SessionContext) -> ClassificationResult {
        self.fallback.analyze(&utterance.normalized(), context)
    }

    async fn call_classifier(
        &self,
        utterance: &Utterance,
        context: &SessionContext,
    ) -> Option<ClassificationResult> {
        let classifier = self.classifier.as_ref()?;
        let classifier_context = context.classifier_context();
        let timeout = self.settings.classifier_timeout;

        let outcome =
            match tokio::time::timeout(timeout, classifier.classify(utterance, &classifier_context)).await {
                Ok(outcome) => outcome,
                Err(_) => Err(ClassifierError::Timeout(timeout)),
            };

        match outcome {
            Ok(result) => Some(result.attributed_to(ClassificationTier::Classifier)),
            Err(error) => {
                warn!(
                    event_name = "router.classifier_failed",
                    classifier = classifier.name(),
                    session_id = %utterance.session_id(),
                    error = %error,
                    "classifier failed; falling through"
                );
                self.telemetry.emit(
                    TelemetryEvent::new(TelemetryKind::ClassifierFailed)
                        .with_session(utterance.session_id().to_string())
                        .with_metadata("classifier", classifier.name())
                        .with_metadata("error", &error),
                );
                None
            }
        }
    }

    fn cache_lookup(
        &self,
        normalized: &str,
        context: &SessionContext,
        now: Instant,
    ) -> Option<ClassificationResult> {
        let context_fingerprint = context_fingerprint(context);
        let session_key = ClassificationCacheKey {
            scope: CacheScope::Session(context.session_id.clone()),
            context_fingerprint,
            text: normalized.to_string(),
        };
        let mut cache = self.lock_cache();
        if let Some(hit) = cache.get(&session_key, now) {
            return Some(hit);
        }
        if self.settings.cache_by_session {
            return None;
        }
        let global_key = ClassificationCacheKey { scope: CacheScope::Global, ..session_key };
        cache.get(&global_key, now)
    }

    fn cache_store(&self, normalized: String, context: &SessionContext, result: &ClassificationResult) {
        let scope = if result.is_context_dependent() || self.settings.cache_by_session {
            CacheScope::Session(context.session_id.clone())
        } else {
            CacheScope::Global
        };
        let key = ClassificationCacheKey {
            scope,
            context_fingerprint: context_fingerprint(context),
            text: normalized,
        };
        self.lock_cache().insert(key, result.clone(), Instant::now());
    }

    fn report_tier(&self, utterance: &Utterance, result: &ClassificationResult) {
        debug!(
            event_name = "router.tier_answered",
            session_id = %utterance.session_id(),
            tier = result.tier().as_str(),
            intent = result.intent().as_str(),
            confidence = result.confidence(),
            latency_ms = result.latency_ms(),
            "classification answered"
        );
        self.telemetry.emit(
            TelemetryEvent::new(TelemetryKind::TierAnswered)
                .with_session(utterance.session_id().to_string())
                .with_metadata("tier", result.tier().as_str())
                .with_metadata("intent", result.intent())
                .with_metadata("latency_ms", result.latency_ms()),
        );
    }

    fn emit(&self, utterance: &Utterance, kind: TelemetryKind) {
        self.telemetry
            .emit(TelemetryEvent::new(kind).with_session(utterance.session_id().to_string()));
    }

    fn lock_cache(&self) -> MutexGuard<'_, TtlCache<ClassificationCacheKey, ClassificationResult>> {
        match self.cache.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

/// Hashes what reference resolution reads: whether results exist, the ids
/// of the last batch and the most recently remembered item reference.
fn context_fingerprint(context: &SessionContext) -> u64 {
    let mut hasher = DefaultHasher::new();
    context.has_recent_results().hash(&mut hasher);
    for item in context.last_result_batch() {
        item.id.hash(&mut hasher);
    }
    let remembered = context
        .classifier_context()
        .recent_entities
        .into_iter()
        .rev()
        .find(|entity| entity.kind == EntityKind::ItemRef);
    remembered.map(|entity| entity.value).hash(&mut hasher);
    hasher.finish()
}

fn elapsed_ms(started: Instant) -> u64 {
    started.elapsed().as_millis() as u64
}
