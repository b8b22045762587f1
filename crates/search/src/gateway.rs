use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use rand::Rng;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use aisle_core::config::SearchConfig;
use aisle_core::domain::classification::unit_interval;
use aisle_core::domain::search::{ResultOrigin, SearchItem, SearchQuery, SearchResultSet};
use aisle_core::errors::SearchBackendError;
use aisle_core::telemetry::{NoopTelemetrySink, TelemetryEvent, TelemetryKind, TelemetrySink};

use crate::backend::SearchBackend;
use crate::breaker::{Admission, BreakerSnapshot, BreakerTransition, CircuitBreaker};
use crate::cache::{SearchCache, SearchCacheKey};
use crate::fallback::StaticFallbackSet;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self { max_retries: 1, base_delay_ms: 25, max_delay_ms: 200 }
    }
}

impl RetryPolicy {
    /// Exponential delay capped at `max_delay_ms`, before jitter.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exponent = attempt.min(16);
        let multiplier = 1_u64 << exponent;
        let delay_ms = self.base_delay_ms.saturating_mul(multiplier).min(self.max_delay_ms);
        Duration::from_millis(delay_ms)
    }

    /// Backoff with the upper half randomised so retrying callers spread out.
    fn jittered_backoff(&self, attempt: u32) -> Duration {
        let delay_ms = self.backoff(attempt).as_millis() as u64;
        let half = delay_ms / 2;
        let jitter = if half == 0 { 0 } else { rand::thread_rng().gen_range(0..=half) };
        Duration::from_millis(delay_ms - half + jitter)
    }
}

#[derive(Clone, Debug)]
pub struct GatewaySettings {
    pub attempt_timeout: Duration,
    pub retry: RetryPolicy,
    pub failure_threshold: u32,
    pub cooldown: Duration,
    pub cache_ttl: Duration,
    pub cache_capacity: usize,
    pub default_limit: usize,
}

impl Default for GatewaySettings {
    fn default() -> Self {
        Self {
            attempt_timeout: Duration::from_millis(150),
            retry: RetryPolicy::default(),
            failure_threshold: 3,
            cooldown: Duration::from_secs(30),
            cache_ttl: Duration::from_secs(600),
            cache_capacity: 512,
            default_limit: 10,
        }
    }
}

impl GatewaySettings {
    pub fn from_config(config: &SearchConfig) -> Self {
        Self {
            attempt_timeout: config.timeout(),
            retry: RetryPolicy {
                max_retries: config.max_retries,
                base_delay_ms: config.retry_base_delay_ms,
                max_delay_ms: config.retry_max_delay_ms,
            },
            failure_threshold: config.failure_threshold,
            cooldown: config.cooldown(),
            cache_ttl: config.cache_ttl(),
            cache_capacity: config.cache_capacity,
            default_limit: config.default_limit,
        }
    }
}

/// The only path to the search backend. `search` never fails: a broken or
/// slow backend yields cached or built-in results tagged as such.
pub struct ResilientSearchGateway {
    backend: Arc<dyn SearchBackend>,
    breaker: CircuitBreaker,
    cache: Mutex<SearchCache>,
    fallback: StaticFallbackSet,
    settings: GatewaySettings,
    telemetry: Arc<dyn TelemetrySink>,
}

/// Hands the trial slot back if the trial future is dropped before it
/// reports an outcome.
struct TrialGuard<'a> {
    breaker: &'a CircuitBreaker,
    settled: bool,
}

impl Drop for TrialGuard<'_> {
    fn drop(&mut self) {
        if !self.settled {
            self.breaker.release_trial();
        }
    }
}

impl ResilientSearchGateway {
    pub fn new(backend: Arc<dyn SearchBackend>, settings: GatewaySettings) -> Self {
        Self {
            backend,
            breaker: CircuitBreaker::new("search", settings.failure_threshold, settings.cooldown),
            cache: Mutex::new(SearchCache::new(settings.cache_capacity, settings.cache_ttl)),
            fallback: StaticFallbackSet::default(),
            settings,
            telemetry: Arc::new(NoopTelemetrySink),
        }
    }

    pub fn with_telemetry(mut self, telemetry: Arc<dyn TelemetrySink>) -> Self {
        self.telemetry = telemetry;
        self
    }

    pub fn with_static_fallback(mut self, fallback: StaticFallbackSet) -> Self {
        self.fallback = fallback;
        self
    }

    pub fn settings(&self) -> &GatewaySettings {
        &self.settings
    }

    pub fn breaker_snapshot(&self) -> BreakerSnapshot {
        self.breaker.snapshot(Instant::now())
    }

    pub async fn search(&self, text: &str, alpha: f64, limit: usize) -> SearchResultSet {
        let alpha = unit_interval(alpha);
        let limit = if limit == 0 { self.settings.default_limit } else { limit };
        let key = SearchCacheKey::new(text, alpha);
        let query = SearchQuery { text: text.trim().to_string(), alpha, limit };

        match self.breaker.admit(Instant::now()) {
            Admission::Rejected => {
                debug!(
                    event_name = "search.breaker_rejected",
                    breaker = self.breaker.name(),
                    "breaker open; skipping backend call"
                );
                self.fallback(&key, limit, "breaker_open")
            }
            Admission::Allowed => match self.call_with_retries(&query).await {
                Ok(items) => self.on_success(key, items, limit),
                Err(error) => {
                    let transition = self.breaker.record_failure(Instant::now());
                    self.report_transition(transition, &error);
                    self.fallback(&key, limit, "retries_exhausted")
                }
            },
            Admission::Trial => {
                let mut guard = TrialGuard { breaker: &self.breaker, settled: false };
                let outcome = self.call_once(&query, 0).await;
                guard.settled = true;
                match outcome {
                    Ok(items) => self.on_success(key, items, limit),
                    Err(error) => {
                        let transition = self.breaker.record_trial_failure(Instant::now());
                        self.report_transition(transition, &error);
                        self.fallback(&key, limit, "trial_failed")
                    }
                }
            }
        }
    }

    async fn call_with_retries(
        &self,
        query: &SearchQuery,
    ) -> Result<Vec<SearchItem>, SearchBackendError> {
        let max_retries = self.settings.retry.max_retries;
        let mut attempt = 0;
        loop {
            match self.call_once(query, attempt).await {
                Ok(items) => return Ok(items),
                Err(error) if attempt >= max_retries => return Err(error),
                Err(_) => {
                    let delay = self.settings.retry.jittered_backoff(attempt);
                    if !delay.is_zero() {
                        tokio::time::sleep(delay).await;
                    }
                    attempt += 1;
                }
            }
        }
    }

    async fn call_once(
        &self,
        query: &SearchQuery,
        attempt: u32,
    ) -> Result<Vec<SearchItem>, SearchBackendError> {
        let timeout = self.settings.attempt_timeout;
        let result = match tokio::time::timeout(timeout, self.backend.search(query)).await {
            Ok(result) => result,
            Err(_) => Err(SearchBackendError::Timeout(timeout)),
        };
        if let Err(error) = &result {
            warn!(
                event_name = "search.attempt_failed",
                attempt,
                max_retries = self.settings.retry.max_retries,
                error = %error,
                "search backend attempt failed"
            );
        }
        result
    }

    fn on_success(&self, key: SearchCacheKey, items: Vec<SearchItem>, limit: usize) -> SearchResultSet {
        if self.breaker.record_success() == Some(BreakerTransition::Closed) {
            info!(
                event_name = "search.breaker_closed",
                breaker = self.breaker.name(),
                "trial call succeeded; breaker closed"
            );
            self.telemetry.emit(
                TelemetryEvent::new(TelemetryKind::BreakerClosed)
                    .with_metadata("breaker", self.breaker.name()),
            );
        }

        let mut items = items;
        items.truncate(limit);
        self.lock_cache().insert(key, items.clone(), Instant::now());
        SearchResultSet::live(items)
    }

    fn fallback(&self, key: &SearchCacheKey, limit: usize, reason: &'static str) -> SearchResultSet {
        let cached = self.lock_cache().lookup(key, Instant::now());
        let results = match cached {
            Some(items) => SearchResultSet::new(items, ResultOrigin::Cached).truncated(limit, ResultOrigin::Cached),
            None => self.fallback.results(limit),
        };

        self.telemetry.emit(
            TelemetryEvent::new(TelemetryKind::SearchDegraded)
                .with_metadata("reason", reason)
                .with_metadata("origin", results.origin.as_str()),
        );
        results
    }

    fn report_transition(&self, transition: Option<BreakerTransition>, error: &SearchBackendError) {
        let Some(transition) = transition else {
            return;
        };
        warn!(
            event_name = "search.breaker_opened",
            breaker = self.breaker.name(),
            reopened = transition == BreakerTransition::Reopened,
            cooldown_ms = self.breaker.cooldown().as_millis() as u64,
            error = %error,
            "search breaker opened"
        );
        self.telemetry.emit(
            TelemetryEvent::new(TelemetryKind::BreakerOpened)
                .with_metadata("breaker", self.breaker.name())
                .with_metadata("reopened", transition == BreakerTransition::Reopened),
        );
    }

    fn lock_cache(&self) -> MutexGuard<'_, SearchCache> {
        match self.cache.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}
