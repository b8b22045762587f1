//! Fire-and-forget telemetry. `emit` never blocks and never fails; sinks
//! swallow their own errors.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TelemetryKind {
    TierAnswered,
    CacheHit,
    CacheMiss,
    ClassifierFailed,
    BreakerOpened,
    BreakerClosed,
    SearchDegraded,
    CorrectedSearch,
    DeadlineExceeded,
    SessionStoreDegraded,
    RouteCompleted,
}

impl TelemetryKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::TierAnswered => "router.tier_answered",
            Self::CacheHit => "router.cache_hit",
            Self::CacheMiss => "router.cache_miss",
            Self::ClassifierFailed => "router.classifier_failed",
            Self::BreakerOpened => "search.breaker_opened",
            Self::BreakerClosed => "search.breaker_closed",
            Self::SearchDegraded => "search.degraded",
            Self::CorrectedSearch => "orchestrator.corrected_search",
            Self::DeadlineExceeded => "orchestrator.deadline_exceeded",
            Self::SessionStoreDegraded => "session.store_degraded",
            Self::RouteCompleted => "orchestrator.route_completed",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TelemetryEvent {
    pub event_id: String,
    pub kind: TelemetryKind,
    pub correlation_id: Option<String>,
    pub session_id: Option<String>,
    pub metadata: BTreeMap<String, String>,
    pub occurred_at: DateTime<Utc>,
}

impl TelemetryEvent {
    pub fn new(kind: TelemetryKind) -> Self {
        Self {
            event_id: Uuid::new_v4().to_string(),
            kind,
            correlation_id: None,
            session_id: None,
            metadata: BTreeMap::new(),
            occurred_at: Utc::now(),
        }
    }

    pub fn with_correlation(mut self, correlation_id: impl Into<String>) -> Self {
        self.correlation_id = Some(correlation_id.into());
        self
    }

    pub fn with_session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl ToString) -> Self {
        self.metadata.insert(key.into(), value.to_string());
        self
    }
}

pub trait TelemetrySink: Send + Sync {
    fn emit(&self, event: TelemetryEvent);
}

#[derive(Clone, Copy, Debug, Default)]
pub struct NoopTelemetrySink;

impl TelemetrySink for NoopTelemetrySink {
    fn emit(&self, _event: TelemetryEvent) {}
}

/// Writes each event as a `tracing` debug record.
#[derive(Clone, Copy, Debug, Default)]
pub struct TracingTelemetrySink;

impl TelemetrySink for TracingTelemetrySink {
    fn emit(&self, event: TelemetryEvent) {
        tracing::debug!(
            event_name = event.kind.as_str(),
            event_id = %event.event_id,
            correlation_id = event.correlation_id.as_deref().unwrap_or("unknown"),
            session_id = event.session_id.as_deref().unwrap_or("unknown"),
            metadata = ?event.metadata,
            "telemetry event"
        );
    }
}

#[derive(Clone, Default)]
pub struct InMemoryTelemetrySink {
    events: Arc<Mutex<Vec<TelemetryEvent>>>,
}

impl InMemoryTelemetrySink {
    pub fn events(&self) -> Vec<TelemetryEvent> {
        match self.events.lock() {
            Ok(events) => events.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn count(&self, kind: TelemetryKind) -> usize {
        self.events().iter().filter(|event| event.kind == kind).count()
    }
}

impl TelemetrySink for InMemoryTelemetrySink {
    fn emit(&self, event: TelemetryEvent) {
        match self.events.lock() {
            Ok(mut events) => events.push(event),
            Err(poisoned) => poisoned.into_inner().push(event),
        }
    }
}
