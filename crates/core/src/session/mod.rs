//! Per-session context store.
//!
//! `get` creates a context on first reference. Writes are field-level
//! [`SessionUpdate`]s applied inside the backend, so concurrent writers of
//! different fields never clobber one another and writers of the same field
//! resolve last-writer-wins. Backend failures and timeouts degrade to a
//! default context and are never surfaced.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::warn;

use crate::domain::classification::Entity;
use crate::domain::search::SearchItem;
use crate::domain::session::{Cart, SessionContext, SessionLimits, SessionUpdate, Turn};
use crate::domain::utterance::SessionId;
use crate::errors::SessionStoreError;
use crate::telemetry::{NoopTelemetrySink, TelemetryEvent, TelemetryKind, TelemetrySink};

pub mod memory;

pub use memory::InMemorySessionBackend;

#[async_trait]
pub trait SessionBackend: Send + Sync {
    /// Returns the live context, creating it when absent or idle-expired,
    /// and marks it as seen at `now`.
    async fn get_or_create(
        &self,
        session_id: &SessionId,
        limits: SessionLimits,
        idle_ttl: chrono::Duration,
        now: DateTime<Utc>,
    ) -> Result<SessionContext, SessionStoreError>;

    async fn apply(
        &self,
        session_id: &SessionId,
        limits: SessionLimits,
        update: SessionUpdate,
        now: DateTime<Utc>,
    ) -> Result<(), SessionStoreError>;

    async fn remove_idle(
        &self,
        idle_ttl: chrono::Duration,
        now: DateTime<Utc>,
    ) -> Result<usize, SessionStoreError>;
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SessionStoreSettings {
    pub limits: SessionLimits,
    pub idle_ttl: Duration,
    pub op_timeout: Duration,
}

impl Default for SessionStoreSettings {
    fn default() -> Self {
        Self {
            limits: SessionLimits::default(),
            idle_ttl: Duration::from_secs(30 * 60),
            op_timeout: Duration::from_millis(50),
        }
    }
}

pub struct SessionContextStore {
    backend: Arc<dyn SessionBackend>,
    settings: SessionStoreSettings,
    telemetry: Arc<dyn TelemetrySink>,
}

impl SessionContextStore {
    pub fn new(backend: Arc<dyn SessionBackend>, settings: SessionStoreSettings) -> Self {
        Self { backend, settings, telemetry: Arc::new(NoopTelemetrySink) }
    }

    pub fn in_memory(settings: SessionStoreSettings) -> Self {
        Self::new(Arc::new(InMemorySessionBackend::default()), settings)
    }

    pub fn with_telemetry(mut self, telemetry: Arc<dyn TelemetrySink>) -> Self {
        self.telemetry = telemetry;
        self
    }

    pub fn settings(&self) -> &SessionStoreSettings {
        &self.settings
    }

    /// Snapshot of the session, created if absent. An unavailable backend
    /// yields a fresh default context.
    pub async fn get(&self, session_id: &SessionId) -> SessionContext {
        let result = self
            .bounded(self.backend.get_or_create(
                session_id,
                self.settings.limits,
                self.idle_ttl(),
                Utc::now(),
            ))
            .await;

        match result {
            Ok(context) => context,
            Err(error) => {
                self.report_degraded(session_id, "get", &error);
                SessionContext::new(session_id.clone(), self.settings.limits)
            }
        }
    }

    pub async fn append_search_results(&self, session_id: &SessionId, items: Vec<SearchItem>) -> bool {
        self.update(session_id, SessionUpdate::AppendSearchResults(items)).await
    }

    pub async fn set_cart(&self, session_id: &SessionId, cart: Cart) -> bool {
        self.update(session_id, SessionUpdate::SetCart(cart)).await
    }

    pub async fn add_preference(&self, session_id: &SessionId, preference: impl Into<String>) -> bool {
        self.update(session_id, SessionUpdate::AddPreference(preference.into())).await
    }

    pub async fn record_turn(&self, session_id: &SessionId, turn: Turn) -> bool {
        self.update(session_id, SessionUpdate::RecordTurn(turn)).await
    }

    pub async fn remember_entities(&self, session_id: &SessionId, entities: Vec<Entity>) -> bool {
        self.update(session_id, SessionUpdate::RememberEntities(entities)).await
    }

    /// Applies one field-level write. Returns false when the backend could
    /// not take it; the write is dropped.
    pub async fn update(&self, session_id: &SessionId, update: SessionUpdate) -> bool {
        let result = self
            .bounded(self.backend.apply(session_id, self.settings.limits, update, Utc::now()))
            .await;
        match result {
            Ok(()) => true,
            Err(error) => {
                self.report_degraded(session_id, "update", &error);
                false
            }
        }
    }

    /// Drops every session idle for longer than the configured TTL.
    pub async fn evict_idle(&self) -> usize {
        match self.bounded(self.backend.remove_idle(self.idle_ttl(), Utc::now())).await {
            Ok(removed) => removed,
            Err(error) => {
                warn!(
                    event_name = "session.evict_idle_failed",
                    error = %error,
                    "idle session eviction failed"
                );
                0
            }
        }
    }

    async fn bounded<T>(
        &self,
        operation: impl Future<Output = Result<T, SessionStoreError>>,
    ) -> Result<T, SessionStoreError> {
        match tokio::time::timeout(self.settings.op_timeout, operation).await {
            Ok(result) => result,
            Err(_) => Err(SessionStoreError::Timeout(self.settings.op_timeout)),
        }
    }

    fn idle_ttl(&self) -> chrono::Duration {
        chrono::Duration::from_std(self.settings.idle_ttl)
            .unwrap_or_else(|_| chrono::Duration::days(365))
    }

    fn report_degraded(&self, session_id: &SessionId, operation: &str, error: &SessionStoreError) {
        warn!(
            event_name = "session.store_degraded",
            session_id = %session_id,
            operation,
            error = %error,
            "session store unavailable; continuing with default context"
        );
        self.telemetry.emit(
            TelemetryEvent::new(TelemetryKind::SessionStoreDegraded)
                .with_session(session_id.0.clone())
                .with_metadata("operation", operation)
                .with_metadata("error", error),
        );
    }
}
