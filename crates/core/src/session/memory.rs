use std::collections::HashMap;

use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use crate::domain::session::{SessionContext, SessionLimits, SessionUpdate};
use crate::domain::utterance::SessionId;
use crate::errors::SessionStoreError;

use super::SessionBackend;

/// Process-local session backend.
#[derive(Default)]
pub struct InMemorySessionBackend {
    sessions: RwLock<HashMap<SessionId, SessionContext>>,
}

impl InMemorySessionBackend {
    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sessions.read().await.is_empty()
    }
}

#[async_trait::async_trait]
impl SessionBackend for InMemorySessionBackend {
    async fn get_or_create(
        &self,
        session_id: &SessionId,
        limits: SessionLimits,
        idle_ttl: chrono::Duration,
        now: DateTime<Utc>,
    ) -> Result<SessionContext, SessionStoreError> {
        let mut sessions = self.sessions.write().await;
        let expired =
            sessions.get(session_id).map(|context| context.is_idle(now, idle_ttl)).unwrap_or(false);
        if expired {
            sessions.remove(session_id);
        }

        let context = sessions
            .entry(session_id.clone())
            .or_insert_with(|| SessionContext::new(session_id.clone(), limits));
        context.touch(now);
        Ok(context.clone())
    }

    async fn apply(
        &self,
        session_id: &SessionId,
        limits: SessionLimits,
        update: SessionUpdate,
        now: DateTime<Utc>,
    ) -> Result<(), SessionStoreError> {
        let mut sessions = self.sessions.write().await;
        let context = sessions
            .entry(session_id.clone())
            .or_insert_with(|| SessionContext::new(session_id.clone(), limits));
        context.apply(update);
        context.touch(now);
        Ok(())
    }

    async fn remove_idle(
        &self,
        idle_ttl: chrono::Duration,
        now: DateTime<Utc>,
    ) -> Result<usize, SessionStoreError> {
        let mut sessions = self.sessions.write().await;
        let before = sessions.len();
        sessions.retain(|_, context| !context.is_idle(now, idle_ttl));
        Ok(before - sessions.len())
    }
}
