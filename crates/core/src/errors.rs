use std::time::Duration;

use thiserror::Error;

/// Failure of an external classifier call. Always recovered by falling
/// through to the next cascade tier.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ClassifierError {
    #[error("classifier timed out after {0:?}")]
    Timeout(Duration),
    #[error("classifier unavailable: {0}")]
    Unavailable(String),
    #[error("classifier returned an invalid response: {0}")]
    InvalidResponse(String),
    #[error("no classifier provider is configured")]
    NotConfigured,
}

/// Failure of a single search backend attempt. Recovered by the gateway via
/// retries, cache, or the static default set.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum SearchBackendError {
    #[error("search backend timed out after {0:?}")]
    Timeout(Duration),
    #[error("search backend unavailable: {0}")]
    Unavailable(String),
    #[error("search backend returned an invalid response: {0}")]
    InvalidResponse(String),
}

/// Failure of the session backing store. Treated as an empty context.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum SessionStoreError {
    #[error("session store timed out after {0:?}")]
    Timeout(Duration),
    #[error("session store unavailable: {0}")]
    Unavailable(String),
}

/// The only error kind surfaced to callers of the routing entry point.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum RoutingError {
    #[error(
        "orchestrator deadline of {deadline_ms}ms exceeded after {elapsed_ms}ms with no usable result"
    )]
    OrchestratorDeadlineExceeded { deadline_ms: u64, elapsed_ms: u64, correlation_id: String },
}

impl RoutingError {
    pub fn user_message(&self) -> &'static str {
        match self {
            Self::OrchestratorDeadlineExceeded { .. } => {
                "Sorry, that took too long. Could you say that again?"
            }
        }
    }

    pub fn correlation_id(&self) -> &str {
        match self {
            Self::OrchestratorDeadlineExceeded { correlation_id, .. } => correlation_id,
        }
    }
}
