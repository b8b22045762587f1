pub mod cache;
pub mod config;
pub mod domain;
pub mod errors;
pub mod session;
pub mod telemetry;
pub mod text;

pub use cache::TtlCache;
pub use config::{AppConfig, ConfigError, ConfigOverrides, LoadOptions};
pub use domain::classification::{
    ClassificationResult, ClassificationTier, Entity, EntityKind, Intent,
};
pub use domain::search::{ResultOrigin, SearchItem, SearchQuery, SearchResultSet};
pub use domain::session::{
    Cart, CartLine, ClassifierContext, SessionContext, SessionLimits, SessionUpdate, Speaker, Turn,
};
pub use domain::utterance::{SessionId, UserId, Utterance};
pub use errors::{ClassifierError, RoutingError, SearchBackendError, SessionStoreError};
pub use session::{SessionBackend, SessionContextStore, SessionStoreSettings};
pub use telemetry::{TelemetryEvent, TelemetryKind, TelemetrySink};
