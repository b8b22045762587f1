pub mod backend;
pub mod breaker;
pub mod cache;
pub mod fallback;
pub mod gateway;
pub mod http;

pub use backend::{SearchBackend, UnconfiguredSearchBackend};
pub use breaker::{Admission, BreakerSnapshot, BreakerState, BreakerTransition, CircuitBreaker};
pub use cache::{SearchCache, SearchCacheKey};
pub use fallback::StaticFallbackSet;
pub use gateway::{GatewaySettings, ResilientSearchGateway, RetryPolicy};
pub use http::HttpSearchBackend;
