//! Shopper utterance routing.
//!
//! - `router` - tiered intent classification (cache, heuristics,
//!   external classifier, contextual fallback)
//! - `orchestrator` - runs classification and a provisional search under
//!   one deadline, then corrects the search alpha when it matters
//! - `runtime` - assembles both from an `AppConfig`
//!
//! The external classifier only ever labels intent and alpha. Cart
//! mutations that reference earlier results are resolved locally against
//! session state.

pub mod alpha;
pub mod classifier;
pub mod fallback;
pub mod heuristics;
pub mod llm;
pub mod orchestrator;
pub mod router;
pub mod runtime;

pub use orchestrator::{
    AlphaSource, OrchestratorSettings, ParallelQueryOrchestrator, RouteOverrides, RouteRequest,
    RouteTimings, RoutedDecision,
};
pub use router::{RouterSettings, TieredIntentRouter};
pub use runtime::AgentRuntime;
