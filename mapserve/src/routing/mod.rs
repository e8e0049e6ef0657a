//! Routing: parameters, engine seams, the context cache and the orchestrator.
//!
//! ```text
//! RoutingOrchestrator
//!   ├── RouteRequestParameters  (parsed once per request)
//!   ├── RoutingContextCache     (prepared contexts on the shared routing file)
//!   ├── MapCatalog + ReaderPool (per-request files)
//!   ├── RoutingEngine           (builds RoutingGraph instances)
//!   └── OnlineRoutingAdapter    (provider profiles)
//! ```

mod cache;
mod engine;
pub mod memory;
mod orchestrator;
mod params;
mod progress;
mod straight_line;
mod types;

pub use cache::{
    CheckoutKind, ContextCacheConfig, ContextInfo, ContextLease, ContextState, RoutingContextCache, SweepReport,
};
pub use engine::{
    native_call_guard, EngineError, NativeLibrary, ProfileInfo, RouteRequest, RouterConfig, RoutingEngine,
    RoutingGraph,
};
pub use orchestrator::{ModeParameter, OrchestratorConfig, RoutingMode, RoutingOrchestrator, DEFAULT_BBOX_MARGIN};
pub use params::{
    ApproximationKind, ApproximationStrategy, CalculationMode, EngineKind, ParamError, RouteRequestParameters,
    RoutingStrategy, SearchMethod, CAR_PROFILE,
};
pub use progress::RouteProgress;
pub use straight_line::StraightLineEngine;
pub use types::{
    Diagnostics, GeocodeOutcome, GeocodingResult, RouteOutcome, RouteResult, RouteSegment, RouteStatus, TypeRule,
};
