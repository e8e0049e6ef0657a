//! MapServe - map file serving and routing context caching
//!
//! This library keeps a catalog of binary map files, shares pooled readers
//! for them, and answers routing, approximation and geocoding requests
//! against prepared routing contexts. Selected profiles can be delegated to
//! online HTTP routing providers.
//!
//! Most applications only need [`app::MapServeApp`]; the individual
//! components are public for embedding and testing.

pub mod app;
pub mod catalog;
pub mod geo;
pub mod logging;
pub mod map_file;
pub mod online;
pub mod pool;
pub mod routing;
pub mod telemetry;

pub use app::{AppConfig, AppError, Collaborators, MapServeApp};
pub use geo::{LatLon, QuadRect};
pub use routing::{RouteOutcome, RouteProgress, RouteStatus, RoutingOrchestrator};
