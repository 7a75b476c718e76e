//! Road routing over contraction hierarchies, with hazard-aware ranking
//! and failover across external routing providers.

pub mod ch;
pub mod config;
pub mod engine;
pub mod formats;
pub mod geo;
pub mod graph;
pub mod hazard;
pub mod health;
pub mod orchestrator;
pub mod server;
pub mod spatial;
pub mod state;

pub use ch::{BuildStats, BuilderConfig, ChIndex, ChQuery, HierarchyBuilder};
pub use config::ServiceConfig;
pub use engine::{EngineHandle, PathResult, PathfindingEngine, RoutingMode, VehicleParams, VehicleType};
pub use graph::{Edge, GraphStore, Node, NodeIdx};
pub use orchestrator::{RankedRoute, RankedRoutes, RouteRequest, RoutingOrchestrator};
pub use state::ServiceState;
