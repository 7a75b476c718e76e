//! Common types for the waymark routing service

pub mod coord;
pub mod error;

pub use coord::LatLon;
pub use error::{BuildIntegrityError, Error, GraphLoadError, Result, RouteError};
