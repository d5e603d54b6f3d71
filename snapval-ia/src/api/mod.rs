//! HTTP API handlers for snapval-ia

pub mod analyze;
pub mod crop;
pub mod health;
pub mod sse;

pub use analyze::analyze_routes;
pub use crop::crop_routes;
pub use health::health_routes;
pub use sse::event_stream;
