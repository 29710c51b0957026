//! HTTP API handlers
//!
//! Batch lifecycle under `/batches`, streaming conversion at `/convert`,
//! event stream at `/events`.

pub mod batches;
pub mod convert;
pub mod health;
pub mod plugins;
pub mod sse;

pub use batches::batch_routes;
pub use convert::convert_routes;
pub use health::health_routes;
pub use plugins::plugin_routes;
pub use sse::event_stream;
