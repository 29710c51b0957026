//! svbatch-server library
//!
//! HTTP + SSE transport over the conversion engine, with plugins supplied as
//! external programs. The binary in `main.rs` is a thin wrapper around
//! [`build_router`].

use axum::{routing::get, Router};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use svbatch_core::{EventBus, ExecutionEngine};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

pub mod api;
pub mod config;
pub mod error;
pub mod plugins;
pub mod project;

pub use config::ServerConfig;
pub use error::{ApiError, ApiResult};
pub use plugins::{command_registry, CommandRegistry};
pub use project::TrackDocument;

/// Engine type served over HTTP
pub type Engine = ExecutionEngine<CommandRegistry>;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<Engine>,
    /// Same bus the engine publishes into; SSE clients subscribe here
    pub event_bus: EventBus,
    /// Server startup timestamp (for uptime calculation)
    pub startup_time: DateTime<Utc>,
}

impl AppState {
    /// Create new application state
    pub fn new(engine: Arc<Engine>, event_bus: EventBus) -> Self {
        Self {
            engine,
            event_bus,
            startup_time: Utc::now(),
        }
    }

    /// Wire registry, scratch store, event bus and engine from config
    pub fn from_config(config: &ServerConfig) -> anyhow::Result<Self> {
        let registry = Arc::new(command_registry(config));
        let scratch = config.build_scratch()?;
        let event_bus = EventBus::new(config.engine.event_capacity.max(1));

        let engine = ExecutionEngine::new(
            registry,
            scratch,
            Arc::new(event_bus.clone()),
            &config.engine,
        );

        Ok(Self::new(Arc::new(engine), event_bus))
    }
}

/// Build application router
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .merge(api::batch_routes())
        .merge(api::convert_routes())
        .route("/events", get(api::event_stream))
        .merge(api::plugin_routes())
        .merge(api::health_routes())
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}
