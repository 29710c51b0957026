//! GET /plugins: formats and middlewares loaded from the config

use axum::{extract::State, routing::get, Json, Router};
use serde::{Deserialize, Serialize};
use svbatch_core::{PluginInfo, PluginRegistry};

use crate::AppState;

#[derive(Debug, Serialize, Deserialize)]
pub struct PluginListResponse {
    pub formats: Vec<PluginInfo>,
    pub middlewares: Vec<PluginInfo>,
}

pub async fn list_plugins(State(state): State<AppState>) -> Json<PluginListResponse> {
    let registry = state.engine.registry();
    Json(PluginListResponse {
        formats: registry.formats(),
        middlewares: registry.middlewares(),
    })
}

pub fn plugin_routes() -> Router<AppState> {
    Router::new().route("/plugins", get(list_plugins))
}
