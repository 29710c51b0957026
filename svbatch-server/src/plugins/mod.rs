//! Plugin registry built from the config file

pub mod command;

pub use command::{CommandFormat, CommandMiddleware, CommandRunner};

use crate::config::ServerConfig;
use crate::project::TrackDocument;
use std::sync::Arc;
use svbatch_core::StaticRegistry;
use tracing::info;

/// Registry of command plugins over JSON track documents
pub type CommandRegistry = StaticRegistry<TrackDocument>;

/// Register every `[formats.*]` and `[middlewares.*]` entry
pub fn command_registry(config: &ServerConfig) -> CommandRegistry {
    let mut registry = CommandRegistry::new();

    for (id, plugin) in &config.formats {
        info!(format = %id, program = %plugin.program, "Registering format plugin");
        registry.register_format(Arc::new(CommandFormat::new(id, plugin)));
    }
    for (id, plugin) in &config.middlewares {
        info!(middleware = %id, program = %plugin.program, "Registering middleware plugin");
        registry.register_middleware(Arc::new(CommandMiddleware::new(id, plugin)));
    }

    registry
}
