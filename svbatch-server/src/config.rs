//! Service configuration
//!
//! One TOML file (`svbatch.toml`) with these tables:
//! - `[server]` bind address
//! - `[engine]` worker pool and timeouts (see `svbatch_core::EngineConfig`)
//! - `[scratch]` artifact store backend
//! - `[logging]` default log filter
//! - `[formats.<id>]` / `[middlewares.<id>]` command plugins
//!
//! Every table is optional. A config without plugins starts, but every
//! submission fails with UnsupportedFormat.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use svbatch_common::config::{load_toml_config, resolve_config_path, LoggingConfig, CONFIG_ENV_VAR};
use svbatch_core::{DiskScratch, EngineConfig, MemoryScratch, ScratchStore};
use tracing::info;

/// Default listen address
pub const DEFAULT_BIND: &str = "127.0.0.1:5780";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub server: ServerSection,
    pub engine: EngineConfig,
    pub scratch: ScratchConfig,
    pub logging: LoggingConfig,
    pub formats: BTreeMap<String, CommandPluginConfig>,
    pub middlewares: BTreeMap<String, CommandPluginConfig>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSection {
    pub bind: String,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            bind: DEFAULT_BIND.to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScratchBackend {
    #[default]
    Memory,
    Disk,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScratchConfig {
    pub backend: ScratchBackend,
    /// Disk backend root; defaults to `<tmp>/svbatch-scratch`
    pub root: Option<PathBuf>,
}

/// An external program acting as a format converter or middleware
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CommandPluginConfig {
    pub program: String,
    /// Arguments placed before the operation verb
    pub args: Vec<String>,
    /// Display name; defaults to the plugin id
    pub name: Option<String>,
    /// Artifact extension (formats only); defaults to the plugin id
    pub suffix: Option<String>,
    /// Input-side (or middleware) option defaults
    pub input_options: Value,
    /// Output-side option defaults (formats only)
    pub output_options: Value,
}

impl ServerConfig {
    /// Resolve and load the config file (CLI path → env → platform dir)
    pub fn load(cli_path: Option<&Path>) -> svbatch_common::Result<Self> {
        let path = resolve_config_path(cli_path, CONFIG_ENV_VAR);
        load_toml_config(path.as_deref())
    }

    /// Build the configured scratch store
    pub fn build_scratch(&self) -> std::io::Result<Arc<dyn ScratchStore>> {
        match self.scratch.backend {
            ScratchBackend::Memory => {
                info!("Scratch store: memory");
                Ok(Arc::new(MemoryScratch::new()))
            }
            ScratchBackend::Disk => {
                let root = self
                    .scratch
                    .root
                    .clone()
                    .unwrap_or_else(|| std::env::temp_dir().join("svbatch-scratch"));
                info!("Scratch store: disk at {}", root.display());
                Ok(Arc::new(DiskScratch::new(root)?))
            }
        }
    }
}
