//! Plugin registry interface
//!
//! The engine never parses or encodes files itself. A `PluginRegistry`
//! resolves format ids to `FormatConverter`s (load/dump) and middleware ids to
//! `Middleware`s (process), all operating on the registry's `Project` type.
//!
//! Options are opaque JSON objects. Each plugin declares its defaults and
//! validates caller input once, when a batch is submitted; the validated blob
//! is what every later call receives.

use crate::diagnostics::Diagnostics;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::fmt;
use std::path::Path;
use std::sync::Arc;

/// Opaque plugin option blob (always a JSON object after validation)
pub type OptionBlob = Value;

/// In-memory project produced by `load`, transformed by middlewares and
/// consumed by `dump`
pub trait Project: Sized + Send + 'static {
    /// Combine projects loaded from a merge group, in source order
    fn merge(projects: Vec<Self>) -> anyhow::Result<Self>;

    /// Break a project into sub-projects of at most `max_track_count` tracks
    ///
    /// How many sub-projects come back is the project's decision.
    fn split(self, max_track_count: usize) -> anyhow::Result<Vec<Self>>;
}

/// Which side of a conversion an option blob configures
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OptionRole {
    Input,
    Output,
}

/// Descriptive plugin metadata
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PluginInfo {
    pub identifier: String,
    pub name: String,
    pub version: String,
    /// File extension written by `dump` (formats only)
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub suffix: String,
}

impl PluginInfo {
    /// Metadata for a format plugin; the suffix defaults to the identifier
    pub fn format(identifier: impl Into<String>, suffix: impl Into<String>) -> Self {
        let identifier = identifier.into();
        let mut suffix = suffix.into();
        if suffix.is_empty() {
            suffix = identifier.clone();
        }
        Self {
            name: identifier.clone(),
            identifier,
            version: env!("CARGO_PKG_VERSION").to_string(),
            suffix,
        }
    }

    /// Metadata for a middleware plugin
    pub fn middleware(identifier: impl Into<String>) -> Self {
        let identifier = identifier.into();
        Self {
            name: identifier.clone(),
            identifier,
            version: env!("CARGO_PKG_VERSION").to_string(),
            suffix: String::new(),
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }
}

/// Raised by default `load`/`dump` implementations when a plugin does not
/// provide the operation
///
/// The pipeline maps it to the `UnsupportedFormat` failure kind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Unsupported {
    pub plugin: String,
    pub operation: &'static str,
}

impl fmt::Display for Unsupported {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "plugin '{}' does not support {}", self.plugin, self.operation)
    }
}

impl std::error::Error for Unsupported {}

/// Overlay caller options on plugin defaults
///
/// `null` means "all defaults". Anything other than an object is rejected.
pub fn overlay_options(defaults: &OptionBlob, raw: &OptionBlob) -> Result<OptionBlob, String> {
    let mut merged = match defaults {
        Value::Object(map) => map.clone(),
        Value::Null => Map::new(),
        other => return Err(format!("plugin defaults must be an object, got {}", other)),
    };

    match raw {
        Value::Null => {}
        Value::Object(map) => {
            for (key, value) in map {
                merged.insert(key.clone(), value.clone());
            }
        }
        other => return Err(format!("options must be a JSON object, got {}", other)),
    }

    Ok(Value::Object(merged))
}

/// Load/dump operations for one file format
pub trait FormatConverter<P: Project>: Send + Sync {
    fn info(&self) -> &PluginInfo;

    fn default_options(&self, _role: OptionRole) -> OptionBlob {
        Value::Object(Map::new())
    }

    /// Validate caller options against this plugin's schema
    fn validate_options(&self, role: OptionRole, raw: &OptionBlob) -> Result<OptionBlob, String> {
        overlay_options(&self.default_options(role), raw)
    }

    fn load(
        &self,
        _path: &Path,
        _options: &OptionBlob,
        _diagnostics: &mut Diagnostics,
    ) -> anyhow::Result<P> {
        Err(Unsupported {
            plugin: self.info().identifier.clone(),
            operation: "load",
        }
        .into())
    }

    fn dump(
        &self,
        _path: &Path,
        _project: &P,
        _options: &OptionBlob,
        _diagnostics: &mut Diagnostics,
    ) -> anyhow::Result<()> {
        Err(Unsupported {
            plugin: self.info().identifier.clone(),
            operation: "dump",
        }
        .into())
    }
}

/// A user-selectable project transform
pub trait Middleware<P: Project>: Send + Sync {
    fn info(&self) -> &PluginInfo;

    fn default_options(&self) -> OptionBlob {
        Value::Object(Map::new())
    }

    fn validate_options(&self, raw: &OptionBlob) -> Result<OptionBlob, String> {
        overlay_options(&self.default_options(), raw)
    }

    fn process(
        &self,
        project: P,
        options: &OptionBlob,
        diagnostics: &mut Diagnostics,
    ) -> anyhow::Result<P>;
}

/// Resolves plugin ids to typed operation bundles
pub trait PluginRegistry: Send + Sync + 'static {
    type Project: Project;

    fn resolve_format(&self, id: &str) -> Option<Arc<dyn FormatConverter<Self::Project>>>;

    fn resolve_middleware(&self, id: &str) -> Option<Arc<dyn Middleware<Self::Project>>>;

    /// Metadata of every registered format
    fn formats(&self) -> Vec<PluginInfo> {
        Vec::new()
    }

    /// Metadata of every registered middleware
    fn middlewares(&self) -> Vec<PluginInfo> {
        Vec::new()
    }
}

/// Registry backed by plain maps, filled at startup
pub struct StaticRegistry<P: Project> {
    formats: HashMap<String, Arc<dyn FormatConverter<P>>>,
    middlewares: HashMap<String, Arc<dyn Middleware<P>>>,
}

impl<P: Project> Default for StaticRegistry<P> {
    fn default() -> Self {
        Self {
            formats: HashMap::new(),
            middlewares: HashMap::new(),
        }
    }
}

impl<P: Project> StaticRegistry<P> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a format under its `info().identifier`, replacing any previous one
    pub fn register_format(&mut self, converter: Arc<dyn FormatConverter<P>>) {
        let id = converter.info().identifier.clone();
        if self.formats.insert(id.clone(), converter).is_some() {
            tracing::warn!(format = %id, "Format plugin registered twice, keeping the latest");
        }
    }

    /// Register a middleware under its `info().identifier`
    pub fn register_middleware(&mut self, middleware: Arc<dyn Middleware<P>>) {
        let id = middleware.info().identifier.clone();
        if self.middlewares.insert(id.clone(), middleware).is_some() {
            tracing::warn!(middleware = %id, "Middleware registered twice, keeping the latest");
        }
    }
}

impl<P: Project> PluginRegistry for StaticRegistry<P> {
    type Project = P;

    fn resolve_format(&self, id: &str) -> Option<Arc<dyn FormatConverter<P>>> {
        self.formats.get(id).cloned()
    }

    fn resolve_middleware(&self, id: &str) -> Option<Arc<dyn Middleware<P>>> {
        self.middlewares.get(id).cloned()
    }

    fn formats(&self) -> Vec<PluginInfo> {
        let mut infos: Vec<_> = self.formats.values().map(|c| c.info().clone()).collect();
        infos.sort_by(|a, b| a.identifier.cmp(&b.identifier));
        infos
    }

    fn middlewares(&self) -> Vec<PluginInfo> {
        let mut infos: Vec<_> = self.middlewares.values().map(|m| m.info().clone()).collect();
        infos.sort_by(|a, b| a.identifier.cmp(&b.identifier));
        infos
    }
}
