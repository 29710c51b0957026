//! Test Helper Utilities
//!
//! Fake plugins for exercising the engine without real file formats.
//!
//! Source file names carry directives, split on `_`:
//! - `tN`: the loaded project has N tracks (default 1)
//! - `fail`: load fails
//! - `slow` / `hang`: load sleeps 400 ms / 1.5 s
//! - `warn`: load raises a non-fatal diagnostic
//!
//! Every plugin call is appended to a shared `CallLog`.

#![allow(dead_code)]

pub mod log_capture;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use svbatch_core::{
    BatchRequest, ConflictPolicy, ConversionEvent, ConversionMode, ConversionSettings,
    Diagnostics, EngineConfig, ExecutionEngine, FormatConverter, MemoryScratch, Middleware,
    OptionBlob, OptionRole, PluginInfo, Project, StaticRegistry, UnitSpec,
};
use tokio::sync::mpsc;

pub type FakeRegistry = StaticRegistry<FakeProject>;
pub type FakeEngine = ExecutionEngine<FakeRegistry>;

/// Project made of named tracks
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FakeProject {
    pub tracks: Vec<String>,
    /// Number of merge calls that produced this project
    pub merges: usize,
}

impl Project for FakeProject {
    fn merge(projects: Vec<Self>) -> anyhow::Result<Self> {
        let merges = projects.iter().map(|p| p.merges).sum::<usize>() + 1;
        Ok(FakeProject {
            tracks: projects.into_iter().flat_map(|p| p.tracks).collect(),
            merges,
        })
    }

    fn split(self, max_track_count: usize) -> anyhow::Result<Vec<Self>> {
        Ok(self
            .tracks
            .chunks(max_track_count)
            .map(|chunk| FakeProject {
                tracks: chunk.to_vec(),
                merges: self.merges,
            })
            .collect())
    }
}

/// Ordered record of plugin calls
#[derive(Clone, Default)]
pub struct CallLog(Arc<Mutex<Vec<String>>>);

impl CallLog {
    pub fn push(&self, entry: impl Into<String>) {
        self.0.lock().unwrap().push(entry.into());
    }

    pub fn entries(&self) -> Vec<String> {
        self.0.lock().unwrap().clone()
    }

    pub fn count(&self, prefix: &str) -> usize {
        self.entries().iter().filter(|e| e.starts_with(prefix)).count()
    }
}

/// Format plugin that fakes load from the file name and dumps JSON
pub struct FakeFormat {
    info: PluginInfo,
    log: CallLog,
    can_dump: bool,
}

impl FormatConverter<FakeProject> for FakeFormat {
    fn info(&self) -> &PluginInfo {
        &self.info
    }

    fn default_options(&self, role: OptionRole) -> OptionBlob {
        match role {
            OptionRole::Input => json!({ "encoding": "utf-8" }),
            OptionRole::Output => json!({ "fail": false, "write": true }),
        }
    }

    fn validate_options(&self, role: OptionRole, raw: &OptionBlob) -> Result<OptionBlob, String> {
        let merged = svbatch_core::registry::overlay_options(&self.default_options(role), raw)?;
        if role == OptionRole::Output && !merged["fail"].is_boolean() {
            return Err("'fail' must be a boolean".to_string());
        }
        Ok(merged)
    }

    fn load(&self, path: &Path, _options: &OptionBlob, diagnostics: &mut Diagnostics) -> anyhow::Result<FakeProject> {
        let stem = path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or_default()
            .to_string();
        self.log.push(format!("load:{}", stem));

        let mut track_count = 1;
        for directive in stem.split('_') {
            match directive {
                "fail" => anyhow::bail!("corrupt file {}", stem),
                "slow" => std::thread::sleep(Duration::from_millis(400)),
                "hang" => std::thread::sleep(Duration::from_millis(1500)),
                "warn" => diagnostics.warn(format!("{}: lyrics missing", stem)),
                d if d.starts_with('t') => {
                    if let Ok(n) = d[1..].parse() {
                        track_count = n;
                    }
                }
                _ => {}
            }
        }

        Ok(FakeProject {
            tracks: (1..=track_count).map(|i| format!("{}#{}", stem, i)).collect(),
            merges: 0,
        })
    }

    fn dump(
        &self,
        path: &Path,
        project: &FakeProject,
        options: &OptionBlob,
        _diagnostics: &mut Diagnostics,
    ) -> anyhow::Result<()> {
        if !self.can_dump {
            return Err(svbatch_core::Unsupported {
                plugin: self.info.identifier.clone(),
                operation: "dump",
            }
            .into());
        }
        let name = path.file_name().and_then(|n| n.to_str()).unwrap_or_default();
        self.log.push(format!("dump:{}", name));

        if options["fail"].as_bool() == Some(true) {
            anyhow::bail!("encoder refused project");
        }
        if options["write"].as_bool() == Some(false) {
            return Ok(());
        }
        std::fs::write(path, serde_json::to_vec(project)?)?;
        Ok(())
    }
}

/// Middleware appending `label` to every track name
pub struct TagMiddleware {
    info: PluginInfo,
    log: CallLog,
}

impl Middleware<FakeProject> for TagMiddleware {
    fn info(&self) -> &PluginInfo {
        &self.info
    }

    fn default_options(&self) -> OptionBlob {
        json!({ "label": "tag" })
    }

    fn process(&self, mut project: FakeProject, options: &OptionBlob, _diagnostics: &mut Diagnostics) -> anyhow::Result<FakeProject> {
        let label = options["label"].as_str().unwrap_or("tag").to_string();
        self.log.push(format!("mw:{}", label));
        for track in &mut project.tracks {
            track.push('+');
            track.push_str(&label);
        }
        Ok(project)
    }
}

/// Middleware that always fails (`explode`) or panics (`panic`)
pub struct BrokenMiddleware {
    info: PluginInfo,
    log: CallLog,
    panics: bool,
}

impl Middleware<FakeProject> for BrokenMiddleware {
    fn info(&self) -> &PluginInfo {
        &self.info
    }

    fn process(&self, _project: FakeProject, _options: &OptionBlob, diagnostics: &mut Diagnostics) -> anyhow::Result<FakeProject> {
        self.log.push(format!("mw:{}", self.info.identifier));
        if self.panics {
            panic!("middleware bug");
        }
        diagnostics.warn("pitch curve discarded");
        anyhow::bail!("pitch data out of range")
    }
}

/// Registry with formats `ust` (in/out), `out` (in/out), `readonly` (no dump)
/// and middlewares `tag`, `explode`, `panic`
pub fn fake_registry() -> (Arc<FakeRegistry>, CallLog) {
    let log = CallLog::default();
    let mut registry = FakeRegistry::new();

    for (id, can_dump) in [("ust", true), ("out", true), ("readonly", false)] {
        registry.register_format(Arc::new(FakeFormat {
            info: PluginInfo::format(id, id),
            log: log.clone(),
            can_dump,
        }));
    }
    registry.register_middleware(Arc::new(TagMiddleware {
        info: PluginInfo::middleware("tag"),
        log: log.clone(),
    }));
    for (id, panics) in [("explode", false), ("panic", true)] {
        registry.register_middleware(Arc::new(BrokenMiddleware {
            info: PluginInfo::middleware(id),
            log: log.clone(),
            panics,
        }));
    }

    (Arc::new(registry), log)
}

/// Engine over the fake registry, publishing into an unbounded channel
pub fn create_test_engine(
    config: EngineConfig,
) -> (FakeEngine, mpsc::UnboundedReceiver<ConversionEvent>, CallLog) {
    let (registry, log) = fake_registry();
    let (tx, rx) = mpsc::unbounded_channel();
    let engine = ExecutionEngine::new(registry, Arc::new(MemoryScratch::new()), Arc::new(tx), &config);
    (engine, rx, log)
}

/// Four workers, 1 s unit timeout
pub fn default_test_config() -> EngineConfig {
    EngineConfig::default()
        .with_max_workers(4)
        .with_unit_timeout(Some(Duration::from_secs(1)))
}

pub fn unit(id: &str, source: &str, stem: &str) -> UnitSpec {
    UnitSpec::single(id, PathBuf::from("/in").join(source), stem)
}

pub fn batch_request(
    settings: ConversionSettings,
    units: Vec<UnitSpec>,
    destination: &Path,
    policy: ConflictPolicy,
) -> BatchRequest {
    BatchRequest {
        settings,
        units,
        destination: destination.to_path_buf(),
        conflict_policy: policy,
    }
}

pub fn direct(input: &str, output: &str) -> ConversionSettings {
    ConversionSettings::new(input, output)
}

pub fn split(max_track_count: usize) -> ConversionSettings {
    ConversionSettings::new("ust", "ust")
        .with_mode(ConversionMode::Split)
        .with_max_track_count(max_track_count)
}

/// Everything published so far
pub fn drain_events(rx: &mut mpsc::UnboundedReceiver<ConversionEvent>) -> Vec<ConversionEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

/// Pull the JSON written by `FakeFormat::dump`
pub fn read_project(bytes: &[u8]) -> FakeProject {
    serde_json::from_slice::<Value>(bytes)
        .and_then(serde_json::from_value)
        .unwrap()
}
