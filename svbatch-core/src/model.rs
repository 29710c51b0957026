//! Batch data model
//!
//! `BatchRequest` is what a caller submits. Once accepted it becomes an
//! immutable `BatchContext` plus one mutable `Unit` per job. Only the unit
//! fields change after the batch starts.

use crate::error::{Error, Result};
use crate::registry::OptionBlob;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use svbatch_common::events::{
    ConflictPolicy, MoveState, UnitFailure, UnitSnapshot, UnitState,
};
use uuid::Uuid;

/// How sources map to units and artifacts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConversionMode {
    /// 1 source → 1 unit → 1 artifact
    #[default]
    Direct,
    /// 1 source → 1 unit → K artifacts
    Split,
    /// N sources → 1 unit → 1 artifact
    Merge,
}

/// One selected middleware with its caller options
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MiddlewareSelection {
    pub id: String,
    #[serde(default)]
    pub options: OptionBlob,
}

impl MiddlewareSelection {
    pub fn new(id: impl Into<String>, options: OptionBlob) -> Self {
        Self {
            id: id.into(),
            options,
        }
    }
}

/// Conversion parameters shared by batch submission and streaming convert
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversionSettings {
    pub input_format: String,
    pub output_format: String,
    #[serde(default)]
    pub mode: ConversionMode,
    /// Upper bound on tracks per split artifact (Split mode only)
    #[serde(default)]
    pub max_track_count: usize,
    #[serde(default)]
    pub input_options: OptionBlob,
    #[serde(default)]
    pub output_options: OptionBlob,
    /// Applied strictly in this order
    #[serde(default)]
    pub middlewares: Vec<MiddlewareSelection>,
}

impl ConversionSettings {
    pub fn new(input_format: impl Into<String>, output_format: impl Into<String>) -> Self {
        Self {
            input_format: input_format.into(),
            output_format: output_format.into(),
            mode: ConversionMode::Direct,
            max_track_count: 0,
            input_options: OptionBlob::Null,
            output_options: OptionBlob::Null,
            middlewares: Vec::new(),
        }
    }

    pub fn with_mode(mut self, mode: ConversionMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_max_track_count(mut self, max_track_count: usize) -> Self {
        self.max_track_count = max_track_count;
        self
    }

    pub fn with_middleware(mut self, id: impl Into<String>, options: OptionBlob) -> Self {
        self.middlewares.push(MiddlewareSelection::new(id, options));
        self
    }
}

/// One logical conversion job as submitted
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnitSpec {
    pub id: String,
    /// Source locators in caller order (more than one only under Merge)
    pub sources: Vec<PathBuf>,
    pub output_stem: String,
}

impl UnitSpec {
    pub fn new(id: impl Into<String>, sources: Vec<PathBuf>, output_stem: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            sources,
            output_stem: output_stem.into(),
        }
    }

    /// Single-source unit
    pub fn single(id: impl Into<String>, source: impl Into<PathBuf>, output_stem: impl Into<String>) -> Self {
        Self::new(id, vec![source.into()], output_stem)
    }
}

/// Batch as submitted by a caller
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchRequest {
    #[serde(flatten)]
    pub settings: ConversionSettings,
    pub units: Vec<UnitSpec>,
    pub destination: PathBuf,
    #[serde(default)]
    pub conflict_policy: ConflictPolicy,
}

/// Accepted batch; never mutated after submit
#[derive(Debug, Clone)]
pub struct BatchContext {
    pub batch_id: Uuid,
    /// Settings with option blobs replaced by their validated form
    pub settings: ConversionSettings,
    /// Extension of the output format's artifacts
    pub output_suffix: String,
    pub units: Vec<UnitSpec>,
    pub destination: PathBuf,
    pub conflict_policy: ConflictPolicy,
    pub created_at: DateTime<Utc>,
}

/// Check unit shapes against the mode
///
/// Rejects an empty list, duplicate ids, wrong source counts and ids or
/// stems that could escape the destination or scratch namespace.
pub fn validate_units(mode: ConversionMode, units: &[UnitSpec]) -> Result<()> {
    if units.is_empty() {
        return Err(Error::EmptyBatch);
    }

    let mut seen = HashSet::with_capacity(units.len());
    for unit in units {
        check_path_segment(&unit.id, "id").map_err(|reason| Error::InvalidUnit {
            unit_id: unit.id.clone(),
            reason,
        })?;
        check_path_segment(&unit.output_stem, "output stem").map_err(|reason| {
            Error::InvalidUnit {
                unit_id: unit.id.clone(),
                reason,
            }
        })?;

        if !seen.insert(unit.id.as_str()) {
            return Err(Error::DuplicateUnit(unit.id.clone()));
        }

        let valid_count = match mode {
            ConversionMode::Merge => !unit.sources.is_empty(),
            ConversionMode::Direct | ConversionMode::Split => unit.sources.len() == 1,
        };
        if !valid_count {
            return Err(Error::InvalidUnit {
                unit_id: unit.id.clone(),
                reason: format!("{} source(s) not allowed in {:?} mode", unit.sources.len(), mode),
            });
        }
    }

    Ok(())
}

fn check_path_segment(value: &str, what: &str) -> std::result::Result<(), String> {
    if value.trim().is_empty() {
        return Err(format!("{} must not be empty", what));
    }
    if value == "." || value == ".." || value.contains(['/', '\\', '\0']) {
        return Err(format!("{} '{}' must be a plain file name", what, value));
    }
    Ok(())
}

/// Scratch name of a produced artifact
///
/// Split parts are numbered from 1 with two digits ("01.ust", "02.ust");
/// the single artifact of Direct/Merge units is "main.{suffix}".
pub fn artifact_name(ordinal: Option<usize>, suffix: &str) -> String {
    match ordinal {
        Some(n) => format!("{:02}.{}", n, suffix),
        None => format!("main.{}", suffix),
    }
}

/// Destination file name for one artifact
///
/// `{stem}.{ext}` for single-artifact units, `{stem}_{artifact}` for split
/// parts.
pub fn destination_name(output_stem: &str, artifact: &str, mode: ConversionMode) -> String {
    if mode == ConversionMode::Split {
        return format!("{}_{}", output_stem, artifact);
    }
    match Path::new(artifact).extension().and_then(|e| e.to_str()) {
        Some(ext) => format!("{}.{}", output_stem, ext),
        None => output_stem.to_string(),
    }
}

/// Alternate name used by the Rename policy: the unit id goes before the
/// extension, so the same unit always gets the same name
pub fn renamed_destination(file_name: &str, unit_id: &str) -> String {
    match file_name.rfind('.') {
        Some(dot) if dot > 0 => format!("{}_{}{}", &file_name[..dot], unit_id, &file_name[dot..]),
        _ => format!("{}_{}", file_name, unit_id),
    }
}

/// Mutable runtime record of one unit
///
/// Written only by the engine task currently handling the unit; the unit's
/// mutex serializes that handoff.
#[derive(Debug, Clone)]
pub struct Unit {
    pub(crate) spec: UnitSpec,
    pub(crate) state: UnitState,
    pub(crate) error: Option<UnitFailure>,
    pub(crate) warning: Option<String>,
    /// Names of artifacts still held in scratch
    pub(crate) artifacts: Vec<String>,
    pub(crate) move_state: MoveState,
    pub(crate) move_error: Option<UnitFailure>,
    pub(crate) output_path: Option<PathBuf>,
    pub(crate) skipped_paths: Vec<PathBuf>,
    /// Destinations written so far, including those from a suspended commit
    pub(crate) placed_paths: Vec<PathBuf>,
    /// Sitting in a dispatch queue
    pub(crate) queued: bool,
}

impl Unit {
    pub fn new(spec: UnitSpec) -> Self {
        Self {
            spec,
            state: UnitState::Pending,
            error: None,
            warning: None,
            artifacts: Vec::new(),
            move_state: MoveState::Unmoved,
            move_error: None,
            output_path: None,
            skipped_paths: Vec::new(),
            placed_paths: Vec::new(),
            queued: false,
        }
    }

    pub fn id(&self) -> &str {
        &self.spec.id
    }

    pub fn state(&self) -> UnitState {
        self.state
    }

    /// Queued for dispatch or currently running
    pub fn is_busy(&self) -> bool {
        self.queued || self.state == UnitState::Running
    }

    /// Pending → Running; false if the unit is not Pending
    pub(crate) fn begin(&mut self) -> bool {
        self.queued = false;
        if !self.state.can_transition_to(UnitState::Running) {
            return false;
        }
        self.state = UnitState::Running;
        true
    }

    /// Running → Succeeded with the artifacts now in scratch
    pub(crate) fn succeed(&mut self, artifacts: Vec<String>, warning: Option<String>) {
        debug_assert!(self.state.can_transition_to(UnitState::Succeeded));
        self.state = UnitState::Succeeded;
        self.error = None;
        self.warning = warning;
        self.artifacts = artifacts;
    }

    /// Running → Failed
    pub(crate) fn fail(&mut self, failure: UnitFailure, warning: Option<String>) {
        debug_assert!(self.state.can_transition_to(UnitState::Failed));
        self.state = UnitState::Failed;
        self.error = Some(failure);
        self.warning = warning;
        self.artifacts.clear();
    }

    /// Back to a fresh Pending unit; running it twice changes nothing
    ///
    /// The caller purges the unit's scratch namespace.
    pub(crate) fn reset(&mut self) {
        self.state = UnitState::Pending;
        self.error = None;
        self.warning = None;
        self.artifacts.clear();
        self.move_state = MoveState::Unmoved;
        self.move_error = None;
        self.output_path = None;
        self.skipped_paths.clear();
        self.placed_paths.clear();
    }

    /// Serializable view (no scratch handle)
    pub fn snapshot(&self) -> UnitSnapshot {
        UnitSnapshot {
            id: self.spec.id.clone(),
            sources: self.spec.sources.clone(),
            output_stem: self.spec.output_stem.clone(),
            state: self.state,
            error: self.error.clone(),
            warning: self.warning.clone(),
            move_state: self.move_state,
            move_error: self.move_error.clone(),
            output_path: self.output_path.clone(),
            skipped_paths: self.skipped_paths.clone(),
        }
    }
}
