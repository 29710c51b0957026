//! Unit lifecycle type definitions
//!
//! Supporting types carried by conversion events. The core crate owns the
//! mutable `Unit`; these are the serializable views of it.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

/// Execution state of a unit
///
/// Transitions only Pending → Running → {Succeeded, Failed}. A reset returns a
/// unit to Pending.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnitState {
    /// Accepted but not yet dispatched
    Pending,
    /// Dispatched to a worker
    Running,
    /// Artifacts are waiting in scratch
    Succeeded,
    /// Load, merge, middleware, dump or timeout failure
    Failed,
}

impl UnitState {
    /// Check if the state is terminal (Succeeded or Failed)
    pub fn is_terminal(self) -> bool {
        matches!(self, UnitState::Succeeded | UnitState::Failed)
    }

    /// Check whether `next` is a legal forward transition from this state
    pub fn can_transition_to(self, next: UnitState) -> bool {
        matches!(
            (self, next),
            (UnitState::Pending, UnitState::Running)
                | (UnitState::Running, UnitState::Succeeded)
                | (UnitState::Running, UnitState::Failed)
        )
    }
}

impl fmt::Display for UnitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UnitState::Pending => write!(f, "Pending"),
            UnitState::Running => write!(f, "Running"),
            UnitState::Succeeded => write!(f, "Succeeded"),
            UnitState::Failed => write!(f, "Failed"),
        }
    }
}

/// Placement state of a unit's artifacts in the destination directory
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MoveState {
    /// Nothing placed yet
    #[default]
    Unmoved,
    /// Suspended on a name conflict until a decision arrives
    AwaitingDecision,
    /// Every artifact placed (or deliberately skipped)
    Committed,
    /// Filesystem error while placing; scratch kept for retry
    MoveFailed,
}

/// Destination name collision policy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictPolicy {
    /// Append the unit id before the extension
    #[default]
    Rename,
    /// Replace the existing file
    Overwrite,
    /// Leave the existing file alone and drop the artifact
    Skip,
    /// Ask the caller via a decision request
    Prompt,
}

impl fmt::Display for ConflictPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConflictPolicy::Rename => write!(f, "rename"),
            ConflictPolicy::Overwrite => write!(f, "overwrite"),
            ConflictPolicy::Skip => write!(f, "skip"),
            ConflictPolicy::Prompt => write!(f, "prompt"),
        }
    }
}

/// Stage at which a unit failed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// Format or middleware id unresolved, or plugin lacks the operation
    UnsupportedFormat,
    /// Input plugin `load` failed
    Load,
    /// Combining loaded projects failed
    Merge,
    /// A middleware `process` step failed
    Middleware,
    /// Output plugin `dump` (or split) failed
    Dump,
    /// I/O error while placing an artifact
    Commit,
    /// Unit exceeded the per-unit time limit
    Timeout,
    /// Worker panicked
    Internal,
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FailureKind::UnsupportedFormat => "UnsupportedFormat",
            FailureKind::Load => "LoadFailure",
            FailureKind::Merge => "MergeFailure",
            FailureKind::Middleware => "MiddlewareFailure",
            FailureKind::Dump => "DumpFailure",
            FailureKind::Commit => "CommitFailure",
            FailureKind::Timeout => "Timeout",
            FailureKind::Internal => "InternalFailure",
        };
        write!(f, "{}", name)
    }
}

/// Diagnostic attached to a failed unit
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnitFailure {
    pub kind: FailureKind,
    pub message: String,
}

impl UnitFailure {
    pub fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

impl fmt::Display for UnitFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

/// Serializable view of a unit, without its scratch handle
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnitSnapshot {
    /// Unit id, unique within its batch
    pub id: String,
    /// Source locators in caller order
    pub sources: Vec<PathBuf>,
    /// Base name for destination files
    pub output_stem: String,
    pub state: UnitState,
    /// Present iff `state` is Failed
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<UnitFailure>,
    /// Non-fatal diagnostics, newline separated
    #[serde(skip_serializing_if = "Option::is_none")]
    pub warning: Option<String>,
    pub move_state: MoveState,
    /// Diagnostic of the last failed commit attempt
    #[serde(skip_serializing_if = "Option::is_none")]
    pub move_error: Option<UnitFailure>,
    /// First committed destination
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_path: Option<PathBuf>,
    /// Destinations left untouched under the Skip policy
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub skipped_paths: Vec<PathBuf>,
}
