//! Error types for batch-level calls
//!
//! Only structural problems surface as `Err`: a failing unit never fails the
//! batch call. Per-unit failures travel as `UnitFailure` on the unit itself.

use svbatch_common::events::UnitState;
use thiserror::Error;
use uuid::Uuid;

/// Result type for engine operations
pub type Result<T> = std::result::Result<T, Error>;

/// Structural errors raised by submit, commit and friends
#[derive(Debug, Error)]
pub enum Error {
    /// Batch submitted without units (or streaming call without groups)
    #[error("Batch has no units")]
    EmptyBatch,

    /// Two units share an id
    #[error("Duplicate unit id: {0}")]
    DuplicateUnit(String),

    /// Unit shape is not valid for the batch mode
    #[error("Invalid unit {unit_id}: {reason}")]
    InvalidUnit { unit_id: String, reason: String },

    /// Batch-wide parameter is not valid
    #[error("Invalid batch: {0}")]
    InvalidBatch(String),

    /// Format id did not resolve in the plugin registry
    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),

    /// Middleware id did not resolve in the plugin registry
    #[error("Unsupported middleware: {0}")]
    UnsupportedMiddleware(String),

    /// Option blob rejected by the plugin's schema
    #[error("Invalid options for {plugin}: {reason}")]
    InvalidOptions { plugin: String, reason: String },

    /// Batch handle not known to this engine
    #[error("Unknown batch: {0}")]
    UnknownBatch(Uuid),

    /// Unit id not part of the batch
    #[error("Unknown unit: {0}")]
    UnknownUnit(String),

    /// Commit requested for a unit that has not succeeded
    #[error("Unit {unit_id} is {state}, not ready to commit")]
    UnitNotReady { unit_id: String, state: UnitState },

    /// Unit is queued or running and cannot be reset or re-run
    #[error("Unit {0} is still being processed")]
    UnitBusy(String),

    /// I/O error outside a unit's own work
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Background task failure
    #[error("Internal error: {0}")]
    Internal(String),
}
