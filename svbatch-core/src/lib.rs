//! svbatch core library
//!
//! Coordinates batches of file-format conversion jobs:
//! - **Pipeline**: load → merge → middleware chain → split/dump for one unit
//! - **Execution engine**: bounded worker pool, per-unit failure isolation,
//!   serialized progress events
//! - **Commit protocol**: places scratch artifacts in the destination
//!   directory under a collision policy, suspending on Prompt conflicts
//! - **Streaming convert**: single-call variant returning artifact bytes inline
//!
//! Format parsing, project merge/split and middleware transforms are supplied
//! by a [`registry::PluginRegistry`].

pub mod commit;
pub mod config;
pub mod diagnostics;
pub mod engine;
pub mod error;
pub mod model;
pub mod pipeline;
pub mod registry;
pub mod scratch;
pub mod stream;
pub mod worker;

pub use crate::commit::{CommitOutcome, ConflictDecision};
pub use crate::config::EngineConfig;
pub use crate::engine::{BatchSubmission, ExecutionEngine};
pub use crate::error::{Error, Result};
pub use crate::model::{
    BatchContext, BatchRequest, ConversionMode, ConversionSettings, MiddlewareSelection, UnitSpec,
};
pub use crate::diagnostics::Diagnostics;
pub use crate::registry::{
    FormatConverter, Middleware, OptionBlob, OptionRole, PluginInfo, PluginRegistry, Project,
    StaticRegistry, Unsupported,
};
pub use crate::scratch::{DiskScratch, MemoryScratch, ScratchKey, ScratchStore};
pub use crate::stream::{ConversionGroup, ConvertRequest, GroupResult};

pub use svbatch_common::events::{
    ConflictPolicy, ConversionEvent, EventBus, EventSink, FailureKind, MoveState, UnitFailure,
    UnitSnapshot, UnitState,
};
