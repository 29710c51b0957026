//! Streaming convert
//!
//! Single-call variant of a batch: every group gets an immediate "running"
//! record, then one terminal record as it finishes, in completion order.
//! Artifact bytes come back inline instead of being committed, so conflict
//! policies do not apply. The stream is finite (two records per group) and
//! cannot be restarted.

use crate::engine::ExecutionEngine;
use crate::error::Result;
use crate::model::{validate_units, ConversionSettings, UnitSpec};
use crate::pipeline::Pipeline;
use crate::registry::PluginRegistry;
use crate::scratch::{MemoryScratch, ScratchKey, ScratchStore};
use crate::worker::UnitOutcome;
use futures::stream::{FuturesUnordered, Stream, StreamExt};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use svbatch_common::events::{FailureKind, UnitFailure};
use tracing::{debug, info};
use uuid::Uuid;

/// Sources converted together (more than one only under Merge)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversionGroup {
    pub group_id: String,
    pub file_paths: Vec<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConvertRequest {
    #[serde(flatten)]
    pub settings: ConversionSettings,
    pub groups: Vec<ConversionGroup>,
}

/// One record of the convert stream
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupResult {
    pub group_id: String,
    /// True only for the initial record of a group
    pub running: bool,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_kind: Option<FailureKind>,
    #[serde(default)]
    pub warning_messages: Vec<String>,
    /// Artifact bytes in artifact order (split parts 01, 02, ...)
    #[serde(default)]
    pub file_contents: Vec<Vec<u8>>,
}

impl GroupResult {
    pub fn running(group_id: impl Into<String>) -> Self {
        Self {
            group_id: group_id.into(),
            running: true,
            success: false,
            error_message: None,
            failure_kind: None,
            warning_messages: Vec::new(),
            file_contents: Vec::new(),
        }
    }

    fn failed(group_id: String, kind: FailureKind, message: String, warning: Option<String>) -> Self {
        Self {
            group_id,
            running: false,
            success: false,
            error_message: Some(message),
            failure_kind: Some(kind),
            warning_messages: warning_lines(warning),
            file_contents: Vec::new(),
        }
    }
}

/// One entry per diagnostic line
fn warning_lines(warning: Option<String>) -> Vec<String> {
    warning
        .map(|text| text.lines().map(str::to_string).collect())
        .unwrap_or_default()
}

/// Read a finished group's artifacts back out of scratch and free them
fn collect_group(
    group_id: String,
    outcome: UnitOutcome,
    scratch: &dyn ScratchStore,
    key: &ScratchKey,
) -> GroupResult {
    let result = match outcome {
        UnitOutcome::Failed { failure, warning } => {
            GroupResult::failed(group_id, failure.kind, failure.message, warning)
        }
        UnitOutcome::Succeeded { artifacts, warning } => {
            let contents: std::io::Result<Vec<Vec<u8>>> =
                artifacts.iter().map(|name| scratch.get(key, name)).collect();
            match contents {
                Ok(file_contents) => GroupResult {
                    group_id,
                    running: false,
                    success: true,
                    error_message: None,
                    failure_kind: None,
                    warning_messages: warning_lines(warning),
                    file_contents,
                },
                Err(e) => GroupResult::failed(
                    group_id,
                    FailureKind::Dump,
                    format!("cannot read artifact: {}", e),
                    warning,
                ),
            }
        }
    };
    let _ = scratch.purge(key);
    result
}

impl<R: PluginRegistry> ExecutionEngine<R> {
    /// Convert groups and stream their results
    ///
    /// Structural validation happens before the stream is returned; after
    /// that every failure is reported in-band on its group's record.
    pub fn convert(&self, request: ConvertRequest) -> Result<impl Stream<Item = GroupResult> + Send + 'static> {
        let specs: Vec<UnitSpec> = request
            .groups
            .into_iter()
            .map(|g| UnitSpec::new(g.group_id.clone(), g.file_paths, g.group_id))
            .collect();
        validate_units(request.settings.mode, &specs)?;
        let pipeline = Arc::new(Pipeline::resolve(self.registry.as_ref(), &request.settings)?);

        let pool = self.pool.clone();
        let scratch: Arc<dyn ScratchStore> = Arc::new(MemoryScratch::new());
        let stream_id = Uuid::new_v4();
        info!(stream_id = %stream_id, groups = specs.len(), "Streaming conversion started");

        Ok(async_stream::stream! {
            let mut running = FuturesUnordered::new();

            for spec in specs {
                yield GroupResult::running(spec.id.clone());

                let group_id = spec.id.clone();
                let key = ScratchKey::new(stream_id, spec.id.clone());
                let pool = pool.clone();
                let pipeline = Arc::clone(&pipeline);
                let scratch = Arc::clone(&scratch);
                let handle = tokio::spawn(async move {
                    let outcome = match pool.acquire().await {
                        Ok(permit) => {
                            pool.execute(permit, pipeline, spec.clone(), Arc::clone(&scratch), key.clone())
                                .await
                        }
                        Err(e) => UnitOutcome::Failed {
                            failure: UnitFailure::new(FailureKind::Internal, e.to_string()),
                            warning: None,
                        },
                    };
                    collect_group(spec.id, outcome, scratch.as_ref(), &key)
                });
                running.push(async move { (group_id, handle.await) });
            }

            while let Some((group_id, joined)) = running.next().await {
                let result = match joined {
                    Ok(result) => result,
                    Err(e) => GroupResult::failed(
                        group_id,
                        FailureKind::Internal,
                        format!("group task failed: {}", e),
                        None,
                    ),
                };
                debug!(stream_id = %stream_id, group_id = %result.group_id, success = result.success, "Group finished");
                yield result;
            }

            info!(stream_id = %stream_id, "Streaming conversion finished");
        })
    }
}
