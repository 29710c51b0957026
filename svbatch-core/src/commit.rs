//! Commit protocol
//!
//! Moves a succeeded unit's artifacts from scratch into the batch destination.
//!
//! **Per artifact:** the candidate name is `{stem}.{ext}` (or `{stem}_{part}`
//! for split parts). A free name is written directly. On a collision the
//! unit's pending decision wins over the batch policy:
//! - Overwrite replaces the file in place
//! - Rename writes `{name}_{unit_id}.{ext}` (replacing it if it exists)
//! - Skip leaves the existing file alone and drops the artifact
//! - Prompt stops, emits a `DecisionRequest` and parks the unit in
//!   AwaitingDecision until a later commit carries a decision
//!
//! Placed artifacts leave scratch one by one, so a commit that stops half way
//! (conflict or I/O error) resumes with only the remaining artifacts.

use crate::engine::ExecutionEngine;
use crate::error::{Error, Result};
use crate::model::{destination_name, renamed_destination, ConversionMode, Unit};
use crate::registry::PluginRegistry;
use crate::scratch::{ScratchKey, ScratchStore};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use svbatch_common::events::{
    ConflictPolicy, ConversionEvent, EventSink, FailureKind, MoveState, UnitFailure, UnitState,
};
use tokio::sync::OwnedMutexGuard;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Caller's answer to a name conflict
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictDecision {
    Overwrite,
    Rename,
    Skip,
}

/// Result of one commit call
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum CommitOutcome {
    /// Every artifact placed or skipped
    Committed {
        output_path: Option<PathBuf>,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        skipped_paths: Vec<PathBuf>,
    },
    /// Suspended on a conflict under the Prompt policy
    AwaitingDecision { proposed_path: PathBuf },
    /// Filesystem error; remaining artifacts stay in scratch
    Failed { message: String },
}

/// Everything `place_artifacts` needs, detached from the unit lock
#[derive(Debug, Clone)]
pub(crate) struct CommitPlan {
    pub key: ScratchKey,
    pub output_stem: String,
    pub mode: ConversionMode,
    pub artifacts: Vec<String>,
    pub destination: PathBuf,
    pub policy: ConflictPolicy,
    pub decision: Option<ConflictDecision>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum CommitStop {
    /// Existing file at this path needs a decision
    Conflict(PathBuf),
    Failed(String),
}

#[derive(Debug, Default)]
pub(crate) struct CommitReport {
    /// Artifacts no longer in scratch (placed or skipped)
    pub handled: Vec<String>,
    pub placed: Vec<PathBuf>,
    pub skipped: Vec<PathBuf>,
    pub stop: Option<CommitStop>,
}

enum Resolution {
    Write(PathBuf),
    Skip,
    Ask,
}

fn resolve_conflict(plan: &CommitPlan, candidate: PathBuf, file_name: &str) -> Resolution {
    let choice = match (plan.decision, plan.policy) {
        (Some(decision), _) => decision,
        (None, ConflictPolicy::Overwrite) => ConflictDecision::Overwrite,
        (None, ConflictPolicy::Rename) => ConflictDecision::Rename,
        (None, ConflictPolicy::Skip) => ConflictDecision::Skip,
        (None, ConflictPolicy::Prompt) => return Resolution::Ask,
    };

    match choice {
        ConflictDecision::Overwrite => Resolution::Write(candidate),
        ConflictDecision::Rename => {
            Resolution::Write(plan.destination.join(renamed_destination(file_name, &plan.key.unit_id)))
        }
        ConflictDecision::Skip => Resolution::Skip,
    }
}

/// Place artifacts in order until done or stopped (blocking)
pub(crate) fn place_artifacts(scratch: &dyn ScratchStore, plan: &CommitPlan) -> CommitReport {
    let mut report = CommitReport::default();

    if let Err(e) = fs::create_dir_all(&plan.destination) {
        report.stop = Some(CommitStop::Failed(format!(
            "cannot create {}: {}",
            plan.destination.display(),
            e
        )));
        return report;
    }

    for name in &plan.artifacts {
        let file_name = destination_name(&plan.output_stem, name, plan.mode);
        let candidate = plan.destination.join(&file_name);

        let target = match candidate.try_exists() {
            Ok(false) => candidate,
            Ok(true) => match resolve_conflict(plan, candidate.clone(), &file_name) {
                Resolution::Write(target) => target,
                Resolution::Skip => {
                    debug!(unit_id = %plan.key.unit_id, path = %candidate.display(), "Destination exists, skipping artifact");
                    discard_artifact(scratch, &plan.key, name);
                    report.handled.push(name.clone());
                    report.skipped.push(candidate);
                    continue;
                }
                Resolution::Ask => {
                    report.stop = Some(CommitStop::Conflict(candidate));
                    return report;
                }
            },
            Err(e) => {
                report.stop = Some(CommitStop::Failed(format!("{}: {}", candidate.display(), e)));
                return report;
            }
        };

        let bytes = match scratch.get(&plan.key, name) {
            Ok(bytes) => bytes,
            Err(e) => {
                report.stop = Some(CommitStop::Failed(format!("{}: scratch read failed: {}", name, e)));
                return report;
            }
        };

        if let Err(e) = write_atomic(&target, &bytes) {
            report.stop = Some(CommitStop::Failed(format!("{}: {}", target.display(), e)));
            return report;
        }

        discard_artifact(scratch, &plan.key, name);
        report.handled.push(name.clone());
        report.placed.push(target);
    }

    if let Err(e) = scratch.purge(&plan.key) {
        debug!(unit_id = %plan.key.unit_id, error = %e, "Scratch purge after commit failed");
    }
    report
}

fn discard_artifact(scratch: &dyn ScratchStore, key: &ScratchKey, name: &str) {
    if let Err(e) = scratch.delete(key, name) {
        warn!(unit_id = %key.unit_id, artifact = name, error = %e, "Failed to drop committed artifact from scratch");
    }
}

/// Write through a temp file in the same directory, then rename over `target`
fn write_atomic(target: &Path, bytes: &[u8]) -> io::Result<()> {
    let dir = target.parent().unwrap_or_else(|| Path::new("."));
    let mut staged = tempfile::NamedTempFile::new_in(dir)?;
    staged.write_all(bytes)?;
    staged.flush()?;
    staged.persist(target).map_err(|e| e.error)?;
    Ok(())
}

impl<R: PluginRegistry> ExecutionEngine<R> {
    /// Commit one unit's artifacts to the batch destination
    ///
    /// `decision` answers a previous `AwaitingDecision` (or forces a choice
    /// up front) and applies to every remaining conflict of this call. A unit
    /// that is already Committed returns Committed without touching the
    /// filesystem.
    ///
    /// Placement and the unit update run in a detached task holding the unit
    /// lock, so dropping the returned future never leaves files placed but
    /// unrecorded.
    pub async fn commit(
        &self,
        batch_id: Uuid,
        unit_id: &str,
        decision: Option<ConflictDecision>,
    ) -> Result<CommitOutcome> {
        let batch = self.batch(batch_id).await?;
        let unit = batch.unit(unit_id)?.lock_owned().await;

        if unit.move_state == MoveState::Committed {
            return Ok(CommitOutcome::Committed {
                output_path: unit.output_path.clone(),
                skipped_paths: unit.skipped_paths.clone(),
            });
        }
        if unit.state != UnitState::Succeeded {
            return Err(Error::UnitNotReady {
                unit_id: unit_id.to_string(),
                state: unit.state,
            });
        }

        let plan = CommitPlan {
            key: ScratchKey::new(batch_id, unit_id),
            output_stem: unit.spec.output_stem.clone(),
            mode: batch.context.settings.mode,
            artifacts: unit.artifacts.clone(),
            destination: batch.context.destination.clone(),
            policy: batch.context.conflict_policy,
            decision,
        };

        let scratch = Arc::clone(&self.scratch);
        let events = Arc::clone(&self.events);
        tokio::spawn(run_commit(unit, plan, scratch, events))
            .await
            .map_err(|e| Error::Internal(format!("commit task failed: {}", e)))?
    }
}

async fn run_commit(
    mut unit: OwnedMutexGuard<Unit>,
    plan: CommitPlan,
    scratch: Arc<dyn ScratchStore>,
    events: Arc<dyn EventSink>,
) -> Result<CommitOutcome> {
    let batch_id = plan.key.batch_id;
    let unit_id = plan.key.unit_id.clone();
    let policy = plan.policy;

    let report = tokio::task::spawn_blocking(move || place_artifacts(scratch.as_ref(), &plan))
        .await
        .map_err(|e| Error::Internal(format!("commit task failed: {}", e)))?;

    unit.artifacts.retain(|name| !report.handled.contains(name));
    unit.placed_paths.extend(report.placed);
    unit.skipped_paths.extend(report.skipped);

    let outcome = match report.stop {
        None => {
            unit.move_state = MoveState::Committed;
            unit.move_error = None;
            unit.output_path = unit.placed_paths.first().cloned();
            info!(
                batch_id = %batch_id,
                unit_id = %unit_id,
                placed = unit.placed_paths.len(),
                skipped = unit.skipped_paths.len(),
                "Unit committed"
            );
            events.publish(ConversionEvent::MoveResult {
                batch_id,
                unit: unit.snapshot(),
                timestamp: Utc::now(),
            });
            CommitOutcome::Committed {
                output_path: unit.output_path.clone(),
                skipped_paths: unit.skipped_paths.clone(),
            }
        }
        Some(CommitStop::Conflict(proposed_path)) => {
            unit.move_state = MoveState::AwaitingDecision;
            info!(
                batch_id = %batch_id,
                unit_id = %unit_id,
                path = %proposed_path.display(),
                "Commit awaiting conflict decision"
            );
            events.publish(ConversionEvent::DecisionRequest {
                batch_id,
                unit_id,
                proposed_path: proposed_path.clone(),
                conflict_policy: policy,
                timestamp: Utc::now(),
            });
            CommitOutcome::AwaitingDecision { proposed_path }
        }
        Some(CommitStop::Failed(message)) => {
            error!(batch_id = %batch_id, unit_id = %unit_id, error = %message, "Commit failed");
            unit.move_state = MoveState::MoveFailed;
            unit.move_error = Some(UnitFailure::new(FailureKind::Commit, message.clone()));
            events.publish(ConversionEvent::MoveResult {
                batch_id,
                unit: unit.snapshot(),
                timestamp: Utc::now(),
            });
            CommitOutcome::Failed { message }
        }
    };

    Ok(outcome)
}
