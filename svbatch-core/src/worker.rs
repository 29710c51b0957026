//! Bounded worker pool
//!
//! Unit work (plugin load/middleware/dump) is blocking, so each unit runs on
//! the blocking thread pool while a semaphore bounds how many run at once.
//!
//! **Time limit:** the async side stops waiting once the limit passes and
//! reports `Timeout`. A blocking thread cannot be interrupted, so it keeps
//! going; a handshake on `status` decides who owns the result and a unit that
//! lost the race never writes to scratch.

use crate::error::{Error, Result};
use crate::model::UnitSpec;
use crate::pipeline::{Pipeline, PipelineOutput};
use crate::registry::Project;
use crate::scratch::{ScratchKey, ScratchStore};
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;
use svbatch_common::events::{FailureKind, UnitFailure};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::{debug, error, warn};

const RUNNING: u8 = 0;
const DONE: u8 = 1;
const TIMED_OUT: u8 = 2;

/// Terminal result of one unit execution
#[derive(Debug, Clone, PartialEq)]
pub enum UnitOutcome {
    /// Artifacts were stored in scratch under these names
    Succeeded {
        artifacts: Vec<String>,
        warning: Option<String>,
    },
    Failed {
        failure: UnitFailure,
        warning: Option<String>,
    },
}

/// Semaphore-bounded executor shared by every batch of an engine
#[derive(Clone)]
pub struct WorkerPool {
    permits: Arc<Semaphore>,
    size: usize,
    unit_timeout: Option<Duration>,
}

impl WorkerPool {
    pub fn new(size: usize, unit_timeout: Option<Duration>) -> Self {
        let size = size.max(1);
        Self {
            permits: Arc::new(Semaphore::new(size)),
            size,
            unit_timeout,
        }
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// Workers currently idle
    pub fn available(&self) -> usize {
        self.permits.available_permits()
    }

    pub fn unit_timeout(&self) -> Option<Duration> {
        self.unit_timeout
    }

    /// Wait for a free worker slot
    pub async fn acquire(&self) -> Result<OwnedSemaphorePermit> {
        Arc::clone(&self.permits)
            .acquire_owned()
            .await
            .map_err(|_| Error::Internal("worker pool closed".to_string()))
    }

    /// Run one unit on a blocking thread and store its artifacts in scratch
    ///
    /// The permit is released when the blocking work ends, even if the unit
    /// already timed out, so a hung plugin keeps its slot occupied.
    pub async fn execute<P: Project>(
        &self,
        permit: OwnedSemaphorePermit,
        pipeline: Arc<Pipeline<P>>,
        unit: UnitSpec,
        scratch: Arc<dyn ScratchStore>,
        key: ScratchKey,
    ) -> UnitOutcome {
        let status = Arc::new(AtomicU8::new(RUNNING));

        let mut handle = {
            let status = Arc::clone(&status);
            let scratch = Arc::clone(&scratch);
            let key = key.clone();
            tokio::task::spawn_blocking(move || {
                let _permit = permit;
                let result = pipeline.run(&unit);

                if status
                    .compare_exchange(RUNNING, DONE, Ordering::AcqRel, Ordering::Acquire)
                    .is_err()
                {
                    debug!(unit_id = %unit.id, "Unit finished after its time limit, output discarded");
                    return None;
                }

                Some(match result {
                    Ok(output) => store_artifacts(output, scratch.as_ref(), &key),
                    Err(failed) => UnitOutcome::Failed {
                        failure: failed.failure,
                        warning: failed.diagnostics.warning_text(),
                    },
                })
            })
        };

        let joined = match self.unit_timeout {
            None => (&mut handle).await,
            Some(limit) => match tokio::time::timeout(limit, &mut handle).await {
                Ok(joined) => joined,
                Err(_) => {
                    if status
                        .compare_exchange(RUNNING, TIMED_OUT, Ordering::AcqRel, Ordering::Acquire)
                        .is_ok()
                    {
                        warn!(unit_id = %key.unit_id, limit_secs = limit.as_secs_f64(), "Unit timed out");
                        return timeout_outcome(limit);
                    }
                    // Finished right at the limit; its result stands
                    (&mut handle).await
                }
            },
        };

        match joined {
            Ok(Some(outcome)) => outcome,
            Ok(None) => timeout_outcome(self.unit_timeout.unwrap_or_default()),
            Err(join_error) => {
                error!(unit_id = %key.unit_id, error = %join_error, "Unit worker crashed");
                let _ = scratch.purge(&key);
                let message = if join_error.is_panic() {
                    "worker panicked".to_string()
                } else {
                    format!("worker aborted: {}", join_error)
                };
                UnitOutcome::Failed {
                    failure: UnitFailure::new(FailureKind::Internal, message),
                    warning: None,
                }
            }
        }
    }
}

fn timeout_outcome(limit: Duration) -> UnitOutcome {
    UnitOutcome::Failed {
        failure: UnitFailure::new(
            FailureKind::Timeout,
            format!("unit exceeded its {:.1}s time limit", limit.as_secs_f64()),
        ),
        warning: None,
    }
}

/// Move artifacts into scratch; a partial write is rolled back
fn store_artifacts(output: PipelineOutput, scratch: &dyn ScratchStore, key: &ScratchKey) -> UnitOutcome {
    let warning = output.diagnostics.warning_text();
    let mut names = Vec::with_capacity(output.artifacts.len());

    for artifact in output.artifacts {
        if let Err(e) = scratch.put(key, &artifact.name, artifact.bytes) {
            error!(unit_id = %key.unit_id, artifact = %artifact.name, error = %e, "Scratch write failed");
            let _ = scratch.purge(key);
            return UnitOutcome::Failed {
                failure: UnitFailure::new(
                    FailureKind::Dump,
                    format!("{}: cannot store artifact: {}", artifact.name, e),
                ),
                warning,
            };
        }
        names.push(artifact.name);
    }

    UnitOutcome::Succeeded {
        artifacts: names,
        warning,
    }
}
