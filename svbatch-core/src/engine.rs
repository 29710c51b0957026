//! Execution engine
//!
//! Accepts batches, creates their units and dispatches them onto the shared
//! worker pool. Each dispatch round is driven by one coordinator task, which
//! is the only place unit execution events are published from, so a round's
//! events come out serialized even though units run in parallel.
//!
//! **Failure isolation:** a failed unit is recorded and reported like any
//! other terminal state; siblings keep running. There is no fail-fast.
//!
//! **Cancellation:** only before dispatch. `cancel` stops the coordinator
//! from starting queued units (they stay Pending); running units finish.

use crate::config::EngineConfig;
use crate::error::{Error, Result};
use crate::model::{validate_units, BatchContext, BatchRequest, Unit};
use crate::pipeline::Pipeline;
use crate::registry::{PluginRegistry, Project};
use crate::scratch::{ScratchKey, ScratchStore};
use crate::worker::{UnitOutcome, WorkerPool};
use chrono::Utc;
use futures::stream::{FuturesUnordered, StreamExt};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use svbatch_common::events::{ConversionEvent, EventSink, FailureKind, UnitFailure, UnitSnapshot};
use tokio::sync::{watch, Mutex, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Handle returned by `submit`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchSubmission {
    pub batch_id: Uuid,
    /// Unit ids in submission order
    pub unit_ids: Vec<String>,
}

/// Accepted batch and its runtime state
pub(crate) struct Batch<P: Project> {
    pub context: BatchContext,
    pub pipeline: Arc<Pipeline<P>>,
    pub units: Vec<Arc<Mutex<Unit>>>,
    index: HashMap<String, usize>,
    cancel: std::sync::Mutex<CancellationToken>,
    /// Units queued or running across all dispatch rounds
    in_flight: watch::Sender<usize>,
}

impl<P: Project> Batch<P> {
    pub fn unit(&self, unit_id: &str) -> Result<Arc<Mutex<Unit>>> {
        self.index
            .get(unit_id)
            .map(|&i| Arc::clone(&self.units[i]))
            .ok_or_else(|| Error::UnknownUnit(unit_id.to_string()))
    }

    fn key(&self, unit_id: &str) -> ScratchKey {
        ScratchKey::new(self.context.batch_id, unit_id)
    }

    /// Token for a new dispatch round; a cancelled batch gets a fresh one
    fn round_token(&self) -> CancellationToken {
        let mut token = self.cancel.lock().unwrap_or_else(|e| e.into_inner());
        if token.is_cancelled() {
            *token = CancellationToken::new();
        }
        token.clone()
    }

    fn cancel_dispatch(&self) {
        self.cancel
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .cancel();
    }

    async fn wait_idle(&self) -> Result<()> {
        let mut rx = self.in_flight.subscribe();
        rx.wait_for(|n| *n == 0)
            .await
            .map(|_| ())
            .map_err(|_| Error::Internal("batch state dropped".to_string()))
    }

    fn finish_one(&self) {
        self.in_flight.send_modify(|n| *n = n.saturating_sub(1));
    }
}

/// Batch conversion engine
///
/// Holds any number of independent batches, addressed by id.
pub struct ExecutionEngine<R: PluginRegistry> {
    pub(crate) registry: Arc<R>,
    pub(crate) scratch: Arc<dyn ScratchStore>,
    pub(crate) events: Arc<dyn EventSink>,
    pub(crate) pool: WorkerPool,
    batches: RwLock<HashMap<Uuid, Arc<Batch<R::Project>>>>,
}

impl<R: PluginRegistry> ExecutionEngine<R> {
    pub fn new(
        registry: Arc<R>,
        scratch: Arc<dyn ScratchStore>,
        events: Arc<dyn EventSink>,
        config: &EngineConfig,
    ) -> Self {
        let pool = WorkerPool::new(config.worker_count(), config.unit_timeout());
        info!(
            workers = pool.size(),
            unit_timeout_secs = config.unit_timeout().map(|t| t.as_secs_f64()),
            "Execution engine ready"
        );
        Self {
            registry,
            scratch,
            events,
            pool,
            batches: RwLock::new(HashMap::new()),
        }
    }

    pub fn registry(&self) -> &Arc<R> {
        &self.registry
    }

    pub fn worker_count(&self) -> usize {
        self.pool.size()
    }

    pub(crate) async fn batch(&self, batch_id: Uuid) -> Result<Arc<Batch<R::Project>>> {
        self.batches
            .read()
            .await
            .get(&batch_id)
            .cloned()
            .ok_or(Error::UnknownBatch(batch_id))
    }

    /// Validate a batch, create its units and start dispatching them
    ///
    /// Returns once every unit is queued; execution continues in the
    /// background. Only structural problems fail this call.
    pub async fn submit(&self, request: BatchRequest) -> Result<BatchSubmission> {
        validate_units(request.settings.mode, &request.units)?;
        let pipeline = Pipeline::resolve(self.registry.as_ref(), &request.settings)?;

        let batch_id = Uuid::new_v4();
        let context = BatchContext {
            batch_id,
            settings: pipeline.settings().clone(),
            output_suffix: pipeline.output_suffix().to_string(),
            units: request.units,
            destination: request.destination,
            conflict_policy: request.conflict_policy,
            created_at: Utc::now(),
        };

        let units: Vec<_> = context
            .units
            .iter()
            .map(|spec| {
                let mut unit = Unit::new(spec.clone());
                unit.queued = true;
                Arc::new(Mutex::new(unit))
            })
            .collect();
        let index = context
            .units
            .iter()
            .enumerate()
            .map(|(i, spec)| (spec.id.clone(), i))
            .collect();
        let unit_ids: Vec<String> = context.units.iter().map(|u| u.id.clone()).collect();

        let (in_flight, _) = watch::channel(0);
        let batch = Arc::new(Batch {
            context,
            pipeline: Arc::new(pipeline),
            units,
            index,
            cancel: std::sync::Mutex::new(CancellationToken::new()),
            in_flight,
        });

        self.batches.write().await.insert(batch_id, Arc::clone(&batch));
        info!(
            batch_id = %batch_id,
            units = unit_ids.len(),
            input = %batch.context.settings.input_format,
            output = %batch.context.settings.output_format,
            mode = ?batch.context.settings.mode,
            "Batch accepted"
        );

        self.start_round(&batch, (0..unit_ids.len()).collect());

        Ok(BatchSubmission { batch_id, unit_ids })
    }

    /// Spawn a coordinator for units already marked queued
    fn start_round(&self, batch: &Arc<Batch<R::Project>>, indices: Vec<usize>) {
        if indices.is_empty() {
            return;
        }
        batch.in_flight.send_modify(|n| *n += indices.len());
        let round = DispatchRound {
            batch: Arc::clone(batch),
            pool: self.pool.clone(),
            scratch: Arc::clone(&self.scratch),
            events: Arc::clone(&self.events),
            cancel: batch.round_token(),
        };
        tokio::spawn(round.run(indices));
    }

    /// Snapshots of every unit, in submission order
    pub async fn batch_status(&self, batch_id: Uuid) -> Result<Vec<UnitSnapshot>> {
        let batch = self.batch(batch_id).await?;
        let mut snapshots = Vec::with_capacity(batch.units.len());
        for slot in &batch.units {
            snapshots.push(slot.lock().await.snapshot());
        }
        Ok(snapshots)
    }

    /// The accepted (validated) batch description
    pub async fn batch_context(&self, batch_id: Uuid) -> Result<BatchContext> {
        Ok(self.batch(batch_id).await?.context.clone())
    }

    pub async fn batch_ids(&self) -> Vec<Uuid> {
        self.batches.read().await.keys().copied().collect()
    }

    /// Resolve once no unit of the batch is queued or running
    pub async fn wait_idle(&self, batch_id: Uuid) -> Result<()> {
        self.batch(batch_id).await?.wait_idle().await
    }

    /// Return a unit to Pending and purge its scratch
    ///
    /// Idempotent. Refused while the unit is queued or running.
    pub async fn reset(&self, batch_id: Uuid, unit_id: &str) -> Result<UnitSnapshot> {
        let batch = self.batch(batch_id).await?;
        let slot = batch.unit(unit_id)?;
        let mut unit = slot.lock().await;

        if unit.is_busy() {
            return Err(Error::UnitBusy(unit_id.to_string()));
        }
        self.scratch.purge(&batch.key(unit_id))?;
        unit.reset();
        debug!(batch_id = %batch_id, unit_id = %unit_id, "Unit reset");
        Ok(unit.snapshot())
    }

    /// Reset the listed units (all units when empty) and dispatch them again
    pub async fn rerun(&self, batch_id: Uuid, unit_ids: &[String]) -> Result<()> {
        let batch = self.batch(batch_id).await?;

        let mut indices = Vec::new();
        if unit_ids.is_empty() {
            indices.extend(0..batch.units.len());
        } else {
            for id in unit_ids {
                let i = *batch
                    .index
                    .get(id)
                    .ok_or_else(|| Error::UnknownUnit(id.clone()))?;
                if !indices.contains(&i) {
                    indices.push(i);
                }
            }
        }

        // Lock in index order; nothing else holds two unit locks at once
        let mut sorted = indices.clone();
        sorted.sort_unstable();
        let mut guards = Vec::with_capacity(sorted.len());
        for &i in &sorted {
            guards.push(batch.units[i].lock().await);
        }

        if let Some(busy) = guards.iter().find(|unit| unit.is_busy()) {
            return Err(Error::UnitBusy(busy.id().to_string()));
        }
        for unit in guards.iter_mut() {
            self.scratch.purge(&batch.key(unit.id()))?;
            unit.reset();
            unit.queued = true;
        }
        drop(guards);

        info!(batch_id = %batch_id, units = indices.len(), "Re-running units");
        self.start_round(&batch, indices);
        Ok(())
    }

    /// Stop dispatching queued units of the batch
    pub async fn cancel(&self, batch_id: Uuid) -> Result<()> {
        let batch = self.batch(batch_id).await?;
        batch.cancel_dispatch();
        info!(batch_id = %batch_id, "Batch dispatch cancelled");
        Ok(())
    }

    /// Forget the batch: stop dispatch, wait for running units, purge scratch
    pub async fn discard(&self, batch_id: Uuid) -> Result<()> {
        let batch = self
            .batches
            .write()
            .await
            .remove(&batch_id)
            .ok_or(Error::UnknownBatch(batch_id))?;

        batch.cancel_dispatch();
        batch.wait_idle().await?;

        for spec in &batch.context.units {
            if let Err(e) = self.scratch.purge(&batch.key(&spec.id)) {
                warn!(batch_id = %batch_id, unit_id = %spec.id, error = %e, "Scratch purge failed");
            }
        }
        info!(batch_id = %batch_id, "Batch discarded");
        Ok(())
    }
}

/// One coordinator pass over a set of queued units
struct DispatchRound<P: Project> {
    batch: Arc<Batch<P>>,
    pool: WorkerPool,
    scratch: Arc<dyn ScratchStore>,
    events: Arc<dyn EventSink>,
    cancel: CancellationToken,
}

impl<P: Project> DispatchRound<P> {
    /// Seed workers as permits free up, apply results in completion order
    async fn run(self, indices: Vec<usize>) {
        let batch_id = self.batch.context.batch_id;
        let mut queue = indices.into_iter().peekable();
        let mut running = FuturesUnordered::new();
        let mut succeeded = 0usize;
        let mut failed = 0usize;

        loop {
            if self.cancel.is_cancelled() && queue.peek().is_some() {
                let mut left = 0usize;
                for i in queue.by_ref() {
                    self.batch.units[i].lock().await.queued = false;
                    self.batch.finish_one();
                    left += 1;
                }
                info!(batch_id = %batch_id, left_pending = left, "Dispatch stopped before queued units");
            }
            if queue.peek().is_none() && running.is_empty() {
                break;
            }

            let has_queue = queue.peek().is_some();
            tokio::select! {
                biased;

                Some((i, joined)) = running.next(), if !running.is_empty() => {
                    let outcome = match joined {
                        Ok(outcome) => outcome,
                        Err(e) => UnitOutcome::Failed {
                            failure: UnitFailure::new(FailureKind::Internal, format!("unit task failed: {}", e)),
                            warning: None,
                        },
                    };
                    if matches!(outcome, UnitOutcome::Succeeded { .. }) {
                        succeeded += 1;
                    } else {
                        failed += 1;
                    }
                    self.complete(i, outcome).await;
                }

                _ = self.cancel.cancelled(), if has_queue => {}

                permit = self.pool.acquire(), if has_queue => {
                    let permit = match permit {
                        Ok(permit) => permit,
                        Err(e) => {
                            warn!(batch_id = %batch_id, error = %e, "Worker pool unavailable");
                            self.cancel.cancel();
                            continue;
                        }
                    };
                    if self.cancel.is_cancelled() {
                        continue;
                    }
                    let Some(i) = queue.next() else { continue };

                    let spec = {
                        let mut unit = self.batch.units[i].lock().await;
                        if !unit.begin() {
                            self.batch.finish_one();
                            continue;
                        }
                        debug!(batch_id = %batch_id, unit_id = %unit.id(), "Unit running");
                        self.events.publish(ConversionEvent::UnitProgress {
                            batch_id,
                            unit: unit.snapshot(),
                            timestamp: Utc::now(),
                        });
                        unit.spec.clone()
                    };

                    let pool = self.pool.clone();
                    let pipeline = Arc::clone(&self.batch.pipeline);
                    let scratch = Arc::clone(&self.scratch);
                    let key = ScratchKey::new(batch_id, spec.id.clone());
                    let handle = tokio::spawn(async move {
                        pool.execute(permit, pipeline, spec, scratch, key).await
                    });
                    running.push(async move { (i, handle.await) });
                }

                else => break,
            }
        }

        info!(batch_id = %batch_id, succeeded, failed, "Dispatch round completed");
        self.events.publish(ConversionEvent::BatchCompleted {
            batch_id,
            succeeded,
            failed,
            timestamp: Utc::now(),
        });
    }

    async fn complete(&self, i: usize, outcome: UnitOutcome) {
        let batch_id = self.batch.context.batch_id;
        let mut unit = self.batch.units[i].lock().await;
        match outcome {
            UnitOutcome::Succeeded { artifacts, warning } => {
                debug!(batch_id = %batch_id, unit_id = %unit.id(), artifacts = artifacts.len(), "Unit succeeded");
                unit.succeed(artifacts, warning);
            }
            UnitOutcome::Failed { failure, warning } => {
                warn!(batch_id = %batch_id, unit_id = %unit.id(), error = %failure, "Unit failed");
                unit.fail(failure, warning);
            }
        }
        self.events.publish(ConversionEvent::UnitProgress {
            batch_id,
            unit: unit.snapshot(),
            timestamp: Utc::now(),
        });
        drop(unit);
        self.batch.finish_one();
    }
}
