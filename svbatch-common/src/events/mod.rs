//! Event types for the svbatch event system
//!
//! Provides the shared event definitions, the `EventSink` abstraction the core
//! writes to, and the broadcast-backed `EventBus`.

mod unit_types;

pub use unit_types::{
    ConflictPolicy, FailureKind, MoveState, UnitFailure, UnitSnapshot, UnitState,
};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tokio::sync::{broadcast, mpsc};
use uuid::Uuid;

/// Conversion event types
///
/// Events are published through an `EventSink` and can be serialized for SSE
/// transmission. Every event names the batch it belongs to so subscribers
/// watching several batches can correlate.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ConversionEvent {
    /// Unit entered Running, or reached a terminal execution state
    ///
    /// Terminal events arrive in completion order, not submission order.
    UnitProgress {
        batch_id: Uuid,
        unit: UnitSnapshot,
        timestamp: DateTime<Utc>,
    },

    /// Commit hit a name conflict under the Prompt policy
    ///
    /// The unit stays AwaitingDecision until a later commit carries a decision.
    DecisionRequest {
        batch_id: Uuid,
        unit_id: String,
        /// Destination that already exists
        proposed_path: PathBuf,
        conflict_policy: ConflictPolicy,
        timestamp: DateTime<Utc>,
    },

    /// Commit finished (Committed or MoveFailed)
    MoveResult {
        batch_id: Uuid,
        unit: UnitSnapshot,
        timestamp: DateTime<Utc>,
    },

    /// A dispatch round finished; every dispatched unit is terminal
    BatchCompleted {
        batch_id: Uuid,
        succeeded: usize,
        failed: usize,
        timestamp: DateTime<Utc>,
    },
}

impl ConversionEvent {
    /// Get event type as string for filtering
    pub fn event_type(&self) -> &str {
        match self {
            ConversionEvent::UnitProgress { .. } => "UnitProgress",
            ConversionEvent::DecisionRequest { .. } => "DecisionRequest",
            ConversionEvent::MoveResult { .. } => "MoveResult",
            ConversionEvent::BatchCompleted { .. } => "BatchCompleted",
        }
    }

    /// Batch the event belongs to
    pub fn batch_id(&self) -> Uuid {
        match self {
            ConversionEvent::UnitProgress { batch_id, .. }
            | ConversionEvent::DecisionRequest { batch_id, .. }
            | ConversionEvent::MoveResult { batch_id, .. }
            | ConversionEvent::BatchCompleted { batch_id, .. } => *batch_id,
        }
    }
}

/// Destination for events published by the core
///
/// Publishing never blocks and never fails the caller; a sink with nobody
/// listening drops the event.
pub trait EventSink: Send + Sync {
    fn publish(&self, event: ConversionEvent);
}

impl EventSink for mpsc::UnboundedSender<ConversionEvent> {
    fn publish(&self, event: ConversionEvent) {
        let _ = self.send(event);
    }
}

/// Central event distribution bus
///
/// Uses `tokio::broadcast` internally:
/// - Non-blocking publish (slow subscribers don't block producers)
/// - Multiple concurrent subscribers
/// - Lagged message detection for slow subscribers
///
/// # Examples
///
/// ```
/// use svbatch_common::events::{ConversionEvent, EventBus};
///
/// let event_bus = EventBus::new(100);
/// let mut rx = event_bus.subscribe();
///
/// event_bus.emit_lossy(ConversionEvent::BatchCompleted {
///     batch_id: uuid::Uuid::new_v4(),
///     succeeded: 1,
///     failed: 0,
///     timestamp: chrono::Utc::now(),
/// });
///
/// assert_eq!(rx.try_recv().unwrap().event_type(), "BatchCompleted");
/// ```
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<ConversionEvent>,
    capacity: usize,
}

impl EventBus {
    /// Creates a new EventBus with specified channel capacity
    ///
    /// `capacity` is the number of events buffered per subscriber before the
    /// oldest are dropped.
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx, capacity }
    }

    /// Subscribe to all future events
    ///
    /// Events emitted before subscription are not received.
    pub fn subscribe(&self) -> broadcast::Receiver<ConversionEvent> {
        self.tx.subscribe()
    }

    /// Emit an event to all subscribers
    ///
    /// Returns `Ok(subscriber_count)` if at least one subscriber exists.
    #[allow(clippy::result_large_err)]
    pub fn emit(
        &self,
        event: ConversionEvent,
    ) -> Result<usize, broadcast::error::SendError<ConversionEvent>> {
        self.tx.send(event)
    }

    /// Emit an event, ignoring if no subscribers are listening
    pub fn emit_lossy(&self, event: ConversionEvent) {
        let _ = self.tx.send(event);
    }

    /// Get the current number of active subscribers
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    /// Get the configured channel capacity
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl EventSink for EventBus {
    fn publish(&self, event: ConversionEvent) {
        self.emit_lossy(event);
    }
}
