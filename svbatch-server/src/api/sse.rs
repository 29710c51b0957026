//! Server-Sent Events for batch progress
//!
//! GET /events streams every `ConversionEvent`; `?batch=<id>` narrows it to
//! one batch.

use axum::{
    extract::{Query, State},
    response::sse::{Event, Sse},
};
use futures::stream::Stream;
use serde::Deserialize;
use std::convert::Infallible;
use svbatch_common::sse::event_sse_stream;
use svbatch_core::ConversionEvent;
use uuid::Uuid;

use crate::AppState;

#[derive(Debug, Default, Deserialize)]
pub struct EventQuery {
    pub batch: Option<Uuid>,
}

/// Filter passing every event, or only those of one batch
pub fn batch_filter(batch: Option<Uuid>) -> impl Fn(&ConversionEvent) -> bool + Send + 'static {
    move |event| batch.map_or(true, |id| event.batch_id() == id)
}

/// GET /events
pub async fn event_stream(
    State(state): State<AppState>,
    Query(query): Query<EventQuery>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    event_sse_stream(state.event_bus.subscribe(), batch_filter(query.batch))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn completed(batch_id: Uuid) -> ConversionEvent {
        ConversionEvent::BatchCompleted {
            batch_id,
            succeeded: 1,
            failed: 0,
            timestamp: Utc::now(),
        }
    }

    #[test]
    fn test_batch_filter() {
        let watched = Uuid::new_v4();
        let other = Uuid::new_v4();

        let all = batch_filter(None);
        assert!(all(&completed(watched)) && all(&completed(other)));

        let one = batch_filter(Some(watched));
        assert!(one(&completed(watched)));
        assert!(!one(&completed(other)));
    }
}
