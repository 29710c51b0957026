//! Streaming conversion
//!
//! POST /convert answers with an SSE stream: one `GroupRunning` event per
//! group as soon as the request is accepted, then one `GroupResult` per group
//! in completion order. Artifact bytes are base64 encoded. The stream closes
//! after the last group.

use axum::{
    extract::State,
    response::sse::{Event, KeepAlive, Sse},
    routing::post,
    Router,
};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use futures::stream::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use std::convert::Infallible;
use svbatch_core::{ConvertRequest, FailureKind, GroupResult};
use tracing::{info, warn};

use crate::{
    error::{ApiJson, ApiResult},
    AppState,
};

/// Wire form of a `GroupResult`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupRecord {
    pub group_id: String,
    pub running: bool,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_kind: Option<FailureKind>,
    #[serde(default)]
    pub warning_messages: Vec<String>,
    /// Base64 artifact contents, in artifact order
    #[serde(default)]
    pub file_contents: Vec<String>,
}

impl From<GroupResult> for GroupRecord {
    fn from(result: GroupResult) -> Self {
        Self {
            group_id: result.group_id,
            running: result.running,
            success: result.success,
            error_message: result.error_message,
            failure_kind: result.failure_kind,
            warning_messages: result.warning_messages,
            file_contents: result
                .file_contents
                .iter()
                .map(|bytes| BASE64.encode(bytes))
                .collect(),
        }
    }
}

fn record_event(result: GroupResult) -> Event {
    let event_type = if result.running {
        "GroupRunning"
    } else {
        "GroupResult"
    };
    let record = GroupRecord::from(result);
    match serde_json::to_string(&record) {
        Ok(json) => Event::default().event(event_type).data(json),
        Err(e) => {
            warn!("Convert: failed to serialize record for {}: {}", record.group_id, e);
            Event::default().event(event_type).comment("unserializable record")
        }
    }
}

/// POST /convert
///
/// Structural problems (no groups, unknown plugin, bad options) are a plain
/// JSON error response; once the stream starts, per-group failures arrive
/// in-band.
pub async fn convert(
    State(state): State<AppState>,
    ApiJson(request): ApiJson<ConvertRequest>,
) -> ApiResult<Sse<impl Stream<Item = Result<Event, Infallible>>>> {
    let groups = request.groups.len();
    let results = state.engine.convert(request)?;
    info!(groups, "Streaming conversion started");

    let stream = results.map(|result| Ok::<_, Infallible>(record_event(result)));
    Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
}

/// Build convert routes
pub fn convert_routes() -> Router<AppState> {
    Router::new().route("/convert", post(convert))
}
