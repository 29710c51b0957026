//! Batch lifecycle handlers
//!
//! POST /batches, GET /batches, GET /batches/:id, DELETE /batches/:id,
//! POST /batches/:id/{rerun,cancel},
//! POST /batches/:id/units/:unit/{commit,reset}

use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use svbatch_core::{
    BatchRequest, BatchSubmission, CommitOutcome, ConflictDecision, ConflictPolicy,
    ConversionSettings, UnitSnapshot, UnitState,
};
use tracing::info;
use uuid::Uuid;

use crate::{
    error::{ApiJson, ApiResult},
    AppState,
};

/// GET /batches/:id response
#[derive(Debug, Serialize, Deserialize)]
pub struct BatchStatusResponse {
    pub batch_id: Uuid,
    pub settings: ConversionSettings,
    pub destination: PathBuf,
    pub conflict_policy: ConflictPolicy,
    pub created_at: DateTime<Utc>,
    /// True while any unit is Pending or Running
    pub active: bool,
    /// Units in submission order
    pub units: Vec<UnitSnapshot>,
}

/// GET /batches response
#[derive(Debug, Serialize, Deserialize)]
pub struct BatchListResponse {
    pub batch_ids: Vec<Uuid>,
}

/// POST /batches/:id/units/:unit/commit request
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct CommitRequest {
    /// Shorthand for `decision: "overwrite"`
    pub force_overwrite: bool,
    pub decision: Option<ConflictDecision>,
}

impl CommitRequest {
    fn effective_decision(&self) -> Option<ConflictDecision> {
        match (self.decision, self.force_overwrite) {
            (Some(decision), _) => Some(decision),
            (None, true) => Some(ConflictDecision::Overwrite),
            (None, false) => None,
        }
    }
}

/// POST /batches/:id/rerun request; no ids means every unit
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct RerunRequest {
    pub unit_ids: Vec<String>,
}

/// POST /batches
///
/// Validates and accepts a batch, then dispatches its units. Returns
/// 202 Accepted with the batch id; progress arrives on `/events`.
pub async fn submit_batch(
    State(state): State<AppState>,
    ApiJson(request): ApiJson<BatchRequest>,
) -> ApiResult<(StatusCode, Json<BatchSubmission>)> {
    let submission = state.engine.submit(request).await?;
    info!(
        batch_id = %submission.batch_id,
        units = submission.unit_ids.len(),
        "Batch submitted over HTTP"
    );
    Ok((StatusCode::ACCEPTED, Json(submission)))
}

/// GET /batches
pub async fn list_batches(State(state): State<AppState>) -> Json<BatchListResponse> {
    Json(BatchListResponse {
        batch_ids: state.engine.batch_ids().await,
    })
}

/// GET /batches/:id
pub async fn get_batch(
    State(state): State<AppState>,
    Path(batch_id): Path<Uuid>,
) -> ApiResult<Json<BatchStatusResponse>> {
    let context = state.engine.batch_context(batch_id).await?;
    let units = state.engine.batch_status(batch_id).await?;
    let active = units
        .iter()
        .any(|u| matches!(u.state, UnitState::Pending | UnitState::Running));

    Ok(Json(BatchStatusResponse {
        batch_id,
        settings: context.settings,
        destination: context.destination,
        conflict_policy: context.conflict_policy,
        created_at: context.created_at,
        active,
        units,
    }))
}

/// POST /batches/:id/units/:unit/commit
///
/// Body may be `{}`. Under the Prompt policy a conflict comes back as
/// `{"outcome":"awaiting_decision"}`; answer it by committing again with a
/// `decision`.
pub async fn commit_unit(
    State(state): State<AppState>,
    Path((batch_id, unit_id)): Path<(Uuid, String)>,
    ApiJson(request): ApiJson<CommitRequest>,
) -> ApiResult<Json<CommitOutcome>> {
    let outcome = state
        .engine
        .commit(batch_id, &unit_id, request.effective_decision())
        .await?;
    Ok(Json(outcome))
}

/// POST /batches/:id/units/:unit/reset
pub async fn reset_unit(
    State(state): State<AppState>,
    Path((batch_id, unit_id)): Path<(Uuid, String)>,
) -> ApiResult<Json<UnitSnapshot>> {
    Ok(Json(state.engine.reset(batch_id, &unit_id).await?))
}

/// POST /batches/:id/rerun
pub async fn rerun_batch(
    State(state): State<AppState>,
    Path(batch_id): Path<Uuid>,
    ApiJson(request): ApiJson<RerunRequest>,
) -> ApiResult<StatusCode> {
    state.engine.rerun(batch_id, &request.unit_ids).await?;
    Ok(StatusCode::ACCEPTED)
}

/// POST /batches/:id/cancel
///
/// Undispatched units stay Pending; running units finish normally.
pub async fn cancel_batch(
    State(state): State<AppState>,
    Path(batch_id): Path<Uuid>,
) -> ApiResult<StatusCode> {
    state.engine.cancel(batch_id).await?;
    Ok(StatusCode::ACCEPTED)
}

/// DELETE /batches/:id
///
/// Waits for running units, then drops every uncommitted artifact.
pub async fn discard_batch(
    State(state): State<AppState>,
    Path(batch_id): Path<Uuid>,
) -> ApiResult<StatusCode> {
    state.engine.discard(batch_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Build batch routes
pub fn batch_routes() -> Router<AppState> {
    Router::new()
        .route("/batches", post(submit_batch).get(list_batches))
        .route("/batches/:id", get(get_batch).delete(discard_batch))
        .route("/batches/:id/rerun", post(rerun_batch))
        .route("/batches/:id/cancel", post(cancel_batch))
        .route("/batches/:id/units/:unit/commit", post(commit_unit))
        .route("/batches/:id/units/:unit/reset", post(reset_unit))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_commit_request_decision() {
        let empty: CommitRequest = serde_json::from_str("{}").unwrap();
        assert_eq!(empty.effective_decision(), None);

        let forced: CommitRequest = serde_json::from_str(r#"{"force_overwrite":true}"#).unwrap();
        assert_eq!(forced.effective_decision(), Some(ConflictDecision::Overwrite));

        let explicit: CommitRequest =
            serde_json::from_str(r#"{"force_overwrite":true,"decision":"skip"}"#).unwrap();
        assert_eq!(explicit.effective_decision(), Some(ConflictDecision::Skip));
    }
}
