//! Schedule CRUD: `/schedules` and `/schedules/{id}`.
//!
//! Bodies are parsed by hand rather than with the `Json` extractor so that
//! malformed input gets the same `{error, code}` shape as every other failure.

use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use herald_core::HeraldError;
use herald_scheduler::ticker::FailureKind;
use herald_scheduler::{NewSchedule, RunNow, ScheduleJob, SchedulePatch};
use serde_json::{json, Value};
use tracing::info;

use super::{api_error, not_found, ApiError};
use crate::app::AppState;

/// GET /schedules: every row, newest first.
pub async fn list_handler(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Vec<ScheduleJob>>, ApiError> {
    state.store().list().map(Json).map_err(api_error)
}

/// GET /schedules/{id}
pub async fn get_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> Result<Json<ScheduleJob>, ApiError> {
    state
        .store()
        .get(id)
        .map_err(api_error)?
        .map(Json)
        .ok_or_else(|| not_found(format!("schedule {id}")))
}

/// POST /schedules: validate the dispatch route, then persist.
pub async fn create_handler(
    State(state): State<Arc<AppState>>,
    body: Bytes,
) -> Result<(StatusCode, Json<ScheduleJob>), ApiError> {
    let spec: NewSchedule = serde_json::from_slice(&body).map_err(api_error)?;
    check_route(&state, &spec.category, &spec.message_type, &spec.payload)?;

    let job = state.store().create(spec).map_err(api_error)?;
    info!(job_id = job.id, chat = %job.target, kind = %job.recurrence_kind, "schedule created");
    Ok((StatusCode::CREATED, Json(job)))
}

/// PUT /schedules/{id}
///
/// `{"runNow": true}` fires the row synchronously and reports the outcome;
/// any other body is a partial field patch.
pub async fn update_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
    body: Bytes,
) -> Result<Json<Value>, ApiError> {
    let patch: SchedulePatch = serde_json::from_slice(&body).map_err(api_error)?;

    if patch.run_now {
        return run_now(&state, id).await;
    }

    if patch.category.is_some() || patch.message_type.is_some() || patch.payload.is_some() {
        let current = state
            .store()
            .get(id)
            .map_err(api_error)?
            .ok_or_else(|| not_found(format!("schedule {id}")))?;
        check_route(
            &state,
            patch.category.as_deref().unwrap_or(&current.category),
            patch.message_type.as_deref().unwrap_or(&current.message_type),
            patch.payload.as_ref().unwrap_or(&current.payload),
        )?;
    }

    let job = state
        .store()
        .patch(id, patch)
        .map_err(api_error)?
        .ok_or_else(|| not_found(format!("schedule {id}")))?;
    info!(job_id = id, "schedule updated");
    Ok(Json(json!(job)))
}

/// DELETE /schedules/{id}: idempotent.
pub async fn delete_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> Result<Json<Value>, ApiError> {
    let removed = state.store().remove(id).map_err(api_error)?;
    if removed {
        info!(job_id = id, "schedule deleted");
    }
    Ok(Json(json!({ "ok": true, "removed": removed })))
}

async fn run_now(state: &AppState, id: i64) -> Result<Json<Value>, ApiError> {
    match state.ticker.run_now(id).await.map_err(api_error)? {
        RunNow::NotFound => Err(not_found(format!("schedule {id}"))),
        RunNow::NotDue(job) => Err((
            StatusCode::CONFLICT,
            Json(json!({
                "error": format!("schedule {id} is disabled"),
                "code": "NOT_DUE",
                "schedule": job,
            })),
        )),
        RunNow::Fired(outcome) if outcome.success => {
            let job = state.store().get(id).map_err(api_error)?;
            Ok(Json(json!({ "ok": true, "outcome": outcome, "schedule": job })))
        }
        RunNow::Fired(outcome) => {
            let err = match outcome.failure_kind {
                // Rebuild to recover the precise configuration error.
                Some(FailureKind::Configuration) => state
                    .store()
                    .get(id)
                    .map_err(api_error)?
                    .and_then(|job| {
                        state
                            .dispatcher()
                            .build(&job.category, &job.message_type, &job.payload)
                            .err()
                    })
                    .map(HeraldError::from),
                _ => None,
            }
            .unwrap_or_else(|| {
                HeraldError::DispatchFailed(outcome.error.clone().unwrap_or_default())
            });
            let (status, Json(mut body)) = api_error(err);
            body["outcome"] = json!(outcome);
            Err((status, Json(body)))
        }
    }
}

/// Reject routes the dispatcher cannot serve. Rows without a message type
/// are left for the store to reject with its own message.
fn check_route(
    state: &AppState,
    category: &str,
    message_type: &str,
    payload: &Value,
) -> Result<(), ApiError> {
    if message_type.trim().is_empty() {
        return Ok(());
    }
    let empty = json!({});
    let payload = if payload.is_null() { &empty } else { payload };
    state
        .dispatcher()
        .build(category, message_type, payload)
        .map(|_| ())
        .map_err(api_error)
}
