use std::sync::Arc;

use axum::{body::Bytes, extract::State, Json};
use herald_scheduler::types::DEFAULT_CATEGORY;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::info;

use super::{api_error, ApiError};
use crate::app::AppState;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendRequest {
    pub target: String,
    #[serde(default = "default_category")]
    pub category: String,
    pub message_type: String,
    #[serde(default)]
    pub payload: Value,
}

fn default_category() -> String {
    DEFAULT_CATEGORY.to_string()
}

/// POST /send: one-off dispatch through the scheduler's routing table.
///
/// A sent poll is registered so its votes can be tallied.
pub async fn send_handler(
    State(state): State<Arc<AppState>>,
    body: Bytes,
) -> Result<Json<Value>, ApiError> {
    let req: SendRequest = serde_json::from_slice(&body).map_err(api_error)?;
    let payload = if req.payload.is_null() {
        json!({})
    } else {
        req.payload
    };

    let sent = state
        .dispatcher()
        .dispatch(&req.target, &req.category, &req.message_type, &payload)
        .await
        .map_err(api_error)?;

    let poll = state.registry.register(&sent);
    info!(chat = %req.target, message_type = %req.message_type, poll, "message sent");
    Ok(Json(json!({
        "ok": true,
        "messageId": sent.id(),
        "poll": poll,
    })))
}
