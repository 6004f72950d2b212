pub mod events;
pub mod health;
pub mod polls;
pub mod schedules;
pub mod send;

use axum::{http::StatusCode, Json};
use herald_core::HeraldError;
use serde_json::{json, Value};
use tracing::{error, warn};

pub type ApiError = (StatusCode, Json<Value>);

/// Map a domain error onto an HTTP status and `{error, code}` body.
pub fn api_error(err: impl Into<HeraldError>) -> ApiError {
    let err = err.into();
    let status = match &err {
        HeraldError::InvalidSchedule(_) => StatusCode::BAD_REQUEST,
        HeraldError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
        HeraldError::NotFound(_) => StatusCode::NOT_FOUND,
        HeraldError::UnsupportedDispatch { .. } | HeraldError::InvalidPayload(_) => {
            StatusCode::UNPROCESSABLE_ENTITY
        }
        HeraldError::DispatchFailed(_) => StatusCode::BAD_GATEWAY,
        HeraldError::Serialization(_) => StatusCode::BAD_REQUEST,
        HeraldError::Config(_) | HeraldError::Database(_) | HeraldError::Internal(_) => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    };
    if status.is_server_error() {
        error!(code = err.code(), "request failed: {err}");
    } else {
        warn!(code = err.code(), "request rejected: {err}");
    }
    (
        status,
        Json(json!({ "error": err.to_string(), "code": err.code() })),
    )
}

pub fn not_found(what: impl Into<String>) -> ApiError {
    api_error(HeraldError::NotFound(what.into()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_map_to_statuses() {
        let (status, body) = api_error(HeraldError::InvalidSchedule("bad".into()));
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body.0["code"], "INVALID_SCHEDULE");

        let (status, _) = api_error(HeraldError::UnsupportedDispatch {
            category: "send".into(),
            message_type: "fax".into(),
        });
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);

        let (status, body) = api_error(HeraldError::DispatchFailed("timeout".into()));
        assert_eq!(status, StatusCode::BAD_GATEWAY);
        assert_eq!(body.0["code"], "DISPATCH_FAILED");

        let (status, _) = not_found("schedule 9");
        assert_eq!(status, StatusCode::NOT_FOUND);
    }
}
