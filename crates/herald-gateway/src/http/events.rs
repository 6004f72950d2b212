//! Inbound collaborator events: `POST /events/messages-update` (already
//! decrypted vote deltas) and `POST /events/messages-upsert` (new messages,
//! possibly encrypted votes).
//!
//! When `events.secret` is set, each request must carry
//! `X-Herald-Signature-256: sha256=<hex>`, an HMAC-SHA256 of the raw body.

use axum::{
    body::Bytes,
    extract::State,
    http::{HeaderMap, StatusCode},
    Json,
};
use hmac::{Hmac, Mac};
use herald_polls::{MessageUpdate, PollTally, UpsertBatch};
use serde_json::{json, Value};
use sha2::Sha256;
use std::sync::Arc;
use tracing::{debug, warn};

use super::{api_error, ApiError};
use crate::app::AppState;

type HmacSha256 = Hmac<Sha256>;

pub const SIGNATURE_HEADER: &str = "x-herald-signature-256";

/// POST /events/messages-update
pub async fn messages_update_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<Value>, ApiError> {
    authenticate(&state, &headers, &body)?;
    let updates: Vec<MessageUpdate> = serde_json::from_slice(&body).map_err(api_error)?;
    debug!(count = updates.len(), "messages-update event");

    let tallies = state.aggregator.handle_update(&updates).await;
    Ok(Json(receipt(&tallies)))
}

/// POST /events/messages-upsert
pub async fn messages_upsert_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<Value>, ApiError> {
    authenticate(&state, &headers, &body)?;
    let batch: UpsertBatch = serde_json::from_slice(&body).map_err(api_error)?;
    debug!(count = batch.messages.len(), kind = %batch.kind, "messages-upsert event");

    let tallies = state.aggregator.handle_upsert(&batch).await;
    Ok(Json(receipt(&tallies)))
}

fn receipt(tallies: &[PollTally]) -> Value {
    let polls: Vec<&str> = tallies.iter().map(|t| t.poll_id.as_str()).collect();
    json!({ "ok": true, "tallied": polls })
}

fn authenticate(state: &AppState, headers: &HeaderMap, body: &Bytes) -> Result<(), ApiError> {
    let Some(secret) = state.config.events.secret.as_deref() else {
        return Ok(());
    };
    verify_signature(headers, body, secret).map_err(|reason| {
        warn!(reason = %reason, "event authentication failed");
        (
            StatusCode::UNAUTHORIZED,
            Json(json!({
                "error": format!("authentication failed: {reason}"),
                "code": "UNAUTHORIZED",
            })),
        )
    })
}

fn verify_signature(headers: &HeaderMap, body: &[u8], secret: &str) -> Result<(), String> {
    let sig_header = headers
        .get(SIGNATURE_HEADER)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| "missing X-Herald-Signature-256 header".to_string())?;

    let sig_hex = sig_header
        .strip_prefix("sha256=")
        .ok_or_else(|| "malformed X-Herald-Signature-256 header".to_string())?;

    let expected =
        hex::decode(sig_hex).map_err(|_| "X-Herald-Signature-256 is not valid hex".to_string())?;

    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|_| "invalid HMAC key length".to_string())?;
    mac.update(body);

    mac.verify_slice(&expected)
        .map_err(|_| "HMAC signature mismatch".to_string())
}

/// `sha256=<hex>` signature of `body`, as a sender would compute it.
#[cfg(test)]
pub fn sign(secret: &str, body: &[u8]) -> String {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).unwrap();
    mac.update(body);
    format!("sha256={}", hex::encode(mac.finalize().into_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn headers_with(sig: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(SIGNATURE_HEADER, sig.parse().unwrap());
        headers
    }

    #[test]
    fn valid_signature_is_accepted() {
        let body = br#"[{"key":{}}]"#;
        let headers = headers_with(&sign("s3cret", body));
        assert!(verify_signature(&headers, body, "s3cret").is_ok());
    }

    #[test]
    fn tampered_body_is_rejected() {
        let headers = headers_with(&sign("s3cret", b"original"));
        let err = verify_signature(&headers, b"tampered", "s3cret").unwrap_err();
        assert!(err.contains("mismatch"));
    }

    #[test]
    fn missing_or_malformed_header_is_rejected() {
        assert!(verify_signature(&HeaderMap::new(), b"x", "k")
            .unwrap_err()
            .contains("missing"));
        assert!(verify_signature(&headers_with("md5=abc"), b"x", "k")
            .unwrap_err()
            .contains("malformed"));
        assert!(verify_signature(&headers_with("sha256=zz"), b"x", "k")
            .unwrap_err()
            .contains("hex"));
    }
}
