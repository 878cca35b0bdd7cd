//! The wire envelope every response follows (spec §6): `{type: "sync" |
//! "error", status, status_code, metadata?, error?}`.

use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use serde_json::Value;

#[derive(Debug, Serialize)]
struct Envelope {
    #[serde(rename = "type")]
    kind: &'static str,
    status: &'static str,
    status_code: u16,
    #[serde(skip_serializing_if = "Option::is_none")]
    metadata: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

/// A successful `{type: "sync", ...}` response with a 200 status and an
/// arbitrary JSON metadata payload.
pub fn sync(metadata: impl Serialize) -> Response {
    let metadata = serde_json::to_value(metadata).ok();
    Json(Envelope { kind: "sync", status: "Success", status_code: 200, metadata, error: None }).into_response()
}

/// A successful response with no payload.
pub fn ok() -> Response {
    Json(Envelope { kind: "sync", status: "Success", status_code: 200, metadata: None, error: None }).into_response()
}
