//! Request forwarding for `ProxyTarget` endpoints (spec §4.8 step 5):
//! rewrites scheme/host/RequestURI and forwards via `reqwest`, mirroring
//! the teacher's gateway's use of a plain HTTP client for its own
//! inter-node calls in `ormdb-gateway`.

use axum::body::Body;
use axum::extract::Request;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use clusterd_core::{DaemonError, Result};
use clusterd_trust::Remote;

pub async fn forward(client: &reqwest::Client, remote: &Remote, req: Request<Body>) -> Result<Response> {
    let (parts, body) = req.into_parts();
    let path_and_query = parts
        .uri
        .path_and_query()
        .map(|pq| pq.as_str())
        .unwrap_or(parts.uri.path());
    let url = format!("https://{}{}", remote.address, path_and_query);

    let body_bytes = axum::body::to_bytes(body, usize::MAX)
        .await
        .map_err(|e| DaemonError::BadRequest(format!("failed to buffer request body for proxying: {e}")))?;

    let mut builder = client.request(parts.method, &url);
    for (name, value) in filtered_headers(&parts.headers) {
        builder = builder.header(name, value);
    }

    let upstream = builder
        .body(body_bytes)
        .send()
        .await
        .map_err(|e| DaemonError::Unavailable(format!("proxy request to {} failed: {e}", remote.name)))?;

    let status =
        StatusCode::from_u16(upstream.status().as_u16()).unwrap_or(StatusCode::BAD_GATEWAY);
    let bytes = upstream
        .bytes()
        .await
        .map_err(|e| DaemonError::Unavailable(format!("failed to read proxied response body: {e}")))?;

    Ok((status, bytes).into_response())
}

/// Hop-by-hop headers are dropped; the rest pass through unchanged so the
/// upstream sees the original request's identity where it matters (e.g.
/// `Content-Type`).
fn filtered_headers(headers: &HeaderMap) -> Vec<(String, String)> {
    const HOP_BY_HOP: &[&str] = &["connection", "host", "upgrade", "transfer-encoding"];
    headers
        .iter()
        .filter(|(name, _)| !HOP_BY_HOP.contains(&name.as_str().to_lowercase().as_str()))
        .filter_map(|(name, value)| value.to_str().ok().map(|v| (name.to_string(), v.to_string())))
        .collect()
}
