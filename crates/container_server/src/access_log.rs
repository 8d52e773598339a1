use std::time::Instant;

use axum::{
    body::Body,
    extract::{
        ConnectInfo,
        Request,
    },
    http::HeaderMap,
    middleware::Next,
    response::Response,
};
use chrono::Utc;

/// Emits one combined-log-style line per request, plus the same fields as a
/// structured `tracing` event so aggregation doesn't have to scrape text.
/// `POST` (replication RPCs, typically high-volume and low-signal) logs at
/// debug; everything else logs at info.
pub async fn access_log(
    ConnectInfo(remote): ConnectInfo<std::net::SocketAddr>,
    req: Request<Body>,
    next: Next,
) -> Response {
    let start = Instant::now();
    let method = req.method().clone();
    let path = req.uri().path().to_string();
    let trans_id = trans_id(req.headers());
    let referer = header_or_dash(req.headers(), "referer");
    let user_agent = header_or_dash(req.headers(), "user-agent");

    let response = next.run(req).await;

    let elapsed = start.elapsed().as_secs_f64();
    let status = response.status().as_u16();
    let content_length = response
        .headers()
        .get(axum::http::header::CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
        .unwrap_or_else(|| "-".to_string());
    let timestamp = Utc::now().format("%d/%b/%Y:%H:%M:%S %z").to_string();

    let line = format!(
        "{remote} - - [{timestamp}] \"{method} {path}\" {status} {content_length} \"{trans_id}\" \"{referer}\" \"{user_agent}\" {elapsed:.4}",
    );

    metrics::record_request(method.as_str(), status, elapsed);

    if method == axum::http::Method::POST {
        tracing::debug!(
            remote = %remote,
            method = %method,
            path = %path,
            status,
            trans_id = %trans_id,
            elapsed_seconds = elapsed,
            "{line}"
        );
    } else {
        tracing::info!(
            remote = %remote,
            method = %method,
            path = %path,
            status,
            trans_id = %trans_id,
            elapsed_seconds = elapsed,
            "{line}"
        );
    }

    response
}

fn trans_id(headers: &HeaderMap) -> String {
    header_or_dash(headers, "x-cf-trans-id")
}

fn header_or_dash(headers: &HeaderMap, name: &str) -> String {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
        .unwrap_or_else(|| "-".to_string())
}
