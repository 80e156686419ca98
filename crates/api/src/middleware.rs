use std::time::Instant;

use axum::{http::Request, middleware::Next, response::Response};
use tracing::{Instrument, info, info_span, warn};

/// One span per request; logs method, path, status and latency.
pub async fn trace_requests(req: Request<axum::body::Body>, next: Next) -> Response {
    let method = req.method().clone();
    let path = req.uri().path().to_string();
    let span = info_span!("http_request", method = %method, path = %path);

    async move {
        let started = Instant::now();
        let response = next.run(req).await;
        let status = response.status();
        let latency_ms = started.elapsed().as_millis() as u64;

        if status.is_server_error() {
            warn!(status = status.as_u16(), latency_ms, "request failed");
        } else {
            info!(status = status.as_u16(), latency_ms, "request handled");
        }
        response
    }
    .instrument(span)
    .await
}
