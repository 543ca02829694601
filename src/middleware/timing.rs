use axum::{
    extract::Request,
    http::{HeaderName, HeaderValue},
    middleware::Next,
    response::Response,
};
use std::time::Instant;
use tracing::{info, Instrument};
use uuid::Uuid;

pub const REQUEST_ID: HeaderName = HeaderName::from_static("x-request-id");

/// Wraps every request in a span carrying a request id and adds three
/// response headers:
///
///   X-Request-Id        — echoed from the request, or a fresh v4 uuid
///   X-Response-Time-Us  — total handler wall time in microseconds
///   Server-Timing       — same value in the standard Server-Timing format
pub async fn timing_middleware(req: Request, next: Next) -> Response {
    let method = req.method().clone();
    let path = req.uri().path().to_owned();
    let request_id = req
        .headers()
        .get(&REQUEST_ID)
        .and_then(|v| v.to_str().ok())
        .map(str::to_owned)
        .unwrap_or_else(|| Uuid::new_v4().to_string());

    let span = tracing::info_span!("request", id = %request_id, %method, %path);
    let start = Instant::now();
    let mut response = next.run(req).instrument(span.clone()).await;
    let elapsed = start.elapsed();
    let us = elapsed.as_micros();

    // ── Inject response headers ─────────────────────────────────
    let headers = response.headers_mut();
    if let Ok(val) = HeaderValue::from_str(&request_id) {
        headers.insert(REQUEST_ID, val);
    }
    if let Ok(val) = HeaderValue::from_str(&us.to_string()) {
        headers.insert("x-response-time-us", val);
    }
    let server_timing = format!("total;dur={:.3}", elapsed.as_secs_f64() * 1000.0);
    if let Ok(val) = HeaderValue::from_str(&server_timing) {
        headers.insert("server-timing", val);
    }

    // Probes are the interesting traffic; health checks stay quiet.
    let status = response.status().as_u16();
    if path != "/healthz" {
        span.in_scope(|| info!(status, elapsed_us = us as u64, "handled request"));
    }

    response
}

#[cfg(test)]
mod tests {
    use axum::{body::Body, http::Request, middleware, routing::get, Router};
    use tower::ServiceExt;

    use super::*;

    fn router() -> Router {
        Router::new()
            .route("/", get(|| async { "hi" }))
            .layer(middleware::from_fn(timing_middleware))
    }

    #[tokio::test]
    async fn adds_timing_and_request_id_headers() {
        let resp = router()
            .oneshot(Request::builder().uri("/").body(Body::empty()).unwrap())
            .await
            .unwrap();

        let headers = resp.headers();
        assert!(headers.contains_key("server-timing"));
        assert!(headers["x-response-time-us"].to_str().unwrap().parse::<u64>().is_ok());
        let id = headers[&REQUEST_ID].to_str().unwrap();
        assert!(Uuid::parse_str(id).is_ok());
    }

    #[tokio::test]
    async fn echoes_incoming_request_id() {
        let resp = router()
            .oneshot(
                Request::builder()
                    .uri("/")
                    .header("x-request-id", "scrape-42")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(resp.headers()[&REQUEST_ID], "scrape-42");
    }
}
