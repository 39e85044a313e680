//! Axum middleware applying the sliding-window limiter to inbound traffic.

use axum::{
    extract::{Request, State},
    http::{HeaderValue, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};
use std::sync::Arc;

use crate::ip::extract_client_ip;
use crate::rate_limit::SlidingWindowLimiter;

#[derive(Clone)]
pub struct RateLimitState {
    pub limiter: SlidingWindowLimiter,
    pub trusted_proxy_count: usize,
}

/// Admits or rejects the request by client IP. Responses carry
/// `X-RateLimit-Limit`, `X-RateLimit-Remaining` and `X-RateLimit-Reset`;
/// rejections are `429` with a JSON body.
pub async fn rate_limit_middleware(
    State(state): State<Arc<RateLimitState>>,
    request: Request,
    next: Next,
) -> Response {
    let peer_addr = request.extensions().get::<std::net::SocketAddr>().copied();
    let ip = extract_client_ip(request.headers(), peer_addr.as_ref(), state.trusted_proxy_count);
    let key = format!("ip:{}", ip);

    let limit = state.limiter.limit();

    if state.limiter.allow(&key).await {
        let remaining = state.limiter.remaining(&key).await;
        let reset = state.limiter.reset_after(&key).await;

        let mut response = next.run(request).await;
        apply_headers(&mut response, limit, remaining, reset.as_secs());
        response
    } else {
        let reset = state.limiter.reset_after(&key).await;
        tracing::warn!(client = %key, limit, "Rate limit exceeded");

        let mut response = (
            StatusCode::TOO_MANY_REQUESTS,
            axum::Json(serde_json::json!({
                "error": "Too many requests. Please slow down."
            })),
        )
            .into_response();
        apply_headers(&mut response, limit, 0, reset.as_secs().max(1));
        response
    }
}

fn apply_headers(response: &mut Response, limit: u32, remaining: u32, reset_seconds: u64) {
    let headers = response.headers_mut();
    if let Ok(value) = HeaderValue::from_str(&limit.to_string()) {
        headers.insert("X-RateLimit-Limit", value);
    }
    if let Ok(value) = HeaderValue::from_str(&remaining.to_string()) {
        headers.insert("X-RateLimit-Remaining", value);
    }
    if let Ok(value) = HeaderValue::from_str(&reset_seconds.to_string()) {
        headers.insert("X-RateLimit-Reset", value);
    }
}
