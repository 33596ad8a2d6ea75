use axum::{
    extract::{ConnectInfo, Request, State},
    http::StatusCode,
    middleware::Next,
    response::{IntoResponse, Response},
};
use std::net::SocketAddr;
use tourline_store::redis_repo::rate_limit_key;

use crate::state::AppState;

const WINDOW_SECONDS: i64 = 60;

/// Fixed one-minute window per client IP. Fails open when Redis is
/// unconfigured or unreachable.
pub async fn rate_limit_middleware(State(state): State<AppState>, req: Request, next: Next) -> Response {
    let Some(limit) = state.rate_limit.as_ref() else {
        return next.run(req).await;
    };

    let ip = req
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip().to_string())
        .unwrap_or_else(|| "unknown".to_string());
    let now = chrono::Utc::now().timestamp();
    let key = rate_limit_key(&ip, now - now % WINDOW_SECONDS);

    match limit.redis.check_rate_limit(&key, limit.per_minute, WINDOW_SECONDS).await {
        Ok(true) => next.run(req).await,
        Ok(false) => (StatusCode::TOO_MANY_REQUESTS, "Rate limit exceeded").into_response(),
        Err(e) => {
            tracing::warn!("Rate limiter unavailable, letting request through: {}", e);
            next.run(req).await
        }
    }
}
