//! Per-request context binding. Every guarded route passes through
//! here: resolve the bearer session, bind a context for the request
//! host, expose it as an extension, and clear it once the response is
//! ready.

use std::net::IpAddr;
use std::sync::Arc;

use axum::extract::{Request, State};
use axum::http::{header, HeaderMap};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};

use crate::error::ApiError;
use crate::rest::{bearer_token, locale_from_headers, ApiState};

/// Routes served without a bound context.
const OPEN_PATHS: &[&str] = &["/health", "/ready", "/live", "/v1/auth/login"];

/// Client address as derived from forwarding headers. `None` when the
/// request arrived without one; the security flags tolerate that.
#[derive(Debug, Clone, Copy)]
pub struct ClientIp(pub Option<IpAddr>);

pub async fn bind_context(State(state): State<ApiState>, mut req: Request, next: Next) -> Response {
    if OPEN_PATHS.contains(&req.uri().path()) {
        return next.run(req).await;
    }

    let locale = locale_from_headers(req.headers());

    let Some(token) = bearer_token(req.headers()).map(str::to_string) else {
        return ApiError::unauthorized("missing_auth", locale).into_response();
    };
    let Some(session) = state.sessions.resolve(&token) else {
        return ApiError::unauthorized("invalid_token", locale).into_response();
    };

    let host = req
        .headers()
        .get(header::HOST)
        .and_then(|value| value.to_str().ok())
        .unwrap_or("")
        .to_string();
    let client_ip = ClientIp(client_ip_from_headers(req.headers()));

    let context = match state.orchestrator.bind(&host, &session, client_ip.0).await {
        Ok(context) => Arc::new(context),
        Err(err) => return ApiError::from_sacco(err, locale).into_response(),
    };

    req.extensions_mut().insert(Arc::clone(&context));
    req.extensions_mut().insert(session);
    req.extensions_mut().insert(locale);
    req.extensions_mut().insert(client_ip);
    let response = next.run(req).await;

    // The request is done with its binding; release and audit it.
    state.orchestrator.clear((*context).clone());
    response
}

pub(crate) fn client_ip_from_headers(headers: &HeaderMap) -> Option<IpAddr> {
    headers
        .get("x-forwarded-for")
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.split(',').next())
        .and_then(|first| first.trim().parse().ok())
}
