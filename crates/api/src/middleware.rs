use std::sync::Arc;

use axum::{
    extract::State,
    http::{HeaderMap, StatusCode},
    middleware::Next,
    response::Response,
};
use axum_extra::extract::cookie::CookieJar;
use chrono::Utc;

use paybridge_auth::{HrSessionValidator, SessionManager, SessionStage};

use crate::app::{cookies, errors};
use crate::context::{HrContext, PayrollPrincipal};

#[derive(Clone)]
pub struct HrAuthState {
    pub validator: Arc<dyn HrSessionValidator>,
}

/// HR side: the caller must carry a valid HR login bearer token.
pub async fn hr_auth_middleware(
    State(state): State<HrAuthState>,
    mut req: axum::http::Request<axum::body::Body>,
    next: Next,
) -> Result<Response, Response> {
    let unauthenticated = || {
        errors::json_error(
            StatusCode::UNAUTHORIZED,
            "unauthenticated",
            "Please sign in to the HR system first.",
        )
    };

    let token = extract_bearer(req.headers()).map_err(|_| unauthenticated())?;

    let session = state.validator.validate(token, Utc::now()).map_err(|e| {
        tracing::debug!(error = %e, "HR login token rejected");
        unauthenticated()
    })?;

    req.extensions_mut().insert(HrContext::new(session));

    Ok(next.run(req).await)
}

#[derive(Clone)]
pub struct SessionGateState {
    pub sessions: Arc<SessionManager>,
    pub stage: SessionStage,
}

impl SessionGateState {
    pub fn new(sessions: Arc<SessionManager>, stage: SessionStage) -> Self {
        Self { sessions, stage }
    }
}

/// Payroll side: admits requests whose cookie for `stage` validates.
///
/// The identity cookie never satisfies the step-up gate; each stage is read
/// from its own cookie and the token's stage claim must match.
pub async fn session_gate(
    State(state): State<SessionGateState>,
    mut req: axum::http::Request<axum::body::Body>,
    next: Next,
) -> Result<Response, Response> {
    let jar = CookieJar::from_headers(req.headers());
    let token = cookies::session_token(&jar, state.stage).ok_or_else(|| errors::missing_session(state.stage))?;

    let claims = state
        .sessions
        .validate(&token, state.stage, Utc::now())
        .map_err(|e| errors::session_error_to_response(e, state.stage))?;

    req.extensions_mut().insert(PayrollPrincipal::from_claims(claims));

    Ok(next.run(req).await)
}

fn extract_bearer(headers: &HeaderMap) -> Result<&str, StatusCode> {
    let header = headers
        .get(axum::http::header::AUTHORIZATION)
        .ok_or(StatusCode::UNAUTHORIZED)?;

    let header = header.to_str().map_err(|_| StatusCode::UNAUTHORIZED)?;

    let header = header
        .strip_prefix("Bearer ")
        .ok_or(StatusCode::UNAUTHORIZED)?;

    let token = header.trim();
    if token.is_empty() {
        return Err(StatusCode::UNAUTHORIZED);
    }

    Ok(token)
}
