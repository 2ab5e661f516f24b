//! Payroll gateway: assertion hand-off and PIN step-up.

use std::sync::Arc;

use axum::{
    extract::{Extension, Query},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use axum_extra::extract::cookie::CookieJar;
use chrono::Utc;

use paybridge_auth::{SessionStage, SessionSubject, StepUpState};
use paybridge_infra::StepUpStatus;

use crate::app::services::PayrollServices;
use crate::app::{cookies, dto, errors};
use crate::context::PayrollPrincipal;

/// Routes reachable without any session cookie.
pub fn public_router() -> Router {
    Router::new()
        .route("/sso", get(hand_off))
        .route("/sso/logout", post(logout))
}

/// Routes that need the identity-verified cookie.
pub fn identity_router() -> Router {
    Router::new()
        .route("/sso/status", get(status))
        .route("/sso/setup-pin", post(setup_pin))
        .route("/sso/verify-pin", post(verify_pin))
}

/// `GET /sso?token=...`: verify, consume, resolve, then set the identity cookie.
pub async fn hand_off(
    Extension(services): Extension<Arc<PayrollServices>>,
    jar: CookieJar,
    Query(query): Query<dto::HandOffQuery>,
) -> axum::response::Response {
    let now = Utc::now();

    let Some(token) = query.token.filter(|t| !t.trim().is_empty()) else {
        tracing::warn!(target: "paybridge::audit", event = "hand_off_rejected", reason = "missing_token");
        return errors::json_error(
            StatusCode::UNAUTHORIZED,
            "invalid_assertion",
            "This sign-in link is incomplete. Please open Payroll again from the HR system.",
        );
    };

    let claims = match services.verifier.verify(&token, now) {
        Ok(claims) => claims,
        Err(e) => return errors::verify_error_to_response(e),
    };

    match services.stores.consumed.consume(&claims.jti, claims.accept_until, now).await {
        Ok(true) => {}
        Ok(false) => return errors::replay_to_response(&claims.jti),
        Err(e) => return errors::store_error_to_response(e),
    }

    let identity = match services.resolver.resolve(&claims, now).await {
        Ok(identity) => identity,
        Err(e) => return errors::resolve_error_to_response(e),
    };

    let status = match services.step_up.state(identity.user_id, now).await {
        Ok(status) => status,
        Err(e) => return errors::step_up_error_to_response(e),
    };

    let subject = SessionSubject::from(&identity);
    let token = match services.sessions.issue_identity(&subject, now) {
        Ok(token) => token,
        Err(e) => return errors::session_error_to_response(e, SessionStage::IdentityVerified),
    };

    tracing::info!(
        target: "paybridge::audit",
        event = "hand_off_accepted",
        subject = %claims.subject,
        user_id = %identity.user_id,
        employee_id = %identity.employee_id,
        resolution = identity.path.as_str(),
        state = status.state.as_str(),
        jti = %claims.jti,
        "identity verified"
    );

    // A new hand-off always starts over at the PIN stage.
    let jar = jar
        .add(services.cookies.session_cookie(&token, now))
        .add(cookies::clear_session_cookie(SessionStage::StepUpPassed));

    let principal = PayrollPrincipal::from_subject(subject, SessionStage::IdentityVerified);
    let body = dto::HandOffResponse::new(&principal, &status).with_resolution(identity.path);
    (jar, Json(body)).into_response()
}

pub async fn status(
    Extension(services): Extension<Arc<PayrollServices>>,
    Extension(principal): Extension<PayrollPrincipal>,
) -> axum::response::Response {
    match services.step_up.state(principal.user_id(), Utc::now()).await {
        Ok(status) => (StatusCode::OK, Json(dto::HandOffResponse::new(&principal, &status))).into_response(),
        Err(e) => errors::step_up_error_to_response(e),
    }
}

pub async fn setup_pin(
    Extension(services): Extension<Arc<PayrollServices>>,
    Extension(principal): Extension<PayrollPrincipal>,
    jar: CookieJar,
    Json(body): Json<dto::PinRequest>,
) -> axum::response::Response {
    let now = Utc::now();
    match services.step_up.setup_pin(principal.user_id(), &body.pin, now).await {
        Ok(state) => step_up_passed(&services, &principal, jar, state),
        Err(e) => errors::step_up_error_to_response(e),
    }
}

pub async fn verify_pin(
    Extension(services): Extension<Arc<PayrollServices>>,
    Extension(principal): Extension<PayrollPrincipal>,
    jar: CookieJar,
    Json(body): Json<dto::PinRequest>,
) -> axum::response::Response {
    let now = Utc::now();
    match services.step_up.verify_pin(principal.user_id(), &body.pin, now).await {
        Ok(state) => step_up_passed(&services, &principal, jar, state),
        Err(e) => errors::step_up_error_to_response(e),
    }
}

/// `POST /sso/logout`: drop both cookies.
pub async fn logout(jar: CookieJar) -> impl IntoResponse {
    let jar = jar
        .add(cookies::clear_session_cookie(SessionStage::IdentityVerified))
        .add(cookies::clear_session_cookie(SessionStage::StepUpPassed));
    (jar, StatusCode::NO_CONTENT)
}

fn step_up_passed(
    services: &PayrollServices,
    principal: &PayrollPrincipal,
    jar: CookieJar,
    state: StepUpState,
) -> axum::response::Response {
    let now = Utc::now();
    let token = match services.sessions.issue_step_up(&principal.session_subject(), now) {
        Ok(token) => token,
        Err(e) => return errors::session_error_to_response(e, SessionStage::StepUpPassed),
    };

    tracing::info!(
        target: "paybridge::audit",
        event = "step_up_passed",
        user_id = %principal.user_id(),
        employee_id = %principal.employee_id(),
        "step-up session issued"
    );

    let status = StepUpStatus {
        state,
        locked_until: None,
    };
    let jar = jar.add(services.cookies.session_cookie(&token, now));
    (jar, Json(dto::HandOffResponse::new(principal, &status))).into_response()
}
