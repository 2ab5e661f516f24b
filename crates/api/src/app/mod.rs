//! HTTP application wiring for the two gateways.
//!
//! - `services.rs`: protocol components and stores
//! - `routes/`: handlers, one file per surface
//! - `dto.rs`: request/response bodies
//! - `cookies.rs`: the Payroll session cookies
//! - `errors.rs`: consistent error responses

use std::sync::Arc;

use axum::{routing::get, Extension, Router};
use tower::ServiceBuilder;

use paybridge_auth::SessionStage;

use crate::middleware;

pub mod cookies;
pub mod dto;
pub mod errors;
pub mod routes;
pub mod services;

/// HR gateway router: hand-off link behind HR bearer authentication.
pub fn build_hr_app(services: Arc<services::HrServices>) -> Router {
    let auth_state = middleware::HrAuthState {
        validator: services.validator.clone(),
    };

    let protected = routes::hr::router()
        .layer(Extension(services))
        .layer(axum::middleware::from_fn_with_state(
            auth_state,
            middleware::hr_auth_middleware,
        ));

    Router::new()
        .route("/health", get(routes::system::health))
        .merge(protected)
        .layer(ServiceBuilder::new())
}

/// Payroll gateway router.
///
/// `/sso` and `/sso/logout` are open, the PIN endpoints need the
/// identity-verified cookie, and business routes need the step-up cookie.
pub fn build_payroll_app(services: Arc<services::PayrollServices>) -> Router {
    let identity_gate = middleware::SessionGateState::new(services.sessions.clone(), SessionStage::IdentityVerified);
    let step_up_gate = middleware::SessionGateState::new(services.sessions.clone(), SessionStage::StepUpPassed);

    let pin_routes = routes::sso::identity_router().route_layer(axum::middleware::from_fn_with_state(
        identity_gate,
        middleware::session_gate,
    ));

    let business_routes = routes::payroll_router().route_layer(axum::middleware::from_fn_with_state(
        step_up_gate,
        middleware::session_gate,
    ));

    Router::new()
        .route("/health", get(routes::system::health))
        .merge(routes::sso::public_router())
        .merge(pin_routes)
        .merge(business_routes)
        .layer(Extension(services))
        .layer(ServiceBuilder::new())
}
