use axum::{routing::get, Router};

pub mod hr;
pub mod sso;
pub mod system;

/// Payroll business routes; every one of them sits behind the step-up gate.
pub fn payroll_router() -> Router {
    Router::new().route("/payroll/me", get(system::me))
}
