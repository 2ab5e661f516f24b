//! HR gateway: hand-off link for the logged-in HR user.

use std::sync::Arc;

use axum::{
    extract::Extension,
    http::StatusCode,
    response::{IntoResponse, Redirect},
    routing::get,
    Json, Router,
};
use chrono::Utc;

use crate::app::services::HrServices;
use crate::app::{dto, errors};
use crate::context::HrContext;

pub fn router() -> Router {
    Router::new()
        .route("/sso/payroll-link", get(payroll_link))
        .route("/sso/payroll", get(payroll_redirect))
}

pub async fn payroll_link(
    Extension(services): Extension<Arc<HrServices>>,
    Extension(hr): Extension<HrContext>,
) -> axum::response::Response {
    match services.issuer.issue(Some(hr.session()), Utc::now()) {
        Ok(issued) => (StatusCode::OK, Json(dto::PayrollLinkResponse::from(issued))).into_response(),
        Err(e) => errors::issue_error_to_response(e),
    }
}

pub async fn payroll_redirect(
    Extension(services): Extension<Arc<HrServices>>,
    Extension(hr): Extension<HrContext>,
) -> axum::response::Response {
    match services.issuer.issue(Some(hr.session()), Utc::now()) {
        Ok(issued) => Redirect::to(&issued.redirect_url).into_response(),
        Err(e) => errors::issue_error_to_response(e),
    }
}
