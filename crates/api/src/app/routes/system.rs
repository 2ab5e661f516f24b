use axum::{extract::Extension, http::StatusCode, response::IntoResponse, Json};

use crate::app::dto;
use crate::context::PayrollPrincipal;

pub async fn health() -> StatusCode {
    StatusCode::OK
}

/// `GET /payroll/me`: the step-up-verified principal.
pub async fn me(Extension(principal): Extension<PayrollPrincipal>) -> impl IntoResponse {
    tracing::debug!(stage = principal.stage().as_str(), "payroll principal");
    Json(dto::PayrollMeResponse::from(&principal))
}
