//! Consistent error responses.
//!
//! The browser only ever gets a coarse code and a generic message. The precise
//! classification goes to the `paybridge::audit` log target.

use axum::http::StatusCode;
use axum::response::IntoResponse;
use serde_json::json;

use paybridge_auth::{IssueError, SessionError, SessionStage, VerifyError};
use paybridge_infra::{ResolveError, StepUpError, StoreError};

const RESTART_FROM_HR: &str = "This sign-in link can no longer be used. Please open Payroll again from the HR system.";
const EXPIRED_FROM_HR: &str = "This sign-in link has expired. Please open Payroll again from the HR system.";
const INTERNAL: &str = "Something went wrong. Please try again.";

pub fn json_error(
    status: StatusCode,
    code: &'static str,
    message: impl Into<String>,
) -> axum::response::Response {
    (
        status,
        axum::Json(json!({
            "error": code,
            "message": message.into(),
        })),
    )
        .into_response()
}

pub fn issue_error_to_response(err: IssueError) -> axum::response::Response {
    match err {
        IssueError::NotAuthenticated => {
            json_error(StatusCode::UNAUTHORIZED, "unauthenticated", "Please sign in to the HR system first.")
        }
        IssueError::Signing(e) => {
            tracing::error!(target: "paybridge::audit", event = "assertion_signing_failed", error = %e);
            json_error(StatusCode::INTERNAL_SERVER_ERROR, "internal_error", INTERNAL)
        }
    }
}

pub fn verify_error_to_response(err: VerifyError) -> axum::response::Response {
    tracing::warn!(
        target: "paybridge::audit",
        event = "hand_off_rejected",
        reason = err.kind(),
        detail = %err,
        "assertion rejected"
    );
    if err.is_temporal() {
        json_error(StatusCode::UNAUTHORIZED, "assertion_expired", EXPIRED_FROM_HR)
    } else {
        json_error(StatusCode::UNAUTHORIZED, "invalid_assertion", RESTART_FROM_HR)
    }
}

pub fn replay_to_response(jti: &str) -> axum::response::Response {
    tracing::warn!(
        target: "paybridge::audit",
        event = "hand_off_rejected",
        reason = "replayed",
        jti = %jti,
        "assertion already consumed"
    );
    json_error(StatusCode::UNAUTHORIZED, "invalid_assertion", RESTART_FROM_HR)
}

pub fn resolve_error_to_response(err: ResolveError) -> axum::response::Response {
    tracing::warn!(
        target: "paybridge::audit",
        event = "hand_off_rejected",
        reason = err.kind(),
        detail = %err,
        "identity resolution failed"
    );
    match err {
        ResolveError::IdentityConflict { .. } => json_error(
            StatusCode::CONFLICT,
            "identity_conflict",
            "Your Payroll account could not be linked. Please contact your administrator.",
        ),
        ResolveError::ProvisioningConflict => json_error(
            StatusCode::SERVICE_UNAVAILABLE,
            "try_again",
            "Your Payroll account is being set up. Please open Payroll again from the HR system.",
        ),
        ResolveError::Store(e) => store_error_to_response(e),
    }
}

pub fn step_up_error_to_response(err: StepUpError) -> axum::response::Response {
    match err {
        StepUpError::InvalidPin(e) => json_error(StatusCode::BAD_REQUEST, "invalid_pin", e.to_string()),
        StepUpError::IncorrectPin => json_error(StatusCode::UNAUTHORIZED, "incorrect_pin", "Incorrect PIN."),
        StepUpError::LockedOut { locked_until } => (
            StatusCode::LOCKED,
            axum::Json(json!({
                "error": "pin_locked",
                "message": "Too many incorrect PINs. Please wait before trying again.",
                "locked_until": locked_until,
            })),
        )
            .into_response(),
        StepUpError::PinAlreadySet => {
            json_error(StatusCode::CONFLICT, "pin_already_set", "A PIN has already been set. Enter your PIN instead.")
        }
        StepUpError::NoPinSet => {
            json_error(StatusCode::CONFLICT, "pin_not_set", "No PIN has been set yet. Choose a PIN first.")
        }
        StepUpError::Hashing(e) => {
            tracing::error!(target: "paybridge::audit", event = "pin_hashing_failed", error = %e);
            json_error(StatusCode::INTERNAL_SERVER_ERROR, "internal_error", INTERNAL)
        }
        StepUpError::Store(e) => store_error_to_response(e),
    }
}

pub fn store_error_to_response(err: StoreError) -> axum::response::Response {
    tracing::error!(error = %err, "store operation failed");
    json_error(StatusCode::INTERNAL_SERVER_ERROR, "internal_error", INTERNAL)
}

pub fn session_error_to_response(err: SessionError, expected: SessionStage) -> axum::response::Response {
    tracing::info!(
        target: "paybridge::audit",
        event = "session_rejected",
        expected = expected.as_str(),
        detail = %err,
        "session cookie rejected"
    );
    match err {
        SessionError::Encoding(_) => json_error(StatusCode::INTERNAL_SERVER_ERROR, "internal_error", INTERNAL),
        _ => missing_session(expected),
    }
}

pub fn missing_session(expected: SessionStage) -> axum::response::Response {
    match expected {
        SessionStage::IdentityVerified => json_error(
            StatusCode::UNAUTHORIZED,
            "identity_required",
            "Your sign-in has expired. Please open Payroll again from the HR system.",
        ),
        SessionStage::StepUpPassed => {
            json_error(StatusCode::UNAUTHORIZED, "step_up_required", "Please enter your PIN to continue.")
        }
    }
}
