use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use paybridge_auth::{IssuedAssertion, PayrollRole, StepUpState};
use paybridge_core::{EmployeeId, OrganizationId, PayrollUserId};
use paybridge_infra::{ResolutionPath, StepUpStatus};

use crate::context::PayrollPrincipal;

// -------------------------
// Request DTOs
// -------------------------

#[derive(Debug, Deserialize)]
pub struct HandOffQuery {
    pub token: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct PinRequest {
    pub pin: String,
}

// -------------------------
// Response DTOs
// -------------------------

#[derive(Debug, Serialize)]
pub struct PayrollLinkResponse {
    pub redirect_url: String,
    pub payroll_role: PayrollRole,
    pub expires_at: DateTime<Utc>,
}

impl From<IssuedAssertion> for PayrollLinkResponse {
    fn from(issued: IssuedAssertion) -> Self {
        Self {
            redirect_url: issued.redirect_url,
            payroll_role: issued.payroll_role,
            expires_at: issued.expires_at,
        }
    }
}

/// What the browser should show after a step of the hand-off.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NextStep {
    SetupPin,
    EnterPin,
    Continue,
}

impl NextStep {
    pub fn for_state(state: StepUpState) -> Self {
        match state {
            StepUpState::NoPinSet => NextStep::SetupPin,
            StepUpState::AwaitingPin => NextStep::EnterPin,
            StepUpState::Verified => NextStep::Continue,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct HandOffResponse {
    pub next: NextStep,
    pub state: StepUpState,
    pub employee_id: EmployeeId,
    pub organization_id: OrganizationId,
    pub role: PayrollRole,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resolution: Option<ResolutionPath>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub locked_until: Option<DateTime<Utc>>,
}

impl HandOffResponse {
    pub fn new(principal: &PayrollPrincipal, status: &StepUpStatus) -> Self {
        Self {
            next: NextStep::for_state(status.state),
            state: status.state,
            employee_id: principal.employee_id(),
            organization_id: principal.organization_id().clone(),
            role: principal.role(),
            resolution: None,
            locked_until: status.locked_until,
        }
    }

    pub fn with_resolution(mut self, path: ResolutionPath) -> Self {
        self.resolution = Some(path);
        self
    }
}

#[derive(Debug, Serialize)]
pub struct PayrollMeResponse {
    pub user_id: PayrollUserId,
    pub employee_id: EmployeeId,
    pub organization_id: OrganizationId,
    pub role: PayrollRole,
}

impl From<&PayrollPrincipal> for PayrollMeResponse {
    fn from(principal: &PayrollPrincipal) -> Self {
        Self {
            user_id: principal.user_id(),
            employee_id: principal.employee_id(),
            organization_id: principal.organization_id().clone(),
            role: principal.role(),
        }
    }
}
