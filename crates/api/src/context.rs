use paybridge_auth::{HrSession, PayrollRole, SessionClaims, SessionStage, SessionSubject};
use paybridge_core::{EmployeeId, OrganizationId, PayrollUserId};

/// HR-side identity for a request, from the HR login bearer token.
///
/// Present on every route behind the HR bearer middleware.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HrContext {
    session: HrSession,
}

impl HrContext {
    pub fn new(session: HrSession) -> Self {
        Self { session }
    }

    pub fn session(&self) -> &HrSession {
        &self.session
    }
}

/// Payroll-side principal for a request, from a session cookie.
///
/// `stage` records which gate admitted the request; business routes only
/// ever see `StepUpPassed`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PayrollPrincipal {
    user_id: PayrollUserId,
    employee_id: EmployeeId,
    organization_id: OrganizationId,
    role: PayrollRole,
    stage: SessionStage,
}

impl PayrollPrincipal {
    pub fn from_claims(claims: SessionClaims) -> Self {
        Self {
            user_id: claims.sub,
            employee_id: claims.employee_id,
            organization_id: claims.organization_id,
            role: claims.role,
            stage: claims.stage,
        }
    }

    pub fn from_subject(subject: SessionSubject, stage: SessionStage) -> Self {
        Self {
            user_id: subject.user_id,
            employee_id: subject.employee_id,
            organization_id: subject.organization_id,
            role: subject.role,
            stage,
        }
    }

    pub fn user_id(&self) -> PayrollUserId {
        self.user_id
    }

    pub fn employee_id(&self) -> EmployeeId {
        self.employee_id
    }

    pub fn organization_id(&self) -> &OrganizationId {
        &self.organization_id
    }

    pub fn role(&self) -> PayrollRole {
        self.role
    }

    pub fn stage(&self) -> SessionStage {
        self.stage
    }

    pub fn session_subject(&self) -> SessionSubject {
        SessionSubject {
            user_id: self.user_id,
            employee_id: self.employee_id,
            organization_id: self.organization_id.clone(),
            role: self.role,
        }
    }
}
