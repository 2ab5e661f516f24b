//! Session Manager: the two Payroll-side session tokens.
//!
//! Both cookies carry an HS256-signed token minted and checked only by the
//! Payroll gateway. The token names its [`SessionStage`]; a token for one stage
//! is never accepted where the other is expected, so the identity-verified
//! cookie alone can never reach Payroll business data.

use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use paybridge_core::{EmployeeId, OrganizationId, PayrollUserId};

use crate::config::FederationConfig;
use crate::roles::PayrollRole;

/// Which gate a session token proves was passed.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStage {
    /// Assertion verified and identity resolved; step-up still pending.
    IdentityVerified,
    /// PIN verified; full Payroll access.
    StepUpPassed,
}

impl SessionStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStage::IdentityVerified => "identity_verified",
            SessionStage::StepUpPassed => "step_up_passed",
        }
    }
}

/// Session token claims (transport-agnostic).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionClaims {
    /// Payroll user.
    pub sub: PayrollUserId,

    pub employee_id: EmployeeId,

    pub organization_id: OrganizationId,

    pub role: PayrollRole,

    pub stage: SessionStage,

    pub issued_at: DateTime<Utc>,

    pub expires_at: DateTime<Utc>,
}

/// The identity a session is about, independent of stage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSubject {
    pub user_id: PayrollUserId,
    pub employee_id: EmployeeId,
    pub organization_id: OrganizationId,
    pub role: PayrollRole,
}

impl SessionClaims {
    pub fn subject(&self) -> SessionSubject {
        SessionSubject {
            user_id: self.sub,
            employee_id: self.employee_id,
            organization_id: self.organization_id.clone(),
            role: self.role,
        }
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SessionError {
    #[error("session token is invalid")]
    Invalid,

    #[error("session has expired")]
    Expired,

    #[error("session not yet valid (issued_at is in the future)")]
    NotYetValid,

    #[error("invalid session time window (expires_at <= issued_at)")]
    InvalidTimeWindow,

    #[error("session stage mismatch: expected {expected:?}, found {found:?}")]
    WrongStage {
        expected: SessionStage,
        found: SessionStage,
    },

    #[error("failed to encode session token: {0}")]
    Encoding(String),
}

/// Deterministically validate session claims against the clock.
pub fn validate_claims(claims: &SessionClaims, now: DateTime<Utc>) -> Result<(), SessionError> {
    if claims.expires_at <= claims.issued_at {
        return Err(SessionError::InvalidTimeWindow);
    }
    if now < claims.issued_at {
        return Err(SessionError::NotYetValid);
    }
    if now >= claims.expires_at {
        return Err(SessionError::Expired);
    }
    Ok(())
}

/// A minted session token and its expiry (for the cookie's `Max-Age`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionToken {
    pub value: String,
    pub stage: SessionStage,
    pub expires_at: DateTime<Utc>,
}

impl SessionToken {
    pub fn ttl(&self, now: DateTime<Utc>) -> Duration {
        (self.expires_at - now).max(Duration::zero())
    }
}

#[derive(Clone)]
pub struct SessionManager {
    encoding: EncodingKey,
    decoding: DecodingKey,
    identity_ttl: Duration,
    step_up_ttl: Duration,
}

impl core::fmt::Debug for SessionManager {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("SessionManager")
            .field("identity_ttl", &self.identity_ttl)
            .field("step_up_ttl", &self.step_up_ttl)
            .finish_non_exhaustive()
    }
}

impl SessionManager {
    pub fn new(secret: &[u8], config: &FederationConfig) -> Self {
        Self {
            encoding: EncodingKey::from_secret(secret),
            decoding: DecodingKey::from_secret(secret),
            identity_ttl: config.identity_session_ttl,
            step_up_ttl: config.step_up_session_ttl,
        }
    }

    pub fn ttl_for(&self, stage: SessionStage) -> Duration {
        match stage {
            SessionStage::IdentityVerified => self.identity_ttl,
            SessionStage::StepUpPassed => self.step_up_ttl,
        }
    }

    /// Mint a token for `subject` at `stage`.
    pub fn issue(
        &self,
        subject: &SessionSubject,
        stage: SessionStage,
        now: DateTime<Utc>,
    ) -> Result<SessionToken, SessionError> {
        let claims = SessionClaims {
            sub: subject.user_id,
            employee_id: subject.employee_id,
            organization_id: subject.organization_id.clone(),
            role: subject.role,
            stage,
            issued_at: now,
            expires_at: now + self.ttl_for(stage),
        };

        let value = jsonwebtoken::encode(&Header::new(Algorithm::HS256), &claims, &self.encoding)
            .map_err(|e| SessionError::Encoding(e.to_string()))?;

        Ok(SessionToken {
            value,
            stage,
            expires_at: claims.expires_at,
        })
    }

    pub fn issue_identity(&self, subject: &SessionSubject, now: DateTime<Utc>) -> Result<SessionToken, SessionError> {
        self.issue(subject, SessionStage::IdentityVerified, now)
    }

    /// Only call once step-up has reached `Verified`.
    pub fn issue_step_up(&self, subject: &SessionSubject, now: DateTime<Utc>) -> Result<SessionToken, SessionError> {
        self.issue(subject, SessionStage::StepUpPassed, now)
    }

    /// Check signature, time window and stage.
    pub fn validate(
        &self,
        token: &str,
        expected: SessionStage,
        now: DateTime<Utc>,
    ) -> Result<SessionClaims, SessionError> {
        // Time checks are done by `validate_claims` against the caller's clock.
        let mut validation = Validation::new(Algorithm::HS256);
        validation.required_spec_claims.clear();
        validation.validate_exp = false;

        let claims = jsonwebtoken::decode::<SessionClaims>(token, &self.decoding, &validation)
            .map_err(|_| SessionError::Invalid)?
            .claims;

        validate_claims(&claims, now)?;

        if claims.stage != expected {
            return Err(SessionError::WrongStage {
                expected,
                found: claims.stage,
            });
        }

        Ok(claims)
    }
}
