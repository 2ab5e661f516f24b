//! Assertion Verifier (Payroll side).
//!
//! A pure function of `(token, now)`: no IO, no shared mutable state, safe to
//! call any number of times with the same input. Gates run in a fixed order
//! and the first failure wins:
//!
//! 1. structure (three segments, decodable header and claims)
//! 2. signature under the key selected by `kid`
//! 3. issuer and audience
//! 4. time window (`iat` ≤ now < `exp`, bounded lifetime)
//! 5. required claims (`sub`, `org`, `email`, `jti`)

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use thiserror::Error;

use paybridge_core::{Email, OrganizationId, SubjectId};

use crate::assertion::{CodecError, decode_unverified};
use crate::config::{FederationConfig, TrustRelationship};
use crate::keys::{KeyError, SignatureVerifier};
use crate::roles::{PayrollRole, Role};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum VerifyError {
    #[error("malformed assertion: {0}")]
    Malformed(String),

    #[error("no trusted key for this assertion")]
    UnknownKey,

    #[error("assertion signature is invalid")]
    SignatureInvalid,

    #[error("assertion issuer mismatch")]
    IssuerMismatch,

    #[error("assertion audience mismatch")]
    AudienceMismatch,

    #[error("assertion has expired")]
    Expired,

    #[error("assertion is not yet valid")]
    NotYetValid,

    #[error("invalid assertion time window")]
    InvalidTimeWindow,

    #[error("assertion is missing required claim '{0}'")]
    MissingClaim(&'static str),
}

impl VerifyError {
    /// Stable classification for audit logs.
    pub fn kind(&self) -> &'static str {
        match self {
            VerifyError::Malformed(_) => "malformed",
            VerifyError::UnknownKey => "unknown_key",
            VerifyError::SignatureInvalid => "signature_invalid",
            VerifyError::IssuerMismatch => "issuer_mismatch",
            VerifyError::AudienceMismatch => "audience_mismatch",
            VerifyError::Expired => "expired",
            VerifyError::NotYetValid => "not_yet_valid",
            VerifyError::InvalidTimeWindow => "invalid_time_window",
            VerifyError::MissingClaim(_) => "missing_claim",
        }
    }

    /// Clock-based rejections: the user should start over from the HR system.
    pub fn is_temporal(&self) -> bool {
        matches!(self, VerifyError::Expired | VerifyError::NotYetValid)
    }
}

impl From<CodecError> for VerifyError {
    fn from(e: CodecError) -> Self {
        VerifyError::Malformed(e.to_string())
    }
}

/// Claims that passed every gate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifiedClaims {
    pub subject: SubjectId,
    pub organization_id: OrganizationId,
    pub email: Email,
    pub display_name: Option<String>,
    pub hr_roles: Vec<Role>,
    pub payroll_role: PayrollRole,
    pub issuer: String,
    pub audience: String,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    /// Last instant this verifier would still accept the assertion
    /// (`expires_at` plus the allowed clock skew). Replay records must be
    /// kept at least this long.
    pub accept_until: DateTime<Utc>,
    pub jti: String,
}

pub struct AssertionVerifier {
    keys: Arc<dyn SignatureVerifier>,
    trust: TrustRelationship,
    clock_skew: Duration,
    max_lifetime: Duration,
}

impl AssertionVerifier {
    pub fn new(keys: Arc<dyn SignatureVerifier>, config: &FederationConfig) -> Self {
        Self {
            keys,
            trust: config.trust.clone(),
            clock_skew: config.clock_skew,
            max_lifetime: config.assertion_lifetime,
        }
    }

    pub fn verify(&self, token: &str, now: DateTime<Utc>) -> Result<VerifiedClaims, VerifyError> {
        // 1. structure
        let decoded = decode_unverified(token.trim())?;

        // 2. signature
        let valid = self
            .keys
            .verify(
                decoded.header.kid.as_deref(),
                decoded.header.alg,
                decoded.signing_input.as_bytes(),
                decoded.signature,
            )
            .map_err(|e| match e {
                KeyError::UnknownKey(_) => VerifyError::UnknownKey,
                _ => VerifyError::SignatureInvalid,
            })?;
        if !valid {
            return Err(VerifyError::SignatureInvalid);
        }

        let claims = decoded.claims;

        // 3. trust relationship
        if claims.iss.as_deref() != Some(self.trust.issuer.as_str()) {
            return Err(VerifyError::IssuerMismatch);
        }
        if claims.aud.as_deref() != Some(self.trust.audience.as_str()) {
            return Err(VerifyError::AudienceMismatch);
        }

        // 4. time window
        let iat = claims.iat.ok_or(VerifyError::MissingClaim("iat"))?;
        let exp = claims.exp.ok_or(VerifyError::MissingClaim("exp"))?;
        let issued_at = DateTime::from_timestamp(iat, 0).ok_or(VerifyError::InvalidTimeWindow)?;
        let expires_at = DateTime::from_timestamp(exp, 0).ok_or(VerifyError::InvalidTimeWindow)?;
        if expires_at <= issued_at || expires_at - issued_at > self.max_lifetime {
            return Err(VerifyError::InvalidTimeWindow);
        }
        if now + self.clock_skew < issued_at {
            return Err(VerifyError::NotYetValid);
        }
        if now >= expires_at + self.clock_skew {
            return Err(VerifyError::Expired);
        }

        // 5. required claims
        let subject = required(claims.sub, "sub")
            .and_then(|s| SubjectId::parse(s).map_err(|e| VerifyError::Malformed(e.to_string())))?;
        let organization_id = required(claims.org, "org")
            .and_then(|s| OrganizationId::parse(s).map_err(|e| VerifyError::Malformed(e.to_string())))?;
        let email = required(claims.email, "email")
            .and_then(|s| Email::parse(s).map_err(|e| VerifyError::Malformed(e.to_string())))?;
        let jti = required(claims.jti, "jti")?;

        // The issuer always sets the derived role; absent means least privilege.
        let payroll_role = match claims.payroll_role.as_deref() {
            None => PayrollRole::Employee,
            Some(raw) => PayrollRole::parse(raw)
                .ok_or_else(|| VerifyError::Malformed(format!("unknown payroll role '{raw}'")))?,
        };

        Ok(VerifiedClaims {
            subject,
            organization_id,
            email,
            display_name: claims.name.filter(|n| !n.trim().is_empty()),
            hr_roles: claims.roles.into_iter().map(Role::new).collect(),
            payroll_role,
            issuer: self.trust.issuer.clone(),
            audience: self.trust.audience.clone(),
            issued_at,
            expires_at,
            accept_until: expires_at + self.clock_skew,
            jti,
        })
    }
}

fn required(value: Option<String>, name: &'static str) -> Result<String, VerifyError> {
    match value {
        Some(v) if !v.trim().is_empty() => Ok(v),
        _ => Err(VerifyError::MissingClaim(name)),
    }
}
