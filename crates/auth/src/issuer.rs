//! Assertion Issuer (HR side).
//!
//! Turns an already-authenticated HR session into a short-lived signed
//! assertion and the Payroll hand-off URL that carries it. Nothing is
//! persisted here.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use thiserror::Error;
use uuid::Uuid;

use paybridge_core::{Email, OrganizationId, SubjectId};

use crate::assertion::{AssertionClaims, CodecError, encode_signed};
use crate::config::{FederationConfig, TrustRelationship};
use crate::keys::AssertionSigner;
use crate::roles::{PayrollRole, Role, RoleMapping};

/// The HR system's view of the logged-in user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HrSession {
    pub user_id: SubjectId,
    pub organization_id: OrganizationId,
    pub email: Email,
    pub display_name: Option<String>,
    pub roles: Vec<Role>,
}

#[derive(Debug, Error)]
pub enum IssueError {
    #[error("no authenticated HR session")]
    NotAuthenticated,

    #[error("failed to sign assertion: {0}")]
    Signing(#[from] CodecError),
}

/// Result of a successful issue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IssuedAssertion {
    pub token: String,
    pub redirect_url: String,
    pub jti: String,
    pub payroll_role: PayrollRole,
    pub expires_at: DateTime<Utc>,
}

pub struct AssertionIssuer {
    signer: Arc<dyn AssertionSigner>,
    trust: TrustRelationship,
    lifetime: Duration,
    role_mapping: RoleMapping,
    payroll_base_url: String,
}

impl AssertionIssuer {
    pub fn new(
        signer: Arc<dyn AssertionSigner>,
        config: &FederationConfig,
        payroll_base_url: impl Into<String>,
    ) -> Self {
        let payroll_base_url = payroll_base_url.into().trim_end_matches('/').to_string();
        Self {
            signer,
            trust: config.trust.clone(),
            lifetime: config.assertion_lifetime,
            role_mapping: config.role_mapping.clone(),
            payroll_base_url,
        }
    }

    /// Issue an assertion for `session`.
    ///
    /// Refuses when there is no session: the caller must already be logged in
    /// to the HR system.
    pub fn issue(&self, session: Option<&HrSession>, now: DateTime<Utc>) -> Result<IssuedAssertion, IssueError> {
        let session = session.ok_or(IssueError::NotAuthenticated)?;

        let payroll_role = self.role_mapping.derive(&session.roles);
        // Second precision: `iat`/`exp` travel as Unix seconds.
        let issued_at = now.timestamp();
        let expires_at = issued_at + self.lifetime.num_seconds();
        let jti = Uuid::new_v4().to_string();

        let claims = AssertionClaims {
            sub: Some(session.user_id.to_string()),
            org: Some(session.organization_id.to_string()),
            email: Some(session.email.to_string()),
            name: session.display_name.clone(),
            roles: session.roles.iter().map(|r| r.as_str().to_string()).collect(),
            payroll_role: Some(payroll_role.as_str().to_string()),
            iss: Some(self.trust.issuer.clone()),
            aud: Some(self.trust.audience.clone()),
            iat: Some(issued_at),
            exp: Some(expires_at),
            jti: Some(jti.clone()),
        };

        let token = encode_signed(&claims, self.signer.as_ref())?;
        let redirect_url = format!("{}/sso?token={}", self.payroll_base_url, token);

        tracing::info!(
            target: "paybridge::audit",
            event = "assertion_issued",
            subject = %session.user_id,
            organization_id = %session.organization_id,
            payroll_role = %payroll_role,
            jti = %jti,
            kid = %self.signer.key_id(),
            "issued payroll hand-off assertion"
        );

        Ok(IssuedAssertion {
            token,
            redirect_url,
            jti,
            payroll_role,
            expires_at: DateTime::from_timestamp(expires_at, 0).unwrap_or(now + self.lifetime),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assertion::decode_unverified;
    use crate::keys::test_keys::*;

    fn session() -> HrSession {
        HrSession {
            user_id: SubjectId::parse("hr-42").unwrap(),
            organization_id: OrganizationId::parse("org1").unwrap(),
            email: Email::parse("a@x.com").unwrap(),
            display_name: Some("Ada".to_string()),
            roles: vec![Role::new("hr")],
        }
    }

    fn issuer() -> AssertionIssuer {
        AssertionIssuer::new(Arc::new(signer_a()), &FederationConfig::default(), "https://payroll.example/")
    }

    #[test]
    fn refuses_without_session() {
        let err = issuer().issue(None, Utc::now()).unwrap_err();
        assert!(matches!(err, IssueError::NotAuthenticated));
    }

    #[test]
    fn builds_claims_from_session() {
        let now = Utc::now();
        let issued = issuer().issue(Some(&session()), now).unwrap();
        let decoded = decode_unverified(&issued.token).unwrap();
        let c = decoded.claims;

        assert_eq!(c.sub.as_deref(), Some("hr-42"));
        assert_eq!(c.org.as_deref(), Some("org1"));
        assert_eq!(c.email.as_deref(), Some("a@x.com"));
        assert_eq!(c.roles, vec!["hr".to_string()]);
        assert_eq!(c.payroll_role.as_deref(), Some("payroll_admin"));
        assert_eq!(c.iss.as_deref(), Some(crate::config::DEFAULT_ISSUER));
        assert_eq!(c.aud.as_deref(), Some(crate::config::DEFAULT_AUDIENCE));
        assert_eq!(c.exp.unwrap() - c.iat.unwrap(), 300);
        assert_eq!(c.jti.as_deref(), Some(issued.jti.as_str()));
        assert_eq!(issued.payroll_role, PayrollRole::Admin);
    }

    #[test]
    fn redirect_url_embeds_token() {
        let issued = issuer().issue(Some(&session()), Utc::now()).unwrap();
        assert_eq!(
            issued.redirect_url,
            format!("https://payroll.example/sso?token={}", issued.token)
        );
    }

    #[test]
    fn each_issue_gets_a_fresh_jti() {
        let now = Utc::now();
        let a = issuer().issue(Some(&session()), now).unwrap();
        let b = issuer().issue(Some(&session()), now).unwrap();
        assert_ne!(a.jti, b.jti);
    }

    #[test]
    fn standard_roles_derive_employee() {
        let mut s = session();
        s.roles = vec![Role::new("engineer")];
        let issued = issuer().issue(Some(&s), Utc::now()).unwrap();
        assert_eq!(issued.payroll_role, PayrollRole::Employee);
    }
}
