//! HR login tokens.
//!
//! The HR system authenticates its users itself and hands the gateway a
//! bearer token. This module only turns such a token into an [`HrSession`];
//! it has no part in the cross-system trust relationship.

use chrono::{DateTime, Utc};
use jsonwebtoken::{Algorithm, DecodingKey, Validation};
use serde::{Deserialize, Serialize};

use paybridge_core::{Email, OrganizationId, SubjectId};

use crate::issuer::HrSession;
use crate::roles::Role;
use crate::session::SessionError;

/// Claims of an HR login token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HrLoginClaims {
    pub sub: String,
    pub org: String,
    pub email: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub roles: Vec<String>,
    pub iat: i64,
    pub exp: i64,
}

/// Validates HS256 HR login tokens.
pub trait HrSessionValidator: Send + Sync {
    fn validate(&self, token: &str, now: DateTime<Utc>) -> Result<HrSession, SessionError>;
}

#[derive(Clone)]
pub struct Hs256HrSessionValidator {
    key: DecodingKey,
}

impl Hs256HrSessionValidator {
    pub fn new(secret: impl AsRef<[u8]>) -> Self {
        Self {
            key: DecodingKey::from_secret(secret.as_ref()),
        }
    }
}

impl HrSessionValidator for Hs256HrSessionValidator {
    fn validate(&self, token: &str, now: DateTime<Utc>) -> Result<HrSession, SessionError> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.validate_exp = false;
        validation.set_required_spec_claims(&["exp"]);

        let claims = jsonwebtoken::decode::<HrLoginClaims>(token, &self.key, &validation)
            .map_err(|_| SessionError::Invalid)?
            .claims;

        if claims.exp <= claims.iat {
            return Err(SessionError::InvalidTimeWindow);
        }
        let ts = now.timestamp();
        if ts < claims.iat {
            return Err(SessionError::NotYetValid);
        }
        if ts >= claims.exp {
            return Err(SessionError::Expired);
        }

        Ok(HrSession {
            user_id: SubjectId::parse(&claims.sub).map_err(|_| SessionError::Invalid)?,
            organization_id: OrganizationId::parse(&claims.org).map_err(|_| SessionError::Invalid)?,
            email: Email::parse(&claims.email).map_err(|_| SessionError::Invalid)?,
            display_name: claims.name,
            roles: claims.roles.into_iter().map(Role::new).collect(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use jsonwebtoken::{EncodingKey, Header};

    fn mint(secret: &str, claims: &HrLoginClaims) -> String {
        jsonwebtoken::encode(
            &Header::new(Algorithm::HS256),
            claims,
            &EncodingKey::from_secret(secret.as_bytes()),
        )
        .unwrap()
    }

    fn claims(now: DateTime<Utc>) -> HrLoginClaims {
        HrLoginClaims {
            sub: "hr-42".to_string(),
            org: "org1".to_string(),
            email: "A@x.com".to_string(),
            name: Some("Ada".to_string()),
            roles: vec!["hr".to_string()],
            iat: now.timestamp(),
            exp: now.timestamp() + 600,
        }
    }

    #[test]
    fn valid_token_yields_session() {
        let now = Utc::now();
        let session = Hs256HrSessionValidator::new("hr-secret")
            .validate(&mint("hr-secret", &claims(now)), now)
            .unwrap();
        assert_eq!(session.user_id.as_str(), "hr-42");
        assert_eq!(session.email.as_str(), "a@x.com");
        assert_eq!(session.roles, vec![Role::new("hr")]);
    }

    #[test]
    fn wrong_secret_is_rejected() {
        let now = Utc::now();
        let err = Hs256HrSessionValidator::new("hr-secret")
            .validate(&mint("other", &claims(now)), now)
            .unwrap_err();
        assert_eq!(err, SessionError::Invalid);
    }

    #[test]
    fn expired_login_is_rejected() {
        let now = Utc::now();
        let err = Hs256HrSessionValidator::new("hr-secret")
            .validate(&mint("hr-secret", &claims(now)), now + chrono::Duration::minutes(10))
            .unwrap_err();
        assert_eq!(err, SessionError::Expired);
    }
}
