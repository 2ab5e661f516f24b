//! Protocol configuration shared by both gateways.
//!
//! Nothing in the protocol logic hard-codes these values; the API layer loads
//! them from the environment and hands them down.

use chrono::Duration;

use crate::pin::{LockoutPolicy, PinPolicy};
use crate::roles::RoleMapping;

pub const DEFAULT_ISSUER: &str = "paybridge-hr";
pub const DEFAULT_AUDIENCE: &str = "paybridge-payroll";

/// Issuer/audience pair identifying one trust relationship.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrustRelationship {
    pub issuer: String,
    pub audience: String,
}

impl Default for TrustRelationship {
    fn default() -> Self {
        Self {
            issuer: DEFAULT_ISSUER.to_string(),
            audience: DEFAULT_AUDIENCE.to_string(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct FederationConfig {
    pub trust: TrustRelationship,

    /// Fixed assertion lifetime (`exp - iat`).
    pub assertion_lifetime: Duration,

    /// Tolerance applied to `iat`/`exp` checks on the verifying side.
    pub clock_skew: Duration,

    pub role_mapping: RoleMapping,

    pub pin_policy: PinPolicy,

    pub lockout: LockoutPolicy,

    /// Lifetime of the identity-verified cookie (long enough to finish step-up).
    pub identity_session_ttl: Duration,

    /// Lifetime of the step-up-passed cookie.
    pub step_up_session_ttl: Duration,
}

impl Default for FederationConfig {
    fn default() -> Self {
        Self {
            trust: TrustRelationship::default(),
            assertion_lifetime: Duration::minutes(5),
            clock_skew: Duration::zero(),
            role_mapping: RoleMapping::default(),
            pin_policy: PinPolicy::default(),
            lockout: LockoutPolicy::default(),
            identity_session_ttl: Duration::minutes(10),
            step_up_session_ttl: Duration::hours(12),
        }
    }
}
