//! `paybridge-auth` — the HR → Payroll identity federation protocol.
//!
//! This crate is intentionally decoupled from HTTP and storage: every operation
//! takes the current time as an argument and performs no IO.

pub mod assertion;
pub mod config;
pub mod hr_session;
pub mod issuer;
pub mod keys;
pub mod pin;
pub mod roles;
pub mod session;
pub mod verifier;

pub use config::{FederationConfig, TrustRelationship};
pub use hr_session::{HrSessionValidator, Hs256HrSessionValidator};
pub use issuer::{AssertionIssuer, HrSession, IssueError, IssuedAssertion};
pub use jsonwebtoken::Algorithm;
pub use keys::{AssertionSigner, KeyError, PrivateKeySigner, SignatureVerifier, TrustedKeySet, parse_algorithm};
pub use pin::{
    FailureOutcome, LockoutPolicy, PinCredential, PinError, PinHasher, PinPolicy, StepUpState,
};
pub use roles::{PayrollRole, Role, RoleMapping, RoleMappingError};
pub use session::{SessionClaims, SessionError, SessionManager, SessionStage, SessionSubject, SessionToken};
pub use verifier::{AssertionVerifier, VerifiedClaims, VerifyError};
