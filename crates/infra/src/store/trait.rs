use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use paybridge_auth::{FailureOutcome, LockoutPolicy, PayrollRole, PinCredential};
use paybridge_core::{Email, EmployeeId, OrganizationId, PayrollUserId, SubjectId};

/// Storage operation error.
///
/// These are **infrastructure errors** as opposed to protocol errors. `Conflict`
/// is the one callers are expected to handle: it means a uniqueness constraint
/// fired and the caller should re-read rather than fail.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("uniqueness constraint violated: {0}")]
    Conflict(String),

    #[error("record not found: {0}")]
    NotFound(String),

    #[error("storage backend error: {0}")]
    Backend(String),
}

impl StoreError {
    pub fn is_conflict(&self) -> bool {
        matches!(self, StoreError::Conflict(_))
    }
}

/// A Payroll user together with its employee record and federation link, if any.
///
/// A user never exists without its employee: both are created in the same
/// write.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmployeeRecord {
    pub user_id: PayrollUserId,
    pub employee_id: EmployeeId,
    pub organization_id: OrganizationId,
    pub email: Email,
    pub display_name: Option<String>,
    pub role: PayrollRole,
    /// HR subject this record is federated with.
    pub subject: Option<SubjectId>,
    /// Last hand-off through the federation link; `None` while unlinked.
    pub last_seen_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Input for creating a user/employee pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewEmployee {
    pub organization_id: OrganizationId,
    pub email: Email,
    pub display_name: Option<String>,
    pub role: PayrollRole,
}

/// Fields refreshed from the HR claims on every arrival.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProfileUpdate {
    pub email: Email,
    pub display_name: Option<String>,
    pub role: PayrollRole,
}

/// Users, employees and federated identity links.
///
/// Implementations must enforce, atomically:
/// - one employee per `(organization_id, email)`
/// - one link per `(organization_id, subject)`
/// - one link per employee
///
/// and report a violation of any of them as [`StoreError::Conflict`].
#[async_trait::async_trait]
pub trait IdentityStore: Send + Sync {
    async fn find_by_subject(
        &self,
        organization_id: &OrganizationId,
        subject: &SubjectId,
    ) -> Result<Option<EmployeeRecord>, StoreError>;

    async fn find_by_email(
        &self,
        organization_id: &OrganizationId,
        email: &Email,
    ) -> Result<Option<EmployeeRecord>, StoreError>;

    /// Attach `subject` to an existing, unlinked employee.
    async fn link_subject(
        &self,
        employee_id: EmployeeId,
        subject: &SubjectId,
        now: DateTime<Utc>,
    ) -> Result<EmployeeRecord, StoreError>;

    /// Create user, employee and link in a single transaction.
    async fn provision(
        &self,
        employee: NewEmployee,
        subject: &SubjectId,
        now: DateTime<Utc>,
    ) -> Result<EmployeeRecord, StoreError>;

    /// Create a user/employee pair without a federation link (ordinary onboarding).
    async fn onboard_employee(
        &self,
        employee: NewEmployee,
        now: DateTime<Utc>,
    ) -> Result<EmployeeRecord, StoreError>;

    /// Also refreshes the link's `last_seen_at` when one exists.
    async fn update_profile(
        &self,
        employee_id: EmployeeId,
        update: ProfileUpdate,
        now: DateTime<Utc>,
    ) -> Result<EmployeeRecord, StoreError>;

    /// Record a hand-off through the employee's federation link.
    async fn touch_link(&self, employee_id: EmployeeId, now: DateTime<Utc>) -> Result<(), StoreError>;
}

/// Outcome of charging a PIN attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PinAttempt {
    /// The attempt was counted; compare `pin_hash` and reset on success.
    Admitted { pin_hash: String, outcome: FailureOutcome },
    /// The credential is locked; nothing was compared or counted.
    Locked { locked_until: DateTime<Utc> },
}

/// PIN credentials, one per Payroll user.
#[async_trait::async_trait]
pub trait PinCredentialStore: Send + Sync {
    async fn get(&self, user_id: PayrollUserId) -> Result<Option<PinCredential>, StoreError>;

    /// Insert a new credential; `Conflict` if the user already has one.
    async fn create(&self, credential: PinCredential) -> Result<(), StoreError>;

    /// Atomically charge one attempt against the lockout counter.
    ///
    /// Must be a single conditional read-modify-write so that parallel
    /// attempts can never be admitted past the threshold.
    async fn begin_attempt(
        &self,
        user_id: PayrollUserId,
        policy: &LockoutPolicy,
        now: DateTime<Utc>,
    ) -> Result<PinAttempt, StoreError>;

    /// Clear the counter and any lock after a correct PIN.
    async fn reset_failures(&self, user_id: PayrollUserId) -> Result<(), StoreError>;
}

/// Assertion ids that have already been exchanged for a session.
#[async_trait::async_trait]
pub trait ConsumedAssertionStore: Send + Sync {
    /// Record `jti` as used. Returns `false` if it was already consumed.
    ///
    /// `retain_until` is the last instant the verifier would accept the
    /// assertion; entries are purged only after it has passed.
    async fn consume(
        &self,
        jti: &str,
        retain_until: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<bool, StoreError>;
}

#[async_trait::async_trait]
impl<S> IdentityStore for Arc<S>
where
    S: IdentityStore + ?Sized,
{
    async fn find_by_subject(
        &self,
        organization_id: &OrganizationId,
        subject: &SubjectId,
    ) -> Result<Option<EmployeeRecord>, StoreError> {
        (**self).find_by_subject(organization_id, subject).await
    }

    async fn find_by_email(
        &self,
        organization_id: &OrganizationId,
        email: &Email,
    ) -> Result<Option<EmployeeRecord>, StoreError> {
        (**self).find_by_email(organization_id, email).await
    }

    async fn link_subject(
        &self,
        employee_id: EmployeeId,
        subject: &SubjectId,
        now: DateTime<Utc>,
    ) -> Result<EmployeeRecord, StoreError> {
        (**self).link_subject(employee_id, subject, now).await
    }

    async fn provision(
        &self,
        employee: NewEmployee,
        subject: &SubjectId,
        now: DateTime<Utc>,
    ) -> Result<EmployeeRecord, StoreError> {
        (**self).provision(employee, subject, now).await
    }

    async fn onboard_employee(
        &self,
        employee: NewEmployee,
        now: DateTime<Utc>,
    ) -> Result<EmployeeRecord, StoreError> {
        (**self).onboard_employee(employee, now).await
    }

    async fn update_profile(
        &self,
        employee_id: EmployeeId,
        update: ProfileUpdate,
        now: DateTime<Utc>,
    ) -> Result<EmployeeRecord, StoreError> {
        (**self).update_profile(employee_id, update, now).await
    }

    async fn touch_link(&self, employee_id: EmployeeId, now: DateTime<Utc>) -> Result<(), StoreError> {
        (**self).touch_link(employee_id, now).await
    }
}
