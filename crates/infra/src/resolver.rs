//! Identity Resolver: verified claims → local Payroll user/employee.
//!
//! Lookup order is subject link, then email within the organization, then
//! provisioning. The database uniqueness rules are the only concurrency
//! guard; losing a race surfaces as [`StoreError::Conflict`] and sends the
//! resolver back to the lookup branches.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;
use tracing::instrument;

use paybridge_auth::{PayrollRole, SessionSubject, VerifiedClaims};
use paybridge_core::{Email, EmployeeId, OrganizationId, PayrollUserId};

use crate::store::{EmployeeRecord, IdentityStore, NewEmployee, ProfileUpdate, StoreError};

/// Lookup rounds before a persistent conflict is reported.
const MAX_RESOLVE_ATTEMPTS: usize = 3;

/// How an identity was resolved.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolutionPath {
    /// An existing federation link matched the subject.
    Linked,
    /// An unlinked employee with the same email was attached to the subject.
    MergedByEmail,
    /// A new user and employee were created.
    Provisioned,
}

impl ResolutionPath {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResolutionPath::Linked => "linked",
            ResolutionPath::MergedByEmail => "merged_by_email",
            ResolutionPath::Provisioned => "provisioned",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedIdentity {
    pub user_id: PayrollUserId,
    pub employee_id: EmployeeId,
    pub organization_id: OrganizationId,
    pub email: Email,
    pub display_name: Option<String>,
    pub role: PayrollRole,
    pub path: ResolutionPath,
}

impl ResolvedIdentity {
    fn from_record(record: EmployeeRecord, path: ResolutionPath) -> Self {
        Self {
            user_id: record.user_id,
            employee_id: record.employee_id,
            organization_id: record.organization_id,
            email: record.email,
            display_name: record.display_name,
            role: record.role,
            path,
        }
    }
}

impl From<&ResolvedIdentity> for SessionSubject {
    fn from(identity: &ResolvedIdentity) -> Self {
        SessionSubject {
            user_id: identity.user_id,
            employee_id: identity.employee_id,
            organization_id: identity.organization_id.clone(),
            role: identity.role,
        }
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ResolveError {
    /// Uniqueness conflicts persisted across every re-read.
    #[error("identity provisioning conflict could not be resolved")]
    ProvisioningConflict,

    /// The email belongs to an employee already federated with another subject.
    #[error("email {email} is already linked to a different HR subject")]
    IdentityConflict { email: Email },

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl ResolveError {
    pub fn kind(&self) -> &'static str {
        match self {
            ResolveError::ProvisioningConflict => "provisioning_conflict",
            ResolveError::IdentityConflict { .. } => "identity_conflict",
            ResolveError::Store(_) => "store_error",
        }
    }
}

pub struct IdentityResolver {
    store: Arc<dyn IdentityStore>,
}

impl IdentityResolver {
    pub fn new(store: Arc<dyn IdentityStore>) -> Self {
        Self { store }
    }

    /// Resolve `claims` to a Payroll identity, creating one on first arrival.
    ///
    /// Idempotent: any number of calls (sequential or concurrent) for the same
    /// subject yield the same employee.
    #[instrument(
        skip(self, claims),
        fields(subject = %claims.subject, organization_id = %claims.organization_id),
        err
    )]
    pub async fn resolve(&self, claims: &VerifiedClaims, now: DateTime<Utc>) -> Result<ResolvedIdentity, ResolveError> {
        let org = &claims.organization_id;
        let subject = &claims.subject;

        for attempt in 0..MAX_RESOLVE_ATTEMPTS {
            if attempt > 0 {
                tracing::debug!(attempt, "re-reading after uniqueness conflict");
            }

            // 1. existing link
            if let Some(record) = self.store.find_by_subject(org, subject).await? {
                let record = self.sync_profile(record, claims, now).await?;
                return Ok(ResolvedIdentity::from_record(record, ResolutionPath::Linked));
            }

            // 2. same email, created some other way
            if let Some(record) = self.store.find_by_email(org, &claims.email).await? {
                if let Some(other) = record.subject.as_ref().filter(|s| *s != subject) {
                    tracing::warn!(
                        target: "paybridge::audit",
                        event = "identity_conflict",
                        subject = %subject,
                        linked_subject = %other,
                        organization_id = %org,
                        employee_id = %record.employee_id,
                        "email already federated with a different subject"
                    );
                    return Err(ResolveError::IdentityConflict {
                        email: claims.email.clone(),
                    });
                }

                match self.store.link_subject(record.employee_id, subject, now).await {
                    Ok(linked) => {
                        tracing::info!(
                            target: "paybridge::audit",
                            event = "identity_linked",
                            subject = %subject,
                            organization_id = %org,
                            employee_id = %linked.employee_id,
                            "attached HR subject to existing employee"
                        );
                        let linked = self.sync_profile(linked, claims, now).await?;
                        return Ok(ResolvedIdentity::from_record(linked, ResolutionPath::MergedByEmail));
                    }
                    Err(StoreError::Conflict(_)) => continue,
                    Err(e) => return Err(e.into()),
                }
            }

            // 3. first arrival
            let new_employee = NewEmployee {
                organization_id: org.clone(),
                email: claims.email.clone(),
                display_name: claims.display_name.clone(),
                role: claims.payroll_role,
            };
            match self.store.provision(new_employee, subject, now).await {
                Ok(record) => {
                    tracing::info!(
                        target: "paybridge::audit",
                        event = "identity_provisioned",
                        subject = %subject,
                        organization_id = %org,
                        employee_id = %record.employee_id,
                        user_id = %record.user_id,
                        payroll_role = %record.role,
                        "provisioned payroll user and employee"
                    );
                    return Ok(ResolvedIdentity::from_record(record, ResolutionPath::Provisioned));
                }
                Err(StoreError::Conflict(_)) => continue,
                Err(e) => return Err(e.into()),
            }
        }

        tracing::warn!(
            target: "paybridge::audit",
            event = "provisioning_conflict",
            subject = %subject,
            organization_id = %org,
            "uniqueness conflict persisted across re-reads"
        );
        Err(ResolveError::ProvisioningConflict)
    }

    /// Bring the stored profile in line with the HR claims and mark the link
    /// as seen.
    ///
    /// An email change that collides with another employee is skipped and the
    /// stored email kept; it never fails the hand-off.
    async fn sync_profile(
        &self,
        record: EmployeeRecord,
        claims: &VerifiedClaims,
        now: DateTime<Utc>,
    ) -> Result<EmployeeRecord, ResolveError> {
        let unchanged = record.email == claims.email
            && record.display_name == claims.display_name
            && record.role == claims.payroll_role;
        if unchanged {
            self.store.touch_link(record.employee_id, now).await?;
            return Ok(EmployeeRecord {
                last_seen_at: Some(now),
                ..record
            });
        }

        let update = ProfileUpdate {
            email: claims.email.clone(),
            display_name: claims.display_name.clone(),
            role: claims.payroll_role,
        };
        match self.store.update_profile(record.employee_id, update, now).await {
            Ok(updated) => Ok(updated),
            Err(StoreError::Conflict(_)) => {
                tracing::warn!(
                    target: "paybridge::audit",
                    event = "profile_sync_email_conflict",
                    employee_id = %record.employee_id,
                    "new email belongs to another employee; keeping stored email"
                );
                let update = ProfileUpdate {
                    email: record.email.clone(),
                    display_name: claims.display_name.clone(),
                    role: claims.payroll_role,
                };
                Ok(self.store.update_profile(record.employee_id, update, now).await?)
            }
            Err(e) => Err(e.into()),
        }
    }
}
