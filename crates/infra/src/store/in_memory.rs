use std::collections::HashMap;
use std::sync::RwLock;

use chrono::{DateTime, Utc};

use paybridge_auth::{LockoutPolicy, PinCredential};
use paybridge_core::{Email, EmployeeId, OrganizationId, PayrollUserId, SubjectId};

use super::r#trait::{
    ConsumedAssertionStore, EmployeeRecord, IdentityStore, NewEmployee, PinAttempt, PinCredentialStore,
    ProfileUpdate, StoreError,
};

fn poisoned() -> StoreError {
    StoreError::Backend("lock poisoned".to_string())
}

#[derive(Debug, Default)]
struct IdentityTables {
    employees: HashMap<EmployeeId, EmployeeRecord>,
    by_email: HashMap<(OrganizationId, Email), EmployeeId>,
    by_subject: HashMap<(OrganizationId, SubjectId), EmployeeId>,
}

impl IdentityTables {
    fn lookup(&self, id: Option<&EmployeeId>) -> Option<EmployeeRecord> {
        id.and_then(|id| self.employees.get(id)).cloned()
    }

    fn insert(&mut self, employee: NewEmployee, subject: Option<&SubjectId>, now: DateTime<Utc>) -> Result<EmployeeRecord, StoreError> {
        let email_key = (employee.organization_id.clone(), employee.email.clone());
        if self.by_email.contains_key(&email_key) {
            return Err(StoreError::Conflict(format!(
                "employee with email {} already exists in {}",
                employee.email, employee.organization_id
            )));
        }
        if let Some(subject) = subject {
            if self.by_subject.contains_key(&(employee.organization_id.clone(), subject.clone())) {
                return Err(StoreError::Conflict(format!("subject {subject} already linked")));
            }
        }

        let record = EmployeeRecord {
            user_id: PayrollUserId::new(),
            employee_id: EmployeeId::new(),
            organization_id: employee.organization_id,
            email: employee.email,
            display_name: employee.display_name,
            role: employee.role,
            subject: subject.cloned(),
            last_seen_at: subject.map(|_| now),
            created_at: now,
            updated_at: now,
        };

        self.by_email.insert(email_key, record.employee_id);
        if let Some(subject) = subject {
            self.by_subject
                .insert((record.organization_id.clone(), subject.clone()), record.employee_id);
        }
        self.employees.insert(record.employee_id, record.clone());
        Ok(record)
    }
}

/// In-memory identity store.
///
/// Intended for tests/dev. All three tables sit behind one lock so the
/// uniqueness rules hold exactly as a database constraint would.
#[derive(Debug, Default)]
pub struct InMemoryIdentityStore {
    tables: RwLock<IdentityTables>,
}

impl InMemoryIdentityStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of employee records (tests).
    pub fn employee_count(&self) -> usize {
        self.tables.read().map(|t| t.employees.len()).unwrap_or(0)
    }

    /// Number of federation links (tests).
    pub fn link_count(&self) -> usize {
        self.tables.read().map(|t| t.by_subject.len()).unwrap_or(0)
    }
}

#[async_trait::async_trait]
impl IdentityStore for InMemoryIdentityStore {
    async fn find_by_subject(
        &self,
        organization_id: &OrganizationId,
        subject: &SubjectId,
    ) -> Result<Option<EmployeeRecord>, StoreError> {
        let tables = self.tables.read().map_err(|_| poisoned())?;
        Ok(tables.lookup(tables.by_subject.get(&(organization_id.clone(), subject.clone()))))
    }

    async fn find_by_email(
        &self,
        organization_id: &OrganizationId,
        email: &Email,
    ) -> Result<Option<EmployeeRecord>, StoreError> {
        let tables = self.tables.read().map_err(|_| poisoned())?;
        Ok(tables.lookup(tables.by_email.get(&(organization_id.clone(), email.clone()))))
    }

    async fn link_subject(
        &self,
        employee_id: EmployeeId,
        subject: &SubjectId,
        now: DateTime<Utc>,
    ) -> Result<EmployeeRecord, StoreError> {
        let mut tables = self.tables.write().map_err(|_| poisoned())?;

        let organization_id = match tables.employees.get(&employee_id) {
            None => return Err(StoreError::NotFound(format!("employee {employee_id}"))),
            Some(record) if record.subject.is_some() => {
                return Err(StoreError::Conflict(format!("employee {employee_id} already linked")));
            }
            Some(record) => record.organization_id.clone(),
        };

        let key = (organization_id, subject.clone());
        if tables.by_subject.contains_key(&key) {
            return Err(StoreError::Conflict(format!("subject {subject} already linked")));
        }
        tables.by_subject.insert(key, employee_id);

        let record = tables
            .employees
            .get_mut(&employee_id)
            .ok_or_else(|| StoreError::NotFound(format!("employee {employee_id}")))?;
        record.subject = Some(subject.clone());
        record.last_seen_at = Some(now);
        record.updated_at = now;
        Ok(record.clone())
    }

    async fn provision(
        &self,
        employee: NewEmployee,
        subject: &SubjectId,
        now: DateTime<Utc>,
    ) -> Result<EmployeeRecord, StoreError> {
        let mut tables = self.tables.write().map_err(|_| poisoned())?;
        tables.insert(employee, Some(subject), now)
    }

    async fn onboard_employee(
        &self,
        employee: NewEmployee,
        now: DateTime<Utc>,
    ) -> Result<EmployeeRecord, StoreError> {
        let mut tables = self.tables.write().map_err(|_| poisoned())?;
        tables.insert(employee, None, now)
    }

    async fn update_profile(
        &self,
        employee_id: EmployeeId,
        update: ProfileUpdate,
        now: DateTime<Utc>,
    ) -> Result<EmployeeRecord, StoreError> {
        let mut tables = self.tables.write().map_err(|_| poisoned())?;

        let (organization_id, old_email) = tables
            .employees
            .get(&employee_id)
            .map(|r| (r.organization_id.clone(), r.email.clone()))
            .ok_or_else(|| StoreError::NotFound(format!("employee {employee_id}")))?;

        if old_email != update.email {
            let new_key = (organization_id.clone(), update.email.clone());
            if tables.by_email.contains_key(&new_key) {
                return Err(StoreError::Conflict(format!(
                    "employee with email {} already exists in {}",
                    update.email, organization_id
                )));
            }
            tables.by_email.remove(&(organization_id, old_email));
            tables.by_email.insert(new_key, employee_id);
        }

        let record = tables
            .employees
            .get_mut(&employee_id)
            .ok_or_else(|| StoreError::NotFound(format!("employee {employee_id}")))?;
        record.email = update.email;
        record.display_name = update.display_name;
        record.role = update.role;
        record.updated_at = now;
        if record.subject.is_some() {
            record.last_seen_at = Some(now);
        }
        Ok(record.clone())
    }

    async fn touch_link(&self, employee_id: EmployeeId, now: DateTime<Utc>) -> Result<(), StoreError> {
        let mut tables = self.tables.write().map_err(|_| poisoned())?;
        match tables.employees.get_mut(&employee_id) {
            Some(record) if record.subject.is_some() => {
                record.last_seen_at = Some(now);
                Ok(())
            }
            _ => Err(StoreError::NotFound(format!("link for employee {employee_id}"))),
        }
    }
}

/// In-memory PIN credential store for tests/dev.
#[derive(Debug, Default)]
pub struct InMemoryPinCredentialStore {
    credentials: RwLock<HashMap<PayrollUserId, PinCredential>>,
}

impl InMemoryPinCredentialStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait::async_trait]
impl PinCredentialStore for InMemoryPinCredentialStore {
    async fn get(&self, user_id: PayrollUserId) -> Result<Option<PinCredential>, StoreError> {
        let map = self.credentials.read().map_err(|_| poisoned())?;
        Ok(map.get(&user_id).cloned())
    }

    async fn create(&self, credential: PinCredential) -> Result<(), StoreError> {
        let mut map = self.credentials.write().map_err(|_| poisoned())?;
        if map.contains_key(&credential.user_id) {
            return Err(StoreError::Conflict(format!(
                "PIN already set for user {}",
                credential.user_id
            )));
        }
        map.insert(credential.user_id, credential);
        Ok(())
    }

    async fn begin_attempt(
        &self,
        user_id: PayrollUserId,
        policy: &LockoutPolicy,
        now: DateTime<Utc>,
    ) -> Result<PinAttempt, StoreError> {
        let mut map = self.credentials.write().map_err(|_| poisoned())?;
        let credential = map
            .get_mut(&user_id)
            .ok_or_else(|| StoreError::NotFound(format!("PIN credential for user {user_id}")))?;

        match policy.admit(credential.failed_attempts, credential.locked_until, now) {
            Err(locked_until) => Ok(PinAttempt::Locked { locked_until }),
            Ok(outcome) => {
                credential.failed_attempts = outcome.failed_attempts;
                credential.locked_until = outcome.locked_until;
                Ok(PinAttempt::Admitted {
                    pin_hash: credential.pin_hash.clone(),
                    outcome,
                })
            }
        }
    }

    async fn reset_failures(&self, user_id: PayrollUserId) -> Result<(), StoreError> {
        let mut map = self.credentials.write().map_err(|_| poisoned())?;
        let credential = map
            .get_mut(&user_id)
            .ok_or_else(|| StoreError::NotFound(format!("PIN credential for user {user_id}")))?;
        credential.failed_attempts = 0;
        credential.locked_until = None;
        Ok(())
    }
}

/// In-memory consumed-assertion cache for tests/dev.
#[derive(Debug, Default)]
pub struct InMemoryConsumedAssertionStore {
    consumed: RwLock<HashMap<String, DateTime<Utc>>>,
}

impl InMemoryConsumedAssertionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.consumed.read().map(|m| m.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait::async_trait]
impl ConsumedAssertionStore for InMemoryConsumedAssertionStore {
    async fn consume(
        &self,
        jti: &str,
        retain_until: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let mut map = self.consumed.write().map_err(|_| poisoned())?;
        map.retain(|_, exp| *exp > now);
        if map.contains_key(jti) {
            return Ok(false);
        }
        map.insert(jti.to_string(), retain_until);
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use paybridge_auth::PayrollRole;

    fn org() -> OrganizationId {
        OrganizationId::parse("org1").unwrap()
    }

    fn new_employee(email: &str) -> NewEmployee {
        NewEmployee {
            organization_id: org(),
            email: Email::parse(email).unwrap(),
            display_name: None,
            role: PayrollRole::Employee,
        }
    }

    #[tokio::test]
    async fn provision_enforces_subject_and_email_uniqueness() {
        let store = InMemoryIdentityStore::new();
        let now = Utc::now();
        let subject = SubjectId::parse("hr-1").unwrap();

        store.provision(new_employee("a@x.com"), &subject, now).await.unwrap();

        let dup_email = store
            .provision(new_employee("a@x.com"), &SubjectId::parse("hr-2").unwrap(), now)
            .await
            .unwrap_err();
        assert!(dup_email.is_conflict());

        let dup_subject = store.provision(new_employee("b@x.com"), &subject, now).await.unwrap_err();
        assert!(dup_subject.is_conflict());

        assert_eq!(store.employee_count(), 1);
        assert_eq!(store.link_count(), 1);
    }

    #[tokio::test]
    async fn same_email_in_other_organization_is_distinct() {
        let store = InMemoryIdentityStore::new();
        let now = Utc::now();
        store.onboard_employee(new_employee("a@x.com"), now).await.unwrap();

        let mut other = new_employee("a@x.com");
        other.organization_id = OrganizationId::parse("org2").unwrap();
        store.onboard_employee(other, now).await.unwrap();
        assert_eq!(store.employee_count(), 2);
    }

    #[tokio::test]
    async fn link_subject_only_once() {
        let store = InMemoryIdentityStore::new();
        let now = Utc::now();
        let record = store.onboard_employee(new_employee("a@x.com"), now).await.unwrap();
        assert_eq!(record.subject, None);

        let linked = store
            .link_subject(record.employee_id, &SubjectId::parse("hr-1").unwrap(), now)
            .await
            .unwrap();
        assert_eq!(linked.subject.as_ref().map(|s| s.as_str()), Some("hr-1"));

        let again = store
            .link_subject(record.employee_id, &SubjectId::parse("hr-2").unwrap(), now)
            .await
            .unwrap_err();
        assert!(again.is_conflict());
    }

    #[tokio::test]
    async fn profile_update_moves_email_key() {
        let store = InMemoryIdentityStore::new();
        let now = Utc::now();
        let record = store.onboard_employee(new_employee("a@x.com"), now).await.unwrap();

        store
            .update_profile(
                record.employee_id,
                ProfileUpdate {
                    email: Email::parse("ada@x.com").unwrap(),
                    display_name: Some("Ada".to_string()),
                    role: PayrollRole::Admin,
                },
                now,
            )
            .await
            .unwrap();

        assert!(store.find_by_email(&org(), &Email::parse("a@x.com").unwrap()).await.unwrap().is_none());
        let found = store
            .find_by_email(&org(), &Email::parse("ada@x.com").unwrap())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(found.role, PayrollRole::Admin);
    }

    #[tokio::test]
    async fn pin_create_is_once_only() {
        let store = InMemoryPinCredentialStore::new();
        let user = PayrollUserId::new();
        let now = Utc::now();
        store.create(PinCredential::new(user, "h".to_string(), now)).await.unwrap();
        let err = store.create(PinCredential::new(user, "h2".to_string(), now)).await.unwrap_err();
        assert!(err.is_conflict());
    }

    #[tokio::test]
    async fn attempts_lock_and_reset() {
        let store = InMemoryPinCredentialStore::new();
        let user = PayrollUserId::new();
        let now = Utc::now();
        let policy = LockoutPolicy {
            threshold: 2,
            duration: Duration::minutes(15),
        };
        store.create(PinCredential::new(user, "h".to_string(), now)).await.unwrap();

        assert!(matches!(store.begin_attempt(user, &policy, now).await.unwrap(), PinAttempt::Admitted { .. }));
        assert!(matches!(store.begin_attempt(user, &policy, now).await.unwrap(), PinAttempt::Admitted { .. }));
        assert_eq!(
            store.begin_attempt(user, &policy, now).await.unwrap(),
            PinAttempt::Locked {
                locked_until: now + Duration::minutes(15)
            }
        );

        store.reset_failures(user).await.unwrap();
        let cred = store.get(user).await.unwrap().unwrap();
        assert_eq!(cred.failed_attempts, 0);
        assert_eq!(cred.locked_until, None);
    }

    #[tokio::test]
    async fn consume_rejects_replay_and_purges_expired() {
        let store = InMemoryConsumedAssertionStore::new();
        let now = Utc::now();
        assert!(store.consume("j1", now + Duration::minutes(5), now).await.unwrap());
        assert!(!store.consume("j1", now + Duration::minutes(5), now).await.unwrap());

        let later = now + Duration::minutes(6);
        assert!(store.consume("j2", later + Duration::minutes(5), later).await.unwrap());
        assert_eq!(store.len(), 1);
    }
}
