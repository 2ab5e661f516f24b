//! Postgres-backed federation stores.
//!
//! The uniqueness rules of [`IdentityStore`] are enforced by the schema in
//! `migrations/0001_federation.sql`, never by application-level locking.
//!
//! ## Error Mapping
//!
//! | SQLx Error | PostgreSQL Error Code | StoreError | Scenario |
//! |------------|----------------------|------------|----------|
//! | Database (unique violation) | `23505` | `Conflict` | Concurrent first arrival, duplicate email/subject, PIN already set |
//! | Database (foreign key violation) | `23503` | `NotFound` | Referenced user/employee does not exist |
//! | Database (other) | Any other | `Backend` | Other database errors |
//! | RowNotFound | N/A | `NotFound` | Unexpected missing row |
//! | Other | N/A | `Backend` | Pool closed, network errors, etc. |

use std::sync::Arc;

use chrono::{DateTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Postgres, Row, Transaction};
use tracing::instrument;

use paybridge_auth::{LockoutPolicy, PayrollRole, PinCredential};
use paybridge_core::{Email, EmployeeId, OrganizationId, PayrollUserId, SubjectId};

use super::r#trait::{
    ConsumedAssertionStore, EmployeeRecord, IdentityStore, NewEmployee, PinAttempt, PinCredentialStore,
    ProfileUpdate, StoreError,
};

/// Schema for every table these stores touch.
pub const SCHEMA: &str = include_str!("../../migrations/0001_federation.sql");

/// Create the federation tables if they do not exist.
pub async fn migrate(pool: &PgPool) -> Result<(), StoreError> {
    sqlx::raw_sql(SCHEMA)
        .execute(pool)
        .await
        .map_err(|e| map_sqlx_error("migrate", e))?;
    Ok(())
}

const SELECT_RECORD: &str = r#"
    SELECT
        e.employee_id,
        e.user_id,
        e.organization_id,
        e.email,
        e.display_name,
        u.role,
        l.subject_id,
        l.last_seen_at,
        e.created_at,
        e.updated_at
    FROM payroll_employees e
    JOIN payroll_users u ON u.user_id = e.user_id
    LEFT JOIN federated_identity_links l ON l.employee_id = e.employee_id
"#;

/// Postgres identity store (users, employees, federation links).
#[derive(Debug, Clone)]
pub struct PostgresIdentityStore {
    pool: Arc<PgPool>,
}

impl PostgresIdentityStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool: Arc::new(pool) }
    }

    async fn insert_employee(
        tx: &mut Transaction<'_, Postgres>,
        employee: &NewEmployee,
        now: DateTime<Utc>,
    ) -> Result<(PayrollUserId, EmployeeId), StoreError> {
        let user_id = PayrollUserId::new();
        let employee_id = EmployeeId::new();

        sqlx::query(
            r#"
            INSERT INTO payroll_users (user_id, organization_id, email, display_name, role, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $6)
            "#,
        )
        .bind(user_id.as_uuid())
        .bind(employee.organization_id.as_str())
        .bind(employee.email.as_str())
        .bind(employee.display_name.as_deref())
        .bind(employee.role.as_str())
        .bind(now)
        .execute(&mut **tx)
        .await
        .map_err(|e| map_sqlx_error("insert_user", e))?;

        sqlx::query(
            r#"
            INSERT INTO payroll_employees (employee_id, user_id, organization_id, email, display_name, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $6)
            "#,
        )
        .bind(employee_id.as_uuid())
        .bind(user_id.as_uuid())
        .bind(employee.organization_id.as_str())
        .bind(employee.email.as_str())
        .bind(employee.display_name.as_deref())
        .bind(now)
        .execute(&mut **tx)
        .await
        .map_err(|e| map_sqlx_error("insert_employee", e))?;

        Ok((user_id, employee_id))
    }

    async fn insert_link(
        tx: &mut Transaction<'_, Postgres>,
        organization_id: &OrganizationId,
        subject: &SubjectId,
        user_id: PayrollUserId,
        employee_id: EmployeeId,
        email: &Email,
        now: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO federated_identity_links
                (organization_id, subject_id, employee_id, user_id, email, linked_at, last_seen_at)
            VALUES ($1, $2, $3, $4, $5, $6, $6)
            "#,
        )
        .bind(organization_id.as_str())
        .bind(subject.as_str())
        .bind(employee_id.as_uuid())
        .bind(user_id.as_uuid())
        .bind(email.as_str())
        .bind(now)
        .execute(&mut **tx)
        .await
        .map_err(|e| map_sqlx_error("insert_link", e))?;
        Ok(())
    }

    async fn load_in_tx(
        tx: &mut Transaction<'_, Postgres>,
        employee_id: EmployeeId,
    ) -> Result<EmployeeRecord, StoreError> {
        let row = sqlx::query(&format!("{SELECT_RECORD} WHERE e.employee_id = $1"))
            .bind(employee_id.as_uuid())
            .fetch_optional(&mut **tx)
            .await
            .map_err(|e| map_sqlx_error("load_employee", e))?
            .ok_or_else(|| StoreError::NotFound(format!("employee {employee_id}")))?;
        record_from_row(&row)
    }
}

#[async_trait::async_trait]
impl IdentityStore for PostgresIdentityStore {
    #[instrument(skip(self), err)]
    async fn find_by_subject(
        &self,
        organization_id: &OrganizationId,
        subject: &SubjectId,
    ) -> Result<Option<EmployeeRecord>, StoreError> {
        let row = sqlx::query(&format!(
            "{SELECT_RECORD} WHERE l.organization_id = $1 AND l.subject_id = $2"
        ))
        .bind(organization_id.as_str())
        .bind(subject.as_str())
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("find_by_subject", e))?;

        row.as_ref().map(record_from_row).transpose()
    }

    #[instrument(skip(self), err)]
    async fn find_by_email(
        &self,
        organization_id: &OrganizationId,
        email: &Email,
    ) -> Result<Option<EmployeeRecord>, StoreError> {
        let row = sqlx::query(&format!(
            "{SELECT_RECORD} WHERE e.organization_id = $1 AND e.email = $2"
        ))
        .bind(organization_id.as_str())
        .bind(email.as_str())
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("find_by_email", e))?;

        row.as_ref().map(record_from_row).transpose()
    }

    #[instrument(skip(self), err)]
    async fn link_subject(
        &self,
        employee_id: EmployeeId,
        subject: &SubjectId,
        now: DateTime<Utc>,
    ) -> Result<EmployeeRecord, StoreError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin_transaction", e))?;

        let existing = Self::load_in_tx(&mut tx, employee_id).await?;
        if existing.subject.is_some() {
            return Err(StoreError::Conflict(format!("employee {employee_id} already linked")));
        }

        // The (organization_id, subject_id) key and the unique employee_id
        // are the race guard; a concurrent link surfaces here as 23505.
        Self::insert_link(
            &mut tx,
            &existing.organization_id,
            subject,
            existing.user_id,
            employee_id,
            &existing.email,
            now,
        )
        .await?;

        let record = Self::load_in_tx(&mut tx, employee_id).await?;
        tx.commit().await.map_err(|e| map_sqlx_error("commit", e))?;
        Ok(record)
    }

    #[instrument(skip(self), err)]
    async fn provision(
        &self,
        employee: NewEmployee,
        subject: &SubjectId,
        now: DateTime<Utc>,
    ) -> Result<EmployeeRecord, StoreError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin_transaction", e))?;

        let (user_id, employee_id) = Self::insert_employee(&mut tx, &employee, now).await?;
        Self::insert_link(
            &mut tx,
            &employee.organization_id,
            subject,
            user_id,
            employee_id,
            &employee.email,
            now,
        )
        .await?;

        let record = Self::load_in_tx(&mut tx, employee_id).await?;
        tx.commit().await.map_err(|e| map_sqlx_error("commit", e))?;
        Ok(record)
    }

    #[instrument(skip(self), err)]
    async fn onboard_employee(
        &self,
        employee: NewEmployee,
        now: DateTime<Utc>,
    ) -> Result<EmployeeRecord, StoreError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin_transaction", e))?;

        let (_, employee_id) = Self::insert_employee(&mut tx, &employee, now).await?;
        let record = Self::load_in_tx(&mut tx, employee_id).await?;
        tx.commit().await.map_err(|e| map_sqlx_error("commit", e))?;
        Ok(record)
    }

    #[instrument(skip(self), err)]
    async fn update_profile(
        &self,
        employee_id: EmployeeId,
        update: ProfileUpdate,
        now: DateTime<Utc>,
    ) -> Result<EmployeeRecord, StoreError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin_transaction", e))?;

        let user_id: uuid::Uuid = sqlx::query(
            r#"
            UPDATE payroll_employees
            SET email = $2, display_name = $3, updated_at = $4
            WHERE employee_id = $1
            RETURNING user_id
            "#,
        )
        .bind(employee_id.as_uuid())
        .bind(update.email.as_str())
        .bind(update.display_name.as_deref())
        .bind(now)
        .fetch_optional(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("update_employee", e))?
        .ok_or_else(|| StoreError::NotFound(format!("employee {employee_id}")))?
        .try_get("user_id")
        .map_err(|e| map_sqlx_error("update_employee", e))?;

        sqlx::query(
            r#"
            UPDATE payroll_users
            SET email = $2, display_name = $3, role = $4, updated_at = $5
            WHERE user_id = $1
            "#,
        )
        .bind(user_id)
        .bind(update.email.as_str())
        .bind(update.display_name.as_deref())
        .bind(update.role.as_str())
        .bind(now)
        .execute(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("update_user", e))?;

        sqlx::query(
            r#"
            UPDATE federated_identity_links
            SET email = $2, last_seen_at = $3
            WHERE employee_id = $1
            "#,
        )
        .bind(employee_id.as_uuid())
        .bind(update.email.as_str())
        .bind(now)
        .execute(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("update_link", e))?;

        let record = Self::load_in_tx(&mut tx, employee_id).await?;
        tx.commit().await.map_err(|e| map_sqlx_error("commit", e))?;
        Ok(record)
    }

    #[instrument(skip(self), err)]
    async fn touch_link(&self, employee_id: EmployeeId, now: DateTime<Utc>) -> Result<(), StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE federated_identity_links
            SET last_seen_at = $2
            WHERE employee_id = $1
            "#,
        )
        .bind(employee_id.as_uuid())
        .bind(now)
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("touch_link", e))?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(format!("link for employee {employee_id}")));
        }
        Ok(())
    }
}

/// Postgres PIN credential store.
#[derive(Debug, Clone)]
pub struct PostgresPinCredentialStore {
    pool: Arc<PgPool>,
}

impl PostgresPinCredentialStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool: Arc::new(pool) }
    }
}

#[async_trait::async_trait]
impl PinCredentialStore for PostgresPinCredentialStore {
    #[instrument(skip(self), err)]
    async fn get(&self, user_id: PayrollUserId) -> Result<Option<PinCredential>, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT user_id, pin_hash, created_at, failed_attempts, locked_until
            FROM pin_credentials
            WHERE user_id = $1
            "#,
        )
        .bind(user_id.as_uuid())
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("get_pin", e))?;

        row.as_ref().map(credential_from_row).transpose()
    }

    #[instrument(skip_all, fields(user_id = %credential.user_id), err)]
    async fn create(&self, credential: PinCredential) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO pin_credentials (user_id, pin_hash, created_at, failed_attempts, locked_until)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(credential.user_id.as_uuid())
        .bind(&credential.pin_hash)
        .bind(credential.created_at)
        .bind(i32::try_from(credential.failed_attempts).unwrap_or(i32::MAX))
        .bind(credential.locked_until)
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("create_pin", e))?;
        Ok(())
    }

    #[instrument(skip(self), err)]
    async fn begin_attempt(
        &self,
        user_id: PayrollUserId,
        policy: &LockoutPolicy,
        now: DateTime<Utc>,
    ) -> Result<PinAttempt, StoreError> {
        // Same rules as `LockoutPolicy::admit`, as one conditional UPDATE so
        // concurrent attempts serialize on the row lock.
        let row = sqlx::query(
            r#"
            UPDATE pin_credentials
            SET failed_attempts = CASE
                    WHEN locked_until IS NOT NULL AND locked_until <= $2 THEN 1
                    ELSE failed_attempts + 1
                END,
                locked_until = CASE
                    WHEN (CASE
                            WHEN locked_until IS NOT NULL AND locked_until <= $2 THEN 1
                            ELSE failed_attempts + 1
                          END) >= $3 THEN $4
                    WHEN locked_until IS NOT NULL AND locked_until <= $2 THEN NULL
                    ELSE locked_until
                END
            WHERE user_id = $1
              AND (locked_until IS NULL OR locked_until <= $2)
            RETURNING pin_hash, failed_attempts, locked_until
            "#,
        )
        .bind(user_id.as_uuid())
        .bind(now)
        .bind(i32::try_from(policy.threshold).unwrap_or(i32::MAX))
        .bind(now + policy.duration)
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("begin_attempt", e))?;

        if let Some(row) = row {
            let failed: i32 = row.try_get("failed_attempts").map_err(|e| map_sqlx_error("begin_attempt", e))?;
            return Ok(PinAttempt::Admitted {
                pin_hash: row.try_get("pin_hash").map_err(|e| map_sqlx_error("begin_attempt", e))?,
                outcome: paybridge_auth::FailureOutcome {
                    failed_attempts: u32::try_from(failed).unwrap_or(0),
                    locked_until: row.try_get("locked_until").map_err(|e| map_sqlx_error("begin_attempt", e))?,
                },
            });
        }

        // Nothing updated: either no credential or an active lock.
        match self.get(user_id).await? {
            None => Err(StoreError::NotFound(format!("PIN credential for user {user_id}"))),
            Some(credential) => Ok(PinAttempt::Locked {
                locked_until: credential.locked_until.unwrap_or(now),
            }),
        }
    }

    #[instrument(skip(self), err)]
    async fn reset_failures(&self, user_id: PayrollUserId) -> Result<(), StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE pin_credentials
            SET failed_attempts = 0, locked_until = NULL
            WHERE user_id = $1
            "#,
        )
        .bind(user_id.as_uuid())
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("reset_failures", e))?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(format!("PIN credential for user {user_id}")));
        }
        Ok(())
    }
}

/// Postgres consumed-assertion cache.
#[derive(Debug, Clone)]
pub struct PostgresConsumedAssertionStore {
    pool: Arc<PgPool>,
}

impl PostgresConsumedAssertionStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool: Arc::new(pool) }
    }
}

#[async_trait::async_trait]
impl ConsumedAssertionStore for PostgresConsumedAssertionStore {
    #[instrument(skip(self), err)]
    async fn consume(
        &self,
        jti: &str,
        retain_until: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        sqlx::query("DELETE FROM consumed_assertions WHERE expires_at <= $1")
            .bind(now)
            .execute(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("purge_consumed", e))?;

        let result = sqlx::query(
            r#"
            INSERT INTO consumed_assertions (jti, expires_at, consumed_at)
            VALUES ($1, $2, $3)
            ON CONFLICT (jti) DO NOTHING
            "#,
        )
        .bind(jti)
        .bind(retain_until)
        .bind(now)
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("consume", e))?;

        Ok(result.rows_affected() == 1)
    }
}

fn corrupt(column: &str, err: impl core::fmt::Display) -> StoreError {
    StoreError::Backend(format!("invalid {column} in row: {err}"))
}

fn record_from_row(row: &PgRow) -> Result<EmployeeRecord, StoreError> {
    let get_err = |e: sqlx::Error| map_sqlx_error("decode_employee", e);

    let organization_id: String = row.try_get("organization_id").map_err(get_err)?;
    let email: String = row.try_get("email").map_err(get_err)?;
    let role: String = row.try_get("role").map_err(get_err)?;
    let subject: Option<String> = row.try_get("subject_id").map_err(get_err)?;

    Ok(EmployeeRecord {
        user_id: PayrollUserId::from_uuid(row.try_get("user_id").map_err(get_err)?),
        employee_id: EmployeeId::from_uuid(row.try_get("employee_id").map_err(get_err)?),
        organization_id: OrganizationId::parse(&organization_id).map_err(|e| corrupt("organization_id", e))?,
        email: Email::parse(&email).map_err(|e| corrupt("email", e))?,
        display_name: row.try_get("display_name").map_err(get_err)?,
        role: PayrollRole::parse(&role).ok_or_else(|| corrupt("role", &role))?,
        subject: subject
            .map(|s| SubjectId::parse(&s))
            .transpose()
            .map_err(|e| corrupt("subject_id", e))?,
        last_seen_at: row.try_get("last_seen_at").map_err(get_err)?,
        created_at: row.try_get("created_at").map_err(get_err)?,
        updated_at: row.try_get("updated_at").map_err(get_err)?,
    })
}

fn credential_from_row(row: &PgRow) -> Result<PinCredential, StoreError> {
    let get_err = |e: sqlx::Error| map_sqlx_error("decode_pin", e);
    let failed: i32 = row.try_get("failed_attempts").map_err(get_err)?;

    Ok(PinCredential {
        user_id: PayrollUserId::from_uuid(row.try_get("user_id").map_err(get_err)?),
        pin_hash: row.try_get("pin_hash").map_err(get_err)?,
        created_at: row.try_get("created_at").map_err(get_err)?,
        failed_attempts: u32::try_from(failed).map_err(|e| corrupt("failed_attempts", e))?,
        locked_until: row.try_get("locked_until").map_err(get_err)?,
    })
}

/// Map SQLx errors to `StoreError`.
fn map_sqlx_error(operation: &str, err: sqlx::Error) -> StoreError {
    match err {
        sqlx::Error::Database(db_err) => {
            let msg = format!("database error in {}: {}", operation, db_err.message());

            match db_err.code().as_deref() {
                // Unique violation
                Some("23505") => StoreError::Conflict(msg),
                // Foreign key violation
                Some("23503") => StoreError::NotFound(msg),
                _ => StoreError::Backend(msg),
            }
        }
        sqlx::Error::PoolClosed => StoreError::Backend(format!("connection pool closed in {}", operation)),
        sqlx::Error::RowNotFound => StoreError::NotFound(format!("unexpected row not found in {}", operation)),
        _ => StoreError::Backend(format!("sqlx error in {}: {}", operation, err)),
    }
}
