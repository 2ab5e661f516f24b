//! Federation storage boundary.
//!
//! Traits for the three persistent concerns of the hand-off (identities, PIN
//! credentials, consumed assertions), with in-memory implementations for
//! tests/dev and Postgres implementations for deployments.

pub mod in_memory;
pub mod postgres;
pub mod r#trait;

use std::sync::Arc;

use sqlx::PgPool;

pub use in_memory::{InMemoryConsumedAssertionStore, InMemoryIdentityStore, InMemoryPinCredentialStore};
pub use postgres::{PostgresConsumedAssertionStore, PostgresIdentityStore, PostgresPinCredentialStore};
pub use r#trait::{
    ConsumedAssertionStore, EmployeeRecord, IdentityStore, NewEmployee, PinAttempt, PinCredentialStore,
    ProfileUpdate, StoreError,
};

/// The set of stores a Payroll gateway runs on.
#[derive(Clone)]
pub struct FederationStores {
    pub identities: Arc<dyn IdentityStore>,
    pub pins: Arc<dyn PinCredentialStore>,
    pub consumed: Arc<dyn ConsumedAssertionStore>,
}

impl FederationStores {
    pub fn in_memory() -> Self {
        Self {
            identities: Arc::new(InMemoryIdentityStore::new()),
            pins: Arc::new(InMemoryPinCredentialStore::new()),
            consumed: Arc::new(InMemoryConsumedAssertionStore::new()),
        }
    }

    pub fn postgres(pool: PgPool) -> Self {
        Self {
            identities: Arc::new(PostgresIdentityStore::new(pool.clone())),
            pins: Arc::new(PostgresPinCredentialStore::new(pool.clone())),
            consumed: Arc::new(PostgresConsumedAssertionStore::new(pool)),
        }
    }
}
