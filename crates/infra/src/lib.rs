//! Infrastructure layer: federation stores, identity resolution and step-up.

pub mod resolver;
pub mod step_up;
pub mod store;


pub use resolver::{IdentityResolver, ResolutionPath, ResolveError, ResolvedIdentity};
pub use step_up::{StepUpAuthenticator, StepUpError, StepUpStatus};
pub use store::{
    ConsumedAssertionStore, EmployeeRecord, FederationStores, IdentityStore, NewEmployee, PinAttempt,
    PinCredentialStore, ProfileUpdate, StoreError,
};
