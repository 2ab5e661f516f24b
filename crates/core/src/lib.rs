//! `paybridge-core` — domain foundation building blocks.
//!
//! This crate contains **pure domain** primitives shared by the HR and Payroll
//! sides of the hand-off (no infrastructure concerns).

pub mod error;
pub mod id;
pub mod value_object;

pub use error::{DomainError, DomainResult};
pub use id::{EmployeeId, OrganizationId, PayrollUserId, SubjectId};
pub use value_object::{Email, ValueObject};
