//! Strongly-typed identifiers used across the domain.
//!
//! Payroll-side records are keyed by UUIDs minted locally. Identifiers that
//! originate in the HR system (organization, subject) are opaque strings: the
//! Payroll side never interprets them, it only compares them.

use core::str::FromStr;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::DomainError;

/// Identifier of a Payroll login account.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PayrollUserId(Uuid);

/// Identifier of a Payroll employee record.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EmployeeId(Uuid);

/// Organization (tenant) identifier as issued by the HR system.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct OrganizationId(String);

/// HR-side user identifier carried as the `sub` of an assertion.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct SubjectId(String);

macro_rules! impl_uuid_newtype {
    ($t:ty, $name:literal) => {
        impl $t {
            /// Create a new identifier.
            ///
            /// Uses UUIDv7 (time-ordered). Prefer passing IDs explicitly in tests
            /// for determinism.
            pub fn new() -> Self {
                Self(Uuid::now_v7())
            }

            pub fn from_uuid(uuid: Uuid) -> Self {
                Self(uuid)
            }

            pub fn as_uuid(&self) -> &Uuid {
                &self.0
            }
        }

        impl Default for $t {
            fn default() -> Self {
                Self::new()
            }
        }

        impl core::fmt::Display for $t {
            fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
                core::fmt::Display::fmt(&self.0, f)
            }
        }

        impl From<Uuid> for $t {
            fn from(value: Uuid) -> Self {
                Self(value)
            }
        }

        impl From<$t> for Uuid {
            fn from(value: $t) -> Self {
                value.0
            }
        }

        impl FromStr for $t {
            type Err = DomainError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                let uuid = Uuid::from_str(s)
                    .map_err(|e| DomainError::invalid_id(format!("{}: {}", $name, e)))?;
                Ok(Self(uuid))
            }
        }
    };
}

/// Upper bound on externally supplied identifiers (matches the column width).
const MAX_EXTERNAL_ID_LEN: usize = 255;

macro_rules! impl_external_id {
    ($t:ty, $name:literal) => {
        impl $t {
            /// Parse an externally supplied identifier.
            ///
            /// Surrounding whitespace is trimmed; the result must be non-empty.
            pub fn parse(raw: impl AsRef<str>) -> Result<Self, DomainError> {
                let trimmed = raw.as_ref().trim();
                if trimmed.is_empty() {
                    return Err(DomainError::invalid_id(format!("{}: empty", $name)));
                }
                if trimmed.len() > MAX_EXTERNAL_ID_LEN {
                    return Err(DomainError::invalid_id(format!("{}: too long", $name)));
                }
                Ok(Self(trimmed.to_string()))
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl core::fmt::Display for $t {
            fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl FromStr for $t {
            type Err = DomainError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Self::parse(s)
            }
        }

        impl TryFrom<String> for $t {
            type Error = DomainError;

            fn try_from(value: String) -> Result<Self, Self::Error> {
                Self::parse(value)
            }
        }

        impl From<$t> for String {
            fn from(value: $t) -> Self {
                value.0
            }
        }
    };
}

impl_uuid_newtype!(PayrollUserId, "PayrollUserId");
impl_uuid_newtype!(EmployeeId, "EmployeeId");
impl_external_id!(OrganizationId, "OrganizationId");
impl_external_id!(SubjectId, "SubjectId");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn external_ids_are_trimmed() {
        let org = OrganizationId::parse("  org1 ").unwrap();
        assert_eq!(org.as_str(), "org1");
    }

    #[test]
    fn empty_external_ids_are_rejected() {
        assert!(SubjectId::parse("").is_err());
        assert!(SubjectId::parse("   ").is_err());
        assert!(serde_json::from_str::<SubjectId>("\"\"").is_err());
    }

    #[test]
    fn oversized_external_ids_are_rejected() {
        let raw = "x".repeat(MAX_EXTERNAL_ID_LEN + 1);
        assert!(OrganizationId::parse(raw).is_err());
    }

    #[test]
    fn uuid_ids_parse_and_display() {
        let id = EmployeeId::new();
        let parsed: EmployeeId = id.to_string().parse().unwrap();
        assert_eq!(id, parsed);
        assert!("not-a-uuid".parse::<PayrollUserId>().is_err());
    }
}
