//! Value objects: equality by value, not identity.

use serde::{Deserialize, Serialize};

use crate::error::DomainError;

/// Marker trait for value objects.
///
/// Value objects are **immutable** and **compared by value**: two instances
/// carrying the same attributes are interchangeable.
pub trait ValueObject: Clone + PartialEq + core::fmt::Debug {}

/// A normalized email address.
///
/// Email is an alternate natural key for federated identities (unique per
/// organization), so it is always stored trimmed and lowercased. Two spellings
/// of the same address must compare equal or the uniqueness guard is useless.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Email(String);

impl ValueObject for Email {}

impl Email {
    pub fn parse(raw: impl AsRef<str>) -> Result<Self, DomainError> {
        let normalized = raw.as_ref().trim().to_lowercase();
        if normalized.is_empty() {
            return Err(DomainError::validation("email is empty"));
        }

        let Some((local, domain)) = normalized.split_once('@') else {
            return Err(DomainError::validation("email is missing '@'"));
        };
        if local.is_empty() || domain.is_empty() || domain.contains('@') {
            return Err(DomainError::validation("invalid email format"));
        }
        if normalized.chars().any(char::is_whitespace) {
            return Err(DomainError::validation("email contains whitespace"));
        }

        Ok(Self(normalized))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl core::fmt::Display for Email {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for Email {
    type Error = DomainError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(value)
    }
}

impl From<Email> for String {
    fn from(value: Email) -> Self {
        value.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn email_is_normalized() {
        let email = Email::parse("  A@X.com ").unwrap();
        assert_eq!(email.as_str(), "a@x.com");
        assert_eq!(email, Email::parse("a@x.COM").unwrap());
    }

    #[test]
    fn malformed_emails_are_rejected() {
        for raw in ["", "   ", "no-at-sign", "@x.com", "a@", "a@b@c", "a b@x.com"] {
            assert!(Email::parse(raw).is_err(), "{raw:?} should be rejected");
        }
    }

    proptest! {
        #[test]
        fn case_variants_normalize_to_the_same_email(
            local in "[a-z][a-z0-9.]{0,12}",
            domain in "[a-z]{1,10}\\.[a-z]{2,4}",
        ) {
            let lower = Email::parse(format!("{local}@{domain}")).unwrap();
            let upper = Email::parse(format!("{}@{}", local.to_uppercase(), domain.to_uppercase())).unwrap();
            prop_assert_eq!(lower, upper);
        }
    }
}
