use std::borrow::Cow;
use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// HR-side role identifier.
///
/// HR roles are opaque strings at this layer; the only place they are
/// interpreted is [`RoleMapping::derive`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Role(Cow<'static, str>);

impl Role {
    pub fn new(name: impl Into<Cow<'static, str>>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl core::fmt::Display for Role {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Role granted inside the Payroll system.
///
/// Variants are ordered by privilege so the mapping can pick the strongest
/// grant when a user holds several HR roles.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum PayrollRole {
    #[serde(rename = "payroll_employee")]
    Employee,
    #[serde(rename = "payroll_admin")]
    Admin,
}

impl PayrollRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            PayrollRole::Employee => "payroll_employee",
            PayrollRole::Admin => "payroll_admin",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim() {
            "payroll_employee" => Some(PayrollRole::Employee),
            "payroll_admin" => Some(PayrollRole::Admin),
            _ => None,
        }
    }
}

impl core::fmt::Display for PayrollRole {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RoleMappingError {
    #[error("malformed mapping entry '{0}' (expected hr_role=payroll_role)")]
    MalformedEntry(String),

    #[error("unknown payroll role '{0}'")]
    UnknownPayrollRole(String),
}

/// HR role → Payroll role lookup table.
///
/// Lookups are case-insensitive. A user with no mapped role gets the default
/// role; a user with several mapped roles gets the most privileged one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoleMapping {
    table: HashMap<String, PayrollRole>,
    default: PayrollRole,
}

impl Default for RoleMapping {
    /// `admin`, `hr`, `ceo`, `director` → `payroll_admin`; anything else →
    /// `payroll_employee`.
    fn default() -> Self {
        let table = ["admin", "hr", "ceo", "director"]
            .into_iter()
            .map(|r| (r.to_string(), PayrollRole::Admin))
            .collect();
        Self {
            table,
            default: PayrollRole::Employee,
        }
    }
}

impl RoleMapping {
    pub fn new(default: PayrollRole) -> Self {
        Self {
            table: HashMap::new(),
            default,
        }
    }

    pub fn with(mut self, hr_role: &str, payroll_role: PayrollRole) -> Self {
        self.table.insert(normalize(hr_role), payroll_role);
        self
    }

    /// Parse `hr_role=payroll_role` pairs separated by commas.
    ///
    /// Example: `admin=payroll_admin, hr=payroll_admin, staff=payroll_employee`.
    pub fn parse(spec: &str, default: PayrollRole) -> Result<Self, RoleMappingError> {
        let mut mapping = Self::new(default);
        for entry in spec.split(',').map(str::trim).filter(|e| !e.is_empty()) {
            let (hr, payroll) = entry
                .split_once('=')
                .ok_or_else(|| RoleMappingError::MalformedEntry(entry.to_string()))?;
            let hr = hr.trim();
            if hr.is_empty() {
                return Err(RoleMappingError::MalformedEntry(entry.to_string()));
            }
            let payroll = PayrollRole::parse(payroll)
                .ok_or_else(|| RoleMappingError::UnknownPayrollRole(payroll.trim().to_string()))?;
            mapping = mapping.with(hr, payroll);
        }
        Ok(mapping)
    }

    /// Replace the role given to users with no mapped HR role.
    pub fn with_default(mut self, default: PayrollRole) -> Self {
        self.default = default;
        self
    }

    /// Derive the Payroll role for a set of HR roles.
    pub fn derive(&self, hr_roles: &[Role]) -> PayrollRole {
        hr_roles
            .iter()
            .filter_map(|r| self.table.get(&normalize(r.as_str())).copied())
            .max()
            .unwrap_or(self.default)
    }
}

fn normalize(role: &str) -> String {
    role.trim().to_lowercase()
}
