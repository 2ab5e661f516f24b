//! Gateway configuration loaded from `PAYBRIDGE_*` environment variables.
//!
//! Loading goes through a lookup function so tests can feed a map instead of
//! the process environment.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::{Context, bail};
use chrono::Duration;

use paybridge_auth::{
    Algorithm, FederationConfig, LockoutPolicy, PayrollRole, PinPolicy, PrivateKeySigner, RoleMapping,
    TrustRelationship, TrustedKeySet, parse_algorithm,
};

/// Source of configuration values.
pub trait ConfigSource {
    fn get(&self, key: &str) -> Option<String>;
}

/// The process environment.
pub struct Env;

impl ConfigSource for Env {
    fn get(&self, key: &str) -> Option<String> {
        std::env::var(key).ok()
    }
}

impl ConfigSource for HashMap<String, String> {
    fn get(&self, key: &str) -> Option<String> {
        HashMap::get(self, key).cloned()
    }
}

fn optional(source: &dyn ConfigSource, key: &str) -> Option<String> {
    source.get(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

fn required(source: &dyn ConfigSource, key: &str) -> anyhow::Result<String> {
    optional(source, key).with_context(|| format!("{key} must be set"))
}

fn parse_or<T>(source: &dyn ConfigSource, key: &str, default: T) -> anyhow::Result<T>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match optional(source, key) {
        None => Ok(default),
        Some(raw) => raw.parse::<T>().with_context(|| format!("{key} has an invalid value: {raw:?}")),
    }
}

fn seconds_or(source: &dyn ConfigSource, key: &str, default: Duration) -> anyhow::Result<Duration> {
    let secs = parse_or(source, key, default.num_seconds())?;
    if secs < 0 {
        bail!("{key} must not be negative");
    }
    Ok(Duration::seconds(secs))
}

fn bind_addr(source: &dyn ConfigSource, default: &str) -> anyhow::Result<SocketAddr> {
    let raw = optional(source, "PAYBRIDGE_BIND_ADDR").unwrap_or_else(|| default.to_string());
    raw.parse()
        .with_context(|| format!("PAYBRIDGE_BIND_ADDR is not a socket address: {raw:?}"))
}

/// Protocol settings shared by both gateways.
pub fn federation_config(source: &dyn ConfigSource) -> anyhow::Result<FederationConfig> {
    let defaults = FederationConfig::default();

    let trust = TrustRelationship {
        issuer: optional(source, "PAYBRIDGE_ISSUER").unwrap_or(defaults.trust.issuer),
        audience: optional(source, "PAYBRIDGE_AUDIENCE").unwrap_or(defaults.trust.audience),
    };

    let default_role = match optional(source, "PAYBRIDGE_DEFAULT_PAYROLL_ROLE") {
        None => PayrollRole::Employee,
        Some(raw) => PayrollRole::parse(&raw)
            .with_context(|| format!("PAYBRIDGE_DEFAULT_PAYROLL_ROLE is not a payroll role: {raw:?}"))?,
    };
    let role_mapping = match optional(source, "PAYBRIDGE_ROLE_MAPPING") {
        None => RoleMapping::default().with_default(default_role),
        Some(raw) => RoleMapping::parse(&raw, default_role).context("PAYBRIDGE_ROLE_MAPPING is invalid")?,
    };

    let pin_policy = PinPolicy {
        min_len: parse_or(source, "PAYBRIDGE_PIN_MIN_LENGTH", defaults.pin_policy.min_len)?,
        max_len: parse_or(source, "PAYBRIDGE_PIN_MAX_LENGTH", defaults.pin_policy.max_len)?,
    };
    if pin_policy.min_len == 0 || pin_policy.min_len > pin_policy.max_len {
        bail!("PIN length bounds are inconsistent: {}..={}", pin_policy.min_len, pin_policy.max_len);
    }

    let lockout = LockoutPolicy {
        threshold: parse_or(source, "PAYBRIDGE_PIN_LOCKOUT_THRESHOLD", defaults.lockout.threshold)?,
        duration: seconds_or(source, "PAYBRIDGE_PIN_LOCKOUT_SECS", defaults.lockout.duration)?,
    };
    if lockout.threshold == 0 {
        bail!("PAYBRIDGE_PIN_LOCKOUT_THRESHOLD must be at least 1");
    }

    let assertion_lifetime = seconds_or(source, "PAYBRIDGE_ASSERTION_LIFETIME_SECS", defaults.assertion_lifetime)?;
    if assertion_lifetime <= Duration::zero() {
        bail!("PAYBRIDGE_ASSERTION_LIFETIME_SECS must be positive");
    }

    Ok(FederationConfig {
        trust,
        assertion_lifetime,
        clock_skew: seconds_or(source, "PAYBRIDGE_CLOCK_SKEW_SECS", defaults.clock_skew)?,
        role_mapping,
        pin_policy,
        lockout,
        identity_session_ttl: seconds_or(source, "PAYBRIDGE_IDENTITY_SESSION_SECS", defaults.identity_session_ttl)?,
        step_up_session_ttl: seconds_or(source, "PAYBRIDGE_STEP_UP_SESSION_SECS", defaults.step_up_session_ttl)?,
    })
}

fn algorithm(source: &dyn ConfigSource, key: &str) -> anyhow::Result<Algorithm> {
    match optional(source, key) {
        None => Ok(Algorithm::EdDSA),
        Some(raw) => parse_algorithm(&raw).with_context(|| format!("{key} is not a supported algorithm")),
    }
}

/// HR gateway: holds the private signing key only.
#[derive(Debug, Clone)]
pub struct HrGatewayConfig {
    pub bind_addr: SocketAddr,
    pub federation: FederationConfig,
    pub signing_key_id: String,
    pub signing_algorithm: Algorithm,
    pub signing_key_path: PathBuf,
    /// HS256 secret shared with the HR login service.
    pub login_secret: String,
    pub payroll_base_url: String,
}

impl HrGatewayConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_source(&Env)
    }

    pub fn from_source(source: &dyn ConfigSource) -> anyhow::Result<Self> {
        Ok(Self {
            bind_addr: bind_addr(source, "0.0.0.0:8080")?,
            federation: federation_config(source)?,
            signing_key_id: required(source, "PAYBRIDGE_SIGNING_KEY_ID")?,
            signing_algorithm: algorithm(source, "PAYBRIDGE_SIGNING_ALG")?,
            signing_key_path: required(source, "PAYBRIDGE_SIGNING_KEY_PATH")?.into(),
            login_secret: required(source, "PAYBRIDGE_HR_LOGIN_SECRET")?,
            payroll_base_url: required(source, "PAYBRIDGE_PAYROLL_BASE_URL")?,
        })
    }

    pub fn load_signer(&self) -> anyhow::Result<PrivateKeySigner> {
        let pem = std::fs::read(&self.signing_key_path)
            .with_context(|| format!("failed to read signing key {}", self.signing_key_path.display()))?;
        PrivateKeySigner::from_pem(self.signing_key_id.clone(), self.signing_algorithm, &pem)
            .with_context(|| format!("invalid signing key {}", self.signing_key_path.display()))
    }
}

/// Payroll gateway: holds trusted public keys only.
#[derive(Debug, Clone)]
pub struct PayrollGatewayConfig {
    pub bind_addr: SocketAddr,
    pub federation: FederationConfig,
    pub verify_algorithm: Algorithm,
    /// `(kid, path)` pairs.
    pub trusted_keys: Vec<(String, PathBuf)>,
    pub session_secret: String,
    pub secure_cookies: bool,
    /// `Some` selects the Postgres stores.
    pub database_url: Option<String>,
}

impl PayrollGatewayConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_source(&Env)
    }

    pub fn from_source(source: &dyn ConfigSource) -> anyhow::Result<Self> {
        let trusted_keys = parse_trusted_keys(&required(source, "PAYBRIDGE_TRUSTED_KEYS")?)?;

        let session_secret = required(source, "PAYBRIDGE_SESSION_SECRET")?;
        if session_secret.len() < 32 {
            bail!("PAYBRIDGE_SESSION_SECRET must be at least 32 bytes");
        }

        let insecure_cookies = parse_or(source, "PAYBRIDGE_INSECURE_COOKIES", false)?;
        if insecure_cookies {
            tracing::warn!("PAYBRIDGE_INSECURE_COOKIES=true; session cookies will not be marked Secure");
        }

        let use_persistent = parse_or(source, "USE_PERSISTENT_STORES", false)?;
        let database_url = if use_persistent {
            Some(required(source, "DATABASE_URL").context("USE_PERSISTENT_STORES=true requires DATABASE_URL")?)
        } else {
            None
        };

        Ok(Self {
            bind_addr: bind_addr(source, "0.0.0.0:8081")?,
            federation: federation_config(source)?,
            verify_algorithm: algorithm(source, "PAYBRIDGE_VERIFY_ALG")?,
            trusted_keys,
            session_secret,
            secure_cookies: !insecure_cookies,
            database_url,
        })
    }

    pub fn load_trusted_keys(&self) -> anyhow::Result<TrustedKeySet> {
        let mut keys = TrustedKeySet::new();
        for (kid, path) in &self.trusted_keys {
            let pem = std::fs::read(path).with_context(|| format!("failed to read public key {}", path.display()))?;
            keys.insert_pem(kid.clone(), self.verify_algorithm, &pem)
                .with_context(|| format!("invalid public key {kid} at {}", path.display()))?;
        }
        Ok(keys)
    }
}

/// Parse `kid=path,kid=path`.
fn parse_trusted_keys(raw: &str) -> anyhow::Result<Vec<(String, PathBuf)>> {
    let mut keys = Vec::new();
    for entry in raw.split(',').map(str::trim).filter(|e| !e.is_empty()) {
        let (kid, path) = entry
            .split_once('=')
            .with_context(|| format!("PAYBRIDGE_TRUSTED_KEYS entry is not kid=path: {entry:?}"))?;
        let (kid, path) = (kid.trim(), path.trim());
        if kid.is_empty() || path.is_empty() {
            bail!("PAYBRIDGE_TRUSTED_KEYS entry is not kid=path: {entry:?}");
        }
        keys.push((kid.to_string(), PathBuf::from(path)));
    }
    if keys.is_empty() {
        bail!("PAYBRIDGE_TRUSTED_KEYS must name at least one key");
    }
    Ok(keys)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn source(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    #[test]
    fn defaults_apply() {
        let config = federation_config(&source(&[])).unwrap();
        assert_eq!(config.assertion_lifetime, Duration::minutes(5));
        assert_eq!(config.lockout.threshold, 5);
        assert_eq!(config.trust, TrustRelationship::default());
    }

    #[test]
    fn overrides_are_read() {
        let config = federation_config(&source(&[
            ("PAYBRIDGE_ISSUER", "hr-staging"),
            ("PAYBRIDGE_PIN_LOCKOUT_THRESHOLD", "3"),
            ("PAYBRIDGE_PIN_LOCKOUT_SECS", "60"),
            ("PAYBRIDGE_ROLE_MAPPING", "finance=payroll_admin"),
        ]))
        .unwrap();
        assert_eq!(config.trust.issuer, "hr-staging");
        assert_eq!(config.lockout.threshold, 3);
        assert_eq!(config.lockout.duration, Duration::seconds(60));
        assert_eq!(
            config.role_mapping.derive(&[paybridge_auth::Role::new("finance")]),
            PayrollRole::Admin
        );
        assert_eq!(
            config.role_mapping.derive(&[paybridge_auth::Role::new("hr")]),
            PayrollRole::Employee
        );
    }

    #[test]
    fn default_role_applies_without_custom_table() {
        let config = federation_config(&source(&[("PAYBRIDGE_DEFAULT_PAYROLL_ROLE", "payroll_admin")])).unwrap();
        assert_eq!(
            config.role_mapping.derive(&[paybridge_auth::Role::new("intern")]),
            PayrollRole::Admin
        );

        let config = federation_config(&source(&[])).unwrap();
        assert_eq!(
            config.role_mapping.derive(&[paybridge_auth::Role::new("intern")]),
            PayrollRole::Employee
        );
    }

    #[test]
    fn bad_values_are_reported_with_the_key() {
        let err = federation_config(&source(&[("PAYBRIDGE_PIN_LOCKOUT_THRESHOLD", "many")])).unwrap_err();
        assert!(format!("{err:#}").contains("PAYBRIDGE_PIN_LOCKOUT_THRESHOLD"));

        let err = federation_config(&source(&[("PAYBRIDGE_PIN_LOCKOUT_THRESHOLD", "0")])).unwrap_err();
        assert!(err.to_string().contains("at least 1"));
    }

    #[test]
    fn payroll_config_requires_keys_and_secret() {
        let err = PayrollGatewayConfig::from_source(&source(&[])).unwrap_err();
        assert!(err.to_string().contains("PAYBRIDGE_TRUSTED_KEYS"));

        let config = PayrollGatewayConfig::from_source(&source(&[
            ("PAYBRIDGE_TRUSTED_KEYS", "hr-2026a=/keys/a.pem, hr-2026b=/keys/b.pem"),
            ("PAYBRIDGE_SESSION_SECRET", "0123456789abcdef0123456789abcdef"),
        ]))
        .unwrap();
        assert_eq!(config.trusted_keys.len(), 2);
        assert_eq!(config.trusted_keys[1].0, "hr-2026b");
        assert!(config.secure_cookies);
        assert!(config.database_url.is_none());
    }

    #[test]
    fn persistent_stores_need_database_url() {
        let err = PayrollGatewayConfig::from_source(&source(&[
            ("PAYBRIDGE_TRUSTED_KEYS", "k=/keys/a.pem"),
            ("PAYBRIDGE_SESSION_SECRET", "0123456789abcdef0123456789abcdef"),
            ("USE_PERSISTENT_STORES", "true"),
        ]))
        .unwrap_err();
        assert!(format!("{err:#}").contains("DATABASE_URL"));
    }

    #[test]
    fn malformed_trusted_keys_are_rejected() {
        assert!(parse_trusted_keys("nokid").is_err());
        assert!(parse_trusted_keys(" , ").is_err());
        assert!(parse_trusted_keys("=path").is_err());
    }
}
