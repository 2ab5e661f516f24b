//! PIN step-up primitives: format policy, Argon2id hashing, lockout rules and
//! the step-up state machine.
//!
//! Everything here is pure. Persistence and the atomic counter update live in
//! the infra layer, which applies [`LockoutPolicy::register_failure`] inside a
//! single conditional write.

use argon2::{
    Algorithm, Argon2, Params, Version,
    password_hash::{PasswordHash, PasswordHasher as _, PasswordVerifier, SaltString, rand_core::OsRng},
};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use paybridge_core::PayrollUserId;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PinError {
    #[error("PIN must be at least {0} digits")]
    TooShort(usize),

    #[error("PIN must be at most {0} digits")]
    TooLong(usize),

    #[error("PIN must contain digits only")]
    NonNumeric,

    #[error("PIN is too easy to guess")]
    TooWeak,

    #[error("PIN hashing failed: {0}")]
    Hashing(String),

    #[error("stored PIN hash is invalid")]
    InvalidHashFormat,
}

impl PinError {
    /// Validation failures are rejected before hashing and never counted.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            PinError::TooShort(_) | PinError::TooLong(_) | PinError::NonNumeric | PinError::TooWeak
        )
    }
}

/// Format rules for a new PIN.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PinPolicy {
    pub min_len: usize,
    pub max_len: usize,
}

impl Default for PinPolicy {
    fn default() -> Self {
        Self { min_len: 6, max_len: 12 }
    }
}

impl PinPolicy {
    /// Check a PIN presented for verification.
    ///
    /// Only the digit rule and the upper length bound apply, so a PIN set
    /// under an older, looser minimum keeps working.
    pub fn check_attempt(&self, pin: &str) -> Result<(), PinError> {
        if !pin.chars().all(|c| c.is_ascii_digit()) {
            return Err(PinError::NonNumeric);
        }
        if pin.len() > self.max_len {
            return Err(PinError::TooLong(self.max_len));
        }
        Ok(())
    }

    /// Check a PIN being set for the first time.
    ///
    /// Enforces the minimum length and rejects repeated digits (`111111`)
    /// and straight runs (`123456`, `987654`).
    pub fn check_new(&self, pin: &str) -> Result<(), PinError> {
        self.check_attempt(pin)?;
        if pin.len() < self.min_len {
            return Err(PinError::TooShort(self.min_len));
        }

        let digits: Vec<i16> = pin.bytes().map(|b| i16::from(b - b'0')).collect();
        let steps: Vec<i16> = digits.windows(2).map(|w| w[1] - w[0]).collect();
        let uniform = steps.windows(2).all(|w| w[0] == w[1]);
        if uniform && steps.first().is_some_and(|s| matches!(s, -1..=1)) {
            return Err(PinError::TooWeak);
        }
        Ok(())
    }
}

/// Argon2id hasher for PINs.
///
/// Defaults follow the OWASP 2024 Argon2id recommendation (19 MiB, t=2, p=1).
#[derive(Debug, Clone)]
pub struct PinHasher {
    params: Params,
}

impl PinHasher {
    pub fn new() -> Result<Self, PinError> {
        Self::with_params(19_456, 2, 1)
    }

    pub fn with_params(memory_kib: u32, iterations: u32, parallelism: u32) -> Result<Self, PinError> {
        let params = Params::new(memory_kib, iterations, parallelism, None)
            .map_err(|e| PinError::Hashing(format!("invalid parameters: {e}")))?;
        Ok(Self { params })
    }

    fn argon2(&self) -> Argon2<'_> {
        Argon2::new(Algorithm::Argon2id, Version::V0x13, self.params.clone())
    }

    /// Hash a PIN with a fresh random salt (PHC string format).
    pub fn hash(&self, pin: &str) -> Result<String, PinError> {
        let salt = SaltString::generate(&mut OsRng);
        let hash = self
            .argon2()
            .hash_password(pin.as_bytes(), &salt)
            .map_err(|e| PinError::Hashing(e.to_string()))?;
        Ok(hash.to_string())
    }

    pub fn verify(&self, pin: &str, hash: &str) -> Result<bool, PinError> {
        let parsed = PasswordHash::new(hash).map_err(|_| PinError::InvalidHashFormat)?;
        match self.argon2().verify_password(pin.as_bytes(), &parsed) {
            Ok(()) => Ok(true),
            Err(argon2::password_hash::Error::Password) => Ok(false),
            Err(e) => Err(PinError::Hashing(e.to_string())),
        }
    }
}

/// Stored PIN credential (never holds the raw PIN).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PinCredential {
    pub user_id: PayrollUserId,
    pub pin_hash: String,
    pub created_at: DateTime<Utc>,
    pub failed_attempts: u32,
    pub locked_until: Option<DateTime<Utc>>,
}

impl PinCredential {
    pub fn new(user_id: PayrollUserId, pin_hash: String, now: DateTime<Utc>) -> Self {
        Self {
            user_id,
            pin_hash,
            created_at: now,
            failed_attempts: 0,
            locked_until: None,
        }
    }

    pub fn is_locked(&self, now: DateTime<Utc>) -> bool {
        self.locked_until.is_some_and(|until| now < until)
    }
}

/// Consecutive-failure lockout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LockoutPolicy {
    /// Number of consecutive wrong PINs that triggers a lock.
    pub threshold: u32,
    pub duration: Duration,
}

impl Default for LockoutPolicy {
    fn default() -> Self {
        Self {
            threshold: 5,
            duration: Duration::minutes(15),
        }
    }
}

/// Counter state after a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FailureOutcome {
    pub failed_attempts: u32,
    pub locked_until: Option<DateTime<Utc>>,
}

impl FailureOutcome {
    pub fn is_locked(&self, now: DateTime<Utc>) -> bool {
        self.locked_until.is_some_and(|until| now < until)
    }
}

impl LockoutPolicy {
    /// Apply one wrong PIN to the current counter state.
    ///
    /// A lock that has already elapsed starts a fresh count. Reaching the
    /// threshold sets `locked_until = now + duration`.
    pub fn register_failure(
        &self,
        failed_attempts: u32,
        locked_until: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> FailureOutcome {
        let lock_elapsed = locked_until.is_some_and(|until| until <= now);
        let failed_attempts = if lock_elapsed { 1 } else { failed_attempts.saturating_add(1) };
        let locked_until = if failed_attempts >= self.threshold {
            Some(now + self.duration)
        } else if lock_elapsed {
            None
        } else {
            locked_until
        };
        FailureOutcome {
            failed_attempts,
            locked_until,
        }
    }

    /// Charge one attempt up front, before the PIN is compared.
    ///
    /// Returns `Err(locked_until)` while locked; no attempt is charged and no
    /// comparison may be made. Otherwise the attempt is counted as a failure
    /// until the caller proves otherwise by resetting the counter.
    pub fn admit(
        &self,
        failed_attempts: u32,
        locked_until: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> Result<FailureOutcome, DateTime<Utc>> {
        match locked_until {
            Some(until) if now < until => Err(until),
            _ => Ok(self.register_failure(failed_attempts, locked_until, now)),
        }
    }
}

/// Step-up state of a resolved identity.
///
/// Kept as a tagged variant instead of a boolean so further factors can be
/// inserted between `AwaitingPin` and `Verified`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepUpState {
    /// First arrival: the user must choose a PIN.
    NoPinSet,
    /// A PIN exists and has not yet been entered in this hand-off.
    AwaitingPin,
    /// The PIN was set or entered correctly; a step-up session may be issued.
    Verified,
}

impl StepUpState {
    /// Entry state for an identity that has just been resolved.
    pub fn on_arrival(credential: Option<&PinCredential>) -> Self {
        match credential {
            None => StepUpState::NoPinSet,
            Some(_) => StepUpState::AwaitingPin,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            StepUpState::NoPinSet => "no_pin_set",
            StepUpState::AwaitingPin => "awaiting_pin",
            StepUpState::Verified => "verified",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fast_hasher() -> PinHasher {
        PinHasher::with_params(256, 1, 1).unwrap()
    }

    #[test]
    fn format_rules() {
        let policy = PinPolicy::default();
        assert_eq!(policy.check_new("48291"), Err(PinError::TooShort(6)));
        assert_eq!(policy.check_new("4829130000000"), Err(PinError::TooLong(12)));
        assert_eq!(policy.check_new("48a913"), Err(PinError::NonNumeric));
        assert_eq!(policy.check_new(" 482913"), Err(PinError::NonNumeric));
        assert_eq!(policy.check_new("４８２９１３"), Err(PinError::NonNumeric));
        assert!(policy.check_new("482913").is_ok());
    }

    #[test]
    fn attempts_skip_the_minimum_length() {
        let policy = PinPolicy::default();
        assert!(policy.check_attempt("4829").is_ok());
        assert_eq!(policy.check_attempt("4829130000000"), Err(PinError::TooLong(12)));
        assert_eq!(policy.check_attempt("48a9"), Err(PinError::NonNumeric));
    }

    #[test]
    fn trivially_guessable_pins_are_too_weak() {
        let policy = PinPolicy::default();
        for pin in ["000000", "111111", "123456", "987654", "234567"] {
            assert_eq!(policy.check_new(pin), Err(PinError::TooWeak), "{pin}");
        }
        for pin in ["482913", "135790", "112233"] {
            assert!(policy.check_new(pin).is_ok(), "{pin}");
        }
    }

    #[test]
    fn validation_errors_are_classified() {
        assert!(PinError::NonNumeric.is_validation());
        assert!(PinError::TooWeak.is_validation());
        assert!(!PinError::InvalidHashFormat.is_validation());
    }

    #[test]
    fn hash_then_verify() {
        let hasher = fast_hasher();
        let hash = hasher.hash("482913").unwrap();
        assert!(!hash.contains("482913"));
        assert!(hasher.verify("482913", &hash).unwrap());
        assert!(!hasher.verify("482914", &hash).unwrap());
    }

    #[test]
    fn hashes_are_salted() {
        let hasher = fast_hasher();
        assert_ne!(hasher.hash("482913").unwrap(), hasher.hash("482913").unwrap());
    }

    #[test]
    fn garbage_hash_is_an_error() {
        assert_eq!(fast_hasher().verify("482913", "nope"), Err(PinError::InvalidHashFormat));
    }

    #[test]
    fn lock_engages_exactly_at_threshold() {
        let policy = LockoutPolicy {
            threshold: 3,
            duration: Duration::minutes(15),
        };
        let now = Utc::now();

        let first = policy.register_failure(0, None, now);
        assert_eq!(first.failed_attempts, 1);
        assert!(!first.is_locked(now));

        let second = policy.register_failure(first.failed_attempts, first.locked_until, now);
        assert!(!second.is_locked(now));

        let third = policy.register_failure(second.failed_attempts, second.locked_until, now);
        assert_eq!(third.failed_attempts, 3);
        assert_eq!(third.locked_until, Some(now + Duration::minutes(15)));
    }

    #[test]
    fn elapsed_lock_restarts_the_count() {
        let policy = LockoutPolicy {
            threshold: 3,
            duration: Duration::minutes(15),
        };
        let now = Utc::now();
        let outcome = policy.register_failure(3, Some(now - Duration::seconds(1)), now);
        assert_eq!(outcome.failed_attempts, 1);
        assert_eq!(outcome.locked_until, None);
    }

    #[test]
    fn admit_refuses_while_locked() {
        let policy = LockoutPolicy::default();
        let now = Utc::now();
        let until = now + Duration::minutes(3);
        assert_eq!(policy.admit(5, Some(until), now), Err(until));

        let charged = policy.admit(1, None, now).unwrap();
        assert_eq!(charged.failed_attempts, 2);
        assert!(policy.admit(5, Some(until), until).is_ok());
    }

    #[test]
    fn credential_lock_window() {
        let now = Utc::now();
        let mut cred = PinCredential::new(PayrollUserId::new(), "h".to_string(), now);
        assert!(!cred.is_locked(now));
        cred.locked_until = Some(now + Duration::minutes(1));
        assert!(cred.is_locked(now));
        assert!(!cred.is_locked(now + Duration::minutes(1)));
    }

    #[test]
    fn arrival_state_depends_on_credential() {
        let cred = PinCredential::new(PayrollUserId::new(), "h".to_string(), Utc::now());
        assert_eq!(StepUpState::on_arrival(None), StepUpState::NoPinSet);
        assert_eq!(StepUpState::on_arrival(Some(&cred)), StepUpState::AwaitingPin);
    }
}
