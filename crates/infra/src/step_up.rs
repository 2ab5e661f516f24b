//! Step-Up Authenticator: PIN setup and verification against the stores.
//!
//! Argon2 work runs on the blocking pool. Every attempt is charged against the
//! lockout counter before the PIN is compared, so a locked credential is never
//! compared at all and a burst of parallel guesses cannot outrun the threshold.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;
use tracing::instrument;

use paybridge_auth::{FederationConfig, LockoutPolicy, PinCredential, PinError, PinHasher, PinPolicy, StepUpState};
use paybridge_core::PayrollUserId;

use crate::store::{PinAttempt, PinCredentialStore, StoreError};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StepUpError {
    /// Verification requested but the user has never chosen a PIN.
    #[error("no PIN has been set")]
    NoPinSet,

    #[error("a PIN has already been set")]
    PinAlreadySet,

    /// Rejected before hashing; not counted.
    #[error("invalid PIN: {0}")]
    InvalidPin(PinError),

    /// Counted against the lockout threshold.
    #[error("incorrect PIN")]
    IncorrectPin,

    #[error("too many incorrect PINs; locked until {locked_until}")]
    LockedOut { locked_until: DateTime<Utc> },

    #[error("PIN hashing failed: {0}")]
    Hashing(PinError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl StepUpError {
    pub fn kind(&self) -> &'static str {
        match self {
            StepUpError::NoPinSet => "no_pin_set",
            StepUpError::PinAlreadySet => "pin_already_set",
            StepUpError::InvalidPin(_) => "invalid_pin",
            StepUpError::IncorrectPin => "incorrect_pin",
            StepUpError::LockedOut { .. } => "locked_out",
            StepUpError::Hashing(_) => "hashing_failed",
            StepUpError::Store(_) => "store_error",
        }
    }
}

/// Current step-up position of a user plus any active lock.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StepUpStatus {
    pub state: StepUpState,
    pub locked_until: Option<DateTime<Utc>>,
}

pub struct StepUpAuthenticator {
    store: Arc<dyn PinCredentialStore>,
    hasher: PinHasher,
    policy: PinPolicy,
    lockout: LockoutPolicy,
}

impl StepUpAuthenticator {
    pub fn new(store: Arc<dyn PinCredentialStore>, hasher: PinHasher, config: &FederationConfig) -> Self {
        Self {
            store,
            hasher,
            policy: config.pin_policy,
            lockout: config.lockout,
        }
    }

    /// Where a freshly resolved identity enters the state machine.
    pub async fn state(&self, user_id: PayrollUserId, now: DateTime<Utc>) -> Result<StepUpStatus, StepUpError> {
        let credential = self.store.get(user_id).await?;
        Ok(StepUpStatus {
            state: StepUpState::on_arrival(credential.as_ref()),
            locked_until: credential
                .as_ref()
                .filter(|c| c.is_locked(now))
                .and_then(|c| c.locked_until),
        })
    }

    /// `NoPinSet` → `Verified`: store the salted hash of a new PIN.
    #[instrument(skip(self, pin), err)]
    pub async fn setup_pin(
        &self,
        user_id: PayrollUserId,
        pin: &str,
        now: DateTime<Utc>,
    ) -> Result<StepUpState, StepUpError> {
        self.policy.check_new(pin).map_err(StepUpError::InvalidPin)?;

        if self.store.get(user_id).await?.is_some() {
            return Err(StepUpError::PinAlreadySet);
        }

        let hasher = self.hasher.clone();
        let pin = pin.to_string();
        let pin_hash = tokio::task::spawn_blocking(move || hasher.hash(&pin))
            .await
            .map_err(|e| StepUpError::Hashing(PinError::Hashing(e.to_string())))?
            .map_err(StepUpError::Hashing)?;

        match self.store.create(PinCredential::new(user_id, pin_hash, now)).await {
            Ok(()) => {}
            Err(StoreError::Conflict(_)) => return Err(StepUpError::PinAlreadySet),
            Err(e) => return Err(e.into()),
        }

        tracing::info!(
            target: "paybridge::audit",
            event = "pin_set",
            user_id = %user_id,
            "step-up PIN set"
        );
        Ok(StepUpState::Verified)
    }

    /// `AwaitingPin` → `Verified`, or a counted failure.
    #[instrument(skip(self, pin), err)]
    pub async fn verify_pin(
        &self,
        user_id: PayrollUserId,
        pin: &str,
        now: DateTime<Utc>,
    ) -> Result<StepUpState, StepUpError> {
        self.policy.check_attempt(pin).map_err(StepUpError::InvalidPin)?;

        let attempt = match self.store.begin_attempt(user_id, &self.lockout, now).await {
            Ok(attempt) => attempt,
            Err(StoreError::NotFound(_)) => return Err(StepUpError::NoPinSet),
            Err(e) => return Err(e.into()),
        };

        let (pin_hash, outcome) = match attempt {
            PinAttempt::Locked { locked_until } => {
                tracing::warn!(
                    target: "paybridge::audit",
                    event = "pin_rejected_locked",
                    user_id = %user_id,
                    locked_until = %locked_until,
                    "PIN attempt while locked"
                );
                return Err(StepUpError::LockedOut { locked_until });
            }
            PinAttempt::Admitted { pin_hash, outcome } => (pin_hash, outcome),
        };

        let hasher = self.hasher.clone();
        let pin = pin.to_string();
        let matches = tokio::task::spawn_blocking(move || hasher.verify(&pin, &pin_hash))
            .await
            .map_err(|e| StepUpError::Hashing(PinError::Hashing(e.to_string())))?
            .map_err(StepUpError::Hashing)?;

        if matches {
            self.store.reset_failures(user_id).await?;
            tracing::info!(
                target: "paybridge::audit",
                event = "pin_verified",
                user_id = %user_id,
                "step-up PIN verified"
            );
            return Ok(StepUpState::Verified);
        }

        if let Some(locked_until) = outcome.locked_until.filter(|_| outcome.is_locked(now)) {
            tracing::warn!(
                target: "paybridge::audit",
                event = "pin_locked",
                user_id = %user_id,
                failed_attempts = outcome.failed_attempts,
                locked_until = %locked_until,
                "PIN locked after repeated failures"
            );
        } else {
            tracing::info!(
                target: "paybridge::audit",
                event = "pin_incorrect",
                user_id = %user_id,
                failed_attempts = outcome.failed_attempts,
                "incorrect step-up PIN"
            );
        }
        Err(StepUpError::IncorrectPin)
    }
}
