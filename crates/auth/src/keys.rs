//! Key Manager: asymmetric signing keys for the HR → Payroll hand-off.
//!
//! The two halves are deliberately separate types. The HR gateway is built with
//! a [`PrivateKeySigner`] and never sees a verification set; the Payroll gateway
//! is built with a [`TrustedKeySet`] holding public keys only, so nothing on the
//! Payroll side can mint an assertion.
//!
//! Keys are addressed by key id (`kid`). Rotating keys means adding a second
//! entry to the trusted set before the HR side switches its signer.

use std::collections::HashMap;

use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, crypto};
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum KeyError {
    #[error("unsupported signing algorithm: {0}")]
    UnsupportedAlgorithm(String),

    #[error("invalid key material: {0}")]
    InvalidKey(String),

    #[error("signing failed: {0}")]
    Signing(String),

    #[error("no trusted key for key id {0:?}")]
    UnknownKey(Option<String>),

    #[error("duplicate key id {0}")]
    DuplicateKeyId(String),
}

/// Issuing half of the Key Manager.
pub trait AssertionSigner: Send + Sync {
    /// Key id placed in the assertion header.
    fn key_id(&self) -> &str;

    fn algorithm(&self) -> Algorithm;

    /// Sign `message`, returning the base64url-encoded signature.
    ///
    /// Ed25519 signatures are deterministic: the same bytes always produce the
    /// same signature.
    fn sign(&self, message: &[u8]) -> Result<String, KeyError>;
}

/// Verifying half of the Key Manager.
pub trait SignatureVerifier: Send + Sync {
    /// Returns `Ok(true)` only if `signature` is valid for exactly `message`
    /// under the key named by `kid`, using the algorithm bound to that key.
    ///
    /// `Err(UnknownKey)` means no trusted key could be selected at all.
    fn verify(
        &self,
        kid: Option<&str>,
        algorithm: Algorithm,
        message: &[u8],
        signature: &str,
    ) -> Result<bool, KeyError>;
}

/// Parse an asymmetric algorithm name.
///
/// Symmetric (`HS*`) algorithms are rejected: a shared secret would let the
/// verifying side forge assertions.
pub fn parse_algorithm(alg: &str) -> Result<Algorithm, KeyError> {
    match alg.trim() {
        "EdDSA" | "Ed25519" => Ok(Algorithm::EdDSA),
        "RS256" => Ok(Algorithm::RS256),
        "RS384" => Ok(Algorithm::RS384),
        "RS512" => Ok(Algorithm::RS512),
        "ES256" => Ok(Algorithm::ES256),
        "ES384" => Ok(Algorithm::ES384),
        other => Err(KeyError::UnsupportedAlgorithm(other.to_string())),
    }
}

/// Signer holding the HR side's private key.
#[derive(Clone)]
pub struct PrivateKeySigner {
    kid: String,
    algorithm: Algorithm,
    key: EncodingKey,
}

impl PrivateKeySigner {
    /// Build a signer from a PEM-encoded private key.
    pub fn from_pem(
        kid: impl Into<String>,
        algorithm: Algorithm,
        pem: &[u8],
    ) -> Result<Self, KeyError> {
        let kid = kid.into();
        if kid.trim().is_empty() {
            return Err(KeyError::InvalidKey("key id must not be empty".to_string()));
        }

        let key = match algorithm {
            Algorithm::EdDSA => EncodingKey::from_ed_pem(pem),
            Algorithm::RS256 | Algorithm::RS384 | Algorithm::RS512 => EncodingKey::from_rsa_pem(pem),
            Algorithm::ES256 | Algorithm::ES384 => EncodingKey::from_ec_pem(pem),
            other => return Err(KeyError::UnsupportedAlgorithm(format!("{other:?}"))),
        }
        .map_err(|e| KeyError::InvalidKey(e.to_string()))?;

        Ok(Self { kid, algorithm, key })
    }
}

impl core::fmt::Debug for PrivateKeySigner {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("PrivateKeySigner")
            .field("kid", &self.kid)
            .field("algorithm", &self.algorithm)
            .finish_non_exhaustive()
    }
}

impl AssertionSigner for PrivateKeySigner {
    fn key_id(&self) -> &str {
        &self.kid
    }

    fn algorithm(&self) -> Algorithm {
        self.algorithm
    }

    fn sign(&self, message: &[u8]) -> Result<String, KeyError> {
        crypto::sign(message, &self.key, self.algorithm).map_err(|e| KeyError::Signing(e.to_string()))
    }
}

#[derive(Clone)]
struct TrustedKey {
    algorithm: Algorithm,
    key: DecodingKey,
}

/// Set of public keys the Payroll side accepts, indexed by key id.
#[derive(Clone, Default)]
pub struct TrustedKeySet {
    keys: HashMap<String, TrustedKey>,
}

impl TrustedKeySet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a PEM-encoded public key under `kid`.
    pub fn insert_pem(
        &mut self,
        kid: impl Into<String>,
        algorithm: Algorithm,
        pem: &[u8],
    ) -> Result<(), KeyError> {
        let kid = kid.into();
        if kid.trim().is_empty() {
            return Err(KeyError::InvalidKey("key id must not be empty".to_string()));
        }
        if self.keys.contains_key(&kid) {
            return Err(KeyError::DuplicateKeyId(kid));
        }

        let key = match algorithm {
            Algorithm::EdDSA => DecodingKey::from_ed_pem(pem),
            Algorithm::RS256 | Algorithm::RS384 | Algorithm::RS512 => DecodingKey::from_rsa_pem(pem),
            Algorithm::ES256 | Algorithm::ES384 => DecodingKey::from_ec_pem(pem),
            other => return Err(KeyError::UnsupportedAlgorithm(format!("{other:?}"))),
        }
        .map_err(|e| KeyError::InvalidKey(e.to_string()))?;

        self.keys.insert(kid, TrustedKey { algorithm, key });
        Ok(())
    }

    /// Builder-style variant of [`TrustedKeySet::insert_pem`].
    pub fn with_pem(mut self, kid: impl Into<String>, algorithm: Algorithm, pem: &[u8]) -> Result<Self, KeyError> {
        self.insert_pem(kid, algorithm, pem)?;
        Ok(self)
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    pub fn key_ids(&self) -> impl Iterator<Item = &str> {
        self.keys.keys().map(String::as_str)
    }

    /// A missing `kid` is only acceptable while exactly one key is trusted.
    fn select(&self, kid: Option<&str>) -> Result<&TrustedKey, KeyError> {
        match kid {
            Some(kid) => self
                .keys
                .get(kid)
                .ok_or_else(|| KeyError::UnknownKey(Some(kid.to_string()))),
            None if self.keys.len() == 1 => self
                .keys
                .values()
                .next()
                .ok_or(KeyError::UnknownKey(None)),
            None => Err(KeyError::UnknownKey(None)),
        }
    }
}

impl core::fmt::Debug for TrustedKeySet {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let mut kids: Vec<&str> = self.key_ids().collect();
        kids.sort_unstable();
        f.debug_struct("TrustedKeySet").field("kids", &kids).finish()
    }
}

impl SignatureVerifier for TrustedKeySet {
    fn verify(
        &self,
        kid: Option<&str>,
        algorithm: Algorithm,
        message: &[u8],
        signature: &str,
    ) -> Result<bool, KeyError> {
        let trusted = self.select(kid)?;

        // The header algorithm must match the one pinned to the key.
        if trusted.algorithm != algorithm {
            return Ok(false);
        }

        // Undecodable signatures are simply invalid.
        Ok(crypto::verify(signature, message, &trusted.key, trusted.algorithm).unwrap_or(false))
    }
}
