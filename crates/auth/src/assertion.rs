//! Wire format of the hand-off assertion.
//!
//! An assertion is a compact signed-claims token:
//!
//! ```text
//! base64url(header_json) "." base64url(claims_json) "." base64url(signature)
//! ```
//!
//! The signature covers the exact signing input (the first two segments as
//! transmitted). Claims are serialized from a fixed struct, so the issuer always
//! produces the same bytes for the same claims.

use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use jsonwebtoken::Algorithm;
use serde::{Deserialize, Serialize};

use crate::keys::{AssertionSigner, KeyError};

/// Tokens longer than this are rejected before any decoding.
pub const MAX_ASSERTION_LEN: usize = 8 * 1024;

pub const ASSERTION_TYPE: &str = "JWT";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssertionHeader {
    pub alg: Algorithm,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kid: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub typ: Option<String>,
}

/// Claims body as it travels on the wire.
///
/// Every field is optional on decode so that an absent claim surfaces as a
/// precise "missing claim" rejection instead of a generic parse failure.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssertionClaims {
    /// HR user id.
    #[serde(default)]
    pub sub: Option<String>,

    /// Organization id.
    #[serde(default)]
    pub org: Option<String>,

    #[serde(default)]
    pub email: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// HR role set.
    #[serde(default)]
    pub roles: Vec<String>,

    /// Payroll role derived on the HR side.
    #[serde(default)]
    pub payroll_role: Option<String>,

    #[serde(default)]
    pub iss: Option<String>,

    #[serde(default)]
    pub aud: Option<String>,

    /// Issued-at, seconds since the Unix epoch.
    #[serde(default)]
    pub iat: Option<i64>,

    /// Expires-at, seconds since the Unix epoch.
    #[serde(default)]
    pub exp: Option<i64>,

    /// Unique assertion id (replay tracking).
    #[serde(default)]
    pub jti: Option<String>,
}

/// A token split into its decoded parts.
#[derive(Debug, Clone)]
pub struct DecodedAssertion<'a> {
    pub header: AssertionHeader,
    pub claims: AssertionClaims,
    /// `header.claims` exactly as received; this is what the signature covers.
    pub signing_input: &'a str,
    pub signature: &'a str,
}

#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("token exceeds the maximum assertion length")]
    TooLong,

    #[error("expected three dot-separated segments")]
    Segments,

    #[error("segment is not base64url: {0}")]
    Base64(#[from] base64::DecodeError),

    #[error("segment is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Key(#[from] KeyError),
}

/// Serialize and sign claims, producing the compact token.
pub fn encode_signed(claims: &AssertionClaims, signer: &dyn AssertionSigner) -> Result<String, CodecError> {
    let header = AssertionHeader {
        alg: signer.algorithm(),
        kid: Some(signer.key_id().to_string()),
        typ: Some(ASSERTION_TYPE.to_string()),
    };

    let header_b64 = URL_SAFE_NO_PAD.encode(serde_json::to_vec(&header)?);
    let claims_b64 = URL_SAFE_NO_PAD.encode(serde_json::to_vec(claims)?);
    let signing_input = format!("{header_b64}.{claims_b64}");
    let signature = signer.sign(signing_input.as_bytes())?;

    Ok(format!("{signing_input}.{signature}"))
}

/// Split and decode a compact token. Does **not** check the signature.
pub fn decode_unverified(token: &str) -> Result<DecodedAssertion<'_>, CodecError> {
    if token.len() > MAX_ASSERTION_LEN {
        return Err(CodecError::TooLong);
    }

    let mut parts = token.split('.');
    let (Some(header_b64), Some(claims_b64), Some(signature), None) =
        (parts.next(), parts.next(), parts.next(), parts.next())
    else {
        return Err(CodecError::Segments);
    };
    if header_b64.is_empty() || claims_b64.is_empty() || signature.is_empty() {
        return Err(CodecError::Segments);
    }

    let header: AssertionHeader = serde_json::from_slice(&URL_SAFE_NO_PAD.decode(header_b64)?)?;
    let claims: AssertionClaims = serde_json::from_slice(&URL_SAFE_NO_PAD.decode(claims_b64)?)?;

    // Signing input is the prefix up to (not including) the second dot.
    let signing_input = &token[..header_b64.len() + 1 + claims_b64.len()];

    Ok(DecodedAssertion {
        header,
        claims,
        signing_input,
        signature,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keys::test_keys::*;

    fn claims() -> AssertionClaims {
        AssertionClaims {
            sub: Some("u-1".into()),
            org: Some("org1".into()),
            email: Some("a@x.com".into()),
            name: None,
            roles: vec!["hr".into()],
            payroll_role: Some("payroll_admin".into()),
            iss: Some("hr".into()),
            aud: Some("payroll".into()),
            iat: Some(1_700_000_000),
            exp: Some(1_700_000_300),
            jti: Some("j-1".into()),
        }
    }

    #[test]
    fn encode_is_deterministic() {
        let signer = signer_a();
        assert_eq!(
            encode_signed(&claims(), &signer).unwrap(),
            encode_signed(&claims(), &signer).unwrap()
        );
    }

    #[test]
    fn decode_recovers_header_and_claims() {
        let token = encode_signed(&claims(), &signer_a()).unwrap();
        let decoded = decode_unverified(&token).unwrap();
        assert_eq!(decoded.header.alg, Algorithm::EdDSA);
        assert_eq!(decoded.header.kid.as_deref(), Some(KID_A));
        assert_eq!(decoded.claims, claims());
        assert_eq!(
            format!("{}.{}", decoded.signing_input, decoded.signature),
            token
        );
    }

    #[test]
    fn structural_garbage_is_rejected() {
        for token in ["", "a", "a.b", "a.b.c.d", "..", "a..c", "!!.??.**"] {
            assert!(decode_unverified(token).is_err(), "{token:?}");
        }
    }

    #[test]
    fn oversized_token_is_rejected_before_decoding() {
        let token = "a".repeat(MAX_ASSERTION_LEN + 1);
        assert!(matches!(decode_unverified(&token), Err(CodecError::TooLong)));
    }

    #[test]
    fn none_algorithm_does_not_parse() {
        let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"none"}"#);
        let body = URL_SAFE_NO_PAD.encode(b"{}");
        let token = format!("{header}.{body}.c2ln");
        assert!(matches!(decode_unverified(&token), Err(CodecError::Json(_))));
    }

    #[test]
    fn missing_claims_decode_as_none() {
        let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"EdDSA","kid":"k"}"#);
        let body = URL_SAFE_NO_PAD.encode(br#"{"sub":"u-1"}"#);
        let token = format!("{header}.{body}.c2ln");
        let decoded = decode_unverified(&token).unwrap();
        assert_eq!(decoded.claims.sub.as_deref(), Some("u-1"));
        assert!(decoded.claims.email.is_none());
        assert!(decoded.claims.roles.is_empty());
    }
}
