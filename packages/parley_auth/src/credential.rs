//! The credential format: a user id and issue time signed by the login
//! service's Ed25519 key, carried as an opaque token string.
//!
//! Token layout: `base64url(payload_json) . base64url(signature)` where the
//! signature covers the raw payload bytes. The chat server holds only the
//! issuer's public key and never signs anything itself.

use serde::{Deserialize, Serialize};

use crate::encoding::{base64_decode, base64_encode};
use crate::error::AuthError;
use crate::keys::{PublicKey, SigningKey, verify};

/// The signed payload inside a credential token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credential {
    /// Stable user identifier as issued by the login service.
    pub user_id: String,
    /// Unix timestamp (seconds) at which the credential was issued.
    pub issued_at: i64,
}

impl Credential {
    pub fn new(user_id: impl Into<String>, issued_at: i64) -> Self {
        Self {
            user_id: user_id.into(),
            issued_at,
        }
    }

    /// Sign this credential and encode it as an opaque token string.
    pub fn issue(&self, key: &SigningKey) -> String {
        let payload = serde_json::to_vec(self).expect("credential serializes");
        let sig = key.sign(&payload);
        format!(
            "{}.{}",
            base64_encode(&payload),
            base64_encode(sig.as_bytes())
        )
    }
}

/// Verifier side: the issuer's public key plus an expiry window.
#[derive(Debug, Clone)]
pub struct IdentityKey {
    issuer: PublicKey,
    /// Maximum credential age in seconds; `None` disables expiry checks.
    max_age_secs: Option<i64>,
}

impl IdentityKey {
    pub fn new(issuer: PublicKey) -> Self {
        Self {
            issuer,
            max_age_secs: None,
        }
    }

    pub fn with_max_age(mut self, secs: i64) -> Self {
        self.max_age_secs = Some(secs);
        self
    }

    pub fn issuer(&self) -> &PublicKey {
        &self.issuer
    }

    /// Verify a token string and return the credential it carries.
    ///
    /// `now` is the caller's clock (unix seconds) so verification stays
    /// deterministic under test.
    pub fn verify_token(&self, token: &str, now: i64) -> Result<Credential, AuthError> {
        let (payload_b64, sig_b64) = token
            .split_once('.')
            .ok_or_else(|| AuthError::MalformedCredential("missing separator".into()))?;

        let payload = base64_decode(payload_b64)
            .map_err(|e| AuthError::MalformedCredential(format!("payload: {e}")))?;
        let sig_bytes = base64_decode(sig_b64)
            .map_err(|e| AuthError::MalformedCredential(format!("signature: {e}")))?;
        let sig_arr: [u8; 64] = sig_bytes
            .try_into()
            .map_err(|_| AuthError::MalformedCredential("signature must be 64 bytes".into()))?;

        verify(
            &self.issuer,
            &payload,
            &crate::keys::Signature::from_bytes(sig_arr),
        )?;

        let credential: Credential = serde_json::from_slice(&payload)
            .map_err(|e| AuthError::MalformedCredential(format!("json: {e}")))?;

        if let Some(max_age) = self.max_age_secs {
            if now - credential.issued_at > max_age {
                return Err(AuthError::Expired);
            }
        }

        Ok(credential)
    }
}
