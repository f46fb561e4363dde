//! Ed25519 key types, signatures, and standalone verification.

use std::fmt;
use std::hash::{Hash, Hasher};

use ed25519_dalek::Verifier;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::encoding::{base64_decode, base64_encode};
use crate::error::AuthError;

// --- PublicKey ---

#[derive(Clone, Copy, Eq, PartialEq)]
pub struct PublicKey([u8; 32]);

impl PublicKey {
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Parse from URL-safe base64 (unpadded), the same form `Display` emits.
    pub fn from_base64(s: &str) -> Result<Self, AuthError> {
        let bytes = base64_decode(s)
            .map_err(|e| AuthError::MalformedCredential(format!("public key: {e}")))?;
        let arr: [u8; 32] = bytes
            .try_into()
            .map_err(|_| AuthError::MalformedCredential("public key must be 32 bytes".into()))?;
        Ok(Self(arr))
    }
}

impl Hash for PublicKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.0.hash(state);
    }
}

impl fmt::Display for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // URL-safe base64, unpadded
        let encoded = base64_encode(&self.0);
        write!(f, "{encoded}")
    }
}

impl fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PublicKey({}...)", &base64_encode(&self.0[..6]))
    }
}

impl Serialize for PublicKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let encoded = base64_encode(&self.0);
        serializer.serialize_str(&encoded)
    }
}

impl<'de> Deserialize<'de> for PublicKey {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        let bytes = base64_decode(&s).map_err(serde::de::Error::custom)?;
        let arr: [u8; 32] = bytes
            .try_into()
            .map_err(|_| serde::de::Error::custom("public key must be 32 bytes"))?;
        Ok(PublicKey(arr))
    }
}

// --- SigningKey ---

#[derive(Clone)]
pub struct SigningKey(ed25519_dalek::SigningKey);

impl SigningKey {
    pub fn generate<R: rand::CryptoRng + rand::RngCore>(rng: &mut R) -> Self {
        Self(ed25519_dalek::SigningKey::generate(rng))
    }

    /// Reconstruct from raw 32-byte seed.
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(ed25519_dalek::SigningKey::from_bytes(&bytes))
    }

    /// Raw 32-byte seed (suitable for persistent storage).
    pub fn to_bytes(&self) -> [u8; 32] {
        self.0.to_bytes()
    }

    pub fn public_key(&self) -> PublicKey {
        PublicKey(self.0.verifying_key().to_bytes())
    }

    pub fn sign(&self, message: &[u8]) -> Signature {
        use ed25519_dalek::Signer;
        Signature(self.0.sign(message).to_bytes())
    }
}

// --- Signature ---

#[derive(Clone, Copy, Eq, PartialEq)]
pub struct Signature([u8; 64]);

impl Signature {
    pub fn from_bytes(bytes: [u8; 64]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 64] {
        &self.0
    }
}

impl fmt::Debug for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Signature({}...)", &base64_encode(&self.0[..8]))
    }
}

impl Serialize for Signature {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let encoded = base64_encode(&self.0);
        serializer.serialize_str(&encoded)
    }
}

impl<'de> Deserialize<'de> for Signature {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        let bytes = base64_decode(&s).map_err(serde::de::Error::custom)?;
        let arr: [u8; 64] = bytes
            .try_into()
            .map_err(|_| serde::de::Error::custom("signature must be 64 bytes"))?;
        Ok(Signature(arr))
    }
}

// --- Standalone verify ---

pub fn verify(
    public_key: &PublicKey,
    message: &[u8],
    signature: &Signature,
) -> Result<(), AuthError> {
    let vk = ed25519_dalek::VerifyingKey::from_bytes(public_key.as_bytes())
        .map_err(|_| AuthError::InvalidSignature)?;
    let sig = ed25519_dalek::Signature::from_bytes(signature.as_bytes());
    vk.verify(message, &sig)
        .map_err(|_| AuthError::InvalidSignature)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sign_verify_roundtrip() {
        let mut rng = rand::rng();
        let sk = SigningKey::generate(&mut rng);
        let pk = sk.public_key();
        let msg = b"hello parley";
        let sig = sk.sign(msg);
        assert!(verify(&pk, msg, &sig).is_ok());
    }

    #[test]
    fn verify_wrong_key_fails() {
        let mut rng = rand::rng();
        let sk1 = SigningKey::generate(&mut rng);
        let sk2 = SigningKey::generate(&mut rng);
        let msg = b"hello";
        let sig = sk1.sign(msg);
        assert!(verify(&sk2.public_key(), msg, &sig).is_err());
    }

    #[test]
    fn verify_tampered_message_fails() {
        let mut rng = rand::rng();
        let sk = SigningKey::generate(&mut rng);
        let pk = sk.public_key();
        let sig = sk.sign(b"original");
        assert!(verify(&pk, b"tampered", &sig).is_err());
    }

    #[test]
    fn from_base64_roundtrips_display() {
        let pk = PublicKey::from_bytes([9u8; 32]);
        let encoded = pk.to_string();
        assert_eq!(PublicKey::from_base64(&encoded).unwrap(), pk);
        assert!(PublicKey::from_base64("too-short").is_err());
    }

    #[test]
    fn serde_roundtrip() {
        let pk = PublicKey::from_bytes([7u8; 32]);
        let json = serde_json::to_string(&pk).unwrap();
        let pk2: PublicKey = serde_json::from_str(&json).unwrap();
        assert_eq!(pk, pk2);
    }

    #[test]
    fn signing_key_bytes_roundtrip() {
        let mut rng = rand::rng();
        let sk = SigningKey::generate(&mut rng);
        let bytes = sk.to_bytes();
        let sk2 = SigningKey::from_bytes(bytes);
        assert_eq!(sk.public_key(), sk2.public_key());
        // Signs the same
        let msg = b"roundtrip test";
        let sig = sk.sign(msg);
        assert!(verify(&sk2.public_key(), msg, &sig).is_ok());
    }

    #[test]
    fn signature_serde_roundtrip() {
        let mut rng = rand::rng();
        let sk = SigningKey::generate(&mut rng);
        let sig = sk.sign(b"test");
        let json = serde_json::to_string(&sig).unwrap();
        let sig2: Signature = serde_json::from_str(&json).unwrap();
        assert_eq!(sig, sig2);
    }
}
