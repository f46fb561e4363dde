//! Signed-credential identity primitives for Parley.
//!
//! The chat server never issues credentials itself; an external login service
//! signs a [`Credential`] binding a user id to an issue time, and the server
//! only ever verifies it. This crate holds the key types, the credential
//! format, and the verification path.

pub mod credential;
pub mod encoding;
pub mod error;
pub mod keys;

pub use credential::{Credential, IdentityKey};
pub use error::AuthError;
pub use keys::{PublicKey, Signature, SigningKey, verify};
