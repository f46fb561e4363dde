//! Error taxonomy for credential verification.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, thiserror::Error)]
pub enum AuthError {
    #[error("malformed credential: {0}")]
    MalformedCredential(String),

    #[error("invalid signature")]
    InvalidSignature,

    #[error("credential expired")]
    Expired,

    #[error("unknown issuer")]
    UnknownIssuer,
}

impl AuthError {
    pub fn error_code(&self) -> &str {
        match self {
            Self::MalformedCredential(_) => "malformed_credential",
            Self::InvalidSignature => "invalid_signature",
            Self::Expired => "expired",
            Self::UnknownIssuer => "unknown_issuer",
        }
    }
}

/// Serializable error response for HTTP or WebSocket frames.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
}

impl From<&AuthError> for ErrorResponse {
    fn from(err: &AuthError) -> Self {
        Self {
            error: err.error_code().to_string(),
            message: err.to_string(),
        }
    }
}
