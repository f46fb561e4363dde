//! Error taxonomy for the synchronization core.
//!
//! Nothing here is fatal to the process: every failure is scoped to one
//! connection or one event.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};

#[derive(Debug, Clone, thiserror::Error)]
pub enum SyncError {
    /// The connection or request carried no valid credential.
    #[error("unauthenticated")]
    Unauthenticated,

    /// A join or send was attempted for a conversation the user does not
    /// participate in. Membership is unchanged.
    #[error("not a participant of conversation {0}")]
    Forbidden(String),

    /// An inbound frame was syntactically valid JSON but semantically unusable.
    /// Dropped without mutating state.
    #[error("malformed event: {0}")]
    MalformedEvent(String),

    /// The storage collaborator failed.
    #[error("store error: {0}")]
    Store(String),
}

impl From<parley_auth::AuthError> for SyncError {
    fn from(_: parley_auth::AuthError) -> Self {
        SyncError::Unauthenticated
    }
}

impl IntoResponse for SyncError {
    fn into_response(self) -> Response {
        let status = match &self {
            SyncError::Unauthenticated => StatusCode::UNAUTHORIZED,
            SyncError::Forbidden(_) => StatusCode::FORBIDDEN,
            SyncError::MalformedEvent(_) => StatusCode::UNPROCESSABLE_ENTITY,
            SyncError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (status, Json(serde_json::json!({ "error": self.to_string() }))).into_response()
    }
}
