//! Authentication: the `Identity` collaborator and the REST-side middleware.
//!
//! Credential issuance lives outside this service. The core consumes a
//! verified user id per connection: the WebSocket handler calls
//! [`Identity::verify`] once on the in-band `authenticate` frame, and REST
//! handlers get the same check through bearer-token middleware.

use axum::{
    Json,
    body::Body,
    extract::{Request, State},
    http::StatusCode,
    middleware::Next,
    response::{IntoResponse, Response},
};
use chrono::Utc;
use parley_auth::{IdentityKey, PublicKey};

use crate::AppState;
use crate::error::SyncError;

/// External identity collaborator: credential in, verified user id out.
pub trait Identity: Send + Sync {
    fn verify(&self, credential: &str) -> Result<String, SyncError>;
}

/// Production identity: Ed25519-signed credential tokens from the login
/// service, verified against its public key.
pub struct TokenIdentity {
    key: IdentityKey,
}

impl TokenIdentity {
    pub fn new(issuer: PublicKey, max_age_secs: Option<i64>) -> Self {
        let key = match max_age_secs {
            Some(secs) => IdentityKey::new(issuer).with_max_age(secs),
            None => IdentityKey::new(issuer),
        };
        Self { key }
    }
}

impl Identity for TokenIdentity {
    fn verify(&self, credential: &str) -> Result<String, SyncError> {
        let credential = self.key.verify_token(credential, Utc::now().timestamp())?;
        Ok(credential.user_id)
    }
}

/// Authenticated REST caller, populated by the middleware.
#[derive(Debug, Clone)]
pub struct AuthUser {
    pub user_id: String,
}

/// Bearer-token middleware. The WebSocket route authenticates in-band and is
/// exempt, as are the operational endpoints.
pub async fn auth_middleware(
    State(state): State<AppState>,
    mut request: Request<Body>,
    next: Next,
) -> Response {
    let path = request.uri().path();
    if is_public_route(path) {
        return next.run(request).await;
    }

    let token = request
        .headers()
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "));

    match token.map(|t| state.identity.verify(t)) {
        Some(Ok(user_id)) => {
            request.extensions_mut().insert(AuthUser { user_id });
            next.run(request).await
        }
        _ => (
            StatusCode::UNAUTHORIZED,
            Json(serde_json::json!({ "error": "authentication required" })),
        )
            .into_response(),
    }
}

fn is_public_route(path: &str) -> bool {
    path == "/health" || path == "/metrics" || path == "/api/ws"
}

/// Extract AuthUser from request extensions (set by middleware).
/// Returns 401 if not present.
impl<S> axum::extract::FromRequestParts<S> for AuthUser
where
    S: Send + Sync,
{
    type Rejection = (StatusCode, Json<serde_json::Value>);

    async fn from_request_parts(
        parts: &mut axum::http::request::Parts,
        _state: &S,
    ) -> std::result::Result<Self, Self::Rejection> {
        parts.extensions.get::<AuthUser>().cloned().ok_or_else(|| {
            (
                StatusCode::UNAUTHORIZED,
                Json(serde_json::json!({"error": "authentication required"})),
            )
        })
    }
}
