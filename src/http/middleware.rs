//! Authentication: persistent-id token verification and the admin shared
//! secret
//!
//! The auth service itself is external; this module is the consuming edge:
//! verify a token, get back the persistent id that survives reconnects.
//! Raw UUIDs are accepted as anonymous persistent ids; anything else must
//! be an HMAC-SHA256 JWT signed with the shared secret.

use axum::{
    extract::{Request, State},
    http::{HeaderMap, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use uuid::Uuid;

use crate::app::AppState;

type HmacSha256 = Hmac<Sha256>;

/// Header carrying the administrative shared secret.
pub const ADMIN_TOKEN_HEADER: &str = "x-admin-token";

/// JWT claims carried by an auth token
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JwtClaims {
    /// Subject: the persistent id
    pub sub: String,
    /// Expiration time (Unix timestamp)
    pub exp: u64,
    /// Issued at (Unix timestamp)
    #[serde(default)]
    pub iat: u64,
}

/// Verify a token and resolve the persistent id behind it.
pub fn verify_token(token: &str, secret: &str) -> Result<String, AuthError> {
    // Anonymous play: a bare UUID is its own persistent id.
    if let Ok(uuid) = Uuid::parse_str(token) {
        return Ok(uuid.to_string());
    }
    let claims = verify_jwt(token, secret)?;
    Ok(claims.sub)
}

/// Verify a JWT token and extract claims
pub fn verify_jwt(token: &str, secret: &str) -> Result<JwtClaims, AuthError> {
    let parts: Vec<&str> = token.split('.').collect();
    if parts.len() != 3 {
        return Err(AuthError::InvalidToken);
    }

    let header_b64 = parts[0];
    let payload_b64 = parts[1];
    let signature_b64 = parts[2];

    // Verify signature (HMAC-SHA256)
    let message = format!("{}.{}", header_b64, payload_b64);

    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).map_err(|_| AuthError::InvalidToken)?;
    mac.update(message.as_bytes());

    let expected_signature = mac.finalize().into_bytes();
    let provided_signature = URL_SAFE_NO_PAD
        .decode(signature_b64)
        .map_err(|_| AuthError::InvalidToken)?;

    if expected_signature.as_slice() != provided_signature.as_slice() {
        return Err(AuthError::InvalidToken);
    }

    // Decode payload
    let payload_json = URL_SAFE_NO_PAD
        .decode(payload_b64)
        .map_err(|_| AuthError::InvalidToken)?;

    let claims: JwtClaims =
        serde_json::from_slice(&payload_json).map_err(|_| AuthError::InvalidToken)?;

    // Check expiration
    let now = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs();

    if claims.exp < now {
        return Err(AuthError::TokenExpired);
    }

    Ok(claims)
}

/// Authentication error types
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("Missing admin token header")]
    MissingAdminToken,

    #[error("Invalid admin token")]
    InvalidAdminToken,

    #[error("Invalid token")]
    InvalidToken,

    #[error("Token expired")]
    TokenExpired,
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let status = match &self {
            AuthError::MissingAdminToken => StatusCode::UNAUTHORIZED,
            AuthError::InvalidAdminToken => StatusCode::UNAUTHORIZED,
            AuthError::InvalidToken => StatusCode::UNAUTHORIZED,
            AuthError::TokenExpired => StatusCode::UNAUTHORIZED,
        };

        (status, self.to_string()).into_response()
    }
}

/// Shared-secret check used by both master and worker admin surfaces.
pub fn check_admin(headers: &HeaderMap, expected: &str) -> Result<(), AuthError> {
    let provided = headers
        .get(ADMIN_TOKEN_HEADER)
        .and_then(|h| h.to_str().ok())
        .ok_or(AuthError::MissingAdminToken)?;
    if provided != expected {
        return Err(AuthError::InvalidAdminToken);
    }
    Ok(())
}

/// Middleware guarding the worker's administrative endpoints.
pub async fn require_admin(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Result<Response, AuthError> {
    check_admin(request.headers(), &state.config.admin_token)?;
    Ok(next.run(request).await)
}
