//! Bearer-JWT authentication for mutating/admin endpoints.

use std::sync::Arc;

use anyhow::{Context, Result};
use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};
use axum::{
    async_trait,
    extract::{FromRef, FromRequestParts},
    http::{request::Parts, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use chrono::Utc;
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::config::Config;

/// Token lifetime: 24 hours, matching the admin frontend's session handling.
const TOKEN_TTL_SECS: i64 = 24 * 3600;

/// JWT claims carried by admin tokens.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub id: i64,
    pub username: String,
    pub role: String,
    pub iat: i64,
    pub exp: i64,
}

/// Issue a signed HS256 token for an authenticated admin.
///
/// # Errors
///
/// Returns an error if signing fails.
pub fn issue_token(secret: &str, id: i64, username: &str, role: &str) -> Result<String> {
    let now = Utc::now().timestamp();
    let claims = Claims {
        id,
        username: username.to_string(),
        role: role.to_string(),
        iat: now,
        exp: now + TOKEN_TTL_SECS,
    };
    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )
    .context("Failed to sign JWT")
}

/// Verify a bearer token and return its claims.
///
/// # Errors
///
/// Returns an error for malformed, mis-signed, or expired tokens.
pub fn verify_token(secret: &str, token: &str) -> Result<Claims> {
    let data = decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &Validation::default(),
    )
    .context("Invalid token")?;
    Ok(data.claims)
}

/// Hash a password using Argon2id.
///
/// # Errors
///
/// Returns an error if hashing fails.
pub fn hash_password(password: &str) -> Result<String> {
    let salt = SaltString::generate(&mut OsRng);
    let argon2 = Argon2::default();

    let password_hash = argon2
        .hash_password(password.as_bytes(), &salt)
        .context("Failed to hash password")?
        .to_string();

    Ok(password_hash)
}

/// Verify a password against its hash.
///
/// # Errors
///
/// Returns an error if the stored hash cannot be parsed.
pub fn verify_password(password: &str, password_hash: &str) -> Result<bool> {
    let parsed_hash = PasswordHash::new(password_hash).context("Failed to parse password hash")?;

    let argon2 = Argon2::default();

    Ok(argon2
        .verify_password(password.as_bytes(), &parsed_hash)
        .is_ok())
}

/// Authenticated admin (required).
///
/// Rejects with 401 when the bearer token is missing and 403 when it is
/// invalid or expired, matching what the admin frontend expects.
#[derive(Debug, Clone)]
pub struct RequireAdmin(pub Claims);

#[async_trait]
impl<S> FromRequestParts<S> for RequireAdmin
where
    S: Send + Sync,
    Arc<Config>: FromRef<S>,
{
    type Rejection = Response;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let config = Arc::<Config>::from_ref(state);

        let token = parts
            .headers
            .get("authorization")
            .and_then(|h| h.to_str().ok())
            .and_then(|h| h.strip_prefix("Bearer "));

        let Some(token) = token else {
            return Err((
                StatusCode::UNAUTHORIZED,
                Json(json!({"error": "访问令牌缺失"})),
            )
                .into_response());
        };

        match verify_token(&config.jwt_secret, token) {
            Ok(claims) => Ok(RequireAdmin(claims)),
            Err(_) => Err((
                StatusCode::FORBIDDEN,
                Json(json!({"error": "访问令牌无效"})),
            )
                .into_response()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_password_hashing() {
        let password = "test_password_123!";
        let hash = hash_password(password).unwrap();

        assert!(verify_password(password, &hash).unwrap());
        assert!(!verify_password("wrong_password", &hash).unwrap());
    }

    #[test]
    fn test_token_round_trip() {
        let token = issue_token("secret", 1, "admin", "super_admin").unwrap();
        let claims = verify_token("secret", &token).unwrap();
        assert_eq!(claims.id, 1);
        assert_eq!(claims.username, "admin");
        assert_eq!(claims.role, "super_admin");
        assert!(claims.exp > claims.iat);
    }

    #[test]
    fn test_token_rejects_wrong_secret() {
        let token = issue_token("secret", 1, "admin", "super_admin").unwrap();
        assert!(verify_token("other-secret", &token).is_err());
        assert!(verify_token("secret", "not.a.token").is_err());
    }
}
