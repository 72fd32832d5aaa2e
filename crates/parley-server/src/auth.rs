//! Bearer-token verification.
//!
//! Token issuance belongs to the external auth collaborator; this module
//! only verifies what arrives and produces a [`Principal`]. An issuing
//! helper is included for tests and local runs.

use axum::extract::FromRequestParts;
use axum::http::header::AUTHORIZATION;
use axum::http::request::Parts;
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};

use parley_core::ids::{OrgId, UserId};
use parley_core::principal::{Principal, Role};

use crate::error::ApiError;
use crate::server::AppState;

/// JWT claims, HS256-signed with the shared secret.
#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    /// Account email.
    pub sub: String,
    pub user_id: String,
    pub role: String,
    pub org_id: String,
    /// Expiry, seconds since epoch.
    pub exp: u64,
}

#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("missing authentication token")]
    MissingToken,
    #[error("invalid or expired token: {0}")]
    InvalidToken(String),
    #[error("path user id does not match token")]
    UserMismatch,
}

pub struct TokenVerifier {
    decoding: DecodingKey,
    validation: Validation,
}

impl TokenVerifier {
    pub fn new(secret: &str) -> Self {
        Self {
            decoding: DecodingKey::from_secret(secret.as_bytes()),
            validation: Validation::default(),
        }
    }

    /// Verify a token and produce the principal everything downstream
    /// trusts. Unknown role strings degrade to the ordinary user role.
    pub fn verify(&self, token: &str) -> Result<Principal, AuthError> {
        let data = decode::<Claims>(token, &self.decoding, &self.validation)
            .map_err(|e| AuthError::InvalidToken(e.to_string()))?;

        Ok(Principal {
            user_id: UserId::from_raw(data.claims.user_id),
            role: data.claims.role.parse::<Role>().unwrap_or_default(),
            org_id: OrgId::from_raw(data.claims.org_id),
        })
    }
}

/// Issue a token for the given principal. Dev/test helper mirroring what
/// the auth collaborator produces.
pub fn issue_token(
    secret: &str,
    principal: &Principal,
    email: &str,
    ttl: std::time::Duration,
) -> Result<String, jsonwebtoken::errors::Error> {
    let ttl = chrono::Duration::from_std(ttl).unwrap_or_else(|_| chrono::Duration::zero());
    let exp = (chrono::Utc::now() + ttl).timestamp() as u64;
    let claims = Claims {
        sub: email.to_string(),
        user_id: principal.user_id.as_str().to_string(),
        role: principal.role.to_string(),
        org_id: principal.org_id.as_str().to_string(),
        exp,
    };
    encode(&Header::default(), &claims, &EncodingKey::from_secret(secret.as_bytes()))
}

/// Extractor for HTTP routes: pulls the bearer token from the
/// `Authorization` header and verifies it.
pub struct AuthPrincipal(pub Principal);

impl FromRequestParts<AppState> for AuthPrincipal {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let token = parts
            .headers
            .get(AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "))
            .ok_or_else(|| ApiError::Unauthorized("missing bearer token".into()))?;

        let principal = state
            .verifier
            .verify(token)
            .map_err(|e| ApiError::Unauthorized(e.to_string()))?;
        Ok(Self(principal))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    const SECRET: &str = "test-secret";

    fn principal() -> Principal {
        Principal {
            user_id: UserId::from_raw("user_a"),
            role: Role::Admin,
            org_id: OrgId::from_raw("org_1"),
        }
    }

    #[test]
    fn issue_and_verify_roundtrip() {
        let token = issue_token(SECRET, &principal(), "a@example.com", Duration::from_secs(3600))
            .unwrap();
        let verified = TokenVerifier::new(SECRET).verify(&token).unwrap();
        assert_eq!(verified, principal());
    }

    #[test]
    fn wrong_secret_rejected() {
        let token = issue_token(SECRET, &principal(), "a@example.com", Duration::from_secs(3600))
            .unwrap();
        let result = TokenVerifier::new("other-secret").verify(&token);
        assert!(matches!(result, Err(AuthError::InvalidToken(_))));
    }

    #[test]
    fn expired_token_rejected() {
        // jsonwebtoken applies default leeway, so expire well in the past.
        let exp = (chrono::Utc::now() - chrono::Duration::hours(2)).timestamp() as u64;
        let claims = Claims {
            sub: "a@example.com".into(),
            user_id: "user_a".into(),
            role: "user".into(),
            org_id: "org_1".into(),
            exp,
        };
        let token = encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(SECRET.as_bytes()),
        )
        .unwrap();

        let result = TokenVerifier::new(SECRET).verify(&token);
        assert!(matches!(result, Err(AuthError::InvalidToken(_))));
    }

    #[test]
    fn garbage_token_rejected() {
        let result = TokenVerifier::new(SECRET).verify("not.a.token");
        assert!(matches!(result, Err(AuthError::InvalidToken(_))));
    }

    #[test]
    fn unknown_role_degrades_to_user() {
        let exp = (chrono::Utc::now() + chrono::Duration::hours(1)).timestamp() as u64;
        let claims = Claims {
            sub: "a@example.com".into(),
            user_id: "user_a".into(),
            role: "superuser".into(),
            org_id: "org_1".into(),
            exp,
        };
        let token = encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(SECRET.as_bytes()),
        )
        .unwrap();

        let verified = TokenVerifier::new(SECRET).verify(&token).unwrap();
        assert_eq!(verified.role, Role::User);
    }
}
