//! JWT access-token generation and validation.
//!
//! Access tokens are issued by the identity service as HS256-signed JWTs
//! containing a [`Claims`] payload. The WebSocket upgrade validates its
//! `?token=` credential through [`JwtAuthorizer`].

use herald_core::types::DbId;
use herald_delivery::session::{Authorization, SessionAuthorizer};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// JWT claims embedded in every access token.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Claims {
    /// Subject -- the user's internal database id.
    pub sub: DbId,
    /// Expiration time (UTC Unix timestamp).
    pub exp: i64,
    /// Issued-at time (UTC Unix timestamp).
    pub iat: i64,
    /// Unique token identifier (UUID v4).
    pub jti: String,
}

/// Configuration for JWT token generation and validation.
#[derive(Debug, Clone)]
pub struct JwtConfig {
    /// HMAC-SHA256 secret used to sign and verify tokens.
    pub secret: String,
    /// Access token lifetime in minutes (default: 15).
    pub access_token_expiry_mins: i64,
}

const DEFAULT_ACCESS_EXPIRY_MINS: i64 = 15;

impl JwtConfig {
    /// Load JWT configuration from environment variables.
    ///
    /// | Env Var                  | Required | Default |
    /// |--------------------------|----------|---------|
    /// | `JWT_SECRET`             | **yes**  | --      |
    /// | `JWT_ACCESS_EXPIRY_MINS` | no       | `15`    |
    ///
    /// # Panics
    ///
    /// Panics if `JWT_SECRET` is not set or is empty.
    pub fn from_env() -> Self {
        let secret =
            std::env::var("JWT_SECRET").expect("JWT_SECRET must be set in the environment");
        assert!(!secret.is_empty(), "JWT_SECRET must not be empty");

        let access_token_expiry_mins: i64 = std::env::var("JWT_ACCESS_EXPIRY_MINS")
            .unwrap_or_else(|_| DEFAULT_ACCESS_EXPIRY_MINS.to_string())
            .parse()
            .expect("JWT_ACCESS_EXPIRY_MINS must be a valid i64");

        Self {
            secret,
            access_token_expiry_mins,
        }
    }
}

/// Generate an HS256 access token for the given user, signed with the
/// shared secret.
pub fn generate_access_token(
    user_id: DbId,
    config: &JwtConfig,
) -> Result<String, jsonwebtoken::errors::Error> {
    let now = chrono::Utc::now().timestamp();
    let claims = Claims {
        sub: user_id,
        exp: now + config.access_token_expiry_mins * 60,
        iat: now,
        jti: Uuid::new_v4().to_string(),
    };

    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(config.secret.as_bytes()),
    )
}

/// Validate and decode an access token, returning the embedded [`Claims`].
///
/// Validates the signature and expiration.
pub fn validate_token(
    token: &str,
    config: &JwtConfig,
) -> Result<Claims, jsonwebtoken::errors::Error> {
    let token_data = decode::<Claims>(
        token,
        &DecodingKey::from_secret(config.secret.as_bytes()),
        &Validation::default(),
    )?;
    Ok(token_data.claims)
}

/// [`SessionAuthorizer`] that accepts a valid access token as connection
/// credentials.
#[derive(Debug, Clone)]
pub struct JwtAuthorizer {
    config: JwtConfig,
}

impl JwtAuthorizer {
    pub fn new(config: JwtConfig) -> Self {
        Self { config }
    }
}

impl SessionAuthorizer for JwtAuthorizer {
    fn authorize(&self, credentials: &str) -> Authorization {
        if credentials.is_empty() {
            return Authorization::Unauthorized("Missing token".into());
        }
        match validate_token(credentials, &self.config) {
            Ok(claims) => Authorization::Authorized(claims.sub),
            Err(e) => Authorization::Unauthorized(format!("Invalid token: {e}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    fn config() -> JwtConfig {
        JwtConfig {
            secret: "test-secret-for-herald".into(),
            access_token_expiry_mins: 15,
        }
    }

    #[test]
    fn token_round_trips_subject() {
        let token = generate_access_token(42, &config()).unwrap();
        let claims = validate_token(&token, &config()).unwrap();
        assert_eq!(claims.sub, 42);
        assert!(claims.exp > claims.iat);
    }

    #[test]
    fn authorizer_accepts_valid_token() {
        let token = generate_access_token(7, &config()).unwrap();
        let authorizer = JwtAuthorizer::new(config());
        assert_eq!(authorizer.authorize(&token), Authorization::Authorized(7));
    }

    #[test]
    fn authorizer_rejects_foreign_signature() {
        let other = JwtConfig {
            secret: "someone-else".into(),
            ..config()
        };
        let token = generate_access_token(7, &other).unwrap();
        assert_matches!(
            JwtAuthorizer::new(config()).authorize(&token),
            Authorization::Unauthorized(_)
        );
    }

    #[test]
    fn authorizer_rejects_expired_token() {
        let expired = JwtConfig {
            access_token_expiry_mins: -10,
            ..config()
        };
        let token = generate_access_token(7, &expired).unwrap();
        assert_matches!(
            JwtAuthorizer::new(config()).authorize(&token),
            Authorization::Unauthorized(_)
        );
    }

    #[test]
    fn authorizer_rejects_empty_credentials() {
        assert_eq!(
            JwtAuthorizer::new(config()).authorize(""),
            Authorization::Unauthorized("Missing token".into())
        );
    }
}
