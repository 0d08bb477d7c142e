//! Token codec and secure random generation
//!
//! Issues and verifies HMAC-SHA256 signed access and refresh tokens.
//! The two token types are signed with separate secrets, so compromise
//! of one secret cannot forge the other type. A `token_type` claim is
//! checked after signature verification, so an access token is never
//! accepted where a refresh token is required and vice versa.

use chrono::{DateTime, TimeZone, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use rand::{rngs::OsRng, RngCore};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::auth::models::User;
use crate::config::AuthConfig;

/// `token_type` claim value for access tokens.
pub const TOKEN_TYPE_ACCESS: &str = "access";
/// `token_type` claim value for refresh tokens.
pub const TOKEN_TYPE_REFRESH: &str = "refresh";

/// Claims carried by both token types
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    /// Token issuer
    pub iss: String,
    /// Token audience
    pub aud: String,
    /// Subject - user ID
    pub sub: String,
    /// Username
    pub username: String,
    /// User's email address
    pub email: String,
    /// User's role (admin, trainer, member)
    pub role: String,
    /// Session this token is bound to
    pub session_id: String,
    /// Unique token identifier
    pub jti: String,
    /// Token type discriminator ("access" | "refresh")
    pub token_type: String,
    /// Issued at (Unix epoch seconds)
    pub iat: u64,
    /// Expiration (Unix epoch seconds)
    pub exp: u64,
}

impl Claims {
    /// Parse the subject as a user id.
    pub fn user_id(&self) -> Result<Uuid, TokenError> {
        Uuid::parse_str(&self.sub).map_err(|_| TokenError::Malformed)
    }

    /// Parse the session linkage claim.
    pub fn session_uuid(&self) -> Result<Uuid, TokenError> {
        Uuid::parse_str(&self.session_id).map_err(|_| TokenError::Malformed)
    }
}

/// Token verification and generation errors
///
/// Callers distinguish `Expired` (silently attempt refresh) from
/// `InvalidSignature`/`Malformed` (hard failure) and `WrongTokenType`.
#[derive(Debug, Error)]
pub enum TokenError {
    #[error("Token has expired")]
    Expired,

    #[error("Invalid token signature")]
    InvalidSignature,

    #[error("Expected a {expected} token")]
    WrongTokenType { expected: &'static str },

    #[error("Malformed token")]
    Malformed,

    #[error("Failed to encode token: {0}")]
    Encoding(#[from] jsonwebtoken::errors::Error),
}

/// A freshly signed token plus its derived metadata
#[derive(Debug, Clone)]
pub struct IssuedToken {
    /// Compact token string
    pub token: String,
    /// Unique token id (`jti` claim)
    pub jti: String,
    /// Expiration time
    pub expires_at: DateTime<Utc>,
}

/// Signs and verifies access/refresh tokens.
#[derive(Debug, Clone)]
pub struct TokenCodec {
    access_secret: String,
    refresh_secret: String,
    access_ttl_secs: u64,
    refresh_ttl_secs: u64,
    issuer: String,
    audience: String,
}

impl TokenCodec {
    pub fn new(config: &AuthConfig) -> Self {
        Self {
            access_secret: config.access_token_secret.clone(),
            refresh_secret: config.refresh_token_secret.clone(),
            access_ttl_secs: config.access_token_ttl_secs,
            refresh_ttl_secs: (config.refresh_token_ttl_days as u64) * 24 * 3600,
            issuer: config.issuer.clone(),
            audience: config.audience.clone(),
        }
    }

    /// Sign a short-lived access token bound to the given session.
    ///
    /// # Arguments
    ///
    /// * `user` - Account the token identifies (`sub`, `username`,
    ///   `email`, `role` claims)
    /// * `session_id` - Session the token references (`session_id`
    ///   claim); revoking that session kills the token
    ///
    /// # Returns
    ///
    /// * `Ok(IssuedToken)` - Compact token string plus its `jti` and
    ///   expiry (1 hour by default)
    /// * `Err(TokenError)` - Signing failed
    pub fn create_access_token(
        &self,
        user: &User,
        session_id: Uuid,
    ) -> Result<IssuedToken, TokenError> {
        self.create_token(
            user,
            session_id,
            TOKEN_TYPE_ACCESS,
            self.access_ttl_secs,
            &self.access_secret,
        )
    }

    /// Sign a 7-day refresh token bound to the given session.
    ///
    /// Signed with a separate secret from access tokens.
    pub fn create_refresh_token(
        &self,
        user: &User,
        session_id: Uuid,
    ) -> Result<IssuedToken, TokenError> {
        self.create_token(
            user,
            session_id,
            TOKEN_TYPE_REFRESH,
            self.refresh_ttl_secs,
            &self.refresh_secret,
        )
    }

    fn create_token(
        &self,
        user: &User,
        session_id: Uuid,
        token_type: &str,
        ttl_secs: u64,
        secret: &str,
    ) -> Result<IssuedToken, TokenError> {
        let now = Utc::now();
        let iat = now.timestamp() as u64;
        let exp = iat + ttl_secs;
        let jti = Uuid::new_v4().to_string();

        let claims = Claims {
            iss: self.issuer.clone(),
            aud: self.audience.clone(),
            sub: user.id.to_string(),
            username: user.username.clone(),
            email: user.email.clone(),
            role: user.role.as_str().to_string(),
            session_id: session_id.to_string(),
            jti: jti.clone(),
            token_type: token_type.to_string(),
            iat,
            exp,
        };

        let token = encode(
            &Header::new(Algorithm::HS256),
            &claims,
            &EncodingKey::from_secret(secret.as_bytes()),
        )?;

        Ok(IssuedToken {
            token,
            jti,
            expires_at: timestamp_to_datetime(exp),
        })
    }

    /// Verify an access token: signature, issuer, audience, expiry, type.
    pub fn verify_access_token(&self, token: &str) -> Result<Claims, TokenError> {
        self.verify(token, &self.access_secret, TOKEN_TYPE_ACCESS)
    }

    /// Verify a refresh token: signature, issuer, audience, expiry, type.
    pub fn verify_refresh_token(&self, token: &str) -> Result<Claims, TokenError> {
        self.verify(token, &self.refresh_secret, TOKEN_TYPE_REFRESH)
    }

    fn verify(
        &self,
        token: &str,
        secret: &str,
        expected_type: &'static str,
    ) -> Result<Claims, TokenError> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.set_issuer(&[&self.issuer]);
        validation.set_audience(&[&self.audience]);

        let token_data = decode::<Claims>(
            token,
            &DecodingKey::from_secret(secret.as_bytes()),
            &validation,
        )
        .map_err(|e| match e.kind() {
            jsonwebtoken::errors::ErrorKind::ExpiredSignature => TokenError::Expired,
            jsonwebtoken::errors::ErrorKind::InvalidSignature => TokenError::InvalidSignature,
            _ => TokenError::Malformed,
        })?;

        // Checked after signature verification; a valid signature with
        // the wrong discriminator is still a rejection.
        if token_data.claims.token_type != expected_type {
            return Err(TokenError::WrongTokenType {
                expected: expected_type,
            });
        }

        Ok(token_data.claims)
    }

    /// Read the `exp` claim without verifying the signature.
    ///
    /// For UX hints only ("expires soon"), never for access control.
    pub fn token_expiration(&self, token: &str) -> Result<DateTime<Utc>, TokenError> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.insecure_disable_signature_validation();
        validation.validate_exp = false;
        validation.validate_aud = false;
        validation.required_spec_claims.clear();

        let token_data = decode::<Claims>(token, &DecodingKey::from_secret(&[]), &validation)
            .map_err(|_| TokenError::Malformed)?;

        Ok(timestamp_to_datetime(token_data.claims.exp))
    }

    /// Whether the `exp` claim is in the past. Unreadable tokens count as
    /// expired. For UX hints only.
    pub fn is_token_expired(&self, token: &str) -> bool {
        match self.token_expiration(token) {
            Ok(expires_at) => expires_at <= Utc::now(),
            Err(_) => true,
        }
    }
}

fn timestamp_to_datetime(secs: u64) -> DateTime<Utc> {
    Utc.timestamp_opt(secs as i64, 0)
        .single()
        .unwrap_or_else(Utc::now)
}

/// Generate a 64-hex-character secure random token (32 bytes).
pub fn generate_secure_token() -> String {
    random_hex::<32>()
}

/// Generate a 32-hex-character session identifier (16 bytes).
pub fn generate_session_id() -> String {
    random_hex::<16>()
}

fn random_hex<const N: usize>() -> String {
    let mut bytes = [0u8; N];
    OsRng.fill_bytes(&mut bytes);
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::models::UserRole;

    fn test_codec() -> TokenCodec {
        TokenCodec::new(&AuthConfig::default())
    }

    fn test_user() -> User {
        User::new(
            "jdoe".to_string(),
            "jdoe@example.com".to_string(),
            "$argon2id$fake".to_string(),
            UserRole::Trainer,
            None,
        )
    }

    #[test]
    fn test_access_token_round_trip() {
        let codec = test_codec();
        let user = test_user();
        let session_id = Uuid::new_v4();

        let issued = codec.create_access_token(&user, session_id).unwrap();
        let claims = codec.verify_access_token(&issued.token).unwrap();

        assert_eq!(claims.sub, user.id.to_string());
        assert_eq!(claims.username, "jdoe");
        assert_eq!(claims.role, "trainer");
        assert_eq!(claims.session_id, session_id.to_string());
        assert_eq!(claims.token_type, TOKEN_TYPE_ACCESS);
        assert_eq!(claims.jti, issued.jti);
        assert!(issued.expires_at > Utc::now());
    }

    #[test]
    fn test_token_type_separation() {
        let codec = test_codec();
        let user = test_user();
        let session_id = Uuid::new_v4();

        let access = codec.create_access_token(&user, session_id).unwrap();
        let refresh = codec.create_refresh_token(&user, session_id).unwrap();

        // Cross-feeding fails: separate secrets make the signature check
        // reject before the type check is even reached.
        assert!(codec.verify_refresh_token(&access.token).is_err());
        assert!(codec.verify_access_token(&refresh.token).is_err());
    }

    #[test]
    fn test_wrong_type_with_shared_secret() {
        // Force both secrets identical so the signature verifies and the
        // token_type claim is the failing check.
        let mut config = AuthConfig::default();
        config.refresh_token_secret = config.access_token_secret.clone();
        let codec = TokenCodec::new(&config);
        let user = test_user();

        let access = codec.create_access_token(&user, Uuid::new_v4()).unwrap();
        let result = codec.verify_refresh_token(&access.token);
        assert!(matches!(
            result,
            Err(TokenError::WrongTokenType {
                expected: TOKEN_TYPE_REFRESH
            })
        ));
    }

    #[test]
    fn test_expired_distinct_from_malformed() {
        let codec = test_codec();
        let user = test_user();
        let now = Utc::now().timestamp() as u64;

        let claims = Claims {
            iss: "gymgate".to_string(),
            aud: "gymgate-clients".to_string(),
            sub: user.id.to_string(),
            username: user.username.clone(),
            email: user.email.clone(),
            role: "trainer".to_string(),
            session_id: Uuid::new_v4().to_string(),
            jti: Uuid::new_v4().to_string(),
            token_type: TOKEN_TYPE_ACCESS.to_string(),
            iat: now - 7200,
            exp: now - 3600,
        };
        let expired = encode(
            &Header::new(Algorithm::HS256),
            &claims,
            &EncodingKey::from_secret(AuthConfig::default().access_token_secret.as_bytes()),
        )
        .unwrap();

        assert!(matches!(
            codec.verify_access_token(&expired),
            Err(TokenError::Expired)
        ));
        assert!(matches!(
            codec.verify_access_token("not.a.token"),
            Err(TokenError::Malformed)
        ));
    }

    #[test]
    fn test_tampered_signature() {
        let codec = test_codec();
        let user = test_user();

        let mut config = AuthConfig::default();
        config.access_token_secret = "some-other-secret".to_string();
        let other = TokenCodec::new(&config);

        let token = other.create_access_token(&user, Uuid::new_v4()).unwrap();
        assert!(matches!(
            codec.verify_access_token(&token.token),
            Err(TokenError::InvalidSignature)
        ));
    }

    #[test]
    fn test_unverified_expiration_inspection() {
        let codec = test_codec();
        let user = test_user();

        let issued = codec.create_access_token(&user, Uuid::new_v4()).unwrap();
        let exp = codec.token_expiration(&issued.token).unwrap();

        assert_eq!(exp, issued.expires_at);
        assert!(!codec.is_token_expired(&issued.token));
        assert!(codec.is_token_expired("garbage"));
    }

    #[test]
    fn test_secure_token_generation() {
        let token = generate_secure_token();
        let session_id = generate_session_id();

        assert_eq!(token.len(), 64);
        assert_eq!(session_id.len(), 32);
        assert!(token.chars().all(|c| c.is_ascii_hexdigit()));
        assert!(session_id.chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(generate_secure_token(), token);
    }
}
