use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{decode, encode, errors::ErrorKind, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};

use crate::config::SecurityConfig;

pub mod password;
pub mod permissions;

pub use password::{CredentialError, PasswordHasher};
pub use permissions::{
    is_super_admin, AuthzError, PermissionEvaluator, PermissionSet, RoleClass, SUPER_ADMIN_ROLE_ID,
};

/// Claim set carried by every session token
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    pub username: String,
    pub iat: i64,
    pub nbf: i64,
    pub exp: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TokenError {
    #[error("Token is malformed")]
    Malformed,

    #[error("Token signature is invalid")]
    InvalidSignature,

    #[error("Token has expired")]
    Expired,

    #[error("Token is not valid yet")]
    NotYetValid,

    #[error("Token signing secret is not configured")]
    SecretMissing,

    #[error("Token generation error: {0}")]
    Signing(String),
}

/// Time source for token issuance and verification
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Issues and verifies HS256 session tokens with a single process-wide secret.
///
/// Tokens are stateless: verification never consults the store, so a disabled
/// principal keeps a cryptographically valid token until it expires. The
/// authorization gate re-reads account state on every request instead.
pub struct TokenService {
    secret: Vec<u8>,
    lifetime: Duration,
    clock: Arc<dyn Clock>,
}

impl TokenService {
    pub fn new(secret: impl Into<Vec<u8>>, lifetime_hours: u64, clock: Arc<dyn Clock>) -> Self {
        Self {
            secret: secret.into(),
            lifetime: Duration::hours(lifetime_hours as i64),
            clock,
        }
    }

    pub fn from_config(security: &SecurityConfig) -> Self {
        Self::new(
            security.jwt_secret.as_bytes(),
            security.jwt_expiry_hours,
            Arc::new(SystemClock),
        )
    }

    /// Token lifetime in seconds, reported to clients at login
    pub fn lifetime_secs(&self) -> i64 {
        self.lifetime.num_seconds()
    }

    pub fn issue(&self, identity: &str) -> Result<String, TokenError> {
        if self.secret.is_empty() {
            return Err(TokenError::SecretMissing);
        }

        let now = self.clock.now();
        let claims = Claims {
            username: identity.to_string(),
            iat: now.timestamp(),
            nbf: now.timestamp(),
            exp: (now + self.lifetime).timestamp(),
        };

        encode(
            &Header::new(Algorithm::HS256),
            &claims,
            &EncodingKey::from_secret(&self.secret),
        )
        .map_err(|e| TokenError::Signing(e.to_string()))
    }

    pub fn verify(&self, token: &str) -> Result<Claims, TokenError> {
        if self.secret.is_empty() {
            return Err(TokenError::SecretMissing);
        }

        // Time windows are checked below against our own clock, strictly.
        let mut validation = Validation::new(Algorithm::HS256);
        validation.validate_exp = false;
        validation.validate_nbf = false;
        validation.leeway = 0;
        validation.set_required_spec_claims(&["exp", "nbf", "iat"]);

        let data = decode::<Claims>(token, &DecodingKey::from_secret(&self.secret), &validation)
            .map_err(|e| match e.kind() {
                ErrorKind::InvalidSignature | ErrorKind::InvalidAlgorithm => TokenError::InvalidSignature,
                ErrorKind::ExpiredSignature => TokenError::Expired,
                ErrorKind::ImmatureSignature => TokenError::NotYetValid,
                _ => TokenError::Malformed,
            })?;

        let claims = data.claims;
        let now = self.clock.now().timestamp();
        if now < claims.nbf {
            return Err(TokenError::NotYetValid);
        }
        if now >= claims.exp {
            return Err(TokenError::Expired);
        }

        Ok(claims)
    }
}
