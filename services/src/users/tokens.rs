//! HS256 tokens: access, refresh and password reset.
//!
//! Each kind is signed with its own secret so a token of one kind can never
//! be replayed as another. Expiry is checked against the injected clock
//! rather than the system time so the reset window can be tested.

use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode};
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use uuid::Uuid;

use super::storage::{Realm, StoredAccount};
use crate::config::Config;

pub const ISSUER: &str = "manna";

pub const ACCESS_TTL: Duration = Duration::hours(1);
pub const REFRESH_TTL: Duration = Duration::days(7);
pub const RESET_TTL: Duration = Duration::minutes(15);

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessClaims {
    /// Account id.
    pub sub: String,
    pub email: String,
    pub role: String,
    pub realm: Realm,
    pub iat: i64,
    pub exp: i64,
    pub iss: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefreshClaims {
    pub sub: String,
    pub name: String,
    pub email: String,
    pub realm: Realm,
    pub iat: i64,
    pub exp: i64,
    pub iss: String,
}

/// Carries the identity between the reset request and verify steps.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResetClaims {
    pub email: String,
    /// Must equal the nonce armed on the account for the code to verify.
    pub nonce: Uuid,
    pub realm: Realm,
    pub iat: i64,
    pub exp: i64,
    pub iss: String,
}

trait Expiring {
    fn exp(&self) -> i64;
}

impl Expiring for AccessClaims {
    fn exp(&self) -> i64 {
        self.exp
    }
}

impl Expiring for RefreshClaims {
    fn exp(&self) -> i64 {
        self.exp
    }
}

impl Expiring for ResetClaims {
    fn exp(&self) -> i64 {
        self.exp
    }
}

#[derive(Debug, thiserror::Error)]
pub enum TokenError {
    #[error("Token has expired")]
    Expired,

    #[error("Invalid token: {0}")]
    Invalid(String),

    #[error("Failed to sign token: {0}")]
    Signing(String),
}

#[derive(Clone)]
pub struct TokenSigner {
    access_secret: String,
    refresh_secret: String,
    reset_secret: String,
}

impl TokenSigner {
    pub fn new(
        access_secret: impl Into<String>,
        refresh_secret: impl Into<String>,
        reset_secret: impl Into<String>,
    ) -> Self {
        Self {
            access_secret: access_secret.into(),
            refresh_secret: refresh_secret.into(),
            reset_secret: reset_secret.into(),
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(
            config.jwt_secret_access(),
            config.jwt_secret_refresh(),
            config.app_secret(),
        )
    }

    pub fn sign_access(
        &self,
        account: &StoredAccount,
        realm: Realm,
        now: DateTime<Utc>,
    ) -> Result<String, TokenError> {
        let claims = AccessClaims {
            sub: account.id.to_string(),
            email: account.email.clone(),
            role: account.role.clone(),
            realm,
            iat: now.timestamp(),
            exp: (now + ACCESS_TTL).timestamp(),
            iss: ISSUER.to_owned(),
        };
        sign(&claims, &self.access_secret)
    }

    pub fn verify_access(&self, token: &str, now: DateTime<Utc>) -> Result<AccessClaims, TokenError> {
        verify(token, &self.access_secret, now)
    }

    pub fn sign_refresh(
        &self,
        account: &StoredAccount,
        realm: Realm,
        now: DateTime<Utc>,
    ) -> Result<String, TokenError> {
        let claims = RefreshClaims {
            sub: account.id.to_string(),
            name: account.name.clone(),
            email: account.email.clone(),
            realm,
            iat: now.timestamp(),
            exp: (now + REFRESH_TTL).timestamp(),
            iss: ISSUER.to_owned(),
        };
        sign(&claims, &self.refresh_secret)
    }

    pub fn verify_refresh(
        &self,
        token: &str,
        now: DateTime<Utc>,
    ) -> Result<RefreshClaims, TokenError> {
        verify(token, &self.refresh_secret, now)
    }

    pub fn sign_reset(
        &self,
        email: &str,
        nonce: Uuid,
        realm: Realm,
        now: DateTime<Utc>,
    ) -> Result<String, TokenError> {
        let claims = ResetClaims {
            email: email.to_owned(),
            nonce,
            realm,
            iat: now.timestamp(),
            exp: (now + RESET_TTL).timestamp(),
            iss: ISSUER.to_owned(),
        };
        sign(&claims, &self.reset_secret)
    }

    pub fn verify_reset(&self, token: &str, now: DateTime<Utc>) -> Result<ResetClaims, TokenError> {
        verify(token, &self.reset_secret, now)
    }
}

fn sign<C: Serialize>(claims: &C, secret: &str) -> Result<String, TokenError> {
    encode(
        &Header::new(Algorithm::HS256),
        claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )
    .map_err(|e| TokenError::Signing(e.to_string()))
}

fn verify<C>(token: &str, secret: &str, now: DateTime<Utc>) -> Result<C, TokenError>
where
    C: DeserializeOwned + Expiring,
{
    let mut validation = Validation::new(Algorithm::HS256);
    validation.set_issuer(&[ISSUER]);
    // Expiry is compared against the injected clock below.
    validation.validate_exp = false;
    validation.required_spec_claims.clear();

    let data = decode::<C>(token, &DecodingKey::from_secret(secret.as_bytes()), &validation)
        .map_err(|e| match e.kind() {
            jsonwebtoken::errors::ErrorKind::InvalidSignature => {
                TokenError::Invalid("invalid signature".to_owned())
            }
            jsonwebtoken::errors::ErrorKind::InvalidIssuer => {
                TokenError::Invalid("invalid issuer".to_owned())
            }
            _ => TokenError::Invalid(e.to_string()),
        })?;

    if data.claims.exp() <= now.timestamp() {
        return Err(TokenError::Expired);
    }
    Ok(data.claims)
}
