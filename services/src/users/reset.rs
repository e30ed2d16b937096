//! Password reset by emailed one-time code.
//!
//! The flow has three steps, each a method on [`PasswordResetFlow`]:
//!
//! 1. **request**: arm a 5-digit code on the account (stored as an argon2
//!    hash, valid for 3 minutes), mail it, and hand back a signed reset token
//!    carrying the email and the nonce of this particular reset.
//! 2. **verify**: check the code against the armed one. The window is pushed
//!    to `now + 3 minutes` on every attempt, successful or not; after
//!    [`MAX_VERIFY_ATTEMPTS`] failures the code is discarded. A token whose
//!    nonce is not the armed one is rejected without touching the account.
//! 3. **commit**: accept a new password for the same reset token once its
//!    code has been verified and while the window is open, then clear all
//!    reset state.
//!
//! A second request replaces the nonce, so tokens from an earlier request no
//! longer verify or commit.

use chrono::{DateTime, Duration, Utc};
use rand::Rng;
use uuid::Uuid;

use super::password::{PasswordError, hash_secret, verify_secret};
use super::storage::{Realm, ResetState, StoredAccount, UserStorage, UserStorageError};
use super::tokens::{ResetClaims, TokenError, TokenSigner};
use crate::clock::Clock;
use crate::mail::{MailError, Mailer, password_reset_mail};

pub const RESET_CODE_LENGTH: usize = 5;
pub const RESET_WINDOW: Duration = Duration::minutes(3);
pub const MAX_VERIFY_ATTEMPTS: i32 = 5;

/// A fresh numeric code. Leading zeros are kept.
pub fn generate_reset_code() -> String {
    let mut rng = rand::thread_rng();
    (0..RESET_CODE_LENGTH)
        .map(|_| char::from(b'0' + rng.gen_range(0..10u8)))
        .collect()
}

#[derive(Debug, thiserror::Error)]
pub enum ResetError {
    #[error("User not found")]
    NotFound,

    #[error("Invalid reset token: {0}")]
    InvalidToken(String),

    #[error("Reset password time has expired, try again")]
    Expired,

    #[error(transparent)]
    Storage(#[from] UserStorageError),

    #[error(transparent)]
    Delivery(#[from] MailError),

    #[error("Failed to hash secret: {0}")]
    Hashing(String),

    #[error(transparent)]
    Token(#[from] TokenError),
}

impl From<PasswordError> for ResetError {
    fn from(err: PasswordError) -> Self {
        Self::Hashing(err.to_string())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerifyOutcome {
    Verified,
    /// Wrong, stale or exhausted code. Not an error for the caller.
    Rejected,
}

#[derive(Debug, Clone)]
pub struct PasswordReset {
    pub account: StoredAccount,
    pub access_token: String,
}

pub struct PasswordResetFlow<'a, U, M> {
    accounts: &'a U,
    mailer: &'a M,
    signer: &'a TokenSigner,
    clock: &'a dyn Clock,
    realm: Realm,
}

impl<'a, U, M> PasswordResetFlow<'a, U, M>
where
    U: UserStorage,
    M: Mailer,
{
    pub fn new(
        accounts: &'a U,
        mailer: &'a M,
        signer: &'a TokenSigner,
        clock: &'a dyn Clock,
        realm: Realm,
    ) -> Self {
        Self {
            accounts,
            mailer,
            signer,
            clock,
            realm,
        }
    }

    /// Arms a new code for `email`, mails it and returns the reset token.
    ///
    /// When the mail cannot be delivered the armed state is cleared again and
    /// the delivery error is returned.
    #[tracing::instrument(skip(self), fields(realm = %self.realm))]
    pub async fn request(&self, email: &str) -> Result<String, ResetError> {
        if self.accounts.find_by_email(email).await?.is_none() {
            return Err(ResetError::NotFound);
        }

        let now = self.clock.now();
        let code = generate_reset_code();
        let nonce = Uuid::new_v4();
        let token = self.signer.sign_reset(email, nonce, self.realm, now)?;

        let armed = ResetState {
            code_hash: Some(hash_secret(&code)?),
            expires_at: Some(now + RESET_WINDOW),
            nonce: Some(nonce),
            attempts: 0,
            verified: false,
        };
        self.accounts.store_reset_state(email, armed).await?;

        if let Err(err) = self.mailer.send(password_reset_mail(email, &code)).await {
            if let Err(rollback) = self
                .accounts
                .store_reset_state(email, ResetState::cleared())
                .await
            {
                tracing::error!(error = %rollback, "failed to clear reset state after delivery failure");
            }
            return Err(err.into());
        }

        tracing::info!("reset code issued");
        Ok(token)
    }

    /// Decodes a reset token and checks it belongs to this realm.
    fn claims(&self, token: &str, now: DateTime<Utc>) -> Result<ResetClaims, ResetError> {
        let claims = self
            .signer
            .verify_reset(token, now)
            .map_err(|e| ResetError::InvalidToken(e.to_string()))?;
        if claims.realm != self.realm {
            return Err(ResetError::InvalidToken(
                "token was issued for another realm".to_owned(),
            ));
        }
        Ok(claims)
    }

    #[tracing::instrument(skip(self, token, code), fields(realm = %self.realm))]
    pub async fn verify(&self, token: &str, code: &str) -> Result<VerifyOutcome, ResetError> {
        let now = self.clock.now();
        let claims = self.claims(token, now)?;

        let account = self
            .accounts
            .find_by_email(&claims.email)
            .await?
            .ok_or(ResetError::NotFound)?;
        let state = account.reset_state();

        let Some(hash) = state.code_hash.as_deref() else {
            tracing::info!("no reset code armed");
            return Ok(VerifyOutcome::Rejected);
        };
        if state.nonce != Some(claims.nonce) {
            tracing::info!("stale reset token");
            return Ok(VerifyOutcome::Rejected);
        }

        let verified = verify_secret(code, hash)?
            && state.attempts < MAX_VERIFY_ATTEMPTS
            && is_open(state.expires_at, now);

        let next = next_state(state, verified, now);
        self.accounts.store_reset_state(&claims.email, next).await?;

        if verified {
            tracing::info!("reset code verified");
            Ok(VerifyOutcome::Verified)
        } else {
            tracing::info!("reset code rejected");
            Ok(VerifyOutcome::Rejected)
        }
    }

    /// Replaces the password of the account the reset token was issued for.
    ///
    /// The token must carry the armed nonce and its code must have been
    /// verified; otherwise the reset is refused as an invalid token.
    #[tracing::instrument(skip(self, token, new_password), fields(realm = %self.realm))]
    pub async fn commit(
        &self,
        token: &str,
        email: &str,
        new_password: &str,
    ) -> Result<PasswordReset, ResetError> {
        let now = self.clock.now();
        let claims = self.claims(token, now)?;
        if claims.email != email {
            return Err(ResetError::InvalidToken(
                "token was issued for another account".to_owned(),
            ));
        }

        let account = self
            .accounts
            .find_by_email(email)
            .await?
            .ok_or(ResetError::NotFound)?;
        let state = account.reset_state();
        if state.nonce != Some(claims.nonce) || !state.verified {
            return Err(ResetError::InvalidToken(
                "reset code has not been verified".to_owned(),
            ));
        }
        if !is_open(state.expires_at, now) {
            return Err(ResetError::Expired);
        }

        let password_hash = hash_secret(new_password)?;
        let account = self
            .accounts
            .complete_password_reset(email, &password_hash)
            .await?;
        let access_token = self.signer.sign_access(&account, self.realm, now)?;

        tracing::info!("password reset committed");
        Ok(PasswordReset {
            account,
            access_token,
        })
    }
}

fn is_open(expires_at: Option<DateTime<Utc>>, now: DateTime<Utc>) -> bool {
    expires_at.is_some_and(|expires_at| expires_at > now)
}

/// State after a verify attempt on the armed nonce: the window always
/// restarts from `now` and a verification, once made, sticks.
fn next_state(state: ResetState, verified: bool, now: DateTime<Utc>) -> ResetState {
    let attempts = if verified {
        state.attempts
    } else {
        state.attempts.saturating_add(1)
    };
    let code_hash = if attempts >= MAX_VERIFY_ATTEMPTS {
        None
    } else {
        state.code_hash
    };

    ResetState {
        code_hash,
        expires_at: Some(now + RESET_WINDOW),
        nonce: state.nonce,
        attempts,
        verified: state.verified || verified,
    }
}
