//! Account storage trait and implementations.
//!
//! Mobile end-users and back-office admins are stored in separate tables with
//! the same shape. A [`Realm`] picks the table; everything else is shared.
//!
//! # Architecture
//!
//! - `UserStorage` trait: persistence operations the account routes and the
//!   password reset flow need
//! - `PgUserStorage`: PostgreSQL implementation bound to one realm
//! - `MockUserStorage`: In-memory implementation for testing

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use std::collections::HashMap;
use std::fmt::Display;
use std::future::Future;
use std::sync::{Arc, RwLock};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Realm {
    User,
    Admin,
}

impl Realm {
    fn table(self) -> &'static str {
        match self {
            Self::User => "users",
            Self::Admin => "admins",
        }
    }

    /// Capitalized noun used in response messages.
    pub fn label(self) -> &'static str {
        match self {
            Self::User => "User",
            Self::Admin => "Admin",
        }
    }

    /// Role given to accounts that register without one.
    pub fn default_role(self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Admin => "admin",
        }
    }
}

impl Display for Realm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::User => write!(f, "user"),
            Self::Admin => write!(f, "admin"),
        }
    }
}

/// A persisted account, including its password reset state.
#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct StoredAccount {
    pub id: Uuid,
    pub name: String,
    pub email: String,
    pub password_hash: String,
    pub phone: Option<String>,
    pub country_code: Option<String>,
    pub image: Option<String>,
    pub status: String,
    pub role: String,
    pub provider: Option<String>,
    pub designation: Option<String>,
    /// Argon2 hash of the armed reset code.
    pub forget_code: Option<String>,
    pub otp_expires: Option<DateTime<Utc>>,
    pub reset_nonce: Option<Uuid>,
    pub reset_attempts: i32,
    /// The armed code was verified under `reset_nonce`.
    pub reset_verified: bool,
    pub refresh_token: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl StoredAccount {
    /// Creates a new account record with a generated id.
    pub fn new(account: NewAccount) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            name: account.name,
            email: account.email,
            password_hash: account.password_hash,
            phone: account.phone,
            country_code: account.country_code,
            image: account.image,
            status: "1".to_owned(),
            role: account.role,
            provider: account.provider,
            designation: account.designation,
            forget_code: None,
            otp_expires: None,
            reset_nonce: None,
            reset_attempts: 0,
            reset_verified: false,
            refresh_token: account.refresh_token,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn reset_state(&self) -> ResetState {
        ResetState {
            code_hash: self.forget_code.clone(),
            expires_at: self.otp_expires,
            nonce: self.reset_nonce,
            attempts: self.reset_attempts,
            verified: self.reset_verified,
        }
    }

    fn apply_reset_state(&mut self, state: ResetState) {
        self.forget_code = state.code_hash;
        self.otp_expires = state.expires_at;
        self.reset_nonce = state.nonce;
        self.reset_attempts = state.attempts;
        self.reset_verified = state.verified;
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NewAccount {
    pub name: String,
    pub email: String,
    pub password_hash: String,
    pub role: String,
    pub phone: Option<String>,
    pub country_code: Option<String>,
    pub image: Option<String>,
    pub provider: Option<String>,
    pub designation: Option<String>,
    pub refresh_token: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProfileUpdate {
    pub name: String,
    /// `None` keeps the current image.
    pub image: Option<String>,
    /// `None` keeps the current designation.
    pub designation: Option<String>,
}

/// Password reset fields of an account, read and written as a unit.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResetState {
    pub code_hash: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
    pub nonce: Option<Uuid>,
    pub attempts: i32,
    pub verified: bool,
}

impl ResetState {
    /// No reset in progress.
    pub fn cleared() -> Self {
        Self::default()
    }
}

/// Error type for account storage operations.
#[derive(Debug, thiserror::Error)]
pub enum UserStorageError {
    /// An account with this email already exists.
    #[error("Account already exists: {0}")]
    AlreadyExists(String),

    #[error("Account not found: {0}")]
    NotFound(String),

    /// A database or storage error occurred.
    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

impl From<sqlx::Error> for UserStorageError {
    fn from(err: sqlx::Error) -> Self {
        Self::Storage(err.to_string())
    }
}

pub trait UserStorage: Clone + Send + Sync + 'static {
    /// Persists a new account. Fails with `AlreadyExists` when the email is
    /// taken.
    fn create_account(
        &self,
        account: NewAccount,
    ) -> impl Future<Output = Result<StoredAccount, UserStorageError>> + Send;

    fn find_by_email(
        &self,
        email: &str,
    ) -> impl Future<Output = Result<Option<StoredAccount>, UserStorageError>> + Send;

    fn find_by_id(
        &self,
        id: Uuid,
    ) -> impl Future<Output = Result<Option<StoredAccount>, UserStorageError>> + Send;

    fn find_by_refresh_token(
        &self,
        token: &str,
    ) -> impl Future<Output = Result<Option<StoredAccount>, UserStorageError>> + Send;

    /// Every account, newest first.
    fn list_accounts(
        &self,
    ) -> impl Future<Output = Result<Vec<StoredAccount>, UserStorageError>> + Send;

    fn update_profile(
        &self,
        id: Uuid,
        update: ProfileUpdate,
    ) -> impl Future<Output = Result<StoredAccount, UserStorageError>> + Send;

    fn set_password(
        &self,
        id: Uuid,
        password_hash: &str,
    ) -> impl Future<Output = Result<(), UserStorageError>> + Send;

    fn set_refresh_token(
        &self,
        id: Uuid,
        token: Option<&str>,
    ) -> impl Future<Output = Result<(), UserStorageError>> + Send;

    /// Overwrites the reset fields of the account with this email.
    fn store_reset_state(
        &self,
        email: &str,
        state: ResetState,
    ) -> impl Future<Output = Result<(), UserStorageError>> + Send;

    /// Replaces the password and clears every reset field in one write.
    fn complete_password_reset(
        &self,
        email: &str,
        password_hash: &str,
    ) -> impl Future<Output = Result<StoredAccount, UserStorageError>> + Send;

    fn delete_account(
        &self,
        id: Uuid,
    ) -> impl Future<Output = Result<bool, UserStorageError>> + Send;
}

/// In-memory mock implementation of `UserStorage` for testing.
///
/// Clones share the same accounts.
#[derive(Clone, Default)]
pub struct MockUserStorage {
    accounts: Arc<RwLock<HashMap<Uuid, StoredAccount>>>,
}

impl MockUserStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts an account (builder pattern).
    pub fn with_account(self, account: StoredAccount) -> Self {
        self.accounts
            .write()
            .expect("lock poisoned")
            .insert(account.id, account);
        self
    }

    pub fn len(&self) -> usize {
        self.accounts.read().expect("lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn modify<F>(&self, id: Uuid, change: F) -> Result<StoredAccount, UserStorageError>
    where
        F: FnOnce(&mut StoredAccount),
    {
        let mut accounts = self.accounts.write().expect("lock poisoned");
        let account = accounts
            .get_mut(&id)
            .ok_or_else(|| UserStorageError::NotFound(id.to_string()))?;
        change(account);
        account.updated_at = Utc::now();
        Ok(account.clone())
    }

    fn id_for_email(&self, email: &str) -> Result<Uuid, UserStorageError> {
        self.accounts
            .read()
            .expect("lock poisoned")
            .values()
            .find(|account| account.email == email)
            .map(|account| account.id)
            .ok_or_else(|| UserStorageError::NotFound(email.to_owned()))
    }
}

impl UserStorage for MockUserStorage {
    async fn create_account(&self, account: NewAccount) -> Result<StoredAccount, UserStorageError> {
        if account.email.is_empty() {
            return Err(UserStorageError::InvalidInput(
                "Email cannot be empty".to_owned(),
            ));
        }

        let mut accounts = self.accounts.write().expect("lock poisoned");
        if accounts.values().any(|stored| stored.email == account.email) {
            return Err(UserStorageError::AlreadyExists(account.email));
        }

        let stored = StoredAccount::new(account);
        accounts.insert(stored.id, stored.clone());
        Ok(stored)
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<StoredAccount>, UserStorageError> {
        let accounts = self.accounts.read().expect("lock poisoned");
        Ok(accounts.values().find(|a| a.email == email).cloned())
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<StoredAccount>, UserStorageError> {
        let accounts = self.accounts.read().expect("lock poisoned");
        Ok(accounts.get(&id).cloned())
    }

    async fn find_by_refresh_token(
        &self,
        token: &str,
    ) -> Result<Option<StoredAccount>, UserStorageError> {
        let accounts = self.accounts.read().expect("lock poisoned");
        Ok(accounts
            .values()
            .find(|a| a.refresh_token.as_deref() == Some(token))
            .cloned())
    }

    async fn list_accounts(&self) -> Result<Vec<StoredAccount>, UserStorageError> {
        let accounts = self.accounts.read().expect("lock poisoned");
        let mut all: Vec<_> = accounts.values().cloned().collect();
        all.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(all)
    }

    async fn update_profile(
        &self,
        id: Uuid,
        update: ProfileUpdate,
    ) -> Result<StoredAccount, UserStorageError> {
        self.modify(id, |account| {
            account.name = update.name;
            if let Some(image) = update.image {
                account.image = Some(image);
            }
            if let Some(designation) = update.designation {
                account.designation = Some(designation);
            }
        })
    }

    async fn set_password(&self, id: Uuid, password_hash: &str) -> Result<(), UserStorageError> {
        self.modify(id, |account| account.password_hash = password_hash.to_owned())
            .map(|_| ())
    }

    async fn set_refresh_token(
        &self,
        id: Uuid,
        token: Option<&str>,
    ) -> Result<(), UserStorageError> {
        self.modify(id, |account| account.refresh_token = token.map(str::to_owned))
            .map(|_| ())
    }

    async fn store_reset_state(
        &self,
        email: &str,
        state: ResetState,
    ) -> Result<(), UserStorageError> {
        let id = self.id_for_email(email)?;
        self.modify(id, |account| account.apply_reset_state(state))
            .map(|_| ())
    }

    async fn complete_password_reset(
        &self,
        email: &str,
        password_hash: &str,
    ) -> Result<StoredAccount, UserStorageError> {
        let id = self.id_for_email(email)?;
        self.modify(id, |account| {
            account.password_hash = password_hash.to_owned();
            account.apply_reset_state(ResetState::cleared());
        })
    }

    async fn delete_account(&self, id: Uuid) -> Result<bool, UserStorageError> {
        let mut accounts = self.accounts.write().expect("lock poisoned");
        Ok(accounts.remove(&id).is_some())
    }
}

/// PostgreSQL implementation of `UserStorage` for production use.
///
/// One instance serves one realm; the router holds one per realm.
#[derive(Clone)]
pub struct PgUserStorage {
    pool: PgPool,
    realm: Realm,
}

const ACCOUNT_COLUMNS: &str = "id, name, email, password_hash, phone, country_code, image, \
     status, role, provider, designation, forget_code, otp_expires, reset_nonce, \
     reset_attempts, reset_verified, refresh_token, created_at, updated_at";

impl PgUserStorage {
    pub fn new(pool: PgPool, realm: Realm) -> Self {
        Self { pool, realm }
    }

    pub fn realm(&self) -> Realm {
        self.realm
    }

    fn table(&self) -> &'static str {
        self.realm.table()
    }
}

impl UserStorage for PgUserStorage {
    async fn create_account(&self, account: NewAccount) -> Result<StoredAccount, UserStorageError> {
        if account.email.is_empty() {
            return Err(UserStorageError::InvalidInput(
                "Email cannot be empty".to_owned(),
            ));
        }

        let sql = format!(
            r#"
            INSERT INTO {table} (id, name, email, password_hash, phone, country_code, image,
                                 role, provider, designation, refresh_token)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            ON CONFLICT (email) DO NOTHING
            RETURNING {ACCOUNT_COLUMNS}
            "#,
            table = self.table()
        );
        let email = account.email.clone();
        let row: Option<StoredAccount> = sqlx::query_as(&sql)
            .bind(Uuid::new_v4())
            .bind(account.name)
            .bind(account.email)
            .bind(account.password_hash)
            .bind(account.phone)
            .bind(account.country_code)
            .bind(account.image)
            .bind(account.role)
            .bind(account.provider)
            .bind(account.designation)
            .bind(account.refresh_token)
            .fetch_optional(&self.pool)
            .await?;

        row.ok_or(UserStorageError::AlreadyExists(email))
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<StoredAccount>, UserStorageError> {
        let sql = format!(
            "SELECT {ACCOUNT_COLUMNS} FROM {table} WHERE email = $1",
            table = self.table()
        );
        Ok(sqlx::query_as(&sql)
            .bind(email)
            .fetch_optional(&self.pool)
            .await?)
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<StoredAccount>, UserStorageError> {
        let sql = format!(
            "SELECT {ACCOUNT_COLUMNS} FROM {table} WHERE id = $1",
            table = self.table()
        );
        Ok(sqlx::query_as(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?)
    }

    async fn find_by_refresh_token(
        &self,
        token: &str,
    ) -> Result<Option<StoredAccount>, UserStorageError> {
        let sql = format!(
            "SELECT {ACCOUNT_COLUMNS} FROM {table} WHERE refresh_token = $1",
            table = self.table()
        );
        Ok(sqlx::query_as(&sql)
            .bind(token)
            .fetch_optional(&self.pool)
            .await?)
    }

    async fn list_accounts(&self) -> Result<Vec<StoredAccount>, UserStorageError> {
        let sql = format!(
            "SELECT {ACCOUNT_COLUMNS} FROM {table} ORDER BY created_at DESC",
            table = self.table()
        );
        Ok(sqlx::query_as(&sql).fetch_all(&self.pool).await?)
    }

    async fn update_profile(
        &self,
        id: Uuid,
        update: ProfileUpdate,
    ) -> Result<StoredAccount, UserStorageError> {
        let sql = format!(
            r#"
            UPDATE {table}
            SET name = $2, image = COALESCE($3, image),
                designation = COALESCE($4, designation), updated_at = now()
            WHERE id = $1
            RETURNING {ACCOUNT_COLUMNS}
            "#,
            table = self.table()
        );
        let row: Option<StoredAccount> = sqlx::query_as(&sql)
            .bind(id)
            .bind(update.name)
            .bind(update.image)
            .bind(update.designation)
            .fetch_optional(&self.pool)
            .await?;

        row.ok_or_else(|| UserStorageError::NotFound(id.to_string()))
    }

    async fn set_password(&self, id: Uuid, password_hash: &str) -> Result<(), UserStorageError> {
        let sql = format!(
            "UPDATE {table} SET password_hash = $2, updated_at = now() WHERE id = $1",
            table = self.table()
        );
        let result = sqlx::query(&sql)
            .bind(id)
            .bind(password_hash)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(UserStorageError::NotFound(id.to_string()));
        }
        Ok(())
    }

    async fn set_refresh_token(
        &self,
        id: Uuid,
        token: Option<&str>,
    ) -> Result<(), UserStorageError> {
        let sql = format!(
            "UPDATE {table} SET refresh_token = $2, updated_at = now() WHERE id = $1",
            table = self.table()
        );
        let result = sqlx::query(&sql)
            .bind(id)
            .bind(token)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(UserStorageError::NotFound(id.to_string()));
        }
        Ok(())
    }

    async fn store_reset_state(
        &self,
        email: &str,
        state: ResetState,
    ) -> Result<(), UserStorageError> {
        let sql = format!(
            r#"
            UPDATE {table}
            SET forget_code = $2, otp_expires = $3, reset_nonce = $4, reset_attempts = $5,
                reset_verified = $6, updated_at = now()
            WHERE email = $1
            "#,
            table = self.table()
        );
        let result = sqlx::query(&sql)
            .bind(email)
            .bind(state.code_hash)
            .bind(state.expires_at)
            .bind(state.nonce)
            .bind(state.attempts)
            .bind(state.verified)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(UserStorageError::NotFound(email.to_owned()));
        }
        Ok(())
    }

    async fn complete_password_reset(
        &self,
        email: &str,
        password_hash: &str,
    ) -> Result<StoredAccount, UserStorageError> {
        let sql = format!(
            r#"
            UPDATE {table}
            SET password_hash = $2, forget_code = NULL, otp_expires = NULL,
                reset_nonce = NULL, reset_attempts = 0, reset_verified = FALSE,
                updated_at = now()
            WHERE email = $1
            RETURNING {ACCOUNT_COLUMNS}
            "#,
            table = self.table()
        );
        let row: Option<StoredAccount> = sqlx::query_as(&sql)
            .bind(email)
            .bind(password_hash)
            .fetch_optional(&self.pool)
            .await?;

        row.ok_or_else(|| UserStorageError::NotFound(email.to_owned()))
    }

    async fn delete_account(&self, id: Uuid) -> Result<bool, UserStorageError> {
        let sql = format!("DELETE FROM {table} WHERE id = $1", table = self.table());
        let result = sqlx::query(&sql).bind(id).execute(&self.pool).await?;

        Ok(result.rows_affected() > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn new_account(email: &str) -> NewAccount {
        NewAccount {
            name: "Naomi".to_owned(),
            email: email.to_owned(),
            password_hash: "hash".to_owned(),
            role: "user".to_owned(),
            ..NewAccount::default()
        }
    }

    #[tokio::test]
    async fn test_mock_create_account_duplicate() {
        let storage = MockUserStorage::new();
        storage
            .create_account(new_account("naomi@example.com"))
            .await
            .unwrap();

        let result = storage.create_account(new_account("naomi@example.com")).await;
        assert!(matches!(result, Err(UserStorageError::AlreadyExists(_))));
        assert_eq!(storage.len(), 1);
    }

    #[tokio::test]
    async fn test_mock_lookup_by_email_and_refresh_token() {
        let storage = MockUserStorage::new();
        let account = storage
            .create_account(NewAccount {
                refresh_token: Some("rt-1".to_owned()),
                ..new_account("naomi@example.com")
            })
            .await
            .unwrap();

        let by_email = storage.find_by_email("naomi@example.com").await.unwrap();
        assert_eq!(by_email.map(|a| a.id), Some(account.id));

        let by_token = storage.find_by_refresh_token("rt-1").await.unwrap();
        assert_eq!(by_token.map(|a| a.id), Some(account.id));

        storage.set_refresh_token(account.id, Some("rt-2")).await.unwrap();
        assert!(storage.find_by_refresh_token("rt-1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_mock_update_profile_keeps_image_when_absent() {
        let storage = MockUserStorage::new();
        let account = storage
            .create_account(NewAccount {
                image: Some("https://img.example/a.png".to_owned()),
                ..new_account("naomi@example.com")
            })
            .await
            .unwrap();

        let updated = storage
            .update_profile(
                account.id,
                ProfileUpdate {
                    name: "Mara".to_owned(),
                    image: None,
                    designation: None,
                },
            )
            .await
            .unwrap();
        assert_eq!(updated.name, "Mara");
        assert_eq!(updated.image.as_deref(), Some("https://img.example/a.png"));

        let missing = storage
            .update_profile(
                Uuid::new_v4(),
                ProfileUpdate {
                    name: "x".to_owned(),
                    image: None,
                    designation: None,
                },
            )
            .await;
        assert!(matches!(missing, Err(UserStorageError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_mock_complete_password_reset_clears_state() {
        let storage = MockUserStorage::new();
        storage
            .create_account(new_account("naomi@example.com"))
            .await
            .unwrap();

        storage
            .store_reset_state(
                "naomi@example.com",
                ResetState {
                    code_hash: Some("code-hash".to_owned()),
                    expires_at: Some(Utc::now()),
                    nonce: Some(Uuid::new_v4()),
                    attempts: 2,
                    verified: true,
                },
            )
            .await
            .unwrap();

        let account = storage
            .complete_password_reset("naomi@example.com", "new-hash")
            .await
            .unwrap();
        assert_eq!(account.password_hash, "new-hash");
        assert_eq!(account.reset_state(), ResetState::cleared());
    }

    #[tokio::test]
    async fn test_mock_reset_state_for_unknown_email() {
        let storage = MockUserStorage::new();
        let result = storage
            .store_reset_state("ghost@example.com", ResetState::cleared())
            .await;
        assert!(matches!(result, Err(UserStorageError::NotFound(_))));
    }

    #[test]
    fn test_realm_tables() {
        assert_eq!(Realm::User.table(), "users");
        assert_eq!(Realm::Admin.table(), "admins");
        assert_eq!(
            serde_json::to_string(&Realm::Admin).unwrap(),
            r#""admin""#
        );
    }
}
