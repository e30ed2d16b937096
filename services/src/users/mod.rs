//! Accounts for both realms: mobile end-users and back-office admins.
//!
//! - Registration, login and refresh-token sessions
//! - Password changes and the emailed one-time-code reset flow
//! - Bearer token extractors guarding the rest of the API

pub mod password;
pub mod reset;
pub mod routes;
pub mod session_auth;
pub mod storage;
pub mod tokens;

pub use routes::{AccountSummary, REFRESH_COOKIE, account_routes};
pub use session_auth::{Authenticator, BOOTSTRAP_KEY_HEADER, MayRegister, RequireAdmin, RequireAuth};
pub use storage::{MockUserStorage, PgUserStorage, Realm, StoredAccount, UserStorage, UserStorageError};
pub use tokens::TokenSigner;
