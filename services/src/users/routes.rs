//! HTTP routes for account endpoints.
//!
//! The same router serves both realms; it is nested twice by the app, once
//! under `/api/user` and once under `/api/admin`, with the [`Realm`] attached
//! as an extension so every handler knows which table it works on.
//!
//! ## Refresh Cookie
//!
//! Register and login hand the refresh token out in an http-only `jwt`
//! cookie; `POST /refresh-token` reads it back and returns a new access token.

use axum::{
    Router,
    extract::{Extension, Path, State},
    response::IntoResponse,
    routing::{delete, get, post, put},
};
use axum_extra::extract::cookie::{Cookie, CookieJar};
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::LazyLock;
use uuid::Uuid;

use super::password::{MIN_PASSWORD_LENGTH, hash_secret, verify_secret};
use super::reset::{PasswordResetFlow, VerifyOutcome};
use super::session_auth::{MayRegister, RequireAuth};
use super::storage::{NewAccount, ProfileUpdate, Realm, StoredAccount, UserStorage};
use crate::AppState;
use crate::documents::DocumentStore;
use crate::mail::Mailer;
use crate::response::{ApiError, ApiResponse, FieldError, JsonBody};

/// Name of the cookie carrying the refresh token.
pub const REFRESH_COOKIE: &str = "jwt";

static EMAIL_PATTERN: LazyLock<Result<Regex, regex::Error>> =
    LazyLock::new(|| Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$"));

fn is_email(value: &str) -> bool {
    match EMAIL_PATTERN.as_ref() {
        Ok(pattern) => pattern.is_match(value),
        Err(_) => false,
    }
}

fn is_http_url(value: &str) -> bool {
    value
        .strip_prefix("https://")
        .or_else(|| value.strip_prefix("http://"))
        .is_some_and(|rest| !rest.is_empty() && !rest.starts_with('/'))
}

/// Collects field errors for one request body.
#[derive(Default)]
struct Checks {
    errors: Vec<FieldError>,
}

impl Checks {
    /// Records an error unless `value` holds a non-blank string and returns it
    /// trimmed.
    fn required<'a>(&mut self, field: &str, value: &'a Option<String>) -> &'a str {
        let value = value.as_deref().map(str::trim).unwrap_or_default();
        if value.is_empty() {
            self.errors
                .push(FieldError::new(field, format!("{field} is required")));
        }
        value
    }

    fn email<'a>(&mut self, value: &'a Option<String>) -> &'a str {
        let value = value.as_deref().map(str::trim).unwrap_or_default();
        if value.is_empty() {
            self.errors
                .push(FieldError::new("email", "email is required"));
        } else if !is_email(value) {
            self.errors
                .push(FieldError::new("email", "Invalid email format"));
        }
        value
    }

    /// Like [`Checks::required`] but keeps surrounding whitespace.
    fn secret<'a>(&mut self, field: &str, value: &'a Option<String>) -> &'a str {
        let value = value.as_deref().unwrap_or_default();
        if value.is_empty() {
            self.errors
                .push(FieldError::new(field, format!("{field} is required")));
        }
        value
    }

    fn new_password<'a>(&mut self, field: &str, value: &'a Option<String>) -> &'a str {
        let value = value.as_deref().unwrap_or_default();
        if value.chars().count() < MIN_PASSWORD_LENGTH {
            self.errors.push(FieldError::new(
                field,
                format!("{field} must be at least {MIN_PASSWORD_LENGTH} characters"),
            ));
        }
        value
    }

    fn image(&mut self, value: &Option<String>) {
        if value.as_deref().is_some_and(|image| !is_http_url(image)) {
            self.errors
                .push(FieldError::new("image", "image must be a valid URL"));
        }
    }

    fn finish(self) -> Result<(), ApiError> {
        if self.errors.is_empty() {
            Ok(())
        } else {
            Err(ApiError::validation(self.errors))
        }
    }
}

fn parse_id(id: &str) -> Result<Uuid, ApiError> {
    Uuid::parse_str(id).map_err(|_| ApiError::BadRequest("Invalid ID format".to_owned()))
}

fn refresh_cookie(token: String) -> Cookie<'static> {
    Cookie::build((REFRESH_COOKIE, token))
        .http_only(true)
        .path("/")
        .build()
}

/// Public view of an account. Never carries hashes or reset state.
#[derive(Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct AccountSummary {
    pub id: Uuid,
    pub name: String,
    pub email: String,
    pub image: Option<String>,
    pub role: String,
    pub phone: Option<String>,
    pub country_code: Option<String>,
    pub provider: Option<String>,
    pub designation: Option<String>,
    pub status: String,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub updated_at: chrono::DateTime<chrono::Utc>,
}

impl From<StoredAccount> for AccountSummary {
    fn from(account: StoredAccount) -> Self {
        Self {
            id: account.id,
            name: account.name,
            email: account.email,
            image: account.image,
            role: account.role,
            phone: account.phone,
            country_code: account.country_code,
            provider: account.provider,
            designation: account.designation,
            status: account.status,
            created_at: account.created_at,
            updated_at: account.updated_at,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionData {
    pub user: AccountSummary,
    pub access_token: String,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenData {
    pub access_token: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct AccountData {
    pub user: AccountSummary,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct AccountListData {
    pub users: Vec<AccountSummary>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterRequest {
    pub name: Option<String>,
    pub email: Option<String>,
    pub password: Option<String>,
    pub role: Option<String>,
    pub image: Option<String>,
    pub phone: Option<String>,
    pub country_code: Option<String>,
    pub provider: Option<String>,
    pub designation: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct LoginRequest {
    pub email: Option<String>,
    pub password: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangePasswordRequest {
    pub password: Option<String>,
    pub new_password: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ForgetPasswordRequest {
    pub email: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct VerifyCodeRequest {
    pub token: Option<String>,
    pub otp: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResetPasswordRequest {
    pub token: Option<String>,
    pub email: Option<String>,
    pub new_password: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct UpdateProfileRequest {
    pub name: Option<String>,
    pub image: Option<String>,
    pub designation: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct DeleteAccountRequest {
    pub email: Option<String>,
    pub password: Option<String>,
}

/// Creates the account router for one realm.
///
/// # Type Parameters
///
/// * `D` - Document store implementation
/// * `U` - Account storage implementation
/// * `M` - Mail transport implementation
pub fn account_routes<D, U, M>(realm: Realm) -> Router<AppState<D, U, M>>
where
    D: DocumentStore,
    U: UserStorage,
    M: Mailer,
{
    let router = Router::new()
        .route("/register", post(register::<D, U, M>))
        .route("/login", post(login::<D, U, M>))
        .route("/refresh-token", post(refresh_token::<D, U, M>))
        .route("/forget-password", post(forget_password::<D, U, M>))
        .route("/verify-otp", post(verify_otp::<D, U, M>))
        .route("/reset-password", post(reset_password::<D, U, M>))
        .route("/change-password/{id}", post(change_password::<D, U, M>))
        .route("/all", get(list_accounts::<D, U, M>))
        .route("/profile/{id}", get(get_account::<D, U, M>))
        .route("/update/{id}", put(update_account::<D, U, M>))
        .route("/delete", delete(delete_account::<D, U, M>));

    let router = match realm {
        Realm::Admin => router.route("/{id}", get(get_account::<D, U, M>)),
        Realm::User => router,
    };

    router.layer(Extension(realm))
}

/// Issues an access token and a fresh refresh token, persisting the latter.
async fn open_session<D, U, M>(
    state: &AppState<D, U, M>,
    realm: Realm,
    account: &StoredAccount,
) -> Result<(String, String), ApiError>
where
    U: UserStorage,
{
    let now = state.auth.clock().now();
    let signer = state.auth.signer();
    let access_token = signer.sign_access(account, realm, now)?;
    let refresh_token = signer.sign_refresh(account, realm, now)?;
    state
        .accounts(realm)
        .set_refresh_token(account.id, Some(&refresh_token))
        .await?;
    Ok((access_token, refresh_token))
}

/// POST /register
///
/// Creates an account and logs it in. Admin accounts are created only by an
/// admin or with the bootstrap key.
#[tracing::instrument(skip_all, fields(realm = %realm))]
async fn register<D, U, M>(
    State(state): State<AppState<D, U, M>>,
    Extension(realm): Extension<Realm>,
    _allowed: MayRegister,
    jar: CookieJar,
    JsonBody(payload): JsonBody<RegisterRequest>,
) -> Result<impl IntoResponse, ApiError>
where
    D: DocumentStore,
    U: UserStorage,
    M: Mailer,
{
    let mut checks = Checks::default();
    let name = checks.required("name", &payload.name);
    let email = checks.email(&payload.email);
    let password = checks.secret("password", &payload.password);
    let role = match realm {
        Realm::Admin => checks.required("role", &payload.role).to_owned(),
        Realm::User => realm.default_role().to_owned(),
    };
    checks.image(&payload.image);
    checks.finish()?;

    let account = state
        .accounts(realm)
        .create_account(NewAccount {
            name: name.to_owned(),
            email: email.to_owned(),
            password_hash: hash_secret(password)
                .map_err(|e| ApiError::Internal(e.to_string()))?,
            role,
            phone: payload.phone,
            country_code: payload.country_code,
            image: payload.image,
            provider: payload.provider,
            designation: payload.designation,
            refresh_token: None,
        })
        .await?;

    let (access_token, refresh_token) = open_session(&state, realm, &account).await?;
    tracing::info!(account_id = %account.id, "Registered account");

    Ok((
        jar.add(refresh_cookie(refresh_token)),
        ApiResponse::ok(
            format!("{} registered successfully", realm.label()),
            SessionData {
                user: account.into(),
                access_token,
            },
        ),
    ))
}

/// POST /login
#[tracing::instrument(skip_all, fields(realm = %realm))]
async fn login<D, U, M>(
    State(state): State<AppState<D, U, M>>,
    Extension(realm): Extension<Realm>,
    jar: CookieJar,
    JsonBody(payload): JsonBody<LoginRequest>,
) -> Result<impl IntoResponse, ApiError>
where
    D: DocumentStore,
    U: UserStorage,
    M: Mailer,
{
    let mut checks = Checks::default();
    let email = checks.email(&payload.email);
    let password = checks.secret("password", &payload.password);
    checks.finish()?;

    let invalid = || ApiError::Unauthorized("Invalid email or password".to_owned());
    let account = state
        .accounts(realm)
        .find_by_email(email)
        .await?
        .ok_or_else(invalid)?;
    let matches = verify_secret(password, &account.password_hash)
        .map_err(|e| ApiError::Internal(e.to_string()))?;
    if !matches {
        tracing::warn!(account_id = %account.id, "Rejected login");
        return Err(invalid());
    }

    let (access_token, refresh_token) = open_session(&state, realm, &account).await?;

    Ok((
        jar.add(refresh_cookie(refresh_token)),
        ApiResponse::ok(
            "Login successful",
            SessionData {
                user: account.into(),
                access_token,
            },
        ),
    ))
}

/// POST /refresh-token
///
/// Reads the refresh token from the `jwt` cookie.
#[tracing::instrument(skip_all, fields(realm = %realm))]
async fn refresh_token<D, U, M>(
    State(state): State<AppState<D, U, M>>,
    Extension(realm): Extension<Realm>,
    jar: CookieJar,
) -> Result<impl IntoResponse, ApiError>
where
    D: DocumentStore,
    U: UserStorage,
    M: Mailer,
{
    let token = jar
        .get(REFRESH_COOKIE)
        .map(|cookie| cookie.value().to_owned())
        .filter(|value| !value.is_empty())
        .ok_or_else(|| ApiError::Unauthorized("Unauthorized: Missing refresh token".to_owned()))?;

    let account = state
        .accounts(realm)
        .find_by_refresh_token(&token)
        .await?
        .ok_or_else(|| ApiError::Forbidden("Forbidden access: User not found".to_owned()))?;

    let now = state.auth.clock().now();
    let invalid = || ApiError::Forbidden("Forbidden access: Invalid refresh token".to_owned());
    let claims = state
        .auth
        .signer()
        .verify_refresh(&token, now)
        .map_err(|_| invalid())?;
    if claims.email != account.email || claims.realm != realm {
        return Err(invalid());
    }

    let access_token = state.auth.signer().sign_access(&account, realm, now)?;
    Ok(ApiResponse::ok(
        "Refresh token sent successfully",
        TokenData { access_token },
    ))
}

/// POST /forget-password
///
/// Mails a reset code and returns the reset token the verify step needs.
#[tracing::instrument(skip_all, fields(realm = %realm))]
async fn forget_password<D, U, M>(
    State(state): State<AppState<D, U, M>>,
    Extension(realm): Extension<Realm>,
    JsonBody(payload): JsonBody<ForgetPasswordRequest>,
) -> Result<impl IntoResponse, ApiError>
where
    D: DocumentStore,
    U: UserStorage,
    M: Mailer,
{
    let mut checks = Checks::default();
    let email = checks.email(&payload.email);
    checks.finish()?;

    let token = state.reset_flow(realm).request(email).await?;
    Ok(ApiResponse::ok(
        "OTP sent successfully",
        TokenData {
            access_token: token,
        },
    ))
}

/// POST /verify-otp
///
/// A wrong or stale code is not an error: the envelope says `success: false`.
#[tracing::instrument(skip_all, fields(realm = %realm))]
async fn verify_otp<D, U, M>(
    State(state): State<AppState<D, U, M>>,
    Extension(realm): Extension<Realm>,
    JsonBody(payload): JsonBody<VerifyCodeRequest>,
) -> Result<impl IntoResponse, ApiError>
where
    D: DocumentStore,
    U: UserStorage,
    M: Mailer,
{
    let mut checks = Checks::default();
    let token = checks.required("token", &payload.token);
    let otp = checks.required("otp", &payload.otp);
    checks.finish()?;

    let response = match state.reset_flow(realm).verify(token, otp).await? {
        VerifyOutcome::Verified => ApiResponse::message(true, "OTP verified successfully"),
        VerifyOutcome::Rejected => ApiResponse::message(false, "OTP expired or invalid, try again"),
    };
    Ok(response)
}

/// POST /reset-password
///
/// Takes the reset token from forget-password; its code must be verified.
#[tracing::instrument(skip_all, fields(realm = %realm))]
async fn reset_password<D, U, M>(
    State(state): State<AppState<D, U, M>>,
    Extension(realm): Extension<Realm>,
    JsonBody(payload): JsonBody<ResetPasswordRequest>,
) -> Result<impl IntoResponse, ApiError>
where
    D: DocumentStore,
    U: UserStorage,
    M: Mailer,
{
    let mut checks = Checks::default();
    let token = checks.required("token", &payload.token);
    let email = checks.email(&payload.email);
    let new_password = checks.new_password("newPassword", &payload.new_password);
    checks.finish()?;

    let reset = state
        .reset_flow(realm)
        .commit(token, email, new_password)
        .await?;
    Ok(ApiResponse::ok(
        "Password reset successfully",
        SessionData {
            user: reset.account.into(),
            access_token: reset.access_token,
        },
    ))
}

/// POST /change-password/{id}
#[tracing::instrument(skip_all, fields(realm = %realm, id = %id))]
async fn change_password<D, U, M>(
    State(state): State<AppState<D, U, M>>,
    Extension(realm): Extension<Realm>,
    auth: RequireAuth,
    Path(id): Path<String>,
    JsonBody(payload): JsonBody<ChangePasswordRequest>,
) -> Result<impl IntoResponse, ApiError>
where
    D: DocumentStore,
    U: UserStorage,
    M: Mailer,
{
    let id = parse_id(&id)?;
    if !auth.may_manage(realm, id) {
        return Err(ApiError::Forbidden(
            "Forbidden: Not allowed to change this password".to_owned(),
        ));
    }

    let mut checks = Checks::default();
    let password = checks.secret("password", &payload.password);
    let new_password = checks.new_password("newPassword", &payload.new_password);
    checks.finish()?;

    let accounts = state.accounts(realm);
    let account = accounts
        .find_by_id(id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("{} not found", realm.label())))?;

    let verify = |secret: &str| {
        verify_secret(secret, &account.password_hash)
            .map_err(|e| ApiError::Internal(e.to_string()))
    };
    if verify(new_password)? {
        return Err(ApiError::BadRequest(
            "New password must be different from the old password".to_owned(),
        ));
    }
    if !verify(password)? {
        return Err(ApiError::Unauthorized("Invalid old password".to_owned()));
    }

    let hash = hash_secret(new_password).map_err(|e| ApiError::Internal(e.to_string()))?;
    accounts.set_password(id, &hash).await?;
    tracing::info!("Password changed");

    let access_token = state
        .auth
        .signer()
        .sign_access(&account, realm, state.auth.clock().now())?;
    Ok(ApiResponse::ok(
        "Password changed successfully",
        TokenData { access_token },
    ))
}

/// GET /all
#[tracing::instrument(skip_all, fields(realm = %realm))]
async fn list_accounts<D, U, M>(
    State(state): State<AppState<D, U, M>>,
    Extension(realm): Extension<Realm>,
    _auth: RequireAuth,
) -> Result<impl IntoResponse, ApiError>
where
    D: DocumentStore,
    U: UserStorage,
    M: Mailer,
{
    let users = state
        .accounts(realm)
        .list_accounts()
        .await?
        .into_iter()
        .map(AccountSummary::from)
        .collect();

    Ok(ApiResponse::ok(
        format!("{}s retrieved successfully", realm.label()),
        AccountListData { users },
    ))
}

/// GET /profile/{id}, and GET /{id} for admins.
#[tracing::instrument(skip_all, fields(realm = %realm, id = %id))]
async fn get_account<D, U, M>(
    State(state): State<AppState<D, U, M>>,
    Extension(realm): Extension<Realm>,
    _auth: RequireAuth,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError>
where
    D: DocumentStore,
    U: UserStorage,
    M: Mailer,
{
    let id = parse_id(&id)?;
    let account = state
        .accounts(realm)
        .find_by_id(id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("{} not found", realm.label())))?;

    Ok(ApiResponse::ok(
        format!("{} profile retrieved successfully", realm.label()),
        AccountData {
            user: account.into(),
        },
    ))
}

/// PUT /update/{id}
#[tracing::instrument(skip_all, fields(realm = %realm, id = %id))]
async fn update_account<D, U, M>(
    State(state): State<AppState<D, U, M>>,
    Extension(realm): Extension<Realm>,
    auth: RequireAuth,
    Path(id): Path<String>,
    JsonBody(payload): JsonBody<UpdateProfileRequest>,
) -> Result<impl IntoResponse, ApiError>
where
    D: DocumentStore,
    U: UserStorage,
    M: Mailer,
{
    let id = parse_id(&id)?;
    if !auth.may_manage(realm, id) {
        return Err(ApiError::Forbidden(
            "Forbidden: Not allowed to update this profile".to_owned(),
        ));
    }

    let mut checks = Checks::default();
    let name = checks.required("name", &payload.name);
    checks.image(&payload.image);
    checks.finish()?;

    let account = state
        .accounts(realm)
        .update_profile(
            id,
            ProfileUpdate {
                name: name.to_owned(),
                image: payload.image,
                designation: payload.designation.filter(|d| !d.trim().is_empty()),
            },
        )
        .await?;

    Ok(ApiResponse::ok(
        format!("{} profile updated successfully", realm.label()),
        AccountData {
            user: account.into(),
        },
    ))
}

/// DELETE /delete
///
/// Requires the account password as confirmation.
#[tracing::instrument(skip_all, fields(realm = %realm))]
async fn delete_account<D, U, M>(
    State(state): State<AppState<D, U, M>>,
    Extension(realm): Extension<Realm>,
    JsonBody(payload): JsonBody<DeleteAccountRequest>,
) -> Result<impl IntoResponse, ApiError>
where
    D: DocumentStore,
    U: UserStorage,
    M: Mailer,
{
    let mut checks = Checks::default();
    let email = checks.email(&payload.email);
    let password = checks.secret("password", &payload.password);
    checks.finish()?;

    let accounts = state.accounts(realm);
    let account = accounts
        .find_by_email(email)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("{} not found", realm.label())))?;
    let matches = verify_secret(password, &account.password_hash)
        .map_err(|e| ApiError::Internal(e.to_string()))?;
    if !matches {
        return Err(ApiError::Unauthorized("Invalid password".to_owned()));
    }

    accounts.delete_account(account.id).await?;
    tracing::info!(account_id = %account.id, "Deleted account");

    Ok(ApiResponse::ok(
        format!("{} deleted successfully", realm.label()),
        json!({ "email": account.email }),
    ))
}

impl<D, U, M> AppState<D, U, M>
where
    U: UserStorage,
    M: Mailer,
{
    fn reset_flow(&self, realm: Realm) -> PasswordResetFlow<'_, U, M> {
        PasswordResetFlow::new(
            self.accounts(realm),
            &self.mailer,
            self.auth.signer(),
            self.auth.clock(),
            realm,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn email_format() {
        assert!(is_email("user@example.com"));
        assert!(!is_email("user@example"));
        assert!(!is_email("user example.com"));
        assert!(!is_email("@example.com"));
    }

    #[test]
    fn image_must_be_http_url() {
        assert!(is_http_url("https://cdn.example.com/a.png"));
        assert!(is_http_url("http://example.com"));
        assert!(!is_http_url("ftp://example.com/a.png"));
        assert!(!is_http_url("https://"));
        assert!(!is_http_url("not a url"));
    }

    #[test]
    fn checks_collect_every_failure() {
        let mut checks = Checks::default();
        checks.required("name", &None);
        checks.email(&Some("nope".to_owned()));
        checks.new_password("newPassword", &Some("123".to_owned()));
        checks.image(&Some("file.png".to_owned()));

        let fields: Vec<_> = checks.errors.iter().map(|e| e.field.clone()).collect();
        assert_eq!(fields, ["name", "email", "newPassword", "image"]);
        assert!(checks.finish().is_err());
    }

    #[test]
    fn required_trims() {
        let mut checks = Checks::default();
        let value = Some("  Ada ".to_owned());
        assert_eq!(checks.required("name", &value), "Ada");
        assert!(checks.finish().is_ok());
    }

    #[test]
    fn summary_hides_secrets() {
        let account = StoredAccount::new(NewAccount {
            name: "Ada".to_owned(),
            email: "ada@example.com".to_owned(),
            password_hash: "secret-hash".to_owned(),
            role: "user".to_owned(),
            country_code: Some("+44".to_owned()),
            ..NewAccount::default()
        });
        let value = serde_json::to_value(AccountSummary::from(account)).unwrap();
        assert!(value.get("passwordHash").is_none());
        assert!(value.get("password_hash").is_none());
        assert_eq!(value["countryCode"], "+44");
    }
}
