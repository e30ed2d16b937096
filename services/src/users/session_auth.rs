//! Bearer access-token authentication for protected routes.
//!
//! # Usage
//!
//! ```rust,ignore
//! use manna_services::users::session_auth::RequireAuth;
//!
//! async fn protected_handler(auth: RequireAuth) -> impl IntoResponse {
//!     format!("Hello, {}!", auth.email())
//! }
//! ```
//!
//! # Token Requirements
//!
//! The token must be signed with `JWT_SECRET_ACCESS`, carry our issuer and
//! not be expired according to the application clock. A missing header is
//! rejected with 401, anything else wrong with the token with 403.
//!
//! Admin registration is gated by [`MayRegister`]: an admin token, or the
//! configured bootstrap key in the `x-bootstrap-key` header.

use axum::{
    extract::{FromRef, FromRequestParts},
    http::{HeaderMap, HeaderName, header::AUTHORIZATION, request::Parts},
};
use std::sync::Arc;
use uuid::Uuid;

use super::storage::Realm;
use super::tokens::{AccessClaims, TokenSigner};
use crate::clock::Clock;
use crate::config::Config;
use crate::response::ApiError;

pub const BOOTSTRAP_KEY_HEADER: HeaderName = HeaderName::from_static("x-bootstrap-key");

/// Everything needed to check an access token; lives in the app state.
#[derive(Clone)]
pub struct Authenticator {
    signer: TokenSigner,
    clock: Arc<dyn Clock>,
}

impl Authenticator {
    pub fn new(signer: TokenSigner, clock: Arc<dyn Clock>) -> Self {
        Self { signer, clock }
    }

    pub fn signer(&self) -> &TokenSigner {
        &self.signer
    }

    pub fn clock(&self) -> &dyn Clock {
        self.clock.as_ref()
    }
}

/// Authenticated account context extracted from a valid access token.
#[derive(Debug, Clone)]
pub struct RequireAuth {
    claims: AccessClaims,
}

impl RequireAuth {
    /// The account id from the `sub` claim.
    pub fn account_id(&self) -> Option<Uuid> {
        Uuid::parse_str(&self.claims.sub).ok()
    }

    pub fn email(&self) -> &str {
        &self.claims.email
    }

    pub fn realm(&self) -> Realm {
        self.claims.realm
    }

    pub fn claims(&self) -> &AccessClaims {
        &self.claims
    }

    /// Whether this caller may act on the account `id` of `realm`: admins may
    /// act on anyone, everyone else only on themselves.
    pub fn may_manage(&self, realm: Realm, id: Uuid) -> bool {
        self.realm() == Realm::Admin || (self.realm() == realm && self.account_id() == Some(id))
    }
}

/// Like [`RequireAuth`], but only admin-realm tokens pass (403 otherwise).
#[derive(Debug, Clone)]
pub struct RequireAdmin(pub RequireAuth);

/// Permission to call `/register` in the realm the route is mounted for.
///
/// The user realm is open. The admin realm needs an admin access token or the
/// `ADMIN_BOOTSTRAP_KEY` presented in [`BOOTSTRAP_KEY_HEADER`].
#[derive(Debug, Clone, Copy)]
pub struct MayRegister;

fn presents_bootstrap_key(parts: &Parts) -> bool {
    let expected = parts
        .extensions
        .get::<Config>()
        .and_then(Config::admin_bootstrap_key);
    let presented = parts
        .headers
        .get(&BOOTSTRAP_KEY_HEADER)
        .and_then(|value| value.to_str().ok());

    matches!((expected, presented), (Some(expected), Some(presented)) if expected == presented)
}

/// Extract the Bearer token from the Authorization header.
fn extract_bearer_token(headers: &HeaderMap) -> Option<&str> {
    let header_value = headers.get(AUTHORIZATION)?;
    let header_str = header_value.to_str().ok()?;

    let stripped = header_str.strip_prefix("Bearer ")?;
    if stripped.is_empty() {
        return None;
    }
    Some(stripped)
}

impl<S> FromRequestParts<S> for RequireAuth
where
    Authenticator: FromRef<S>,
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        if parts.headers.get(AUTHORIZATION).is_none() {
            return Err(ApiError::Unauthorized(
                "Unauthorized: Missing access token".to_owned(),
            ));
        }
        let token = extract_bearer_token(&parts.headers).ok_or_else(|| {
            ApiError::Forbidden(
                "Forbidden: Authorization header must be in format: Bearer <token>".to_owned(),
            )
        })?;

        let authenticator = Authenticator::from_ref(state);
        let claims = authenticator
            .signer
            .verify_access(token, authenticator.clock.now())
            .map_err(|e| ApiError::Forbidden(format!("Forbidden: {e}")))?;

        Ok(Self { claims })
    }
}

impl<S> FromRequestParts<S> for RequireAdmin
where
    Authenticator: FromRef<S>,
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let auth = RequireAuth::from_request_parts(parts, state).await?;
        if auth.realm() != Realm::Admin {
            return Err(ApiError::Forbidden(
                "Forbidden: Admin access required".to_owned(),
            ));
        }
        Ok(Self(auth))
    }
}

impl<S> FromRequestParts<S> for MayRegister
where
    Authenticator: FromRef<S>,
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        if parts.extensions.get::<Realm>() != Some(&Realm::Admin) {
            return Ok(Self);
        }
        if presents_bootstrap_key(parts) {
            tracing::info!("Admin registration authorized by bootstrap key");
            return Ok(Self);
        }
        RequireAdmin::from_request_parts(parts, state).await?;
        Ok(Self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::{ManualClock, SystemClock};
    use crate::users::storage::{NewAccount, StoredAccount};
    use axum::http::{Request, StatusCode};
    use chrono::Duration;

    fn authenticator(clock: Arc<dyn Clock>) -> Authenticator {
        Authenticator::new(TokenSigner::new("access", "refresh", "reset"), clock)
    }

    fn account() -> StoredAccount {
        StoredAccount::new(NewAccount {
            name: "Eli".to_owned(),
            email: "eli@example.com".to_owned(),
            role: "admin".to_owned(),
            ..NewAccount::default()
        })
    }

    fn parts(authorization: Option<&str>) -> Parts {
        let mut builder = Request::builder().uri("/");
        if let Some(value) = authorization {
            builder = builder.header(AUTHORIZATION, value);
        }
        builder.body(()).unwrap().into_parts().0
    }

    #[test]
    fn test_extract_bearer_token_valid() {
        let parts = parts(Some("Bearer my-token-123"));
        assert_eq!(extract_bearer_token(&parts.headers), Some("my-token-123"));
    }

    #[test]
    fn test_extract_bearer_token_no_bearer_prefix() {
        let parts = parts(Some("my-token-123"));
        assert_eq!(extract_bearer_token(&parts.headers), None);
    }

    #[test]
    fn test_extract_bearer_token_empty_token() {
        let parts = parts(Some("Bearer "));
        assert_eq!(extract_bearer_token(&parts.headers), None);
    }

    #[tokio::test]
    async fn test_missing_header_is_unauthorized() {
        let auth = authenticator(Arc::new(SystemClock));
        let err = RequireAuth::from_request_parts(&mut parts(None), &auth)
            .await
            .unwrap_err();
        assert_eq!(err.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_bad_token_is_forbidden() {
        let auth = authenticator(Arc::new(SystemClock));
        let err = RequireAuth::from_request_parts(&mut parts(Some("Bearer nope")), &auth)
            .await
            .unwrap_err();
        assert_eq!(err.status(), StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn test_valid_token_is_accepted_until_expiry() {
        let clock = ManualClock::default();
        let auth = authenticator(Arc::new(clock.clone()));
        let account = account();
        let token = auth
            .signer()
            .sign_access(&account, Realm::Admin, clock.now())
            .unwrap();
        let header = format!("Bearer {token}");

        let extracted = RequireAuth::from_request_parts(&mut parts(Some(&header)), &auth)
            .await
            .unwrap();
        assert_eq!(extracted.email(), "eli@example.com");
        assert_eq!(extracted.account_id(), Some(account.id));

        clock.advance(Duration::hours(2));
        let err = RequireAuth::from_request_parts(&mut parts(Some(&header)), &auth)
            .await
            .unwrap_err();
        assert_eq!(err.status(), StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn test_require_admin_rejects_user_realm() {
        let clock = ManualClock::default();
        let auth = authenticator(Arc::new(clock.clone()));
        let token = auth
            .signer()
            .sign_access(&account(), Realm::User, clock.now())
            .unwrap();
        let header = format!("Bearer {token}");

        let err = RequireAdmin::from_request_parts(&mut parts(Some(&header)), &auth)
            .await
            .unwrap_err();
        assert_eq!(err.status(), StatusCode::FORBIDDEN);
    }

    fn register_parts(realm: Realm, authorization: Option<&str>, bootstrap: Option<&str>) -> Parts {
        let mut parts = parts(authorization);
        if let Some(key) = bootstrap {
            parts
                .headers
                .insert(BOOTSTRAP_KEY_HEADER, key.parse().unwrap());
        }
        parts.extensions.insert(realm);
        parts
            .extensions
            .insert(Config::new_for_test_with_admin_bootstrap_key("first-admin"));
        parts
    }

    #[tokio::test]
    async fn test_user_registration_is_open() {
        let auth = authenticator(Arc::new(SystemClock));
        let mut parts = register_parts(Realm::User, None, None);
        assert!(MayRegister::from_request_parts(&mut parts, &auth).await.is_ok());
    }

    #[tokio::test]
    async fn test_admin_registration_needs_credentials() {
        let clock = ManualClock::default();
        let auth = authenticator(Arc::new(clock.clone()));

        for (bootstrap, status) in [
            (None, StatusCode::UNAUTHORIZED),
            (Some("guess"), StatusCode::UNAUTHORIZED),
        ] {
            let mut parts = register_parts(Realm::Admin, None, bootstrap);
            let err = MayRegister::from_request_parts(&mut parts, &auth)
                .await
                .unwrap_err();
            assert_eq!(err.status(), status);
        }

        let user_token = auth
            .signer()
            .sign_access(&account(), Realm::User, clock.now())
            .unwrap();
        let header = format!("Bearer {user_token}");
        let mut parts = register_parts(Realm::Admin, Some(&header), None);
        let err = MayRegister::from_request_parts(&mut parts, &auth)
            .await
            .unwrap_err();
        assert_eq!(err.status(), StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn test_admin_registration_with_token_or_bootstrap_key() {
        let clock = ManualClock::default();
        let auth = authenticator(Arc::new(clock.clone()));

        let mut parts = register_parts(Realm::Admin, None, Some("first-admin"));
        assert!(MayRegister::from_request_parts(&mut parts, &auth).await.is_ok());

        let admin_token = auth
            .signer()
            .sign_access(&account(), Realm::Admin, clock.now())
            .unwrap();
        let header = format!("Bearer {admin_token}");
        let mut parts = register_parts(Realm::Admin, Some(&header), None);
        assert!(MayRegister::from_request_parts(&mut parts, &auth).await.is_ok());
    }

    #[test]
    fn test_bootstrap_key_is_ignored_when_unset() {
        let mut parts = parts(None);
        parts
            .headers
            .insert(BOOTSTRAP_KEY_HEADER, "anything".parse().unwrap());
        parts.extensions.insert(Config::new_for_test());
        assert!(!presents_bootstrap_key(&parts));
    }

    #[test]
    fn test_may_manage() {
        let account = account();
        let claims = |realm| AccessClaims {
            sub: account.id.to_string(),
            email: account.email.clone(),
            role: account.role.clone(),
            realm,
            iat: 0,
            exp: 1,
            iss: "manna".to_owned(),
        };

        let user = RequireAuth {
            claims: claims(Realm::User),
        };
        assert!(user.may_manage(Realm::User, account.id));
        assert!(!user.may_manage(Realm::User, Uuid::new_v4()));
        assert!(!user.may_manage(Realm::Admin, account.id));

        let admin = RequireAuth {
            claims: claims(Realm::Admin),
        };
        assert!(admin.may_manage(Realm::User, Uuid::new_v4()));
    }
}
