use crate::clock::{Clock, SystemClock};
use crate::config::Config;
use crate::documents::DocumentStore;
use crate::mail::Mailer;
use crate::response::ApiResponse;
use crate::users::{Authenticator, Realm, TokenSigner, UserStorage};
use axum::{
    Router,
    extract::{Extension, FromRef, Request, State},
    http::{HeaderName, HeaderValue, Method, StatusCode, header},
    middleware as axum_middleware,
    response::IntoResponse,
    routing::{any, get},
};
use std::sync::Arc;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

pub mod clock;
pub mod config;
pub mod content;
pub mod database;
pub mod documents;
pub mod listing;
pub mod mail;
pub mod middleware;
pub mod response;
pub mod telemetry;
pub mod users;

const SERVICE_VERSION: &str = concat!(env!("CARGO_PKG_VERSION"), "+", env!("BUILD_COMMIT"));

/// Shared application state.
///
/// # Type Parameters
///
/// * `D` - Document store holding every content collection
/// * `U` - Account storage, one instance per realm
/// * `M` - Mail transport used by the password reset flow
#[derive(Clone)]
pub struct AppState<D, U, M> {
    pub documents: D,
    pub users: U,
    pub admins: U,
    pub mailer: M,
    pub auth: Authenticator,
}

impl<D, U, M> AppState<D, U, M> {
    /// Creates an `AppState` running on the system clock.
    pub fn new(documents: D, users: U, admins: U, mailer: M, signer: TokenSigner) -> Self {
        Self::with_clock(documents, users, admins, mailer, signer, Arc::new(SystemClock))
    }

    pub fn with_clock(
        documents: D,
        users: U,
        admins: U,
        mailer: M,
        signer: TokenSigner,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            documents,
            users,
            admins,
            mailer,
            auth: Authenticator::new(signer, clock),
        }
    }

    /// The account store of `realm`.
    pub fn accounts(&self, realm: Realm) -> &U {
        match realm {
            Realm::User => &self.users,
            Realm::Admin => &self.admins,
        }
    }
}

impl<D, U, M> FromRef<AppState<D, U, M>> for Authenticator {
    fn from_ref(state: &AppState<D, U, M>) -> Self {
        state.auth.clone()
    }
}

/// Builds the full application router.
///
/// `/api` carries the account routes of both realms and the content
/// collections; when an API key is configured every `/api` request must
/// present it.
pub fn routes<D, U, M>(state: AppState<D, U, M>, config: Config) -> Router
where
    D: DocumentStore,
    U: UserStorage,
    M: Mailer,
{
    let api = Router::new()
        .nest("/user", users::account_routes::<D, U, M>(Realm::User))
        .nest("/admin", users::account_routes::<D, U, M>(Realm::Admin))
        .merge(content::content_routes::<D, U, M>());

    let api = match config.api_key() {
        Some(key) => {
            let key: Arc<str> = Arc::from(key);
            api.layer(axum_middleware::from_fn(move |req, next| {
                middleware::require_api_key(Arc::clone(&key), req, next)
            }))
        }
        None => api,
    };

    Router::new()
        .route("/is-health", get(health_check::<D, U, M>))
        .nest("/api", api)
        .fallback(any(catch_all))
        .layer(cors_layer(&config))
        .layer(
            TraceLayer::new_for_http().make_span_with(|request: &Request<_>| {
                tracing::info_span!(
                    "http_request",
                    http_request.method = ?request.method(),
                    http_request.uri = ?request.uri(),
                    http_request.version = ?request.version(),
                    http_request.user_agent = ?request.headers().get(header::USER_AGENT),
                )
            }),
        )
        .layer(Extension(config))
        .with_state(state)
}

fn cors_layer(config: &Config) -> CorsLayer {
    let origins: Vec<HeaderValue> = config
        .cors_allowed_origins()
        .iter()
        .filter_map(|origin| match HeaderValue::from_str(origin) {
            Ok(value) => Some(value),
            Err(err) => {
                tracing::warn!(%origin, %err, "Ignoring invalid CORS origin");
                None
            }
        })
        .collect();

    CorsLayer::new()
        .allow_origin(origins)
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers([
            header::AUTHORIZATION,
            header::CONTENT_TYPE,
            middleware::API_KEY_HEADER,
        ])
        .allow_credentials(true)
}

async fn health_check<D, U, M>(
    State(state): State<AppState<D, U, M>>,
    Extension(config): Extension<Config>,
) -> impl IntoResponse
where
    D: DocumentStore,
    U: UserStorage,
    M: Mailer,
{
    let mut response = if state.documents.is_connected().await {
        (StatusCode::OK, "OK").into_response()
    } else {
        (StatusCode::BAD_GATEWAY, "502").into_response()
    };

    let headers = [
        ("x-service-env", config.environment().to_string()),
        ("x-service-version", SERVICE_VERSION.to_owned()),
    ];
    for (name, value) in headers {
        if let Ok(value) = HeaderValue::from_str(&value) {
            response
                .headers_mut()
                .insert(HeaderName::from_static(name), value);
        }
    }

    response
}

async fn catch_all() -> impl IntoResponse {
    (
        StatusCode::NOT_FOUND,
        ApiResponse::message(false, "Route not found"),
    )
}
