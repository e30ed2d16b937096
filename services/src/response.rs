//! The `{ success, message, data }` envelope and the boundary error type.
//!
//! Every handler returns either an [`ApiResponse`] or an [`ApiError`]; the
//! latter owns the mapping from module errors to HTTP status codes and is
//! the only place internal faults get logged.

use axum::{
    Json,
    extract::{FromRequest, Request, rejection::JsonRejection},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use serde_json::json;

use crate::documents::StorageError;
use crate::listing::ListError;
use crate::users::reset::ResetError;
use crate::users::storage::UserStorageError;
use crate::users::tokens::TokenError;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub message: String,
    pub data: Option<T>,
}

impl<T> ApiResponse<T> {
    pub fn ok(message: impl Into<String>, data: T) -> Self {
        Self {
            success: true,
            message: message.into(),
            data: Some(data),
        }
    }

    /// A 201 response carrying the created resource.
    pub fn created(message: impl Into<String>, data: T) -> (StatusCode, Self) {
        (StatusCode::CREATED, Self::ok(message, data))
    }
}

impl ApiResponse<serde_json::Value> {
    pub fn message(success: bool, message: impl Into<String>) -> Self {
        Self {
            success,
            message: message.into(),
            data: None,
        }
    }
}

impl<T: Serialize> IntoResponse for ApiResponse<T> {
    fn into_response(self) -> Response {
        Json(self).into_response()
    }
}

/// A single rejected input field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldError {
    pub field: String,
    pub message: String,
}

impl FieldError {
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("{message}")]
    Validation {
        message: String,
        errors: Vec<FieldError>,
    },

    #[error("{0}")]
    BadRequest(String),

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    Unauthorized(String),

    #[error("{0}")]
    Forbidden(String),

    #[error("Mail delivery failed: {0}")]
    Delivery(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl ApiError {
    pub fn validation(errors: Vec<FieldError>) -> Self {
        Self::Validation {
            message: "Validation failed".to_owned(),
            errors,
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            Self::Validation { .. } => StatusCode::UNPROCESSABLE_ENTITY,
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            Self::Forbidden(_) => StatusCode::FORBIDDEN,
            Self::Delivery(_) => StatusCode::BAD_GATEWAY,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = match self {
            Self::Validation { message, errors } => ApiResponse {
                success: false,
                message,
                data: Some(json!({ "errors": errors })),
            },
            Self::Delivery(reason) => {
                tracing::error!(%reason, "mail delivery failed");
                ApiResponse::message(false, "Unable to send email, try again later")
            }
            Self::Internal(reason) => {
                tracing::error!(%reason, "request failed");
                ApiResponse::message(false, "Something went wrong")
            }
            Self::BadRequest(message)
            | Self::NotFound(message)
            | Self::Unauthorized(message)
            | Self::Forbidden(message) => ApiResponse::message(false, message),
        };

        (status, Json(body)).into_response()
    }
}

impl From<StorageError> for ApiError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::InvalidPattern(_) => Self::BadRequest(err.to_string()),
            StorageError::Backend(_) => Self::Internal(err.to_string()),
        }
    }
}

impl From<ListError> for ApiError {
    fn from(err: ListError) -> Self {
        match err {
            ListError::InvalidOption { option, reason } => {
                Self::validation(vec![FieldError::new(option, reason)])
            }
            ListError::Storage(err) => err.into(),
        }
    }
}

impl From<UserStorageError> for ApiError {
    fn from(err: UserStorageError) -> Self {
        match err {
            UserStorageError::AlreadyExists(_) => Self::Validation {
                message: "User already exists".to_owned(),
                errors: vec![FieldError::new(
                    "email",
                    "User with the same email already exists. Please choose a different email.",
                )],
            },
            UserStorageError::NotFound(_) => Self::NotFound("User not found".to_owned()),
            UserStorageError::InvalidInput(reason) => {
                Self::validation(vec![FieldError::new("body", reason)])
            }
            UserStorageError::Storage(reason) => Self::Internal(reason),
        }
    }
}

impl From<TokenError> for ApiError {
    fn from(err: TokenError) -> Self {
        match err {
            TokenError::Expired | TokenError::Invalid(_) => Self::Unauthorized(err.to_string()),
            TokenError::Signing(reason) => Self::Internal(reason),
        }
    }
}

impl From<ResetError> for ApiError {
    fn from(err: ResetError) -> Self {
        match err {
            ResetError::NotFound => Self::NotFound("User not found".to_owned()),
            ResetError::InvalidToken(_) | ResetError::Expired => {
                Self::Unauthorized(err.to_string())
            }
            ResetError::Delivery(err) => Self::Delivery(err.to_string()),
            ResetError::Storage(err) => err.into(),
            ResetError::Hashing(reason) => Self::Internal(reason),
            ResetError::Token(err) => err.into(),
        }
    }
}

/// `Json<T>` whose rejection is rendered in the response envelope.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonBody<T>(pub T);

impl<S, T> FromRequest<S> for JsonBody<T>
where
    T: DeserializeOwned,
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        match Json::<T>::from_request(req, state).await {
            Ok(Json(value)) => Ok(Self(value)),
            Err(rejection) => Err(rejection.into()),
        }
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        Self::BadRequest(rejection.body_text())
    }
}
