use std::collections::BTreeMap;

use axum::{
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;
use validator::{ValidationErrors, ValidationErrorsKind};

/// Field name → messages, serialized as `{"field": ["message", ...]}`.
pub type FieldErrors = BTreeMap<String, Vec<String>>;

const WWW_AUTHENTICATE: &str = "Bearer realm=\"api\"";

#[derive(Debug, Error)]
pub enum AppError {
    #[error("Internal Server Error: {0}")]
    InternalServerError(String),

    #[error("Database error")]
    DatabaseError(sqlx::Error),

    #[error("Authentication error")]
    JwtError(jsonwebtoken::errors::Error),

    #[error("Authentication error")]
    PasswordError(bcrypt::BcryptError),

    #[error("{0}")]
    BadRequest(String),

    #[error("Invalid HTTP_HOST header: '{0}'.")]
    DisallowedHost(String),

    #[error("Validation error")]
    ValidationError(FieldErrors),

    #[error("Authentication credentials were not provided.")]
    NotAuthenticated,

    /// Signature, expiry or token type check failed.
    #[error("Token is invalid or expired")]
    InvalidToken,

    #[error("{detail}")]
    AuthenticationFailed {
        detail: &'static str,
        code: Option<&'static str>,
    },

    #[error("{0}")]
    NotFound(String),
}

impl AppError {
    /// Single-field validation failure.
    pub fn field(field: &str, message: impl Into<String>) -> Self {
        let mut errors = FieldErrors::new();
        errors.insert(field.to_string(), vec![message.into()]);
        AppError::ValidationError(errors)
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, body) = match self {
            AppError::InternalServerError(msg) => {
                tracing::error!("Internal server error: {}", msg);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    json!({ "detail": "A server error occurred." }),
                )
            }
            AppError::DatabaseError(e) => {
                tracing::error!("Database error: {}", e);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    json!({ "detail": "A server error occurred." }),
                )
            }
            AppError::JwtError(e) => {
                tracing::error!("JWT encoding error: {}", e);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    json!({ "detail": "A server error occurred." }),
                )
            }
            AppError::PasswordError(e) => {
                tracing::error!("Password hashing error: {}", e);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    json!({ "detail": "A server error occurred." }),
                )
            }
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, json!({ "detail": msg })),
            AppError::DisallowedHost(ref host) => {
                tracing::warn!("Rejected request for disallowed host {:?}", host);
                (StatusCode::BAD_REQUEST, json!({ "detail": self.to_string() }))
            }
            AppError::ValidationError(errors) => (StatusCode::BAD_REQUEST, json!(errors)),
            AppError::NotAuthenticated => {
                return unauthorized(json!({ "detail": self.to_string() }));
            }
            AppError::InvalidToken => {
                return unauthorized(json!({
                    "detail": "Given token not valid for any token type",
                    "code": "token_not_valid",
                }));
            }
            AppError::AuthenticationFailed { detail, code } => {
                let body = match code {
                    Some(code) => json!({ "detail": detail, "code": code }),
                    None => json!({ "detail": detail }),
                };
                return unauthorized(body);
            }
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, json!({ "detail": msg })),
        };

        (status, Json(body)).into_response()
    }
}

fn unauthorized(body: serde_json::Value) -> Response {
    (
        StatusCode::UNAUTHORIZED,
        [(header::WWW_AUTHENTICATE, HeaderValue::from_static(WWW_AUTHENTICATE))],
        Json(body),
    )
        .into_response()
}

/// Flattens `validator` output into field → messages. Nested structs are
/// reported under their own field name.
pub fn field_errors(errors: &ValidationErrors) -> FieldErrors {
    let mut out = FieldErrors::new();
    for (field, kind) in errors.errors() {
        let messages = out.entry(field.to_string()).or_default();
        match kind {
            ValidationErrorsKind::Field(errs) => {
                messages.extend(errs.iter().map(|e| {
                    e.message
                        .as_ref()
                        .map(|m| m.to_string())
                        .unwrap_or_else(|| format!("Invalid value ({}).", e.code))
                }));
            }
            ValidationErrorsKind::Struct(nested) => {
                messages.extend(field_errors(nested).into_values().flatten());
            }
            ValidationErrorsKind::List(items) => {
                for nested in items.values() {
                    messages.extend(field_errors(nested).into_values().flatten());
                }
            }
        }
    }
    out
}

// Add From implementations for easy '?' conversion in handlers
impl From<sqlx::Error> for AppError {
    fn from(e: sqlx::Error) -> Self {
        AppError::DatabaseError(e)
    }
}

impl From<ValidationErrors> for AppError {
    fn from(errors: ValidationErrors) -> Self {
        AppError::ValidationError(field_errors(&errors))
    }
}

impl From<jsonwebtoken::errors::Error> for AppError {
    fn from(e: jsonwebtoken::errors::Error) -> Self {
        AppError::JwtError(e)
    }
}

impl From<bcrypt::BcryptError> for AppError {
    fn from(e: bcrypt::BcryptError) -> Self {
        AppError::PasswordError(e)
    }
}
