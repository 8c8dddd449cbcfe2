use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use jsonwebtoken::errors::ErrorKind;
use serde::Serialize;
use thiserror::Error;

use crate::config::ConfigError;

pub type AuthResult<T> = Result<T, AuthError>;

/// Every way the gate can refuse a request.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum AuthError {
    #[error("Authorization header is expected.")]
    Unauthenticated,
    #[error("{0}")]
    MalformedHeader(&'static str),
    #[error("Unable to find the appropriate key.")]
    KeyNotFound { kid: String },
    #[error("Token expired.")]
    TokenExpired,
    #[error("Incorrect claims. Please, check the audience and issuer.")]
    InvalidClaims { reason: String },
    #[error("Unable to parse authentication token.")]
    TokenUnparseable { reason: String },
    #[error("Permissions not included in JWT.")]
    PermissionsClaimMissing,
    #[error("Permission not found.")]
    PermissionDenied { permission: String },
    #[error("Unable to retrieve signing keys.")]
    KeySetUnavailable { reason: String },
    #[error("Token verification timed out.")]
    DeadlineExceeded,
    #[error("verifier misconfigured: {0}")]
    Misconfigured(#[from] ConfigError),
}

impl AuthError {
    pub(crate) const WRONG_SCHEME: &'static str = "Authorization header must start with Bearer";
    pub(crate) const TOKEN_NOT_FOUND: &'static str = "Token not found";
    pub(crate) const MISSING_KID: &'static str = "Authorization malformed.";
    pub(crate) const NOT_VISIBLE_ASCII: &'static str =
        "Authorization header must contain only visible ASCII characters";

    /// Machine-readable code for the response body.
    pub fn code(&self) -> &'static str {
        match self {
            AuthError::Unauthenticated => "authorization_header_missing",
            AuthError::MalformedHeader(_)
            | AuthError::KeyNotFound { .. }
            | AuthError::TokenUnparseable { .. } => "invalid_header",
            AuthError::TokenExpired => "token_expired",
            AuthError::InvalidClaims { .. } | AuthError::PermissionsClaimMissing => {
                "invalid_claims"
            }
            AuthError::PermissionDenied { .. } => "unauthorized",
            AuthError::KeySetUnavailable { .. } => "jwks_unavailable",
            AuthError::DeadlineExceeded => "verification_timeout",
            AuthError::Misconfigured(_) => "server_misconfigured",
        }
    }

    pub fn description(&self) -> String {
        self.to_string()
    }

    /// Status carried by the kind itself.
    pub fn status(&self) -> StatusCode {
        match self {
            AuthError::Unauthenticated
            | AuthError::MalformedHeader(_)
            | AuthError::TokenExpired
            | AuthError::InvalidClaims { .. }
            | AuthError::PermissionDenied { .. }
            | AuthError::KeySetUnavailable { .. }
            | AuthError::DeadlineExceeded => StatusCode::UNAUTHORIZED,
            AuthError::KeyNotFound { .. }
            | AuthError::TokenUnparseable { .. }
            | AuthError::PermissionsClaimMissing => StatusCode::BAD_REQUEST,
            AuthError::Misconfigured(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<jsonwebtoken::errors::Error> for AuthError {
    fn from(value: jsonwebtoken::errors::Error) -> Self {
        match value.kind() {
            ErrorKind::ExpiredSignature => AuthError::TokenExpired,
            ErrorKind::InvalidAudience
            | ErrorKind::InvalidIssuer
            | ErrorKind::InvalidSubject
            | ErrorKind::ImmatureSignature
            | ErrorKind::MissingRequiredClaim(_) => AuthError::InvalidClaims {
                reason: value.to_string(),
            },
            _ => AuthError::TokenUnparseable {
                reason: value.to_string(),
            },
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub code: &'static str,
    pub description: String,
}

impl From<&AuthError> for ErrorBody {
    fn from(value: &AuthError) -> Self {
        Self {
            code: value.code(),
            description: value.description(),
        }
    }
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        (self.status(), Json(ErrorBody::from(&self))).into_response()
    }
}

/// An [`AuthError`] paired with the status the gate answers with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rejection {
    pub error: AuthError,
    pub status: StatusCode,
}

impl Rejection {
    /// Extraction and verification failures always answer 401.
    pub fn unauthorized(error: AuthError) -> Self {
        Self {
            error,
            status: StatusCode::UNAUTHORIZED,
        }
    }

    /// Permission failures keep the status of their kind.
    pub fn from_permission(error: AuthError) -> Self {
        let status = error.status();
        Self { error, status }
    }

    pub fn error(&self) -> &AuthError {
        &self.error
    }
}

impl std::fmt::Display for Rejection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.error, self.status.as_u16())
    }
}

impl std::error::Error for Rejection {}

impl IntoResponse for Rejection {
    fn into_response(self) -> Response {
        (self.status, Json(ErrorBody::from(&self.error))).into_response()
    }
}
