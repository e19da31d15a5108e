use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use thiserror::Error;

use crate::roles::Role;

/// IdentityError
///
/// Faults reported by the external identity provider.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IdentityError {
    /// Provider unreachable (DNS, connect, timeout, body read).
    #[error("identity provider unreachable: {0}")]
    Transport(String),
    /// Provider answered but refused the request (bad credentials, revoked token).
    #[error("identity provider rejected the request ({status}): {message}")]
    Rejected { status: u16, message: String },
    #[error("invalid access token: {0}")]
    InvalidToken(String),
    #[error("malformed identity response: {0}")]
    Malformed(String),
}

impl From<reqwest::Error> for IdentityError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            IdentityError::Malformed(err.to_string())
        } else {
            IdentityError::Transport(err.to_string())
        }
    }
}

/// LookupError
///
/// A profile store fault unrelated to absence. A missing profile row is `Ok(None)`,
/// never a `LookupError`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LookupError {
    #[error("profile store unreachable: {0}")]
    Transport(String),
    #[error("profile store error ({status}): {message}")]
    Backend { status: u16, message: String },
    #[error("malformed profile data: {0}")]
    Malformed(String),
}

impl From<reqwest::Error> for LookupError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            LookupError::Malformed(err.to_string())
        } else {
            LookupError::Transport(err.to_string())
        }
    }
}

impl From<sqlx::Error> for LookupError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::ColumnDecode { .. } | sqlx::Error::Decode(_) | sqlx::Error::ColumnNotFound(_) => {
                LookupError::Malformed(err.to_string())
            }
            sqlx::Error::Database(db) => LookupError::Backend {
                status: 500,
                message: db.to_string(),
            },
            other => LookupError::Transport(other.to_string()),
        }
    }
}

/// AuthError
///
/// Errors surfaced to the caller of an explicit, user-initiated Session Store action
/// (sign-out, profile refresh). Passive initialization never produces one.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AuthError {
    #[error(transparent)]
    Identity(#[from] IdentityError),
    #[error(transparent)]
    Lookup(#[from] LookupError),
    /// The Session Store has been torn down.
    #[error("session store is shut down")]
    StoreClosed,
}

impl AuthError {
    fn status(&self) -> StatusCode {
        match self {
            AuthError::Identity(IdentityError::Rejected { .. })
            | AuthError::Identity(IdentityError::InvalidToken(_)) => StatusCode::UNAUTHORIZED,
            AuthError::Identity(_) | AuthError::Lookup(_) => StatusCode::BAD_GATEWAY,
            AuthError::StoreClosed => StatusCode::SERVICE_UNAVAILABLE,
        }
    }
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let body = Json(serde_json::json!({ "error": self.to_string() }));
        (self.status(), body).into_response()
    }
}

/// SignInError
///
/// Outcomes of the password sign-in flow that send the user back to the form.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SignInError {
    #[error(
        "Your account is not provisioned yet (no profile role assigned). Ask the admin to create your profile in the database."
    )]
    NotProvisioned,
    #[error("Role mismatch. Your account is '{actual}', but you tried to sign in as '{requested}'.")]
    RoleMismatch { actual: Role, requested: Role },
    #[error(transparent)]
    Auth(#[from] AuthError),
}

impl From<IdentityError> for SignInError {
    fn from(err: IdentityError) -> Self {
        SignInError::Auth(AuthError::Identity(err))
    }
}

impl From<LookupError> for SignInError {
    fn from(err: LookupError) -> Self {
        SignInError::Auth(AuthError::Lookup(err))
    }
}

impl IntoResponse for SignInError {
    fn into_response(self) -> Response {
        let status = match &self {
            SignInError::NotProvisioned | SignInError::RoleMismatch { .. } => StatusCode::FORBIDDEN,
            SignInError::Auth(inner) => inner.status(),
        };
        let body = Json(serde_json::json!({ "error": self.to_string() }));
        (status, body).into_response()
    }
}
