use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use sea_orm::DbErr;
use serde::Serialize;
use thiserror::Error;
use tower_sessions::{session, session_store};

/// Message returned whenever a restricted route is hit without an authenticated session.
pub const UNAUTHORIZED_MESSAGE: &str = "You shall not pass!";

/// Message returned for every failed login, whether or not the username exists.
pub const INVALID_CREDENTIALS_MESSAGE: &str = "Invalid credentials";

/// Every failure a request or the startup path can run into.
#[derive(Debug, Error)]
pub enum Error {
    /// Username unknown or password mismatch. Deliberately indistinguishable.
    #[error("invalid credentials")]
    InvalidCredentials,
    /// No authenticated session on a restricted route.
    #[error("unauthorized")]
    Unauthorized,

    #[error(transparent)]
    Session(#[from] session::Error),
    #[error(transparent)]
    Store(#[from] session_store::Error),
    #[error(transparent)]
    Database(#[from] DbErr),
    #[error("password hashing failed: {0}")]
    Hashing(String),
    #[error("invalid configuration: {0}")]
    Config(String),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Serialize)]
struct ErrorBody<'a> {
    message: &'a str,
}

impl Error {
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::InvalidCredentials | Self::Unauthorized => StatusCode::UNAUTHORIZED,
            Self::Session(_)
            | Self::Store(_)
            | Self::Database(_)
            | Self::Hashing(_)
            | Self::Config(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn public_message(&self) -> &'static str {
        match self {
            Self::InvalidCredentials => INVALID_CREDENTIALS_MESSAGE,
            Self::Unauthorized => UNAUTHORIZED_MESSAGE,
            _ => "Internal server error",
        }
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            // Details stay in the logs; clients only get the generic message.
            tracing::error!(error = %self, "request failed");
        }
        (
            status,
            Json(ErrorBody {
                message: self.public_message(),
            }),
        )
            .into_response()
    }
}
