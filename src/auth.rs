//! Login and logout.

use axum::extract::State;
use axum::{Extension, Json};
use serde::{Deserialize, Serialize};
use tower_sessions::Session;

use crate::error::{Error, Result};
use crate::session::{AuthUser, SessionEnded, USER_KEY};
use crate::users::{verify_password, UserStore};

/// Login request body.
#[derive(Debug, Deserialize)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

/// Body of a successful login: a greeting and the authenticated user.
#[derive(Debug, Serialize)]
pub struct LoginResponse {
    pub message: String,
    pub user: AuthUser,
}

/// Body of every logout, whether or not a session existed.
#[derive(Debug, Serialize)]
pub struct LogoutResponse {
    pub message: &'static str,
}

/// `POST /api/auth/login`
///
/// On success the session gets a fresh id and the [`AuthUser`] marker, which is what
/// makes the session middleware persist it and set the cookie. On failure the session
/// is left alone, so a rejected attempt never receives a cookie. Unknown usernames and
/// wrong passwords produce the same response.
pub async fn login(
    State(users): State<UserStore>,
    session: Session,
    Json(credentials): Json<Credentials>,
) -> Result<Json<LoginResponse>> {
    let Credentials { username, password } = credentials;

    let user = match users.find_by_username(&username).await? {
        Some(user) => {
            let hash = user.password.clone();
            let verified = tokio::task::spawn_blocking(move || verify_password(&password, &hash))
                .await
                .map_err(|e| Error::Hashing(e.to_string()))?;
            verified.then_some(user)
        }
        None => None,
    };

    let Some(user) = user else {
        tracing::info!(%username, "login rejected");
        return Err(Error::InvalidCredentials);
    };

    // New login, new id: a previous session id is never carried over.
    session.cycle_id().await?;
    let auth = AuthUser {
        id: user.id,
        username: user.username,
    };
    session.insert(USER_KEY, &auth).await?;
    tracing::info!(user_id = auth.id, "login succeeded");

    Ok(Json(LoginResponse {
        message: format!("Welcome {}!", auth.username),
        user: auth,
    }))
}

/// `GET /api/auth/logout`
///
/// Always succeeds. Any stored session is deleted and the client is told to drop the
/// cookie, including when there was no session to begin with.
pub async fn logout(session: Session) -> Result<(Extension<SessionEnded>, Json<LogoutResponse>)> {
    let had_session = session.id().is_some();
    session.flush().await?;
    tracing::debug!(had_session, "logged out");

    Ok((
        Extension(SessionEnded),
        Json(LogoutResponse {
            message: "logged out",
        }),
    ))
}
