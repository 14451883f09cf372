//! Access guard for restricted routes.

use axum::extract::Request;
use axum::middleware::Next;
use axum::response::Response;
use tower_sessions::Session;

use crate::error::{Error, Result};
use crate::session::{AuthUser, USER_KEY};

/// Lets the request through only when its session carries an [`AuthUser`].
///
/// Rejections short-circuit with a 401 `{"message": "You shall not pass!"}` and the
/// wrapped handler never runs. On success the [`AuthUser`] is also placed in the
/// request extensions for handlers that want it.
pub async fn ensure_authenticated(session: Session, mut req: Request, next: Next) -> Result<Response> {
    let Some(user) = session.get::<AuthUser>(USER_KEY).await? else {
        tracing::debug!(path = %req.uri().path(), "unauthenticated request rejected");
        return Err(Error::Unauthorized);
    };

    req.extensions_mut().insert(user);
    Ok(next.run(req).await)
}
