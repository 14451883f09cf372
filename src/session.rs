//! Session middleware.
//!
//! Every request moves through the same lifecycle:
//!
//! ```text
//! NoSession -> Loaded(anonymous) -> Loaded(authenticated) -> Persisted
//! ```
//!
//! On arrival the signed cookie, if any, is verified and its session loaded from the
//! store before the handler runs. A missing, forged, unknown or expired session all
//! collapse into the same fresh anonymous session that lives only in memory.
//!
//! At response time the session is written back only when a handler wrote to it, or
//! when it was already persisted (rolling expiry). Anything else leaves the store
//! untouched and sends no cookie, so anonymous traffic never creates a row.

use std::sync::Arc;

use axum::extract::{Request, State};
use axum::http::header::{COOKIE, SET_COOKIE};
use axum::http::{HeaderMap, HeaderValue};
use axum::middleware::Next;
use axum::response::Response;
use serde::{Deserialize, Serialize};
use time::{Duration, OffsetDateTime};
use tower_sessions::cookie::{Cookie, CookieJar, SameSite};
use tower_sessions::session::Id;
use tower_sessions::{Expiry, Session, SessionStore};

use crate::config::SessionConfig;
use crate::error::Result;

/// Session key holding the [`AuthUser`] of an authenticated session.
pub const USER_KEY: &str = "user";

/// Marker stored in a session once its client has logged in.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthUser {
    pub id: i32,
    pub username: String,
}

/// Response extension telling the middleware the session was destroyed.
///
/// The middleware answers with a removal cookie whether or not a session existed.
#[derive(Clone, Copy, Debug)]
pub struct SessionEnded;

/// The `Loaded` state a request entered, as reported in the debug log.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Loaded {
    Anonymous,
    Authenticated,
}

impl Loaded {
    fn of(user: Option<&AuthUser>) -> Self {
        match user {
            Some(_) => Self::Authenticated,
            None => Self::Anonymous,
        }
    }
}

/// Shared state of the session middleware.
#[derive(Debug)]
pub struct SessionManager<S> {
    store: Arc<S>,
    config: Arc<SessionConfig>,
}

impl<S> Clone for SessionManager<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            config: Arc::clone(&self.config),
        }
    }
}

impl<S: SessionStore> SessionManager<S> {
    /// Creates the middleware state over a session store and cookie policy.
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use axum::{middleware, Router};
    /// use chocolatechip::{db, session, SeaOrmStore, SessionConfig, SessionManager};
    ///
    /// # async fn example() -> Result<(), sea_orm::DbErr> {
    /// let conn = db::connect("sqlite::memory:").await?;
    /// let manager = SessionManager::new(SeaOrmStore::new(conn), SessionConfig::default());
    ///
    /// let router: Router = Router::new().layer(middleware::from_fn_with_state(
    ///     manager,
    ///     session::manage::<SeaOrmStore>,
    /// ));
    /// # Ok(())
    /// # }
    /// ```
    pub fn new(store: S, config: SessionConfig) -> Self {
        Self {
            store: Arc::new(store),
            config: Arc::new(config),
        }
    }

    /// Verifies the signed session cookie and parses the id it carries.
    fn session_id(&self, headers: &HeaderMap) -> Option<Id> {
        let mut jar = CookieJar::new();
        for value in headers.get_all(COOKIE) {
            let Ok(raw) = value.to_str() else { continue };
            for cookie in Cookie::split_parse(raw.to_owned()).flatten() {
                jar.add_original(cookie);
            }
        }

        let cookie = jar.signed(&self.config.key).get(&self.config.cookie_name)?;
        cookie.value().parse().ok()
    }

    fn base_cookie(&self, value: String) -> Cookie<'static> {
        Cookie::build((self.config.cookie_name.clone(), value))
            .path("/")
            .http_only(self.config.http_only)
            .secure(self.config.secure)
            .same_site(SameSite::Lax)
            .build()
    }

    fn session_cookie(&self, id: Id) -> Option<Cookie<'static>> {
        let mut cookie = self.base_cookie(id.to_string());
        cookie.set_max_age(self.config.max_age);

        let mut jar = CookieJar::new();
        jar.signed_mut(&self.config.key).add(cookie);
        jar.get(&self.config.cookie_name).cloned()
    }

    fn removal_cookie(&self) -> Cookie<'static> {
        let mut cookie = self.base_cookie(String::new());
        cookie.set_max_age(Duration::ZERO);
        cookie.set_expires(OffsetDateTime::UNIX_EPOCH);
        cookie
    }
}

/// Runs the session lifecycle around one request.
///
/// Store failures abort the request with a 500 and, in particular, a session that
/// could not be saved never produces a cookie.
pub async fn manage<S: SessionStore>(
    State(manager): State<SessionManager<S>>,
    mut req: Request,
    next: Next,
) -> Result<Response> {
    let cookie_id = manager.session_id(req.headers());
    let session = Session::new(
        cookie_id,
        Arc::clone(&manager.store),
        Some(Expiry::OnInactivity(manager.config.max_age)),
    );

    // Load eagerly so the handler never races the store.
    let user = session.get::<AuthUser>(USER_KEY).await?;
    let persisted = session.id().is_some();
    tracing::debug!(
        loaded = ?Loaded::of(user.as_ref()),
        cookie = cookie_id.is_some(),
        persisted,
        "session loaded"
    );

    req.extensions_mut().insert(session.clone());
    let mut res = next.run(req).await;

    if res.extensions().get::<SessionEnded>().is_some() {
        tracing::debug!("session ended");
        set_cookie(res.headers_mut(), &manager.removal_cookie());
        return Ok(res);
    }

    let write = if session.is_modified() {
        !session.is_empty().await
    } else {
        persisted
    };
    if !write {
        return Ok(res);
    }

    session.save().await?;
    let Some(id) = session.id() else {
        return Ok(res);
    };
    tracing::debug!(expires_at = %session.expiry_date(), "session persisted");

    if let Some(cookie) = manager.session_cookie(id) {
        set_cookie(res.headers_mut(), &cookie);
    }
    Ok(res)
}

fn set_cookie(headers: &mut HeaderMap, cookie: &Cookie<'_>) {
    match HeaderValue::from_str(&cookie.to_string()) {
        Ok(value) => {
            headers.append(SET_COOKIE, value);
        }
        Err(err) => tracing::error!(error = %err, "session cookie is not a valid header"),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use async_trait::async_trait;
    use axum::body::Body;
    use axum::http::StatusCode;
    use axum::routing::get;
    use axum::Router;
    use tokio::sync::Mutex;
    use tower::ServiceExt;
    use tower_sessions::session::Record;
    use tower_sessions::session_store;

    use super::*;

    /// Map-backed store; `fail_writes` turns every create/save into a backend error.
    #[derive(Debug, Clone, Default)]
    struct TestStore {
        records: Arc<Mutex<HashMap<Id, Record>>>,
        fail_writes: bool,
    }

    #[async_trait]
    impl SessionStore for TestStore {
        async fn create(&self, record: &mut Record) -> session_store::Result<()> {
            self.save(record).await
        }

        async fn save(&self, record: &Record) -> session_store::Result<()> {
            if self.fail_writes {
                return Err(session_store::Error::Backend("disk full".into()));
            }
            self.records.lock().await.insert(record.id, record.clone());
            Ok(())
        }

        async fn load(&self, session_id: &Id) -> session_store::Result<Option<Record>> {
            let records = self.records.lock().await;
            Ok(records
                .get(session_id)
                .filter(|r| r.expiry_date > OffsetDateTime::now_utc())
                .cloned())
        }

        async fn delete(&self, session_id: &Id) -> session_store::Result<()> {
            self.records.lock().await.remove(session_id);
            Ok(())
        }
    }

    async fn login(session: Session) -> Result<&'static str> {
        session.cycle_id().await?;
        session
            .insert(
                USER_KEY,
                AuthUser {
                    id: 1,
                    username: "bob".into(),
                },
            )
            .await?;
        Ok("ok")
    }

    async fn whoami(session: Session) -> Result<String> {
        let user = session.get::<AuthUser>(USER_KEY).await?;
        Ok(user.map(|u| u.username).unwrap_or_default())
    }

    fn router(store: TestStore, config: SessionConfig) -> Router {
        let manager = SessionManager::new(store, config);
        Router::new()
            .route("/login", get(login))
            .route("/whoami", get(whoami))
            .layer(axum::middleware::from_fn_with_state(manager, manage::<TestStore>))
    }

    fn request(uri: &str, cookie: Option<&str>) -> Request {
        let mut builder = axum::http::Request::builder().uri(uri);
        if let Some(cookie) = cookie {
            builder = builder.header(COOKIE, cookie);
        }
        builder.body(Body::empty()).unwrap()
    }

    fn cookie_pair(res: &Response) -> String {
        let raw = res.headers().get(SET_COOKIE).unwrap().to_str().unwrap();
        let cookie = Cookie::parse(raw.to_owned()).unwrap();
        format!("{}={}", cookie.name(), cookie.value())
    }

    #[tokio::test]
    async fn anonymous_request_gets_no_cookie() {
        let store = TestStore::default();
        let app = router(store.clone(), SessionConfig::default());

        let res = app.oneshot(request("/whoami", None)).await.unwrap();

        assert_eq!(res.status(), StatusCode::OK);
        assert!(res.headers().get(SET_COOKIE).is_none());
        assert!(store.records.lock().await.is_empty());
    }

    #[tokio::test]
    async fn write_persists_and_sets_cookie() {
        let store = TestStore::default();
        let app = router(store.clone(), SessionConfig::default());

        let res = app.clone().oneshot(request("/login", None)).await.unwrap();
        assert_eq!(res.status(), StatusCode::OK);
        let cookie = cookie_pair(&res);
        assert!(cookie.starts_with("chocolatechip="));
        assert_eq!(store.records.lock().await.len(), 1);

        let res = app.oneshot(request("/whoami", Some(&cookie))).await.unwrap();
        assert!(res.headers().get(SET_COOKIE).is_some());
    }

    #[tokio::test]
    async fn cookie_attributes_follow_config() {
        let config = SessionConfig::default()
            .with_cookie_name("sid")
            .with_http_only(false)
            .with_secure(true);
        let app = router(TestStore::default(), config);

        let res = app.oneshot(request("/login", None)).await.unwrap();
        let raw = res.headers().get(SET_COOKIE).unwrap().to_str().unwrap();
        let cookie = Cookie::parse(raw.to_owned()).unwrap();

        assert_eq!(cookie.name(), "sid");
        assert_eq!(cookie.http_only(), None);
        assert_eq!(cookie.secure(), Some(true));
        assert_eq!(cookie.max_age(), Some(Duration::hours(1)));
        assert_eq!(cookie.path(), Some("/"));
    }

    #[tokio::test]
    async fn cookie_signed_with_another_key_is_ignored() {
        let store = TestStore::default();
        let issuer = router(store.clone(), SessionConfig::default());
        let verifier = router(store.clone(), SessionConfig::default());

        let res = issuer.oneshot(request("/login", None)).await.unwrap();
        let cookie = cookie_pair(&res);

        let res = verifier
            .oneshot(request("/whoami", Some(&cookie)))
            .await
            .unwrap();
        assert!(res.headers().get(SET_COOKIE).is_none());
    }

    #[tokio::test]
    async fn tampered_cookie_is_treated_as_anonymous() {
        let app = router(TestStore::default(), SessionConfig::default());

        let res = app
            .oneshot(request("/whoami", Some("chocolatechip=not-a-session")))
            .await
            .unwrap();

        assert_eq!(res.status(), StatusCode::OK);
        assert!(res.headers().get(SET_COOKIE).is_none());
    }

    #[tokio::test]
    async fn failed_save_never_sets_cookie() {
        let store = TestStore {
            fail_writes: true,
            ..Default::default()
        };
        let app = router(store, SessionConfig::default());

        let res = app.oneshot(request("/login", None)).await.unwrap();

        assert_eq!(res.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert!(res.headers().get(SET_COOKIE).is_none());
    }

    #[tokio::test]
    async fn missing_cookie_loads_as_anonymous() {
        let session = Session::new(None, Arc::new(TestStore::default()), None);
        let user = session.get::<AuthUser>(USER_KEY).await.unwrap();
        assert_eq!(Loaded::of(user.as_ref()), Loaded::Anonymous);

        let bob = AuthUser {
            id: 1,
            username: "bob".into(),
        };
        session.insert(USER_KEY, bob).await.unwrap();
        let user = session.get::<AuthUser>(USER_KEY).await.unwrap();
        assert_eq!(Loaded::of(user.as_ref()), Loaded::Authenticated);
    }

    #[test]
    fn removal_cookie_expires_immediately() {
        let manager = SessionManager::new(TestStore::default(), SessionConfig::default());
        let cookie = manager.removal_cookie();

        assert_eq!(cookie.name(), "chocolatechip");
        assert_eq!(cookie.value(), "");
        assert_eq!(cookie.max_age(), Some(Duration::ZERO));
    }
}
