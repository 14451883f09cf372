//! # chocolatechip
//!
//! A small axum API that lists users to authenticated clients only. Authentication
//! is cookie based: sessions are persisted through [`tower-sessions`](https://crates.io/crates/tower-sessions)
//! records in a relational table managed with [Sea-ORM](https://crates.io/crates/sea-orm).
//!
//! ## Routes
//!
//! | Method     | Path               | Notes                                        |
//! |------------|--------------------|----------------------------------------------|
//! | `GET`      | `/`                | `{"api": "up"}`                              |
//! | `POST`     | `/api/auth/login`  | `{username, password}`, sets the cookie      |
//! | `GET/POST` | `/api/auth/logout` | destroys the session, clears the cookie      |
//! | `GET`      | `/api/users`       | restricted, `[{id, username}, ...]`          |
//!
//! ## Sessions
//!
//! Clients get no cookie until they log in. A successful login stores the session
//! server-side and sets a signed cookie (named `chocolatechip` by default) with a one
//! hour max-age; every later request carrying it pushes the expiry forward again.
//! Expired rows are removed by a background sweep.
//!
//! ## Quick Start
//!
//! ```no_run
//! use chocolatechip::{app, config::SessionConfig, db};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let conn = db::connect("sqlite::memory:").await?;
//! let router = app(conn, SessionConfig::default());
//!
//! let listener = tokio::net::TcpListener::bind("127.0.0.1:3000").await?;
//! axum::serve(listener, router).await?;
//! # Ok(())
//! # }
//! ```

use axum::extract::FromRef;
use axum::routing::{get, post};
use axum::{middleware, Json, Router};
use sea_orm::DatabaseConnection;
use serde_json::{json, Value};
use tower::ServiceBuilder;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

pub mod auth;
pub mod config;
pub mod db;
pub mod entity;
pub mod error;
pub mod guard;
#[cfg(feature = "migration")]
pub mod migration;
pub mod session;
pub mod store;
pub mod users;

pub use config::{Config, SessionConfig};
pub use error::{Error, Result};
pub use session::{AuthUser, SessionManager};
pub use store::SeaOrmStore;
pub use users::{UserStore, UserSummary};

// Re-exported from `tower-sessions` for handlers and callers driving the store directly.
pub use tower_sessions::cookie;
pub use tower_sessions::{session::Id, session::Record, ExpiredDeletion, Session, SessionStore};

/// State shared by the route handlers.
#[derive(Debug, Clone)]
pub struct AppState {
    pub users: UserStore,
}

impl FromRef<AppState> for UserStore {
    fn from_ref(state: &AppState) -> Self {
        state.users.clone()
    }
}

/// Builds the full router over a migrated connection.
///
/// The sweep of expired sessions is not started here; see
/// [`SeaOrmStore::spawn_sweeper`].
pub fn app(conn: DatabaseConnection, config: SessionConfig) -> Router {
    let state = AppState {
        users: UserStore::new(conn.clone()),
    };
    let sessions = SessionManager::new(SeaOrmStore::new(conn), config);

    Router::new()
        .route("/", get(index))
        .route("/api/auth/login", post(auth::login))
        .route("/api/auth/logout", get(auth::logout).post(auth::logout))
        .route(
            "/api/users",
            get(users::list).route_layer(middleware::from_fn(guard::ensure_authenticated)),
        )
        .with_state(state)
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CorsLayer::permissive())
                .layer(middleware::from_fn_with_state(
                    sessions,
                    session::manage::<SeaOrmStore>,
                )),
        )
}

async fn index() -> Json<Value> {
    Json(json!({ "api": "up" }))
}
