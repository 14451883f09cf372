//! Credential store and the restricted user listing.

use argon2::password_hash::rand_core::OsRng;
use argon2::password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use argon2::Argon2;
use axum::extract::State;
use axum::Json;
use sea_orm::sea_query::SimpleExpr;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, FromQueryResult, QueryFilter,
    QueryOrder, QuerySelect, Set,
};
use serde::Serialize;

use crate::entity::user::{self, ActiveModel as UserActiveModel, Entity as UserEntity};
use crate::error::{Error, Result};

/// Public view of a user; the credential hash never leaves the store.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, FromQueryResult)]
pub struct UserSummary {
    pub id: i32,
    pub username: String,
}

/// Read access to user records.
///
/// Absence is never an error: lookups return `None` or an empty list, and only
/// storage failures surface as [`Error::Database`].
#[derive(Debug, Clone)]
pub struct UserStore {
    conn: DatabaseConnection,
}

impl UserStore {
    /// Creates a store over an already migrated connection.
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use chocolatechip::{db, UserStore};
    ///
    /// # async fn example() -> chocolatechip::Result<()> {
    /// let conn = db::connect("sqlite::memory:").await?;
    /// let users = UserStore::new(conn);
    /// users.insert("bob", "correct").await?;
    ///
    /// assert!(users.find_by_username("bob").await?.is_some());
    /// # Ok(())
    /// # }
    /// ```
    pub fn new(conn: DatabaseConnection) -> Self {
        Self { conn }
    }

    /// Every user, ordered by id.
    pub async fn find_all(&self) -> Result<Vec<UserSummary>> {
        Ok(UserEntity::find()
            .select_only()
            .column(user::Column::Id)
            .column(user::Column::Username)
            .order_by_asc(user::Column::Id)
            .into_model::<UserSummary>()
            .all(&self.conn)
            .await?)
    }

    /// Users matching an arbitrary condition, ordered by id.
    pub async fn find_by(&self, condition: SimpleExpr) -> Result<Vec<user::Model>> {
        Ok(UserEntity::find()
            .filter(condition)
            .order_by_asc(user::Column::Id)
            .all(&self.conn)
            .await?)
    }

    /// The user with this exact username, if any.
    pub async fn find_by_username(&self, username: &str) -> Result<Option<user::Model>> {
        Ok(self
            .find_by(user::Column::Username.eq(username))
            .await?
            .into_iter()
            .next())
    }

    /// Registers a user with an Argon2id hash of `password`.
    ///
    /// Only used for seeding; the HTTP surface has no registration route.
    pub async fn insert(&self, username: &str, password: &str) -> Result<UserSummary> {
        let model = UserActiveModel {
            username: Set(username.to_string()),
            password: Set(hash_password(password)?),
            ..Default::default()
        }
        .insert(&self.conn)
        .await?;

        Ok(UserSummary {
            id: model.id,
            username: model.username,
        })
    }
}

/// Hashes a password into a PHC string.
pub fn hash_password(password: &str) -> Result<String> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| Error::Hashing(e.to_string()))
}

/// Checks `password` against a stored PHC string.
///
/// A malformed stored hash counts as a mismatch.
pub fn verify_password(password: &str, hash: &str) -> bool {
    match PasswordHash::new(hash) {
        Ok(parsed) => Argon2::default()
            .verify_password(password.as_bytes(), &parsed)
            .is_ok(),
        Err(err) => {
            tracing::warn!(error = %err, "stored password hash is malformed");
            false
        }
    }
}

/// `GET /api/users`, behind the access guard.
pub async fn list(State(users): State<UserStore>) -> Result<Json<Vec<UserSummary>>> {
    let users = users.find_all().await?;
    tracing::debug!(count = users.len(), "listed users");
    Ok(Json(users))
}

#[cfg(all(test, feature = "sqlite", feature = "migration"))]
mod tests {
    use super::*;
    use crate::db;

    async fn store() -> UserStore {
        UserStore::new(db::connect("sqlite::memory:").await.unwrap())
    }

    #[tokio::test]
    async fn find_all_is_empty_without_users() {
        assert!(store().await.find_all().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn find_all_lists_users_in_id_order() {
        let store = store().await;
        store.insert("bob", "correct").await.unwrap();
        store.insert("alice", "hunter2").await.unwrap();

        let users = store.find_all().await.unwrap();
        let names: Vec<_> = users.iter().map(|u| u.username.as_str()).collect();

        assert_eq!(names, ["bob", "alice"]);
        assert!(users[0].id < users[1].id);
    }

    #[tokio::test]
    async fn find_by_username_misses_quietly() {
        let store = store().await;
        store.insert("bob", "correct").await.unwrap();

        assert!(store.find_by_username("carol").await.unwrap().is_none());
        let bob = store.find_by_username("bob").await.unwrap().unwrap();
        assert_ne!(bob.password, "correct");
        assert!(verify_password("correct", &bob.password));
        assert!(!verify_password("wrong", &bob.password));
    }

    #[test]
    fn malformed_hash_never_verifies() {
        assert!(!verify_password("correct", "correct"));
    }
}
