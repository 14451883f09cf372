//! Connection setup.

use std::time::Duration;

use sea_orm::{ConnectOptions, Database, DatabaseConnection, DbErr};

#[cfg(feature = "migration")]
use crate::migration::{Migrator, MigratorTrait};

/// Opens a pooled connection and applies pending migrations.
///
/// An in-memory SQLite database only exists per connection, so the pool is pinned to
/// a single connection that is never recycled.
#[cfg(feature = "migration")]
pub async fn connect(database_url: &str) -> Result<DatabaseConnection, DbErr> {
    let conn = open(database_url).await?;
    Migrator::up(&conn, None).await?;
    Ok(conn)
}

/// Opens a pooled connection without touching the schema.
pub async fn open(database_url: &str) -> Result<DatabaseConnection, DbErr> {
    let mut opt = ConnectOptions::new(database_url);

    if database_url.contains(":memory:") {
        opt.max_connections(1).min_connections(1);
    } else {
        opt.max_connections(10)
            .min_connections(2)
            .connect_timeout(Duration::from_secs(10))
            .acquire_timeout(Duration::from_secs(10))
            .idle_timeout(Duration::from_secs(10))
            .max_lifetime(Duration::from_secs(10 * 60));
    }

    tracing::info!("connecting to database");
    Database::connect(opt).await
}
