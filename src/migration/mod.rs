//! Schema migrations.
//!
//! Run once at startup via [`Migrator::up`]. Every table is created with
//! `IF NOT EXISTS`, so racing processes applying the same step cannot fail on an
//! already provisioned schema.

pub use sea_orm_migration::prelude::*;

mod m20240101_000001_create_users_table;
mod m20240101_000002_create_sessions_table;

pub struct Migrator;

#[async_trait::async_trait]
impl MigratorTrait for Migrator {
    fn migration_table_name() -> sea_orm::DynIden {
        Alias::new("chocolatechip_migrations").into_iden()
    }

    fn migrations() -> Vec<Box<dyn MigrationTrait>> {
        vec![
            Box::new(m20240101_000001_create_users_table::Migration),
            Box::new(m20240101_000002_create_sessions_table::Migration),
        ]
    }
}
