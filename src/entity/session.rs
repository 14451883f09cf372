//! Session entity model.
//!
//! Maps the `sessions` table written by [`SeaOrmStore`](crate::store::SeaOrmStore).
//! Nothing in the request path touches this entity directly; handlers go through
//! `tower_sessions::Session`.

use sea_orm::entity::prelude::*;

/// A persisted session row.
///
/// | Column     | Type               | Description                               |
/// |------------|--------------------|-------------------------------------------|
/// | sid        | TEXT (Primary Key) | Session ID as carried by the cookie       |
/// | data       | BLOB / BYTEA       | MessagePack encoded `tower_sessions` record |
/// | expires_at | TIMESTAMPTZ        | Rolling expiry, pushed forward on each save |
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "sessions")]
pub struct Model {
    /// Session identifier in its cookie (base64) form.
    #[sea_orm(primary_key, auto_increment = false, column_type = "Text")]
    pub sid: String,

    /// Serialized session record, including the authenticated user marker.
    pub data: Vec<u8>,

    /// Rows at or past this instant are invisible to `load` and removed by the sweep.
    pub expires_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
