use std::time::Duration;

use async_trait::async_trait;
use sea_orm::prelude::DateTimeWithTimeZone;
use sea_orm::sea_query::OnConflict;
use sea_orm::{
    ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, Set, TransactionTrait,
};
use time::OffsetDateTime;
use tokio::task::JoinHandle;
use tower_sessions::{session::Id, session::Record, session_store, ExpiredDeletion, SessionStore};

use crate::entity::session::{self, ActiveModel as SessionActiveModel, Entity as SessionEntity};

const MIN_SWEEP_PERIOD: Duration = Duration::from_millis(1);

/// A relational session store for tower-sessions using Sea-ORM.
///
/// Rows live in the `sessions` table created by the crate's
/// [`Migrator`](crate::migration::Migrator). The whole [`Record`] is serialized with
/// MessagePack into the `data` column; `expires_at` mirrors the record's expiry so
/// lookups and sweeps can filter without decoding.
///
/// # Error Handling
///
/// - Database errors → `session_store::Error::Backend`
/// - Serialization errors → `session_store::Error::Encode`
/// - Deserialization errors → `session_store::Error::Decode`
///
/// None of these are swallowed: a failed `save` must reach the session middleware,
/// which then refuses to hand out a cookie.
#[derive(Debug, Clone)]
pub struct SeaOrmStore {
    conn: DatabaseConnection,
}

impl SeaOrmStore {
    /// Creates a store over an already migrated connection.
    pub fn new(conn: DatabaseConnection) -> Self {
        Self { conn }
    }

    /// Deletes every row whose expiry has passed and returns how many went away.
    pub async fn sweep_expired(&self) -> session_store::Result<u64> {
        let now_db = convert_time_to_datetime(OffsetDateTime::now_utc());

        let result = SessionEntity::delete_many()
            .filter(session::Column::ExpiresAt.lte(now_db))
            .exec(&self.conn)
            .await
            .map_err(backend)?;

        Ok(result.rows_affected)
    }

    /// Spawns the periodic expiry sweep.
    ///
    /// The task runs independently of request handling. A failed sweep is logged
    /// and retried on the next tick; the loop only ends when the handle is aborted.
    /// A zero `period` is raised to one millisecond.
    pub fn spawn_sweeper(&self, period: Duration) -> JoinHandle<()> {
        let store = self.clone();
        let period = period.max(MIN_SWEEP_PERIOD);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                interval.tick().await;
                match store.sweep_expired().await {
                    Ok(0) => tracing::trace!("no expired sessions"),
                    Ok(removed) => tracing::debug!(removed, "swept expired sessions"),
                    Err(err) => tracing::warn!(error = %err, "session sweep failed"),
                }
            }
        })
    }

    fn to_active_model(record: &Record) -> session_store::Result<SessionActiveModel> {
        let data =
            rmp_serde::to_vec(record).map_err(|e| session_store::Error::Encode(e.to_string()))?;

        Ok(SessionActiveModel {
            sid: Set(record.id.to_string()),
            data: Set(data),
            expires_at: Set(convert_time_to_datetime(record.expiry_date)),
        })
    }
}

#[async_trait]
impl SessionStore for SeaOrmStore {
    /// Inserts a fresh record, minting a new ID if the generated one is taken.
    async fn create(&self, record: &mut Record) -> session_store::Result<()> {
        let txn = self.conn.begin().await.map_err(backend)?;

        // Session ID collision mitigation
        while SessionEntity::find_by_id(record.id.to_string())
            .one(&txn)
            .await
            .map_err(backend)?
            .is_some()
        {
            record.id = Id::default();
        }

        SessionEntity::insert(Self::to_active_model(record)?)
            .exec_without_returning(&txn)
            .await
            .map_err(backend)?;

        txn.commit().await.map_err(backend)?;

        tracing::debug!(expires_at = %record.expiry_date, "session created");
        Ok(())
    }

    /// Upserts the record in a single statement.
    ///
    /// A save racing the expiry sweep simply recreates the row.
    async fn save(&self, record: &Record) -> session_store::Result<()> {
        SessionEntity::insert(Self::to_active_model(record)?)
            .on_conflict(
                OnConflict::column(session::Column::Sid)
                    .update_columns([session::Column::Data, session::Column::ExpiresAt])
                    .to_owned(),
            )
            .exec_without_returning(&self.conn)
            .await
            .map_err(backend)?;

        Ok(())
    }

    /// Loads a record by ID; expired rows are reported as missing.
    async fn load(&self, session_id: &Id) -> session_store::Result<Option<Record>> {
        let now_db = convert_time_to_datetime(OffsetDateTime::now_utc());

        let session = SessionEntity::find_by_id(session_id.to_string())
            .filter(session::Column::ExpiresAt.gt(now_db))
            .one(&self.conn)
            .await
            .map_err(backend)?;

        match session {
            Some(model) => {
                let record = rmp_serde::from_slice(&model.data)
                    .map_err(|e| session_store::Error::Decode(e.to_string()))?;
                Ok(Some(record))
            }
            None => Ok(None),
        }
    }

    /// Deletes a record. Deleting an unknown ID succeeds.
    async fn delete(&self, session_id: &Id) -> session_store::Result<()> {
        SessionEntity::delete_by_id(session_id.to_string())
            .exec(&self.conn)
            .await
            .map_err(backend)?;

        Ok(())
    }
}

#[async_trait]
impl ExpiredDeletion for SeaOrmStore {
    async fn delete_expired(&self) -> session_store::Result<()> {
        self.sweep_expired().await.map(|_| ())
    }
}

fn backend(err: sea_orm::DbErr) -> session_store::Error {
    session_store::Error::Backend(err.to_string())
}

// time::OffsetDateTime -> sea_orm::prelude::DateTimeWithTimeZone (chrono), normalised to UTC
fn convert_time_to_datetime(time: OffsetDateTime) -> DateTimeWithTimeZone {
    use chrono::{DateTime, Utc};

    // Every representable `time` instant fits in chrono's range.
    DateTime::from_timestamp(time.unix_timestamp(), time.nanosecond())
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
        .into()
}
