use std::time::Duration;

use async_trait::async_trait;
use chrono::prelude::*;
use serde_json::value::RawValue;
use serde_json::Value;
use sqlx::postgres::{PgPool, PgPoolOptions};
use thiserror::Error;

/// Enumeration of errors for operations with the state store.
/// Errors originate from sqlx and are wrapped by us to tell connectivity problems apart from
/// statements that reached the database and failed there.
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("connection failed with: {error}")]
    ConnectionError { error: sqlx::Error },
    #[error("{command} query failed with: {error}")]
    QueryError {
        command: &'static str,
        error: sqlx::Error,
    },
}

impl StorageError {
    fn from_query(command: &'static str, error: sqlx::Error) -> Self {
        match error {
            sqlx::Error::Io(_)
            | sqlx::Error::Tls(_)
            | sqlx::Error::PoolTimedOut
            | sqlx::Error::PoolClosed
            | sqlx::Error::WorkerCrashed => StorageError::ConnectionError { error },
            error => StorageError::QueryError { command, error },
        }
    }
}

pub type StorageResult<T> = std::result::Result<T, StorageError>;

/// The merged room state a reconciler wants persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoomStatusUpdate {
    pub room_id: i64,
    pub occupied: bool,
    pub occupant_count: i32,
    pub count_reliable: bool,
    pub count_source: String,
    pub source_reliability: i32,
}

/// A `room_status` row.
#[derive(sqlx::FromRow, Debug, Clone, PartialEq)]
pub struct RoomStatus {
    pub room_id: i64,
    pub occupied: bool,
    pub occupant_count: i32,
    pub count_reliable: bool,
    pub count_source: String,
    pub source_reliability: i32,
    pub updated_at: DateTime<Utc>,
    pub last_occupancy_change: DateTime<Utc>,
}

/// A `device_status` row.
#[derive(sqlx::FromRow, Debug, Clone, PartialEq)]
pub struct DeviceStatus {
    pub device_id: i64,
    pub status: sqlx::types::Json<Value>,
    pub updated_at: DateTime<Utc>,
    pub last_reported_at: DateTime<Utc>,
}

/// Atomic compare-and-merge upserts required by the reconcilers.
///
/// Each method is a single statement: the row is created if absent, otherwise updated in
/// place, and any change marker is computed against the value stored *before* the write within
/// that same statement. Implementations must never read first and write second.
#[async_trait]
pub trait StateStore: Send + Sync {
    /// Merge an occupancy observation into `room_status`, returning the rows affected.
    async fn upsert_room_status(&self, update: &RoomStatusUpdate) -> StorageResult<u64>;

    /// Replace the whole status document of a device, returning the rows affected. The document
    /// is stored from its original text.
    async fn replace_device_status(
        &self,
        device_id: i64,
        status: &RawValue,
    ) -> StorageResult<u64>;
}

// `last_occupancy_change` advances only when the incoming flag differs from the stored one.
// On the insert path there is no prior row, so it starts at NOW().
const UPSERT_ROOM_STATUS: &str = r#"
INSERT INTO room_status
    (room_id, occupied, occupant_count, count_reliable, count_source, source_reliability, updated_at, last_occupancy_change)
VALUES
    ($1, $2, $3, $4, $5, $6, NOW(), NOW())
ON CONFLICT (room_id) DO UPDATE SET
    occupied = EXCLUDED.occupied,
    occupant_count = EXCLUDED.occupant_count,
    count_reliable = EXCLUDED.count_reliable,
    count_source = EXCLUDED.count_source,
    source_reliability = EXCLUDED.source_reliability,
    updated_at = NOW(),
    last_occupancy_change = CASE
        WHEN room_status.occupied IS DISTINCT FROM EXCLUDED.occupied THEN NOW()
        ELSE room_status.last_occupancy_change
    END
"#;

const REPLACE_DEVICE_STATUS: &str = r#"
INSERT INTO device_status
    (device_id, status, updated_at, last_reported_at)
VALUES
    ($1, $2::jsonb, NOW(), NOW())
ON CONFLICT (device_id) DO UPDATE SET
    status = EXCLUDED.status,
    updated_at = NOW(),
    last_reported_at = NOW()
"#;

/// Pool settings applied when connecting to PostgreSQL.
#[derive(Debug, Clone)]
pub struct PgStoreOptions {
    pub max_connections: u32,
    pub min_connections: u32,
    pub max_lifetime: Duration,
    pub idle_timeout: Duration,
    pub acquire_timeout: Duration,
}

impl Default for PgStoreOptions {
    fn default() -> Self {
        Self {
            max_connections: 10,
            min_connections: 1,
            max_lifetime: Duration::from_secs(60 * 60),
            idle_timeout: Duration::from_secs(30 * 60),
            acquire_timeout: Duration::from_secs(10),
        }
    }
}

/// State store backed by PostgreSQL tables `room_status` and `device_status`.
#[derive(Clone)]
pub struct PgStateStore {
    pool: PgPool,
}

impl PgStateStore {
    /// Connect a new pool and verify the database answers.
    pub async fn connect(url: &str, options: &PgStoreOptions) -> StorageResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(options.max_connections)
            .min_connections(options.min_connections)
            .max_lifetime(options.max_lifetime)
            .idle_timeout(options.idle_timeout)
            .acquire_timeout(options.acquire_timeout)
            .connect(url)
            .await
            .map_err(|error| StorageError::ConnectionError { error })?;

        let store = Self { pool };
        store.ping().await?;

        Ok(store)
    }

    pub fn new_from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn ping(&self) -> StorageResult<()> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(|error| StorageError::from_query("SELECT", error))?;

        Ok(())
    }

    pub async fn close(&self) {
        self.pool.close().await
    }

    pub async fn fetch_room_status(&self, room_id: i64) -> StorageResult<Option<RoomStatus>> {
        sqlx::query_as::<_, RoomStatus>(
            r#"
SELECT
    room_id, occupied, occupant_count, count_reliable, count_source, source_reliability, updated_at, last_occupancy_change
FROM room_status
WHERE room_id = $1
            "#,
        )
        .bind(room_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|error| StorageError::from_query("SELECT", error))
    }

    pub async fn fetch_device_status(&self, device_id: i64) -> StorageResult<Option<DeviceStatus>> {
        sqlx::query_as::<_, DeviceStatus>(
            r#"
SELECT
    device_id, status, updated_at, last_reported_at
FROM device_status
WHERE device_id = $1
            "#,
        )
        .bind(device_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|error| StorageError::from_query("SELECT", error))
    }
}

#[async_trait]
impl StateStore for PgStateStore {
    async fn upsert_room_status(&self, update: &RoomStatusUpdate) -> StorageResult<u64> {
        let result = sqlx::query(UPSERT_ROOM_STATUS)
            .bind(update.room_id)
            .bind(update.occupied)
            .bind(update.occupant_count)
            .bind(update.count_reliable)
            .bind(&update.count_source)
            .bind(update.source_reliability)
            .execute(&self.pool)
            .await
            .map_err(|error| StorageError::from_query("INSERT", error))?;

        Ok(result.rows_affected())
    }

    async fn replace_device_status(
        &self,
        device_id: i64,
        status: &RawValue,
    ) -> StorageResult<u64> {
        let result = sqlx::query(REPLACE_DEVICE_STATUS)
            .bind(device_id)
            .bind(status.get())
            .execute(&self.pool)
            .await
            .map_err(|error| StorageError::from_query("INSERT", error))?;

        Ok(result.rows_affected())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tokio::task::JoinSet;

    fn update(room_id: i64, occupied: bool, count: i32) -> RoomStatusUpdate {
        RoomStatusUpdate {
            room_id,
            occupied,
            occupant_count: count,
            count_reliable: true,
            count_source: "camera".to_owned(),
            source_reliability: 90,
        }
    }

    fn document(raw: &str) -> Box<RawValue> {
        RawValue::from_string(raw.to_owned()).unwrap()
    }

    // NOW() is the transaction start time, so successive autocommit statements need a gap to
    // compare strictly.
    async fn tick() {
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
    }

    #[sqlx::test(migrations = "../migrations")]
    async fn first_write_creates_room(db: PgPool) {
        let store = PgStateStore::new_from_pool(db);

        assert_eq!(store.upsert_room_status(&update(42, true, 3)).await.unwrap(), 1);

        let row = store.fetch_room_status(42).await.unwrap().unwrap();
        assert!(row.occupied);
        assert_eq!(row.occupant_count, 3);
        assert!(row.count_reliable);
        assert_eq!(row.count_source, "camera");
        assert_eq!(row.source_reliability, 90);
        assert_eq!(row.updated_at, row.last_occupancy_change);
    }

    #[sqlx::test(migrations = "../migrations")]
    async fn occupancy_change_moves_change_marker(db: PgPool) {
        let store = PgStateStore::new_from_pool(db);

        store.upsert_room_status(&update(42, true, 3)).await.unwrap();
        let first = store.fetch_room_status(42).await.unwrap().unwrap();

        tick().await;
        store.upsert_room_status(&update(42, false, 0)).await.unwrap();
        let second = store.fetch_room_status(42).await.unwrap().unwrap();

        assert!(!second.occupied);
        assert_eq!(second.occupant_count, 0);
        assert!(second.last_occupancy_change > first.last_occupancy_change);
        assert!(second.updated_at > first.updated_at);
    }

    #[sqlx::test(migrations = "../migrations")]
    async fn replay_keeps_change_marker(db: PgPool) {
        let store = PgStateStore::new_from_pool(db);

        store.upsert_room_status(&update(42, true, 3)).await.unwrap();
        let first = store.fetch_room_status(42).await.unwrap().unwrap();

        tick().await;
        // Same occupancy, other fields differ: still not a change.
        store.upsert_room_status(&update(42, true, 5)).await.unwrap();
        let second = store.fetch_room_status(42).await.unwrap().unwrap();

        tick().await;
        store.upsert_room_status(&update(42, true, 5)).await.unwrap();
        let third = store.fetch_room_status(42).await.unwrap().unwrap();

        assert_eq!(second.occupant_count, 5);
        assert_eq!(second.last_occupancy_change, first.last_occupancy_change);
        assert_eq!(third.last_occupancy_change, first.last_occupancy_change);
        assert!(second.updated_at > first.updated_at);
        assert!(third.updated_at > second.updated_at);
    }

    #[sqlx::test(migrations = "../migrations")]
    async fn rooms_are_independent(db: PgPool) {
        let store = PgStateStore::new_from_pool(db);

        store.upsert_room_status(&update(1, true, 1)).await.unwrap();
        store.upsert_room_status(&update(2, false, 0)).await.unwrap();

        assert!(store.fetch_room_status(1).await.unwrap().unwrap().occupied);
        assert!(!store.fetch_room_status(2).await.unwrap().unwrap().occupied);
        assert!(store.fetch_room_status(3).await.unwrap().is_none());
    }

    #[sqlx::test(migrations = "../migrations")]
    async fn device_status_is_replaced_not_merged(db: PgPool) {
        let store = PgStateStore::new_from_pool(db);

        store
            .replace_device_status(7, &document(r#"{"temp": 21.5, "humidity": 40}"#))
            .await
            .unwrap();
        let first = store.fetch_device_status(7).await.unwrap().unwrap();
        assert_eq!(first.status.0, json!({"temp": 21.5, "humidity": 40}));

        tick().await;
        store
            .replace_device_status(7, &document(r#"{"temp": 22.0}"#))
            .await
            .unwrap();
        let second = store.fetch_device_status(7).await.unwrap().unwrap();

        assert_eq!(second.status.0, json!({"temp": 22.0}));
        assert!(second.updated_at > first.updated_at);
        assert!(second.last_reported_at > first.last_reported_at);
    }

    #[sqlx::test(migrations = "../migrations")]
    async fn device_status_replay_is_idempotent(db: PgPool) {
        let store = PgStateStore::new_from_pool(db);
        let status = document(r#"{"firmware": "1.2.0", "rssi": -61}"#);

        store.replace_device_status(9, &status).await.unwrap();
        let first = store.fetch_device_status(9).await.unwrap().unwrap();

        tick().await;
        store.replace_device_status(9, &status).await.unwrap();
        let second = store.fetch_device_status(9).await.unwrap().unwrap();

        assert_eq!(first.status, second.status);
        assert!(second.updated_at > first.updated_at);
        assert!(second.last_reported_at > first.last_reported_at);
    }

    #[sqlx::test(migrations = "../migrations")]
    async fn device_status_keeps_number_precision(db: PgPool) {
        let store = PgStateStore::new_from_pool(db);

        store
            .replace_device_status(
                5,
                &document(r#"{"big":123456789012345678901234567890,"a":1.50}"#),
            )
            .await
            .unwrap();

        let stored: String =
            sqlx::query_scalar("SELECT status::text FROM device_status WHERE device_id = $1")
                .bind(5_i64)
                .fetch_one(&store.pool)
                .await
                .unwrap();

        // jsonb reorders keys and normalizes whitespace, but keeps numeric digits and scale.
        assert_eq!(stored, r#"{"a": 1.50, "big": 123456789012345678901234567890}"#);
    }

    #[sqlx::test(migrations = "../migrations")]
    async fn concurrent_writes_to_one_room_stay_consistent(db: PgPool) {
        let store = PgStateStore::new_from_pool(db);
        let mut writers = JoinSet::new();

        for i in 0..16 {
            let store = store.clone();
            writers.spawn(async move {
                store
                    .upsert_room_status(&update(42, i % 2 == 0, i))
                    .await
            });
        }

        while let Some(result) = writers.join_next().await {
            assert_eq!(result.unwrap().unwrap(), 1);
        }

        let rows: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM room_status")
            .fetch_one(&store.pool)
            .await
            .unwrap();
        assert_eq!(rows, 1);

        let row = store.fetch_room_status(42).await.unwrap().unwrap();
        assert!(row.last_occupancy_change <= row.updated_at);
        assert!((0..16).contains(&row.occupant_count));
        assert_eq!(row.occupied, row.occupant_count % 2 == 0);
    }

    #[sqlx::test(migrations = "../migrations")]
    async fn ping_succeeds_against_live_database(db: PgPool) {
        let store = PgStateStore::new_from_pool(db);

        store.ping().await.unwrap();
    }

    #[test]
    fn classifies_connectivity_errors() {
        assert!(matches!(
            StorageError::from_query("INSERT", sqlx::Error::PoolTimedOut),
            StorageError::ConnectionError { .. }
        ));
        assert!(matches!(
            StorageError::from_query("INSERT", sqlx::Error::RowNotFound),
            StorageError::QueryError {
                command: "INSERT",
                ..
            }
        ));
    }
}
