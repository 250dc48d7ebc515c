//! SQLite-backed payment registry and parking audit log.

use crate::config::{PlateMatchMode, StorageConfig};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use sqlx::FromRow;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, instrument};

/// Plates inserted into `PAID_VEHICLES` when demo seeding is enabled.
pub const DEMO_VEHICLES: [(&str, PaymentStatus); 4] = [
    ("abc1234", PaymentStatus::Paid),
    ("wbj5678", PaymentStatus::Unpaid),
    ("ajv1688", PaymentStatus::Paid),
    ("nbx3388", PaymentStatus::Unpaid),
];

/// Errors raised by the parking store.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Failed to open database: {0}")]
    Connect(#[source] sqlx::Error),

    #[error("Failed to run migrations: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),

    #[error("Database query failed: {0}")]
    Query(#[from] sqlx::Error),

    #[error(transparent)]
    InvalidStatus(#[from] ParseStatusError),
}

/// Payment status of a vehicle. Plates the registry does not know resolve to
/// the default, `Unpaid`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PaymentStatus {
    Paid,
    #[default]
    Unpaid,
}

impl PaymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::Paid => "paid",
            PaymentStatus::Unpaid => "unpaid",
        }
    }
}

impl fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error)]
#[error("Unknown payment status '{0}'")]
pub struct ParseStatusError(pub String);

impl FromStr for PaymentStatus {
    type Err = ParseStatusError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let value = s.trim();
        if value.eq_ignore_ascii_case("paid") {
            Ok(PaymentStatus::Paid)
        } else if value.eq_ignore_ascii_case("unpaid") {
            Ok(PaymentStatus::Unpaid)
        } else {
            Err(ParseStatusError(s.to_string()))
        }
    }
}

impl TryFrom<String> for PaymentStatus {
    type Error = ParseStatusError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

/// A row of `PARKING_LOGS`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct ParkingLogEntry {
    pub id: i64,
    pub plate: String,
    /// Seconds since the Unix epoch
    pub timestamp: i64,
    #[sqlx(try_from = "String")]
    pub payment_status: PaymentStatus,
    pub snapshot_path: String,
}

/// Values for a log row about to be appended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewLogEntry {
    pub plate: String,
    pub timestamp: i64,
    pub payment_status: PaymentStatus,
    pub snapshot_path: String,
}

/// Read-only payment lookup.
#[async_trait]
pub trait PaymentRegistry: Send + Sync {
    /// `Ok(None)` when the plate is not registered.
    async fn lookup(&self, plate: &str) -> Result<Option<PaymentStatus>, StoreError>;
}

/// Append-only detection history.
#[async_trait]
pub trait AuditLog: Send + Sync {
    /// Append one entry and return its id. Entries are never deduplicated.
    async fn append(&self, entry: &NewLogEntry) -> Result<i64, StoreError>;
}

/// Parking database holding both the registry and the audit log.
pub struct ParkingStore {
    pool: SqlitePool,
    match_mode: PlateMatchMode,
}

impl ParkingStore {
    /// Open the database. A single pooled connection serves the loop, which
    /// is the only writer.
    pub async fn connect(
        config: &StorageConfig,
        match_mode: PlateMatchMode,
    ) -> Result<Self, StoreError> {
        let options = SqliteConnectOptions::from_str(&config.database_url)
            .map_err(StoreError::Connect)?
            .create_if_missing(true);

        // An in-memory database lives only as long as its connection.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .min_connections(1)
            .idle_timeout(None::<Duration>)
            .max_lifetime(None::<Duration>)
            .acquire_timeout(config.connect_timeout())
            .connect_with(options)
            .await
            .map_err(StoreError::Connect)?;

        info!(url = %config.database_url, "Connected to parking database");

        Ok(Self { pool, match_mode })
    }

    /// Run database migrations
    pub async fn run_migrations(&self) -> Result<(), StoreError> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        debug!("Database migrations completed");
        Ok(())
    }

    /// Insert the demo plates when the registry is empty. A registry that
    /// already holds any row is left alone. Returns the number of rows inserted.
    pub async fn seed_demo_registry(&self) -> Result<u64, StoreError> {
        let mut tx = self.pool.begin().await?;

        let (existing,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM PAID_VEHICLES")
            .fetch_one(&mut *tx)
            .await?;
        if existing > 0 {
            debug!(existing, "Payment registry already populated, skipping demo seed");
            return Ok(0);
        }

        let mut inserted = 0;
        for (plate, status) in DEMO_VEHICLES {
            inserted += sqlx::query("INSERT OR IGNORE INTO PAID_VEHICLES (plate, status) VALUES (?1, ?2)")
                .bind(plate)
                .bind(status.as_str())
                .execute(&mut *tx)
                .await?
                .rows_affected();
        }

        tx.commit().await?;

        info!(inserted, "Demo payment registry seeded");
        Ok(inserted)
    }

    pub async fn count_logs(&self) -> Result<i64, StoreError> {
        let count: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM PARKING_LOGS")
            .fetch_one(&self.pool)
            .await?;

        Ok(count.0)
    }

    /// Close the pool, waiting for the connection to be released.
    pub async fn close(&self) {
        self.pool.close().await;
        info!("Parking database closed");
    }
}

#[cfg(test)]
impl ParkingStore {
    /// Insert or replace a registry row.
    pub async fn set_payment_status(
        &self,
        plate: &str,
        status: PaymentStatus,
    ) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO PAID_VEHICLES (plate, status) VALUES (?1, ?2)
             ON CONFLICT(plate) DO UPDATE SET status = excluded.status",
        )
        .bind(plate)
        .bind(status.as_str())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Most recent log entries, newest first.
    pub async fn recent_logs(&self, limit: i64) -> Result<Vec<ParkingLogEntry>, StoreError> {
        let entries = sqlx::query_as::<_, ParkingLogEntry>(
            r#"
            SELECT id, plate, timestamp, payment_status, snapshot_path
            FROM PARKING_LOGS
            ORDER BY id DESC
            LIMIT ?1
            "#,
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(entries)
    }

    /// All log entries for one plate, oldest first.
    pub async fn logs_for_plate(&self, plate: &str) -> Result<Vec<ParkingLogEntry>, StoreError> {
        let entries = sqlx::query_as::<_, ParkingLogEntry>(
            r#"
            SELECT id, plate, timestamp, payment_status, snapshot_path
            FROM PARKING_LOGS
            WHERE plate = ?1
            ORDER BY id ASC
            "#,
        )
        .bind(plate)
        .fetch_all(&self.pool)
        .await?;

        Ok(entries)
    }
}

#[async_trait]
impl PaymentRegistry for ParkingStore {
    #[instrument(skip(self))]
    async fn lookup(&self, plate: &str) -> Result<Option<PaymentStatus>, StoreError> {
        let sql = match self.match_mode {
            PlateMatchMode::Exact => "SELECT status FROM PAID_VEHICLES WHERE plate = ?1",
            PlateMatchMode::CaseInsensitive => {
                "SELECT status FROM PAID_VEHICLES WHERE plate = ?1 COLLATE NOCASE LIMIT 1"
            }
        };

        let row: Option<(String,)> = sqlx::query_as(sql)
            .bind(plate)
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some((status,)) => Ok(Some(status.parse()?)),
            None => Ok(None),
        }
    }
}

#[async_trait]
impl AuditLog for ParkingStore {
    #[instrument(skip(self, entry), fields(plate = %entry.plate, timestamp = entry.timestamp))]
    async fn append(&self, entry: &NewLogEntry) -> Result<i64, StoreError> {
        let result = sqlx::query(
            r#"
            INSERT INTO PARKING_LOGS (plate, timestamp, payment_status, snapshot_path)
            VALUES (?1, ?2, ?3, ?4)
            "#,
        )
        .bind(&entry.plate)
        .bind(entry.timestamp)
        .bind(entry.payment_status.as_str())
        .bind(&entry.snapshot_path)
        .execute(&self.pool)
        .await?;

        metrics::counter!("parkwatch.logs.appended").increment(1);

        Ok(result.last_insert_rowid())
    }
}
