//! SQLite storage backend implementation
//!
//! This module provides a SQLite-based implementation of the `MonitorStore` trait.
//!
//! ## Features
//!
//! - **Embedded**: No separate database server required
//! - **WAL mode**: Sweeps keep reading while a manual probe writes
//! - **Connection pooling**: Efficient resource usage
//! - **Migrations**: Automatic schema versioning with sqlx
//!
//! Timestamps are stored as Unix milliseconds (UTC).

use std::path::Path;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteRow, SqliteSynchronous,
};
use sqlx::{Pool, Row, Sqlite};
use tracing::{debug, info, instrument, warn};

use super::backend::{HealthStatus, MonitorStore};
use super::error::{StorageError, StorageResult};
use super::schema::{
    Account, AccountId, Capability, LivenessMonitor, MonitorId, NewLivenessMonitor, ProbeRecord,
    WeatherMonitor,
};
use crate::LivenessState;
use crate::util::{millis_to_timestamp, timestamp_to_millis};

/// SQLite storage backend
pub struct SqliteStore {
    pool: Pool<Sqlite>,
    db_path: String,
}

impl SqliteStore {
    /// Open (or create) the database and run migrations
    ///
    /// ```no_run
    /// # use beacon::storage::sqlite::SqliteStore;
    /// # async fn example() -> anyhow::Result<()> {
    /// let store = SqliteStore::new("./beacon.db").await?;
    /// # Ok(())
    /// # }
    /// ```
    #[instrument(skip_all)]
    pub async fn new(db_path: impl AsRef<Path>) -> StorageResult<Self> {
        let db_path_str = db_path.as_ref().to_string_lossy().to_string();

        info!("initializing SQLite store at: {}", db_path_str);

        let options = SqliteConnectOptions::new()
            .filename(&db_path_str)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .busy_timeout(std::time::Duration::from_secs(30));

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await
            .map_err(|e| StorageError::ConnectionFailed(e.to_string()))?;

        debug!("running database migrations");
        sqlx::migrate!("./migrations").run(&pool).await?;

        info!("database migrations complete");

        Ok(Self {
            pool,
            db_path: db_path_str,
        })
    }

    fn liveness_from_row(row: &SqliteRow) -> StorageResult<LivenessMonitor> {
        let state: String = row.try_get("state")?;
        let state = LivenessState::parse(&state)
            .ok_or_else(|| StorageError::Corrupt(format!("unknown liveness state '{state}'")))?;

        Ok(LivenessMonitor {
            id: row.try_get("id")?,
            account_id: row.try_get("account_id")?,
            address: row.try_get("address")?,
            state,
            last_probe_at: millis_to_timestamp(row.try_get("last_probe_at")?),
            last_notified_at: row
                .try_get::<Option<i64>, _>("last_notified_at")?
                .map(millis_to_timestamp),
            created_at: millis_to_timestamp(row.try_get("created_at")?),
        })
    }

    fn weather_from_row(row: &SqliteRow) -> StorageResult<WeatherMonitor> {
        Ok(WeatherMonitor {
            id: row.try_get("id")?,
            account_id: row.try_get("account_id")?,
            location: row.try_get("location")?,
            last_check_at: row
                .try_get::<Option<i64>, _>("last_check_at")?
                .map(millis_to_timestamp),
            last_notified_at: row
                .try_get::<Option<i64>, _>("last_notified_at")?
                .map(millis_to_timestamp),
            last_report_at: row
                .try_get::<Option<i64>, _>("last_report_at")?
                .map(millis_to_timestamp),
            created_at: millis_to_timestamp(row.try_get("created_at")?),
        })
    }
}

const UPDATE_WEATHER: &str = "UPDATE weather_monitors \
     SET last_check_at = ?, last_notified_at = ?, last_report_at = ? WHERE id = ?";

fn bind_weather_update(
    monitor: &WeatherMonitor,
) -> sqlx::query::Query<'static, Sqlite, sqlx::sqlite::SqliteArguments<'static>> {
    sqlx::query(UPDATE_WEATHER)
        .bind(monitor.last_check_at.as_ref().map(timestamp_to_millis))
        .bind(monitor.last_notified_at.as_ref().map(timestamp_to_millis))
        .bind(monitor.last_report_at.as_ref().map(timestamp_to_millis))
        .bind(monitor.id)
}

const LIVENESS_COLUMNS: &str =
    "id, account_id, address, state, last_probe_at, last_notified_at, created_at";

const WEATHER_COLUMNS: &str =
    "id, account_id, location, last_check_at, last_notified_at, last_report_at, created_at";

#[async_trait]
impl MonitorStore for SqliteStore {
    #[instrument(skip(self))]
    async fn get_account(&self, id: AccountId) -> StorageResult<Option<Account>> {
        let row = sqlx::query("SELECT id, email, role, is_active FROM accounts WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        row.map(|row| -> StorageResult<Account> {
            Ok(Account {
                id: row.try_get("id")?,
                email: row.try_get("email")?,
                role: row.try_get("role")?,
                is_active: row.try_get("is_active")?,
            })
        })
        .transpose()
    }

    #[instrument(skip(self))]
    async fn has_capability(&self, id: AccountId, capability: Capability) -> StorageResult<bool> {
        let row: Option<(bool,)> = sqlx::query_as(
            "SELECT is_active FROM account_capabilities WHERE account_id = ? AND capability = ?",
        )
        .bind(id)
        .bind(capability.as_str())
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.is_some_and(|(active,)| active))
    }

    #[instrument(skip(self, account), fields(id = account.id))]
    async fn upsert_account(&self, account: Account) -> StorageResult<()> {
        sqlx::query(
            r#"
            INSERT INTO accounts (id, email, role, is_active)
            VALUES (?, ?, ?, ?)
            ON CONFLICT (id) DO UPDATE SET
                email = excluded.email,
                role = excluded.role,
                is_active = excluded.is_active
            "#,
        )
        .bind(account.id)
        .bind(&account.email)
        .bind(&account.role)
        .bind(account.is_active)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    #[instrument(skip(self))]
    async fn set_capability(
        &self,
        id: AccountId,
        capability: Capability,
        active: bool,
    ) -> StorageResult<()> {
        sqlx::query(
            r#"
            INSERT INTO account_capabilities (account_id, capability, is_active)
            VALUES (?, ?, ?)
            ON CONFLICT (account_id, capability) DO UPDATE SET
                is_active = excluded.is_active
            "#,
        )
        .bind(id)
        .bind(capability.as_str())
        .bind(active)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    #[instrument(skip(self))]
    async fn find_liveness_monitor(
        &self,
        account_id: AccountId,
        address: &str,
    ) -> StorageResult<Option<LivenessMonitor>> {
        let sql = format!(
            "SELECT {LIVENESS_COLUMNS} FROM liveness_monitors WHERE account_id = ? AND address = ?"
        );
        let row = sqlx::query(&sql)
            .bind(account_id)
            .bind(address)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(Self::liveness_from_row).transpose()
    }

    #[instrument(skip(self))]
    async fn get_liveness_monitor(&self, id: MonitorId) -> StorageResult<Option<LivenessMonitor>> {
        let sql = format!("SELECT {LIVENESS_COLUMNS} FROM liveness_monitors WHERE id = ?");
        let row = sqlx::query(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(Self::liveness_from_row).transpose()
    }

    #[instrument(skip(self, monitor), fields(account_id = monitor.account_id, address = %monitor.address))]
    async fn create_liveness_monitor(
        &self,
        monitor: NewLivenessMonitor,
    ) -> StorageResult<LivenessMonitor> {
        let probed_at = timestamp_to_millis(&monitor.probed_at);

        let result = sqlx::query(
            r#"
            INSERT INTO liveness_monitors (
                account_id, address, state, last_probe_at, last_notified_at, created_at
            )
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(monitor.account_id)
        .bind(&monitor.address)
        .bind(monitor.state.as_str())
        .bind(probed_at)
        .bind(monitor.notified_at.as_ref().map(timestamp_to_millis))
        .bind(probed_at)
        .execute(&self.pool)
        .await?;

        let id = result.last_insert_rowid();
        debug!("created liveness monitor {id}");

        Ok(LivenessMonitor {
            id,
            account_id: monitor.account_id,
            address: monitor.address,
            state: monitor.state,
            last_probe_at: millis_to_timestamp(probed_at),
            last_notified_at: monitor
                .notified_at
                .as_ref()
                .map(|at| millis_to_timestamp(timestamp_to_millis(at))),
            created_at: millis_to_timestamp(probed_at),
        })
    }

    #[instrument(skip(self, monitor), fields(id = monitor.id, state = %monitor.state))]
    async fn update_liveness_monitor(&self, monitor: &LivenessMonitor) -> StorageResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE liveness_monitors
            SET state = ?, last_probe_at = ?, last_notified_at = ?
            WHERE id = ?
            "#,
        )
        .bind(monitor.state.as_str())
        .bind(timestamp_to_millis(&monitor.last_probe_at))
        .bind(monitor.last_notified_at.as_ref().map(timestamp_to_millis))
        .bind(monitor.id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StorageError::NotFound(format!(
                "liveness monitor {}",
                monitor.id
            )));
        }

        Ok(())
    }

    #[instrument(skip(self, stale_before), fields(stale_before = %stale_before))]
    async fn due_liveness_monitors(
        &self,
        stale_before: DateTime<Utc>,
    ) -> StorageResult<Vec<LivenessMonitor>> {
        let sql = format!(
            "SELECT {LIVENESS_COLUMNS} FROM liveness_monitors WHERE last_probe_at <= ? ORDER BY id"
        );
        let rows = sqlx::query(&sql)
            .bind(timestamp_to_millis(&stale_before))
            .fetch_all(&self.pool)
            .await?;

        let monitors = rows
            .iter()
            .map(Self::liveness_from_row)
            .collect::<StorageResult<Vec<_>>>()?;
        debug!("{} liveness monitors due", monitors.len());
        Ok(monitors)
    }

    #[instrument(skip(self, record), fields(account_id = record.account_id, address = %record.address))]
    async fn append_probe_history(&self, record: ProbeRecord) -> StorageResult<()> {
        sqlx::query(
            r#"
            INSERT INTO probe_history (account_id, address, reachable, raw_output, error, probed_at)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(record.account_id)
        .bind(&record.address)
        .bind(record.reachable)
        .bind(&record.raw_output)
        .bind(&record.error)
        .bind(timestamp_to_millis(&record.probed_at))
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    #[instrument(skip(self))]
    async fn probe_history(
        &self,
        account_id: AccountId,
        address: &str,
        limit: usize,
    ) -> StorageResult<Vec<ProbeRecord>> {
        let rows = sqlx::query(
            r#"
            SELECT account_id, address, reachable, raw_output, error, probed_at
            FROM probe_history
            WHERE account_id = ? AND address = ?
            ORDER BY probed_at DESC, id DESC
            LIMIT ?
            "#,
        )
        .bind(account_id)
        .bind(address)
        .bind(i64::try_from(limit).unwrap_or(i64::MAX))
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|row| -> StorageResult<ProbeRecord> {
                Ok(ProbeRecord {
                    account_id: row.try_get("account_id")?,
                    address: row.try_get("address")?,
                    reachable: row.try_get("reachable")?,
                    raw_output: row.try_get("raw_output")?,
                    error: row.try_get("error")?,
                    probed_at: millis_to_timestamp(row.try_get("probed_at")?),
                })
            })
            .collect()
    }

    #[instrument(skip(self))]
    async fn create_weather_monitor(
        &self,
        account_id: AccountId,
        location: &str,
        created_at: DateTime<Utc>,
    ) -> StorageResult<WeatherMonitor> {
        let created_millis = timestamp_to_millis(&created_at);

        let result = sqlx::query(
            "INSERT INTO weather_monitors (account_id, location, created_at) VALUES (?, ?, ?)",
        )
        .bind(account_id)
        .bind(location)
        .bind(created_millis)
        .execute(&self.pool)
        .await?;

        Ok(WeatherMonitor {
            id: result.last_insert_rowid(),
            account_id,
            location: location.to_string(),
            last_check_at: None,
            last_notified_at: None,
            last_report_at: None,
            created_at: millis_to_timestamp(created_millis),
        })
    }

    #[instrument(skip(self))]
    async fn get_weather_monitor(&self, id: MonitorId) -> StorageResult<Option<WeatherMonitor>> {
        let sql = format!("SELECT {WEATHER_COLUMNS} FROM weather_monitors WHERE id = ?");
        let row = sqlx::query(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(Self::weather_from_row).transpose()
    }

    #[instrument(skip(self))]
    async fn list_weather_monitors(
        &self,
        account_id: AccountId,
    ) -> StorageResult<Vec<WeatherMonitor>> {
        let sql =
            format!("SELECT {WEATHER_COLUMNS} FROM weather_monitors WHERE account_id = ? ORDER BY id");
        let rows = sqlx::query(&sql)
            .bind(account_id)
            .fetch_all(&self.pool)
            .await?;

        rows.iter().map(Self::weather_from_row).collect()
    }

    #[instrument(skip(self, stale_before), fields(stale_before = %stale_before))]
    async fn due_weather_monitors(
        &self,
        stale_before: DateTime<Utc>,
    ) -> StorageResult<Vec<WeatherMonitor>> {
        let sql = format!(
            "SELECT {WEATHER_COLUMNS} FROM weather_monitors \
             WHERE last_report_at IS NULL OR last_report_at < ? ORDER BY id"
        );
        let rows = sqlx::query(&sql)
            .bind(timestamp_to_millis(&stale_before))
            .fetch_all(&self.pool)
            .await?;

        let monitors = rows
            .iter()
            .map(Self::weather_from_row)
            .collect::<StorageResult<Vec<_>>>()?;
        debug!("{} weather monitors due", monitors.len());
        Ok(monitors)
    }

    #[instrument(skip(self, monitor), fields(id = monitor.id))]
    async fn update_weather_monitor(&self, monitor: &WeatherMonitor) -> StorageResult<()> {
        let result = bind_weather_update(monitor).execute(&self.pool).await?;

        if result.rows_affected() == 0 {
            return Err(StorageError::NotFound(format!(
                "weather monitor {}",
                monitor.id
            )));
        }

        Ok(())
    }

    #[instrument(skip(self, monitors), fields(count = monitors.len()))]
    async fn update_weather_monitors(&self, monitors: &[WeatherMonitor]) -> StorageResult<()> {
        let mut tx = self.pool.begin().await?;

        for monitor in monitors {
            let result = bind_weather_update(monitor).execute(&mut *tx).await?;

            // dropping `tx` rolls back the rows written so far
            if result.rows_affected() == 0 {
                return Err(StorageError::NotFound(format!(
                    "weather monitor {}",
                    monitor.id
                )));
            }
        }

        tx.commit().await?;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn health_check(&self) -> StorageResult<HealthStatus> {
        match sqlx::query("SELECT 1").fetch_one(&self.pool).await {
            Ok(_) => Ok(HealthStatus {
                healthy: true,
                message: format!("SQLite store operational ({})", self.db_path),
            }),
            Err(e) => {
                warn!("health check failed: {}", e);
                Ok(HealthStatus {
                    healthy: false,
                    message: format!("health check failed: {}", e),
                })
            }
        }
    }

    async fn close(&self) -> StorageResult<()> {
        info!("closing SQLite store");
        self.pool.close().await;
        Ok(())
    }
}
