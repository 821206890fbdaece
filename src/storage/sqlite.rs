//! SQLite status store
//!
//! ## Features
//!
//! - **Embedded**: No separate database server required
//! - **WAL mode**: Readers (cache refreshes) don't block the write-back flusher
//! - **Connection pooling**: Efficient resource usage
//! - **Migrations**: Automatic schema versioning with sqlx

use std::collections::HashMap;
use std::path::Path;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteRow, SqliteSynchronous,
};
use sqlx::{Pool, Row, Sqlite};
use tracing::{debug, info, instrument, warn};

use super::backend::{HealthStatus, StatusStore};
use super::error::{StorageError, StorageResult};
use crate::ReporterStatus;

pub struct SqliteStatusStore {
    pool: Pool<Sqlite>,
    db_path: String,
}

impl SqliteStatusStore {
    /// Open (or create) the database at `db_path` and run migrations.
    ///
    /// ```no_run
    /// # use fleetwatch::storage::sqlite::SqliteStatusStore;
    /// # async fn example() -> anyhow::Result<()> {
    /// let store = SqliteStatusStore::new("./fleetwatch.db").await?;
    /// # Ok(())
    /// # }
    /// ```
    #[instrument(skip_all)]
    pub async fn new(db_path: impl AsRef<Path>) -> StorageResult<Self> {
        let db_path_str = db_path.as_ref().to_string_lossy().to_string();

        info!("initializing SQLite status store at: {}", db_path_str);

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
        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .map_err(|e| StorageError::MigrationFailed(e.to_string()))?;

        info!("database migrations complete");

        Ok(Self {
            pool,
            db_path: db_path_str,
        })
    }

    fn timestamp_to_millis(dt: &DateTime<Utc>) -> i64 {
        dt.timestamp_millis()
    }

    fn millis_to_timestamp(millis: i64) -> DateTime<Utc> {
        DateTime::from_timestamp_millis(millis).unwrap_or_else(Utc::now)
    }

    fn row_to_status(row: &SqliteRow) -> ReporterStatus {
        ReporterStatus {
            id: row.get("reporter_id"),
            is_healthy: row.get("is_healthy"),
            first_seen: Self::millis_to_timestamp(row.get("first_seen")),
            last_seen: Self::millis_to_timestamp(row.get("last_seen")),
            host_ip: row.get("host_ip"),
            last_evaluated: None,
            alert_sent: false,
        }
    }

    /// `WHERE` clause selecting `patterns`, empty if every reporter matches.
    fn pattern_clause(patterns: &[String]) -> String {
        if patterns.is_empty() {
            return String::new();
        }

        let conditions = vec!["reporter_id LIKE ?"; patterns.len()].join(" OR ");
        format!("WHERE ({})", conditions)
    }
}

#[async_trait]
impl StatusStore for SqliteStatusStore {
    #[instrument(skip(self))]
    async fn get(&self, reporter_id: &str) -> StorageResult<ReporterStatus> {
        let row = sqlx::query(
            r#"
            SELECT reporter_id, is_healthy, first_seen, last_seen, host_ip
            FROM reporter_status
            WHERE reporter_id = ?
            "#,
        )
        .bind(reporter_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| StorageError::QueryFailed(e.to_string()))?;

        row.as_ref()
            .map(Self::row_to_status)
            .ok_or_else(|| StorageError::NotFound(reporter_id.to_string()))
    }

    #[instrument(skip(self, status), fields(reporter_id = %status.id))]
    async fn put(&self, status: &ReporterStatus) -> StorageResult<()> {
        sqlx::query(
            r#"
            INSERT INTO reporter_status (reporter_id, is_healthy, first_seen, last_seen, host_ip)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT (reporter_id) DO UPDATE SET
                is_healthy = excluded.is_healthy,
                first_seen = MIN(reporter_status.first_seen, excluded.first_seen),
                last_seen = excluded.last_seen,
                host_ip = COALESCE(excluded.host_ip, reporter_status.host_ip)
            "#,
        )
        .bind(&status.id)
        .bind(status.is_healthy)
        .bind(Self::timestamp_to_millis(&status.first_seen))
        .bind(Self::timestamp_to_millis(&status.last_seen))
        .bind(&status.host_ip)
        .execute(&self.pool)
        .await
        .map_err(|e| StorageError::QueryFailed(e.to_string()))?;

        Ok(())
    }

    #[instrument(skip(self))]
    async fn list_matching(&self, patterns: &[String]) -> StorageResult<Vec<ReporterStatus>> {
        let sql = format!(
            r#"
            SELECT reporter_id, is_healthy, first_seen, last_seen, host_ip
            FROM reporter_status
            {}
            ORDER BY reporter_id ASC
            "#,
            Self::pattern_clause(patterns)
        );

        let mut query = sqlx::query(&sql);
        for pattern in patterns {
            query = query.bind(pattern);
        }

        let rows = query
            .fetch_all(&self.pool)
            .await
            .map_err(|e| StorageError::QueryFailed(e.to_string()))?;

        let statuses: Vec<ReporterStatus> = rows.iter().map(Self::row_to_status).collect();
        debug!("query returned {} reporters", statuses.len());
        Ok(statuses)
    }

    #[instrument(skip(self))]
    async fn list_never_reported(&self, patterns: &[String]) -> StorageResult<Vec<String>> {
        let pattern_clause = Self::pattern_clause(patterns);
        let sql = if pattern_clause.is_empty() {
            "SELECT reporter_id FROM reporter_status WHERE first_seen = last_seen ORDER BY reporter_id ASC".to_string()
        } else {
            format!(
                "SELECT reporter_id FROM reporter_status {} AND first_seen = last_seen ORDER BY reporter_id ASC",
                pattern_clause
            )
        };

        let mut query = sqlx::query(&sql);
        for pattern in patterns {
            query = query.bind(pattern);
        }

        let rows = query
            .fetch_all(&self.pool)
            .await
            .map_err(|e| StorageError::QueryFailed(e.to_string()))?;

        Ok(rows.iter().map(|row| row.get("reporter_id")).collect())
    }

    #[instrument(skip(self))]
    async fn delete(&self, reporter_id: &str) -> StorageResult<()> {
        let result = sqlx::query("DELETE FROM reporter_status WHERE reporter_id = ?")
            .bind(reporter_id)
            .execute(&self.pool)
            .await
            .map_err(|e| StorageError::QueryFailed(e.to_string()))?;

        debug!("deleted {} rows", result.rows_affected());
        Ok(())
    }

    #[instrument(skip(self))]
    async fn health_check(&self) -> StorageResult<HealthStatus> {
        match sqlx::query("SELECT COUNT(*) AS reporters FROM reporter_status")
            .fetch_one(&self.pool)
            .await
        {
            Ok(row) => {
                let reporters: i64 = row.get("reporters");
                let mut metadata = HashMap::new();
                metadata.insert("backend".to_string(), "sqlite".to_string());
                metadata.insert("db_path".to_string(), self.db_path.clone());
                metadata.insert("reporters".to_string(), reporters.to_string());

                Ok(HealthStatus {
                    healthy: true,
                    message: "SQLite backend operational".to_string(),
                    metadata,
                })
            }
            Err(e) => {
                warn!("health check failed: {}", e);
                Ok(HealthStatus {
                    healthy: false,
                    message: format!("health check failed: {}", e),
                    metadata: HashMap::new(),
                })
            }
        }
    }

    async fn close(&self) -> StorageResult<()> {
        info!("closing SQLite status store");
        self.pool.close().await;
        Ok(())
    }
}
