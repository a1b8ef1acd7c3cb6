//! PostgreSQL persistence for readings, forecasts and the audit log.
//!
//! The simulator and the forecast job only see the collaborator traits
//! ([`SnapshotStore`], [`ForecastStore`], [`EventLog`]); [`PgStore`] is the
//! production implementation and also serves the read-only queries behind
//! the HTTP routes.
//!
//! Table and column names are spliced into SQL text, so every one of them is
//! resolved through the [`SensorRangeTable`] allow-list and double-quoted
//! first. Values are always bound.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{NaiveDate, NaiveDateTime};
use serde_json::{Map, Value};
use sqlx::{PgPool, Postgres, QueryBuilder, Row, Transaction};

use crate::error::PersistenceError;
use crate::models::{ForecastPoint, ForecastRow, LineSnapshot, LogEntry, SensorSample, TIMESTAMP_FORMAT};
use crate::sensors::{quote_ident, LineConfig, SensorRangeTable};

// ---

/// Audit log audience recorded in the `level` column.
const AUDIT_LEVEL: &str = "admin";

/// Advisory lock key shared by every process running the forecast job.
const FORECAST_RUN_LOCK: i64 = 0x6c77_6663;

/// Upper bound on rows returned by a single history query.
pub const MAX_HISTORY_ROWS: i64 = 1000;

/// Appends one snapshot row to a line's readings table.
#[async_trait]
pub trait SnapshotStore: Send + Sync {
    async fn insert_snapshot(&self, snapshot: &LineSnapshot) -> Result<(), PersistenceError>;
}

/// Held for the length of a forecast run; dropping it lets the next run in.
#[derive(Default)]
pub struct RunGuard(Option<Transaction<'static, Postgres>>);

/// Owns the lifecycle of per-line forecast tables.
#[async_trait]
pub trait ForecastStore: Send + Sync {
    /// Wait until no other run holds the store. Stores private to one
    /// process need no lock beyond the job's own.
    async fn lock_runs(&self) -> Result<RunGuard, PersistenceError> {
        Ok(RunGuard::default())
    }

    /// Create the line's forecast table if absent, otherwise empty it.
    async fn reset_forecast_table(&self, line: &LineConfig) -> Result<(), PersistenceError>;

    /// Insert points, returning the number of rows written.
    async fn insert_forecasts(
        &self,
        line: &LineConfig,
        points: &[ForecastPoint],
    ) -> Result<u64, PersistenceError>;
}

/// Kind of audit event, stored in the `type` column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    Info,
    Error,
}

impl EventKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Info => "INFO",
            Self::Error => "ERROR",
        }
    }
}

/// Best-effort audit trail; failures are only traced.
#[async_trait]
pub trait EventLog: Send + Sync {
    async fn log_event(&self, kind: EventKind, message: &str);
}

/// Filters for `/api/historical/{line}/{sensor}`.
#[derive(Debug, Default, Clone)]
pub struct HistoryFilter {
    // ---
    pub length: Option<i64>,
    pub date: Option<NaiveDate>,
    pub start: Option<NaiveDateTime>,
    pub end: Option<NaiveDateTime>,
}

#[derive(Debug, Clone)]
pub struct PgStore {
    pool: PgPool,
    ranges: Arc<SensorRangeTable>,
}

impl PgStore {
    // ---
    pub fn new(pool: PgPool, ranges: Arc<SensorRangeTable>) -> Self {
        Self { pool, ranges }
    }

    /// Latest row of a line as a JSON object keyed by column name.
    pub async fn latest_row(&self, line_id: &str) -> Result<Option<Value>, PersistenceError> {
        // ---
        let line = self.ranges.line(line_id)?;
        let columns: Vec<String> = line.sensor_ids().map(quote_ident).collect();
        let sql = format!(
            r#"SELECT "timestamp", "timezone", {} FROM {} ORDER BY "timestamp" DESC LIMIT 1"#,
            columns.join(", "),
            quote_ident(&line.id)
        );

        let Some(row) = sqlx::query(&sql).fetch_optional(&self.pool).await? else {
            return Ok(None);
        };

        let timestamp: NaiveDateTime = row.try_get("timestamp")?;
        let timezone: String = row.try_get("timezone")?;

        let mut object = Map::new();
        object.insert(
            "timestamp".to_string(),
            Value::String(timestamp.format(TIMESTAMP_FORMAT).to_string()),
        );
        object.insert("timezone".to_string(), Value::String(timezone));
        for sensor in line.sensor_ids() {
            let value: Option<f64> = row.try_get(sensor)?;
            object.insert(sensor.to_string(), value.map_or(Value::Null, Value::from));
        }
        Ok(Some(Value::Object(object)))
    }

    /// Newest-first samples of one sensor.
    pub async fn sensor_history(
        &self,
        line_id: &str,
        sensor_id: &str,
        filter: &HistoryFilter,
    ) -> Result<Vec<SensorSample>, PersistenceError> {
        // ---
        let sensor = quote_ident(&self.ranges.get(line_id, sensor_id)?.sensor_id);
        let line = self.ranges.line(line_id)?;

        let mut qb: QueryBuilder<Postgres> = QueryBuilder::new(format!(
            r#"SELECT "timestamp", {sensor} AS value FROM {} WHERE {sensor} IS NOT NULL"#,
            quote_ident(&line.id)
        ));
        if let Some(date) = filter.date {
            qb.push(r#" AND "timestamp"::date = "#).push_bind(date);
        }
        if let Some(start) = filter.start {
            qb.push(r#" AND "timestamp" >= "#).push_bind(start);
        }
        if let Some(end) = filter.end {
            qb.push(r#" AND "timestamp" <= "#).push_bind(end);
        }
        let limit = filter.length.unwrap_or(50).clamp(1, MAX_HISTORY_ROWS);
        qb.push(r#" ORDER BY "timestamp" DESC LIMIT "#).push_bind(limit);

        Ok(qb
            .build_query_as::<SensorSample>()
            .fetch_all(&self.pool)
            .await?)
    }

    /// All forecast rows of a line, oldest forecast time first.
    ///
    /// A line whose forecast table was never created yields an empty list.
    pub async fn forecasts(&self, line_id: &str) -> Result<Vec<ForecastRow>, PersistenceError> {
        // ---
        let line = self.ranges.line(line_id)?;
        let table = line.forecast_table();

        let exists: Option<String> = sqlx::query_scalar("SELECT to_regclass($1)::text")
            .bind(&table)
            .fetch_one(&self.pool)
            .await?;
        if exists.is_none() {
            return Ok(Vec::new());
        }

        let sql = format!(
            "SELECT id, sensor, forecast_time, forecast_value, lower_bound, upper_bound \
             FROM {} ORDER BY forecast_time ASC, sensor ASC",
            quote_ident(&table)
        );
        Ok(sqlx::query_as::<_, ForecastRow>(&sql)
            .fetch_all(&self.pool)
            .await?)
    }

    pub async fn recent_logs(&self, limit: i64) -> Result<Vec<LogEntry>, PersistenceError> {
        // ---
        Ok(sqlx::query_as::<_, LogEntry>(
            r#"SELECT id, "timestamp", level, type, message FROM logs ORDER BY "timestamp" DESC, id DESC LIMIT $1"#,
        )
        .bind(limit.clamp(1, MAX_HISTORY_ROWS))
        .fetch_all(&self.pool)
        .await?)
    }
}

#[async_trait]
impl SnapshotStore for PgStore {
    // ---
    async fn insert_snapshot(&self, snapshot: &LineSnapshot) -> Result<(), PersistenceError> {
        // ---
        let line = self.ranges.line(&snapshot.line_id)?;
        let mut columns = Vec::with_capacity(snapshot.readings.len());
        for reading in &snapshot.readings {
            columns.push(quote_ident(&line.sensor(&reading.sensor_id)?.sensor_id));
        }

        let mut qb: QueryBuilder<Postgres> = QueryBuilder::new(format!(
            r#"INSERT INTO {} ("timestamp", "timezone", {}) VALUES ("#,
            quote_ident(&line.id),
            columns.join(", ")
        ));
        let mut values = qb.separated(", ");
        values.push_bind(snapshot.timestamp);
        values.push_bind(snapshot.timezone);
        for reading in &snapshot.readings {
            values.push_bind(reading.value);
        }
        values.push_unseparated(")");

        qb.build().execute(&self.pool).await?;
        Ok(())
    }
}

#[async_trait]
impl ForecastStore for PgStore {
    // ---
    async fn lock_runs(&self) -> Result<RunGuard, PersistenceError> {
        // ---
        // released when the guard's transaction rolls back on drop
        let mut tx = self.pool.begin().await?;
        sqlx::query("SELECT pg_advisory_xact_lock($1)")
            .bind(FORECAST_RUN_LOCK)
            .execute(&mut *tx)
            .await?;
        Ok(RunGuard(Some(tx)))
    }

    async fn reset_forecast_table(&self, line: &LineConfig) -> Result<(), PersistenceError> {
        // ---
        let line = self.ranges.line(&line.id)?;
        let table = quote_ident(&line.forecast_table());

        let mut tx = self.pool.begin().await?;
        sqlx::query(&format!(
            r#"
            CREATE TABLE IF NOT EXISTS {table} (
                id             SERIAL PRIMARY KEY,
                sensor         VARCHAR(63)      NOT NULL,
                forecast_time  TIMESTAMP        NOT NULL,
                forecast_value DOUBLE PRECISION NOT NULL,
                lower_bound    DOUBLE PRECISION NOT NULL,
                upper_bound    DOUBLE PRECISION NOT NULL,
                created_at     TIMESTAMPTZ      NOT NULL DEFAULT now(),
                UNIQUE (sensor, forecast_time)
            )
            "#
        ))
        .execute(&mut *tx)
        .await?;

        sqlx::query(&format!("TRUNCATE TABLE {table} RESTART IDENTITY"))
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(())
    }

    async fn insert_forecasts(
        &self,
        line: &LineConfig,
        points: &[ForecastPoint],
    ) -> Result<u64, PersistenceError> {
        // ---
        if points.is_empty() {
            return Ok(0);
        }
        let line = self.ranges.line(&line.id)?;
        let sql = format!(
            "INSERT INTO {} (sensor, forecast_time, forecast_value, lower_bound, upper_bound) \
             VALUES ($1, $2, $3, $4, $5)",
            quote_ident(&line.forecast_table())
        );

        let mut tx = self.pool.begin().await?;
        let mut written = 0;
        for p in points {
            written += sqlx::query(&sql)
                .bind(&p.sensor_id)
                .bind(p.forecast_time)
                .bind(p.forecast_value)
                .bind(p.lower_bound)
                .bind(p.upper_bound)
                .execute(&mut *tx)
                .await?
                .rows_affected();
        }
        tx.commit().await?;
        Ok(written)
    }
}

#[async_trait]
impl EventLog for PgStore {
    // ---
    async fn log_event(&self, kind: EventKind, message: &str) {
        // ---
        let result = sqlx::query("INSERT INTO logs (level, type, message) VALUES ($1, $2, $3)")
            .bind(AUDIT_LEVEL)
            .bind(kind.as_str())
            .bind(message)
            .execute(&self.pool)
            .await;

        if let Err(e) = result {
            tracing::warn!("Failed to write audit log entry '{}': {}", message, e);
        }
    }
}
