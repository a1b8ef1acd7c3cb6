//! Database schema management for `linewatch`.
//!
//! Ensures the readings tables and the audit log exist before the simulator
//! or the HTTP routes touch them. Applied once on startup from `main.rs`.
//! Forecast tables are created by the forecast job itself.

use anyhow::Result;
use sqlx::PgPool;

use crate::sensors::{quote_ident, LineConfig, SensorRangeTable};

// ---

/// Create the database schema (idempotent).
///
/// One readings table per configured line with a column per sensor, plus the
/// `logs` table. Safe to call on every startup; no-op if objects already exist.
///
/// Errors are propagated if any SQL execution fails.
pub async fn create_schema(pool: &PgPool, ranges: &SensorRangeTable) -> Result<()> {
    // ---
    let mut tx = pool.begin().await?;

    for line in ranges.lines() {
        sqlx::query(&readings_table_ddl(line)).execute(&mut *tx).await?;

        sqlx::query(&format!(
            r#"CREATE INDEX IF NOT EXISTS {} ON {} ("timestamp");"#,
            quote_ident(&format!("idx_{}_timestamp", line.id)),
            quote_ident(&line.id)
        ))
        .execute(&mut *tx)
        .await?;
    }

    // Audit trail written by the simulator and forecast job
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS logs (
            id          SERIAL PRIMARY KEY,
            "timestamp" TIMESTAMP   NOT NULL DEFAULT LOCALTIMESTAMP(0),
            level       VARCHAR(32) NOT NULL,
            type        VARCHAR(16) NOT NULL,
            message     TEXT        NOT NULL
        );
        "#,
    )
    .execute(&mut *tx)
    .await?;

    sqlx::query(
        r#"
        CREATE INDEX IF NOT EXISTS idx_logs_timestamp
            ON logs ("timestamp");
        "#,
    )
    .execute(&mut *tx)
    .await?;

    tx.commit().await?;
    Ok(())
}

fn readings_table_ddl(line: &LineConfig) -> String {
    // ---
    let sensor_columns: Vec<String> = line
        .sensor_ids()
        .map(|s| format!("    {} DOUBLE PRECISION", quote_ident(s)))
        .collect();

    format!(
        "CREATE TABLE IF NOT EXISTS {} (\n    \"timestamp\" TIMESTAMP NOT NULL,\n    \"timezone\" VARCHAR(3) NOT NULL,\n{}\n);",
        quote_ident(&line.id),
        sensor_columns.join(",\n")
    )
}
