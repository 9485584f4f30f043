use super::Sink;
use crate::error::SinkError;
use anyhow::{bail, Context, Result};
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use std::time::Duration;

/// `(sensor, ts)`-keyed Postgres table; duplicate keys are ignored.
pub struct PgSink {
    pool: PgPool,
    table: String,
}

fn valid_table_name(table: &str) -> bool {
    !table.is_empty()
        && table
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '.')
        && !table.starts_with(|c: char| c.is_ascii_digit())
}

fn classify(err: sqlx::Error) -> SinkError {
    let rejected = matches!(
        err,
        sqlx::Error::Database(_)
            | sqlx::Error::ColumnDecode { .. }
            | sqlx::Error::Encode(_)
            | sqlx::Error::TypeNotFound { .. }
    );
    if rejected {
        SinkError::WriteRejected(err.to_string())
    } else {
        SinkError::Unreachable(err.to_string())
    }
}

impl PgSink {
    pub fn connect_lazy(database_url: &str, table: &str, connect_timeout: Duration) -> Result<Self> {
        if !valid_table_name(table) {
            bail!("invalid sink table name {table:?}");
        }
        let pool = PgPoolOptions::new()
            .max_connections(2)
            .acquire_timeout(connect_timeout)
            .connect_lazy(database_url)
            .context("invalid postgres sink url")?;
        Ok(Self {
            pool,
            table: table.to_string(),
        })
    }
}

impl Sink for PgSink {
    async fn check(&self) -> Result<(), SinkError> {
        let ddl = format!(
            "CREATE TABLE IF NOT EXISTS {} (\
                sensor text NOT NULL, \
                ts bigint NOT NULL, \
                power double precision NOT NULL, \
                PRIMARY KEY (sensor, ts))",
            self.table
        );
        sqlx::query(&ddl)
            .execute(&self.pool)
            .await
            .map(|_| ())
            .map_err(|err| SinkError::Unreachable(err.to_string()))
    }

    async fn append(&self, identity: &str, timestamp: i64, value: f64) -> Result<(), SinkError> {
        let sql = format!(
            "INSERT INTO {} (sensor, ts, power) VALUES ($1, $2, $3) ON CONFLICT DO NOTHING",
            self.table
        );
        let result = sqlx::query(&sql)
            .bind(identity)
            .bind(timestamp)
            .bind(value)
            .execute(&self.pool)
            .await
            .map_err(classify)?;
        if result.rows_affected() == 0 {
            tracing::warn!(sensor = identity, timestamp, "skipped duplicate power row");
        }
        Ok(())
    }
}
