//! Append-only delivery targets.

mod jsonl;
mod postgres;

pub use jsonl::{JsonLinesSink, StdoutSink};
pub use postgres::PgSink;

use crate::error::SinkError;
use anyhow::{bail, Context, Result};
use serde::Serialize;
use std::future::Future;
use std::time::Duration;
use url::Url;

/// One delivered sample as written to storage.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PowerRecord {
    pub timestamp: i64,
    pub sensor: String,
    pub power: f64,
}

pub trait Sink: Send + Sync {
    /// Startup probe; `Unreachable` is fatal.
    fn check(&self) -> impl Future<Output = Result<(), SinkError>> + Send;

    fn append(
        &self,
        identity: &str,
        timestamp: i64,
        value: f64,
    ) -> impl Future<Output = Result<(), SinkError>> + Send;
}

/// Sink selected at runtime from a `SINK` URL.
pub enum SinkAdapter {
    Stdout(StdoutSink),
    JsonLines(JsonLinesSink),
    Postgres(PgSink),
}

impl SinkAdapter {
    /// `stdout` / `-`, `file:///path`, a bare path, or `postgres://…`.
    pub fn from_url(raw: &str, table: &str, connect_timeout: Duration) -> Result<Self> {
        let raw = raw.trim();
        if raw.is_empty() || raw == "-" || raw.eq_ignore_ascii_case("stdout") {
            return Ok(Self::Stdout(StdoutSink::new()));
        }
        if raw.starts_with("postgres://") || raw.starts_with("postgresql://") {
            return Ok(Self::Postgres(PgSink::connect_lazy(raw, table, connect_timeout)?));
        }
        if raw.starts_with("file:") {
            let url = Url::parse(raw).with_context(|| format!("invalid sink url {raw}"))?;
            let path = url
                .to_file_path()
                .map_err(|_| anyhow::anyhow!("sink url {raw} is not a local path"))?;
            return Ok(Self::JsonLines(JsonLinesSink::new(path)));
        }
        if raw.contains("://") {
            bail!("unsupported sink scheme in {raw}");
        }
        Ok(Self::JsonLines(JsonLinesSink::new(raw.into())))
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Stdout(_) => "stdout",
            Self::JsonLines(_) => "jsonl",
            Self::Postgres(_) => "postgres",
        }
    }
}

impl Sink for SinkAdapter {
    async fn check(&self) -> Result<(), SinkError> {
        match self {
            Self::Stdout(sink) => sink.check().await,
            Self::JsonLines(sink) => sink.check().await,
            Self::Postgres(sink) => sink.check().await,
        }
    }

    async fn append(&self, identity: &str, timestamp: i64, value: f64) -> Result<(), SinkError> {
        match self {
            Self::Stdout(sink) => sink.append(identity, timestamp, value).await,
            Self::JsonLines(sink) => sink.append(identity, timestamp, value).await,
            Self::Postgres(sink) => sink.append(identity, timestamp, value).await,
        }
    }
}
