use super::{last_sample, SourceReader, LATEST_LOOKBACK_SECS};
use crate::error::FetchError;
use crate::model::{Extractor, PhysicalSource, Sample};
use chrono::{Local, TimeZone, Utc};
use flate2::read::GzDecoder;
use reqwest::{Client, StatusCode};
use std::collections::BTreeMap;
use std::io::Read;

const HOUR_SECS: i64 = 3600;
const STATUS_COLUMN: usize = 3;
const TIMESTAMP_COLUMN: usize = 2;
const FIRST_PORT_COLUMN: usize = 4;

/// Wattmeter hourly CSV logs.
///
/// The source endpoint is the wattmeter uid and the extractor its port. Each
/// hour lives in `power.csv.<YYYY-MM-DDTHH>`; every hour but the current one
/// is gzip-compressed. Several rows may round to the same second and are
/// averaged.
#[derive(Debug, Clone)]
pub struct OmegawattReader {
    http: Client,
    base: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct LogFile {
    suffix: String,
    compressed: bool,
}

impl OmegawattReader {
    pub fn new(http: Client, base: impl Into<String>) -> Self {
        Self {
            http,
            base: base.into().trim_end_matches('/').to_string(),
        }
    }

    /// `template` may contain `{site}`.
    pub fn for_site(http: Client, template: &str, site: &str) -> Self {
        Self::new(http, template.replace("{site}", site))
    }

    fn log_url(&self, uid: &str, file: &LogFile) -> String {
        let ext = if file.compressed { ".gz" } else { "" };
        format!("{}/data/{}-log/power.csv.{}{}", self.base, uid, file.suffix, ext)
    }

    async fn fetch_range_in<Tz: TimeZone>(
        &self,
        source: &PhysicalSource,
        start: i64,
        stop: i64,
        now: i64,
        tz: &Tz,
    ) -> Result<Vec<Sample>, FetchError>
    where
        Tz::Offset: std::fmt::Display,
    {
        let port = port(source)?;
        let mut acc: BTreeMap<i64, (f64, u32)> = BTreeMap::new();

        for file in log_files(start, stop, now, tz) {
            let url = self.log_url(&source.endpoint, &file);
            let response = self
                .http
                .get(&url)
                .send()
                .await
                .map_err(|err| FetchError::unavailable(&source.endpoint, err))?;
            if response.status() == StatusCode::NOT_FOUND {
                tracing::debug!(wattmeter = %source.endpoint, suffix = %file.suffix, "log not found; ending scan");
                break;
            }
            let body = response
                .error_for_status()
                .map_err(|err| FetchError::unavailable(&source.endpoint, err))?
                .bytes()
                .await
                .map_err(|err| FetchError::unavailable(&source.endpoint, err))?;

            let text = if file.compressed {
                let mut out = String::new();
                GzDecoder::new(&body[..])
                    .read_to_string(&mut out)
                    .map_err(|err| {
                        FetchError::unavailable(&source.endpoint, format!("gzip: {err}"))
                    })?;
                out
            } else {
                String::from_utf8_lossy(&body).into_owned()
            };
            accumulate_log(&text, port, start, stop, &mut acc);
        }

        Ok(acc
            .into_iter()
            .map(|(ts, (sum, count))| Sample::ok(ts, sum / f64::from(count)))
            .collect())
    }
}

fn port(source: &PhysicalSource) -> Result<usize, FetchError> {
    match source.extractor {
        Extractor::Port(port) => Ok(port as usize),
        Extractor::Key(_) => Err(FetchError::not_monitored(
            &source.endpoint,
            "a wattmeter source without a port",
        )),
    }
}

fn hour_suffix<Tz: TimeZone>(ts: i64, tz: &Tz) -> String
where
    Tz::Offset: std::fmt::Display,
{
    match tz.timestamp_opt(ts, 0).earliest() {
        Some(dt) => dt.format("%Y-%m-%dT%H").to_string(),
        None => String::new(),
    }
}

/// Hourly files covering `[start, stop]`, stopping at the current hour.
fn log_files<Tz: TimeZone>(start: i64, stop: i64, now: i64, tz: &Tz) -> Vec<LogFile>
where
    Tz::Offset: std::fmt::Display,
{
    let current = hour_suffix(now, tz);
    let mut files: Vec<LogFile> = Vec::new();
    let mut ts = start;
    let end = stop.saturating_add(HOUR_SECS);
    while ts < end {
        let suffix = hour_suffix(ts, tz);
        ts = ts.saturating_add(HOUR_SECS);
        if suffix.is_empty() {
            break;
        }
        if files.last().is_some_and(|last| last.suffix == suffix) {
            continue;
        }
        if suffix == current {
            files.push(LogFile {
                suffix,
                compressed: false,
            });
            break;
        }
        files.push(LogFile {
            suffix,
            compressed: true,
        });
    }
    files
}

fn accumulate_log(
    text: &str,
    port: usize,
    start: i64,
    stop: i64,
    acc: &mut BTreeMap<i64, (f64, u32)>,
) {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .from_reader(text.as_bytes());

    for record in reader.records().flatten() {
        if record.get(STATUS_COLUMN).map(str::trim) != Some("OK") {
            continue;
        }
        let Some(value) = record
            .get(FIRST_PORT_COLUMN + port)
            .map(str::trim)
            .filter(|raw| !raw.is_empty())
            .and_then(|raw| raw.parse::<f64>().ok())
        else {
            continue;
        };
        let Some(ts) = record
            .get(TIMESTAMP_COLUMN)
            .and_then(|raw| raw.trim().parse::<f64>().ok())
            .map(|ts| ts.round() as i64)
        else {
            continue;
        };
        if ts < start || ts > stop {
            continue;
        }
        let entry = acc.entry(ts).or_insert((0.0, 0));
        entry.0 += value;
        entry.1 += 1;
    }
}

impl SourceReader for OmegawattReader {
    fn protocol(&self) -> &'static str {
        "omegawatt"
    }

    async fn check_monitored(&self, source: &PhysicalSource) -> Result<(), FetchError> {
        port(source)?;
        let file = LogFile {
            suffix: hour_suffix(Utc::now().timestamp(), &Local),
            compressed: false,
        };
        let response = self
            .http
            .get(self.log_url(&source.endpoint, &file))
            .send()
            .await
            .map_err(|err| FetchError::unavailable(&source.endpoint, err))?;
        if response.status() == StatusCode::NOT_FOUND {
            return Err(FetchError::not_monitored(&source.endpoint, "current power log"));
        }
        response
            .error_for_status()
            .map(|_| ())
            .map_err(|err| FetchError::unavailable(&source.endpoint, err))
    }

    async fn fetch_window(
        &self,
        source: &PhysicalSource,
        start: i64,
        stop: i64,
    ) -> Result<Vec<Sample>, FetchError> {
        let now = Utc::now().timestamp();
        self.fetch_range_in(source, start, stop, now, &Local).await
    }

    async fn fetch_latest(&self, source: &PhysicalSource) -> Result<Sample, FetchError> {
        let now = Utc::now().timestamp();
        let samples = self
            .fetch_range_in(source, now - LATEST_LOOKBACK_SECS, now, now, &Local)
            .await?;
        last_sample(&source.endpoint, samples)
    }
}
