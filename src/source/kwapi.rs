use super::{last_sample, with_auth, BasicAuth, SourceReader, LATEST_LOOKBACK_SECS};
use crate::error::FetchError;
use crate::model::{Extractor, PhysicalSource, Sample};
use chrono::Utc;
use reqwest::{Client, StatusCode};
use serde::Deserialize;

/// Time-series power API: one request returns a window of `(timestamp, value)` pairs.
///
/// The source endpoint is the site name and the extractor is the series key
/// (the node name) passed as `only=`.
#[derive(Debug, Clone)]
pub struct KwapiReader {
    http: Client,
    api_base: String,
    auth: Option<BasicAuth>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum TimeseriesPayload {
    Envelope { items: Vec<Series> },
    Bare(Series),
}

#[derive(Debug, Deserialize)]
struct Series {
    #[serde(default)]
    uid: Option<String>,
    timestamps: Vec<f64>,
    values: Vec<Option<f64>>,
}

#[derive(Debug, Deserialize)]
struct AvailabilityPayload {
    #[serde(default)]
    available_on: Vec<String>,
}

impl KwapiReader {
    pub fn new(http: Client, api_base: impl Into<String>, auth: Option<BasicAuth>) -> Self {
        Self {
            http,
            api_base: api_base.into().trim_end_matches('/').to_string(),
            auth,
        }
    }

    pub fn source_for(site: &str, node: &str) -> PhysicalSource {
        PhysicalSource::key(site, node)
    }

    fn metrics_url(&self, site: &str) -> String {
        format!("{}/sites/{}/metrics/power/", self.api_base, site)
    }

    fn timeseries_url(&self, site: &str) -> String {
        format!("{}/sites/{}/metrics/power/timeseries", self.api_base, site)
    }
}

fn series_key(source: &PhysicalSource) -> Result<&str, FetchError> {
    match &source.extractor {
        Extractor::Key(key) => Ok(key.as_str()),
        Extractor::Port(_) => Err(FetchError::unavailable(
            &source.endpoint,
            "time-series sources need a series key, not a port",
        )),
    }
}

fn matches_node(entry: &str, key: &str) -> bool {
    entry == key
        || entry
            .strip_prefix(key)
            .is_some_and(|rest| rest.starts_with('.'))
}

fn decode_series(payload: TimeseriesPayload, key: &str) -> Result<Vec<Sample>, String> {
    let series = match payload {
        TimeseriesPayload::Bare(series) => series,
        TimeseriesPayload::Envelope { mut items } => {
            if items.is_empty() {
                return Ok(Vec::new());
            }
            let idx = items
                .iter()
                .position(|item| item.uid.as_deref().is_some_and(|uid| matches_node(uid, key)))
                .unwrap_or(0);
            items.swap_remove(idx)
        }
    };

    if series.timestamps.len() != series.values.len() {
        return Err(format!(
            "timestamps ({}) and values ({}) differ in length",
            series.timestamps.len(),
            series.values.len()
        ));
    }

    Ok(series
        .timestamps
        .into_iter()
        .zip(series.values)
        .filter_map(|(ts, value)| value.map(|value| Sample::ok(ts.round() as i64, value)))
        .collect())
}

impl SourceReader for KwapiReader {
    fn protocol(&self) -> &'static str {
        "kwapi"
    }

    async fn check_monitored(&self, source: &PhysicalSource) -> Result<(), FetchError> {
        let key = series_key(source)?;
        let url = self.metrics_url(&source.endpoint);
        let response = with_auth(self.http.get(&url), self.auth.as_ref())
            .send()
            .await
            .map_err(|err| FetchError::unavailable(&source.endpoint, err))?;
        if response.status() == StatusCode::NOT_FOUND {
            return Err(FetchError::not_monitored(&source.endpoint, key));
        }
        let payload: AvailabilityPayload = response
            .error_for_status()
            .map_err(|err| FetchError::unavailable(&source.endpoint, err))?
            .json()
            .await
            .map_err(|err| FetchError::unavailable(&source.endpoint, err))?;

        if payload.available_on.iter().any(|entry| matches_node(entry, key)) {
            Ok(())
        } else {
            Err(FetchError::not_monitored(&source.endpoint, key))
        }
    }

    async fn fetch_window(
        &self,
        source: &PhysicalSource,
        start: i64,
        stop: i64,
    ) -> Result<Vec<Sample>, FetchError> {
        let key = series_key(source)?;
        let url = self.timeseries_url(&source.endpoint);
        let query = [
            ("resolution", "1".to_string()),
            ("only", key.to_string()),
            ("from", start.to_string()),
            ("to", stop.to_string()),
        ];
        let payload: TimeseriesPayload = with_auth(self.http.get(&url), self.auth.as_ref())
            .query(&query)
            .send()
            .await
            .and_then(|response| response.error_for_status())
            .map_err(|err| FetchError::unavailable(&source.endpoint, err))?
            .json()
            .await
            .map_err(|err| FetchError::unavailable(&source.endpoint, err))?;

        let samples = decode_series(payload, key)
            .map_err(|reason| FetchError::unavailable(&source.endpoint, reason))?;
        tracing::debug!(site = %source.endpoint, key, start, stop, samples = samples.len(), "kwapi window fetched");
        Ok(samples)
    }

    async fn fetch_latest(&self, source: &PhysicalSource) -> Result<Sample, FetchError> {
        let now = Utc::now().timestamp();
        let samples = self
            .fetch_window(source, now - LATEST_LOOKBACK_SECS, now)
            .await?;
        last_sample(&source.endpoint, samples)
    }
}
