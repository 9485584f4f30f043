//! Readers for single physical sources.
//!
//! A reader knows one wire protocol and nothing about aggregation: it turns a
//! [`PhysicalSource`] into samples, or into a [`FetchError`] the aggregator can
//! classify.

mod kwapi;
mod omegawatt;
mod snmp;

pub use kwapi::KwapiReader;
pub use omegawatt::OmegawattReader;
pub use snmp::{parse_device_timestamp, SnmpReader};

use crate::error::FetchError;
use crate::model::{PhysicalSource, Sample};
use std::future::Future;

/// Seconds looked back when a batch-only endpoint is asked for "now".
pub(crate) const LATEST_LOOKBACK_SECS: i64 = 30;

#[derive(Debug, Clone)]
pub struct BasicAuth {
    pub username: String,
    pub password: Option<String>,
}

pub trait SourceReader: Send + Sync {
    /// Short protocol name for logs.
    fn protocol(&self) -> &'static str;

    /// Pre-flight check; `NotMonitored` means the source can never be polled.
    fn check_monitored(
        &self,
        _source: &PhysicalSource,
    ) -> impl Future<Output = Result<(), FetchError>> + Send {
        async { Ok(()) }
    }

    /// Batch flavor: ascending samples inside `[start, stop]`, not necessarily contiguous.
    fn fetch_window(
        &self,
        source: &PhysicalSource,
        start: i64,
        stop: i64,
    ) -> impl Future<Output = Result<Vec<Sample>, FetchError>> + Send;

    /// Instantaneous flavor: one reading for "now".
    fn fetch_latest(
        &self,
        source: &PhysicalSource,
    ) -> impl Future<Output = Result<Sample, FetchError>> + Send;
}

pub fn build_http_client(
    timeout: std::time::Duration,
    insecure: bool,
) -> reqwest::Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(timeout)
        .danger_accept_invalid_certs(insecure)
        .build()
}

pub(crate) fn with_auth(
    request: reqwest::RequestBuilder,
    auth: Option<&BasicAuth>,
) -> reqwest::RequestBuilder {
    match auth {
        Some(auth) => request.basic_auth(&auth.username, auth.password.as_ref()),
        None => request,
    }
}

pub(crate) fn last_sample(endpoint: &str, samples: Vec<Sample>) -> Result<Sample, FetchError> {
    samples
        .into_iter()
        .filter(Sample::is_ok)
        .next_back()
        .ok_or_else(|| FetchError::unavailable(endpoint, "no recent reading"))
}
