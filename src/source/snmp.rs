use super::SourceReader;
use crate::error::FetchError;
use crate::model::{Extractor, PhysicalSource, Sample};
use chrono::{Local, NaiveDateTime, TimeZone};
use std::time::Duration;

/// Per-outlet active power; the outlet number is appended.
const OUTLET_POWER_OID: &[u32] = &[1, 3, 6, 1, 4, 1, 318, 1, 1, 26, 9, 4, 3, 1, 7];
const DEVICE_DATE_OID: &[u32] = &[1, 3, 6, 1, 4, 1, 318, 2, 1, 6, 1, 0];
const DEVICE_TIME_OID: &[u32] = &[1, 3, 6, 1, 4, 1, 318, 2, 1, 6, 2, 0];
const DEVICE_TIMESTAMP_FORMAT: &str = "%m/%d/%Y %H:%M:%S";
const DEFAULT_SNMP_PORT: u16 = 161;

/// Instantaneous outlet readings from SNMP-speaking PDUs.
///
/// The source endpoint is the PDU address (`host` or `host:port`) and the
/// extractor its outlet number. The reading's timestamp comes from the PDU
/// clock, not from the poller.
#[derive(Debug, Clone)]
pub struct SnmpReader {
    community: String,
    timeout: Duration,
}

struct RawReading {
    watts: f64,
    date: String,
    time: String,
}

impl SnmpReader {
    pub fn new(community: impl Into<String>, timeout: Duration) -> Self {
        Self {
            community: community.into(),
            timeout,
        }
    }
}

fn split_endpoint(endpoint: &str) -> (String, u16) {
    match endpoint.rsplit_once(':') {
        Some((host, port)) => match port.parse::<u16>() {
            Ok(port) => (host.to_string(), port),
            Err(_) => (endpoint.to_string(), DEFAULT_SNMP_PORT),
        },
        None => (endpoint.to_string(), DEFAULT_SNMP_PORT),
    }
}

fn outlet(source: &PhysicalSource) -> Result<u32, FetchError> {
    match source.extractor {
        Extractor::Port(port) => Ok(port),
        Extractor::Key(_) => Err(FetchError::not_monitored(
            &source.endpoint,
            "a PDU source without an outlet number",
        )),
    }
}

fn snmp_value_to_f64(value: &snmp::Value<'_>) -> Option<f64> {
    match value {
        snmp::Value::Integer(v) => Some(*v as f64),
        snmp::Value::Counter32(v) => Some(*v as f64),
        snmp::Value::Unsigned32(v) => Some(*v as f64),
        snmp::Value::Counter64(v) => Some(*v as f64),
        snmp::Value::OctetString(bytes) => String::from_utf8_lossy(bytes).trim().parse().ok(),
        _ => None,
    }
}

fn snmp_value_to_string(value: &snmp::Value<'_>) -> Option<String> {
    match value {
        snmp::Value::OctetString(bytes) => Some(String::from_utf8_lossy(bytes).trim().to_string()),
        _ => None,
    }
}

/// Parses the PDU's `MM/DD/YYYY` date and `HH:MM:SS` time strings as wall
/// clock time in `tz` and returns epoch seconds.
pub fn parse_device_timestamp<Tz: TimeZone>(date: &str, time: &str, tz: &Tz) -> Option<i64> {
    let raw = format!("{} {}", date.trim(), time.trim());
    let naive = NaiveDateTime::parse_from_str(&raw, DEVICE_TIMESTAMP_FORMAT).ok()?;
    tz.from_local_datetime(&naive)
        .earliest()
        .map(|dt| dt.timestamp())
}

fn read_outlet(
    host: &str,
    port: u16,
    community: &str,
    timeout: Duration,
    outlet: u32,
) -> Result<RawReading, String> {
    let mut session = snmp::SyncSession::new((host, port), community.as_bytes(), Some(timeout), 0)
        .map_err(|err| format!("snmp session init failed: {err}"))?;

    let mut power_oid = OUTLET_POWER_OID.to_vec();
    power_oid.push(outlet);

    let watts = {
        let mut response = session
            .get(&power_oid)
            .map_err(|err| format!("snmp get power failed: {err:?}"))?;
        response
            .varbinds
            .next()
            .and_then(|(_name, value)| snmp_value_to_f64(&value))
            .ok_or_else(|| "power varbind missing or not numeric".to_string())?
    };
    let date = {
        let mut response = session
            .get(DEVICE_DATE_OID)
            .map_err(|err| format!("snmp get date failed: {err:?}"))?;
        response
            .varbinds
            .next()
            .and_then(|(_name, value)| snmp_value_to_string(&value))
            .ok_or_else(|| "date varbind missing".to_string())?
    };
    let time = {
        let mut response = session
            .get(DEVICE_TIME_OID)
            .map_err(|err| format!("snmp get time failed: {err:?}"))?;
        response
            .varbinds
            .next()
            .and_then(|(_name, value)| snmp_value_to_string(&value))
            .ok_or_else(|| "time varbind missing".to_string())?
    };

    Ok(RawReading { watts, date, time })
}

impl SourceReader for SnmpReader {
    fn protocol(&self) -> &'static str {
        "snmp"
    }

    async fn check_monitored(&self, source: &PhysicalSource) -> Result<(), FetchError> {
        outlet(source).map(|_| ())
    }

    async fn fetch_window(
        &self,
        source: &PhysicalSource,
        _start: i64,
        _stop: i64,
    ) -> Result<Vec<Sample>, FetchError> {
        Err(FetchError::unavailable(
            &source.endpoint,
            "PDUs only report instantaneous readings",
        ))
    }

    async fn fetch_latest(&self, source: &PhysicalSource) -> Result<Sample, FetchError> {
        let outlet = outlet(source)?;
        let (host, port) = split_endpoint(&source.endpoint);
        let community = self.community.clone();
        let timeout = self.timeout;

        let reading = tokio::task::spawn_blocking(move || {
            read_outlet(&host, port, &community, timeout, outlet)
        })
        .await
        .map_err(|err| FetchError::unavailable(&source.endpoint, format!("snmp task failed: {err}")))?
        .map_err(|reason| FetchError::unavailable(&source.endpoint, reason))?;

        let timestamp = parse_device_timestamp(&reading.date, &reading.time, &Local)
            .ok_or_else(|| {
                FetchError::unavailable(
                    &source.endpoint,
                    format!("unparseable device clock {:?} {:?}", reading.date, reading.time),
                )
            })?;

        tracing::trace!(pdu = %source.endpoint, outlet, watts = reading.watts, timestamp, "snmp outlet read");
        Ok(Sample::ok(timestamp, reading.watts))
    }
}
