use std::fmt;

/// Numeric value emitted for slots without data.
pub const MISSING_VALUE: f64 = -1.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SampleStatus {
    Ok,
    Missing,
    Error,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Sample {
    pub timestamp: i64,
    pub value: f64,
    pub status: SampleStatus,
}

impl Sample {
    pub fn ok(timestamp: i64, value: f64) -> Self {
        Self {
            timestamp,
            value,
            status: SampleStatus::Ok,
        }
    }

    pub fn missing(timestamp: i64) -> Self {
        Self {
            timestamp,
            value: MISSING_VALUE,
            status: SampleStatus::Missing,
        }
    }

    pub fn error(timestamp: i64) -> Self {
        Self {
            timestamp,
            value: MISSING_VALUE,
            status: SampleStatus::Error,
        }
    }

    pub fn is_ok(&self) -> bool {
        self.status == SampleStatus::Ok
    }
}

/// How a source's contribution is picked out of its endpoint's answer.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Extractor {
    /// Outlet / column index on a PDU or wattmeter.
    Port(u32),
    /// Series key on a time-series API (usually the node name).
    Key(String),
}

impl fmt::Display for Extractor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Extractor::Port(port) => write!(f, "port {port}"),
            Extractor::Key(key) => write!(f, "key {key}"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SourceStatus {
    #[default]
    Unknown,
    Monitored,
    NotMonitored,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PhysicalSource {
    pub endpoint: String,
    pub extractor: Extractor,
    pub last_known_status: SourceStatus,
}

impl PhysicalSource {
    pub fn new(endpoint: impl Into<String>, extractor: Extractor) -> Self {
        Self {
            endpoint: endpoint.into(),
            extractor,
            last_known_status: SourceStatus::Unknown,
        }
    }

    pub fn port(endpoint: impl Into<String>, port: u32) -> Self {
        Self::new(endpoint, Extractor::Port(port))
    }

    pub fn key(endpoint: impl Into<String>, key: impl Into<String>) -> Self {
        Self::new(endpoint, Extractor::Key(key.into()))
    }
}

impl fmt::Display for PhysicalSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.endpoint, self.extractor)
    }
}

/// A monitored node and the physical sources that feed it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogicalPoint {
    identity: String,
    sources: Vec<PhysicalSource>,
}

impl LogicalPoint {
    pub fn new(identity: impl Into<String>, sources: Vec<PhysicalSource>) -> Self {
        Self {
            identity: identity.into(),
            sources,
        }
    }

    pub fn identity(&self) -> &str {
        &self.identity
    }

    pub fn sources(&self) -> &[PhysicalSource] {
        &self.sources
    }

    pub(crate) fn sources_mut(&mut self) -> &mut [PhysicalSource] {
        &mut self.sources
    }
}

/// Combination of every source's contribution for one instant.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AggregatedSample {
    pub timestamp: i64,
    pub value: f64,
    pub status: SampleStatus,
    /// At least one source did not report for this instant.
    pub degraded: bool,
    pub contributors: usize,
}

impl AggregatedSample {
    pub fn all_failed(timestamp: i64) -> Self {
        Self {
            timestamp,
            value: MISSING_VALUE,
            status: SampleStatus::Error,
            degraded: true,
            contributors: 0,
        }
    }

    pub fn as_sample(&self) -> Sample {
        Sample {
            timestamp: self.timestamp,
            value: self.value,
            status: self.status,
        }
    }
}

/// Last timestamp delivered to the sink for one point.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeliveryCursor {
    last: Option<i64>,
}

impl DeliveryCursor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn last(&self) -> Option<i64> {
        self.last
    }

    pub fn admits(&self, timestamp: i64) -> bool {
        self.last.map_or(true, |last| timestamp > last)
    }

    /// Never moves backwards.
    pub fn advance(&mut self, timestamp: i64) {
        if self.admits(timestamp) {
            self.last = Some(timestamp);
        }
    }
}
