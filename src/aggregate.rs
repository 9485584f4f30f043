use crate::error::{FetchError, PollError};
use crate::model::{
    AggregatedSample, LogicalPoint, PhysicalSource, Sample, SampleStatus, SourceStatus,
};
use crate::source::SourceReader;
use futures::future::join_all;
use std::collections::BTreeMap;

/// Result of one "latest" fan-out.
#[derive(Debug, Clone)]
pub struct LatestAggregate {
    pub sample: AggregatedSample,
    pub failures: Vec<FetchError>,
}

/// Result of one window fan-out.
#[derive(Debug, Clone)]
pub struct WindowAggregate {
    /// Ascending, one entry per timestamp reported by at least one source.
    pub samples: Vec<AggregatedSample>,
    pub failures: Vec<FetchError>,
    pub total_sources: usize,
}

impl WindowAggregate {
    pub fn all_failed(&self) -> bool {
        self.failures.len() == self.total_sources
    }
}

/// Fans reads out to every physical source of one point and sums them.
pub struct SourceAggregator<R> {
    reader: R,
    point: LogicalPoint,
}

impl<R: SourceReader> SourceAggregator<R> {
    /// Pre-flight: rejects points with no sources or with any source its
    /// endpoint refuses to monitor. Transient failures here only warn.
    pub async fn prepare(reader: R, mut point: LogicalPoint) -> Result<Self, PollError> {
        if point.sources().is_empty() {
            return Err(PollError::NotMonitored {
                point: point.identity().to_string(),
                reason: "no physical source resolved".to_string(),
            });
        }

        let checks = join_all(
            point
                .sources()
                .iter()
                .map(|source| reader.check_monitored(source)),
        )
        .await;

        let identity = point.identity().to_string();
        for (source, check) in point.sources_mut().iter_mut().zip(checks) {
            match check {
                Ok(()) => source.last_known_status = SourceStatus::Monitored,
                Err(err) if err.is_not_monitored() => {
                    source.last_known_status = SourceStatus::NotMonitored;
                    return Err(PollError::NotMonitored {
                        point: identity,
                        reason: err.to_string(),
                    });
                }
                Err(err) => {
                    tracing::warn!(point = %identity, source = %source, error = %err, protocol = reader.protocol(), "pre-flight check failed; keeping source");
                }
            }
        }

        Ok(Self { reader, point })
    }

    pub fn point(&self) -> &LogicalPoint {
        &self.point
    }

    pub fn reader(&self) -> &R {
        &self.reader
    }

    /// Instantaneous fan-out. `fallback_ts` stamps the sample when every source failed.
    pub async fn poll_latest(&self, fallback_ts: i64) -> LatestAggregate {
        let results = join_all(
            self.point
                .sources()
                .iter()
                .map(|source| self.reader.fetch_latest(source)),
        )
        .await;
        combine_latest(self.point.sources(), results, fallback_ts)
    }

    /// Batch fan-out over `[start, stop]`.
    pub async fn poll_window(&self, start: i64, stop: i64) -> WindowAggregate {
        let results = join_all(
            self.point
                .sources()
                .iter()
                .map(|source| self.reader.fetch_window(source, start, stop)),
        )
        .await;
        combine_windows(results)
    }
}

/// Sums successful readings; the combined timestamp is the newest one reported.
/// `results` is in the order of `sources`.
pub fn combine_latest(
    sources: &[PhysicalSource],
    results: Vec<Result<Sample, FetchError>>,
    fallback_ts: i64,
) -> LatestAggregate {
    let total = results.len();
    let mut failures = Vec::new();
    let mut sum = 0.0;
    let mut contributors = 0usize;
    let mut timestamp: Option<i64> = None;

    for (source, result) in sources.iter().zip(results) {
        match result {
            Ok(sample) if sample.is_ok() => {
                sum += sample.value;
                contributors += 1;
                timestamp = Some(timestamp.map_or(sample.timestamp, |ts| ts.max(sample.timestamp)));
            }
            Ok(sample) => failures.push(FetchError::unavailable(
                &source.endpoint,
                format!("reading at {} has status {:?}", sample.timestamp, sample.status),
            )),
            Err(err) => failures.push(err),
        }
    }

    let sample = match timestamp {
        Some(timestamp) => AggregatedSample {
            timestamp,
            value: sum,
            status: SampleStatus::Ok,
            degraded: contributors < total,
            contributors,
        },
        None => AggregatedSample::all_failed(fallback_ts),
    };

    LatestAggregate { sample, failures }
}

/// Per-timestamp sum across sources. A timestamp some successful source did
/// not report is degraded; a failed source degrades every timestamp.
pub fn combine_windows(results: Vec<Result<Vec<Sample>, FetchError>>) -> WindowAggregate {
    let total_sources = results.len();
    let mut failures = Vec::new();
    let mut by_ts: BTreeMap<i64, (f64, usize)> = BTreeMap::new();

    for result in results {
        match result {
            Ok(samples) => {
                let mut last_ts: Option<i64> = None;
                for sample in samples.into_iter().filter(Sample::is_ok) {
                    // one contribution per source per second
                    if last_ts == Some(sample.timestamp) {
                        continue;
                    }
                    last_ts = Some(sample.timestamp);
                    let entry = by_ts.entry(sample.timestamp).or_insert((0.0, 0));
                    entry.0 += sample.value;
                    entry.1 += 1;
                }
            }
            Err(err) => failures.push(err),
        }
    }

    let samples = by_ts
        .into_iter()
        .map(|(timestamp, (value, contributors))| AggregatedSample {
            timestamp,
            value,
            status: SampleStatus::Ok,
            degraded: contributors < total_sources,
            contributors,
        })
        .collect();

    WindowAggregate {
        samples,
        failures,
        total_sources,
    }
}
