use crate::error::PollError;
use crate::model::Sample;
use serde::Serialize;
use std::ops::RangeInclusive;

/// Longest grid accepted, in seconds (one leap year).
pub const MAX_GRID_SECONDS: u64 = 366 * 24 * 3600;

/// Dense one-second timeline `[start, stop]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeGrid {
    start: i64,
    stop: i64,
}

impl TimeGrid {
    pub fn new(start: i64, stop: i64) -> Result<Self, PollError> {
        if start > stop {
            return Err(PollError::InvalidWindow { start, stop });
        }
        if stop.abs_diff(start) >= MAX_GRID_SECONDS {
            return Err(PollError::WindowTooLong {
                start,
                stop,
                max: MAX_GRID_SECONDS,
            });
        }
        Ok(Self { start, stop })
    }

    pub fn start(&self) -> i64 {
        self.start
    }

    pub fn stop(&self) -> i64 {
        self.stop
    }

    pub fn len(&self) -> usize {
        self.stop.abs_diff(self.start) as usize + 1
    }

    pub fn is_empty(&self) -> bool {
        false
    }

    pub fn timestamps(&self) -> RangeInclusive<i64> {
        self.start..=self.stop
    }

    /// Consecutive sub-grids of at most `max_len` slots covering the grid.
    pub fn windows(&self, max_len: u64) -> Vec<TimeGrid> {
        let step = i64::try_from(max_len.max(1)).unwrap_or(i64::MAX);
        let mut out = Vec::new();
        let mut cursor = self.start;
        while cursor <= self.stop {
            let end = cursor.saturating_add(step - 1).min(self.stop);
            out.push(TimeGrid {
                start: cursor,
                stop: end,
            });
            match end.checked_add(1) {
                Some(next) => cursor = next,
                None => break,
            }
        }
        out
    }
}

/// One value per grid slot.
#[derive(Debug, Clone, PartialEq)]
pub struct AlignedSeries {
    pub grid: TimeGrid,
    pub samples: Vec<Sample>,
}

#[derive(Serialize)]
struct SeriesOutput<'a> {
    timestamps: Vec<i64>,
    values: Vec<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    sensor: Option<&'a str>,
}

impl AlignedSeries {
    pub fn values(&self) -> Vec<f64> {
        self.samples.iter().map(|sample| sample.value).collect()
    }

    pub fn filled(&self) -> usize {
        self.samples.iter().filter(|sample| sample.is_ok()).count()
    }

    /// `{"timestamps": [...], "values": [...]}` with `-1` for empty slots.
    pub fn to_json(&self, sensor: Option<&str>) -> serde_json::Value {
        let output = SeriesOutput {
            timestamps: self.grid.timestamps().collect(),
            values: self.values(),
            sensor,
        };
        serde_json::to_value(output).unwrap_or(serde_json::Value::Null)
    }
}

/// Maps ascending `samples` onto `grid` with a single forward pass.
///
/// Samples behind the grid cursor are late or duplicate and are dropped;
/// slots without a sample become [`Sample::missing`].
pub fn align(grid: &TimeGrid, samples: &[Sample]) -> AlignedSeries {
    let mut out = Vec::with_capacity(grid.len());
    let mut offset = 0usize;

    for slot in grid.timestamps() {
        while offset < samples.len() && samples[offset].timestamp < slot {
            offset += 1;
        }
        match samples.get(offset) {
            Some(sample) if sample.timestamp == slot => {
                out.push(*sample);
                offset += 1;
            }
            _ => out.push(Sample::missing(slot)),
        }
    }

    AlignedSeries {
        grid: *grid,
        samples: out,
    }
}
