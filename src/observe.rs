/// Something the scheduler did that an operator may want to see.
#[derive(Debug, Clone, PartialEq)]
pub enum PollEvent {
    SourceUnavailable {
        point: String,
        error: String,
    },
    Degraded {
        point: String,
        timestamp: i64,
        contributors: usize,
    },
    Delivered {
        point: String,
        timestamp: i64,
        value: f64,
        degraded: bool,
    },
    Stale {
        point: String,
        timestamp: i64,
        cursor: Option<i64>,
    },
    CycleFailed {
        point: String,
        consecutive: u32,
        threshold: u32,
    },
    WriteRejected {
        point: String,
        timestamp: i64,
        reason: String,
    },
    WindowFailed {
        point: String,
        start: i64,
        stop: i64,
    },
    BoundedCompleted {
        point: String,
        slots: usize,
        filled: usize,
    },
}

pub trait PollObserver: Send + Sync {
    fn record(&self, event: &PollEvent);
}

/// Emits every event as a structured `tracing` record.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingObserver;

impl PollObserver for TracingObserver {
    fn record(&self, event: &PollEvent) {
        match event {
            PollEvent::SourceUnavailable { point, error } => {
                tracing::warn!(point = %point, error = %error, "source unavailable");
            }
            PollEvent::Degraded {
                point,
                timestamp,
                contributors,
            } => {
                tracing::warn!(point = %point, timestamp, contributors, "partial reading; summing available sources");
            }
            PollEvent::Delivered {
                point,
                timestamp,
                value,
                degraded,
            } => {
                tracing::info!(point = %point, timestamp, power = value, degraded, "delivered sample");
            }
            PollEvent::Stale {
                point,
                timestamp,
                cursor,
            } => {
                tracing::debug!(point = %point, timestamp, cursor = ?cursor, "stale reading discarded");
            }
            PollEvent::CycleFailed {
                point,
                consecutive,
                threshold,
            } => {
                tracing::warn!(point = %point, consecutive, threshold, "every source failed this cycle");
            }
            PollEvent::WriteRejected {
                point,
                timestamp,
                reason,
            } => {
                tracing::warn!(point = %point, timestamp, reason = %reason, "sink rejected sample; dropped");
            }
            PollEvent::WindowFailed { point, start, stop } => {
                tracing::warn!(point = %point, start, stop, "every source failed for window");
            }
            PollEvent::BoundedCompleted {
                point,
                slots,
                filled,
            } => {
                tracing::info!(point = %point, slots, filled, "bounded series complete");
            }
        }
    }
}

#[cfg(test)]
#[derive(Debug, Default)]
pub(crate) struct RecordingObserver {
    events: std::sync::Mutex<Vec<PollEvent>>,
}

#[cfg(test)]
impl RecordingObserver {
    pub(crate) fn events(&self) -> Vec<PollEvent> {
        self.events.lock().map(|e| e.clone()).unwrap_or_default()
    }
}

#[cfg(test)]
impl PollObserver for RecordingObserver {
    fn record(&self, event: &PollEvent) {
        if let Ok(mut guard) = self.events.lock() {
            guard.push(event.clone());
        }
    }
}
