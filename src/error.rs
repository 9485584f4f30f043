use std::fmt::Display;

/// Failure of a single physical source read.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FetchError {
    /// Endpoint unreachable or payload malformed. Retried on the next cycle.
    #[error("{endpoint} unavailable: {reason}")]
    Unavailable { endpoint: String, reason: String },
    /// The endpoint reports it does not cover this source. Never retried.
    #[error("{endpoint} does not monitor {what}")]
    NotMonitored { endpoint: String, what: String },
}

impl FetchError {
    pub fn unavailable(endpoint: impl Into<String>, reason: impl Display) -> Self {
        Self::Unavailable {
            endpoint: endpoint.into(),
            reason: reason.to_string(),
        }
    }

    pub fn not_monitored(endpoint: impl Into<String>, what: impl Into<String>) -> Self {
        Self::NotMonitored {
            endpoint: endpoint.into(),
            what: what.into(),
        }
    }

    pub fn is_not_monitored(&self) -> bool {
        matches!(self, Self::NotMonitored { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SinkError {
    /// Connection or setup failure.
    #[error("sink unreachable: {0}")]
    Unreachable(String),
    /// A single write was refused; the sample is lost.
    #[error("sink rejected write: {0}")]
    WriteRejected(String),
}

/// Conditions that stop a scheduler.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PollError {
    #[error("{point} cannot be monitored: {reason}")]
    NotMonitored { point: String, reason: String },
    #[error("all sources of {point} failed for {cycles} consecutive cycle(s); connection lost")]
    AllSourcesFailed { point: String, cycles: u32 },
    #[error("sink unreachable: {0}")]
    SinkUnreachable(String),
    #[error("invalid window: start {start} is after stop {stop}")]
    InvalidWindow { start: i64, stop: i64 },
    #[error("window [{start}, {stop}] spans more than {max} seconds")]
    WindowTooLong { start: i64, stop: i64, max: u64 },
}
