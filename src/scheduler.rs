use crate::aggregate::SourceAggregator;
use crate::error::{FetchError, PollError, SinkError};
use crate::grid::{align, AlignedSeries, TimeGrid};
use crate::model::{AggregatedSample, DeliveryCursor, Sample, SampleStatus};
use crate::observe::{PollEvent, PollObserver};
use crate::sink::Sink;
use crate::source::SourceReader;
use chrono::Utc;
use std::collections::HashSet;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Time source for the polling cadence.
pub trait Clock: Send + Sync {
    /// Epoch seconds.
    fn now(&self) -> i64;
    fn sleep(&self, duration: Duration) -> impl Future<Output = ()> + Send;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct TokioClock;

impl Clock for TokioClock {
    fn now(&self) -> i64 {
        Utc::now().timestamp()
    }

    fn sleep(&self, duration: Duration) -> impl Future<Output = ()> + Send {
        tokio::time::sleep(duration)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SchedulerSettings {
    pub poll_interval: Duration,
    /// Longest sub-window requested from a batch source in bounded mode.
    pub window_seconds: u64,
    /// Consecutive all-failed cycles tolerated before declaring connection loss.
    pub connection_loss_cycles: u32,
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(1),
            window_seconds: 3600,
            connection_loss_cycles: 1,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum PollState {
    Waiting,
    Polling,
    Delivering(AggregatedSample),
    Stopped,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CycleStats {
    pub cycles: u64,
    pub delivered: u64,
    pub stale: u64,
    pub failed: u64,
    pub degraded: u64,
    pub rejected: u64,
}

/// Drives one logical point: owns its aggregator, its sink and its cursor.
pub struct Scheduler<R, S, C = TokioClock> {
    aggregator: SourceAggregator<R>,
    sink: S,
    clock: C,
    settings: SchedulerSettings,
    observer: Arc<dyn PollObserver>,
    point: String,
    cursor: DeliveryCursor,
    state: PollState,
    stats: CycleStats,
    consecutive_failures: u32,
    sink_checked: bool,
}

impl<R, S, C> Scheduler<R, S, C>
where
    R: SourceReader,
    S: Sink,
    C: Clock,
{
    pub fn new(
        aggregator: SourceAggregator<R>,
        sink: S,
        clock: C,
        settings: SchedulerSettings,
        observer: Arc<dyn PollObserver>,
    ) -> Self {
        let point = aggregator.point().identity().to_string();
        Self {
            aggregator,
            sink,
            clock,
            settings,
            observer,
            point,
            cursor: DeliveryCursor::new(),
            state: PollState::Waiting,
            stats: CycleStats::default(),
            consecutive_failures: 0,
            sink_checked: false,
        }
    }

    pub fn cursor(&self) -> DeliveryCursor {
        self.cursor
    }

    pub fn state(&self) -> &PollState {
        &self.state
    }

    pub fn stats(&self) -> &CycleStats {
        &self.stats
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    async fn ensure_sink(&mut self) -> Result<(), PollError> {
        if self.sink_checked {
            return Ok(());
        }
        self.sink.check().await.map_err(|err| match err {
            SinkError::Unreachable(reason) | SinkError::WriteRejected(reason) => {
                PollError::SinkUnreachable(reason)
            }
        })?;
        self.sink_checked = true;
        Ok(())
    }

    fn record_failures(&self, failures: &[FetchError]) {
        for err in failures {
            self.observer.record(&PollEvent::SourceUnavailable {
                point: self.point.clone(),
                error: err.to_string(),
            });
        }
    }

    /// Writes one sample through the cursor. `Ok(false)` when nothing was written.
    async fn deliver(&mut self, timestamp: i64, value: f64, degraded: bool) -> Result<bool, PollError> {
        if !self.cursor.admits(timestamp) {
            self.stats.stale += 1;
            self.observer.record(&PollEvent::Stale {
                point: self.point.clone(),
                timestamp,
                cursor: self.cursor.last(),
            });
            return Ok(false);
        }

        match self.sink.append(&self.point, timestamp, value).await {
            Ok(()) => {
                self.cursor.advance(timestamp);
                self.stats.delivered += 1;
                self.observer.record(&PollEvent::Delivered {
                    point: self.point.clone(),
                    timestamp,
                    value,
                    degraded,
                });
                Ok(true)
            }
            Err(SinkError::WriteRejected(reason)) => {
                self.stats.rejected += 1;
                self.observer.record(&PollEvent::WriteRejected {
                    point: self.point.clone(),
                    timestamp,
                    reason,
                });
                Ok(false)
            }
            Err(SinkError::Unreachable(reason)) => Err(PollError::SinkUnreachable(reason)),
        }
    }

    /// Single pass over `[start, stop]`. Always returns a full grid; with
    /// `deliver` the filled slots are also written to the sink.
    pub async fn run_bounded(
        &mut self,
        start: i64,
        stop: i64,
        deliver: bool,
    ) -> Result<AlignedSeries, PollError> {
        let grid = TimeGrid::new(start, stop)?;
        if deliver {
            self.ensure_sink().await?;
        }

        let mut samples: Vec<Sample> = Vec::new();
        let mut degraded_at: HashSet<i64> = HashSet::new();
        for window in grid.windows(self.settings.window_seconds) {
            self.stats.cycles += 1;
            let aggregate = self
                .aggregator
                .poll_window(window.start(), window.stop())
                .await;
            self.record_failures(&aggregate.failures);

            if aggregate.all_failed() {
                self.stats.failed += 1;
                self.observer.record(&PollEvent::WindowFailed {
                    point: self.point.clone(),
                    start: window.start(),
                    stop: window.stop(),
                });
                samples.extend(window.timestamps().map(Sample::error));
                continue;
            }

            degraded_at.extend(
                aggregate
                    .samples
                    .iter()
                    .filter(|s| s.degraded)
                    .map(|s| s.timestamp),
            );
            samples.extend(aggregate.samples.iter().map(AggregatedSample::as_sample));
        }

        let series = align(&grid, &samples);
        self.stats.degraded += degraded_at.len() as u64;

        if deliver {
            for sample in series.samples.iter().filter(|s| s.is_ok()) {
                let degraded = degraded_at.contains(&sample.timestamp);
                self.deliver(sample.timestamp, sample.value, degraded).await?;
            }
        }

        self.observer.record(&PollEvent::BoundedCompleted {
            point: self.point.clone(),
            slots: series.samples.len(),
            filled: series.filled(),
        });
        self.state = PollState::Stopped;
        Ok(series)
    }

    /// `Waiting → Polling → Delivering → Waiting` until `cancel` fires or a
    /// fatal condition stops the loop.
    pub async fn run_continuous(
        &mut self,
        cancel: &CancellationToken,
    ) -> Result<CycleStats, PollError> {
        self.ensure_sink().await?;
        self.state = PollState::Polling;

        loop {
            let state = std::mem::replace(&mut self.state, PollState::Stopped);
            self.state = match state {
                PollState::Waiting => self.wait(cancel).await,
                PollState::Polling => self.poll(cancel).await?,
                PollState::Delivering(sample) => {
                    self.deliver(sample.timestamp, sample.value, sample.degraded)
                        .await?;
                    PollState::Waiting
                }
                PollState::Stopped => return Ok(self.stats.clone()),
            };
        }
    }

    async fn wait(&self, cancel: &CancellationToken) -> PollState {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => PollState::Stopped,
            _ = self.clock.sleep(self.settings.poll_interval) => PollState::Polling,
        }
    }

    async fn poll(&mut self, cancel: &CancellationToken) -> Result<PollState, PollError> {
        let now = self.clock.now();
        let latest = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Ok(PollState::Stopped),
            latest = self.aggregator.poll_latest(now) => latest,
        };
        self.stats.cycles += 1;
        self.record_failures(&latest.failures);

        let sample = latest.sample;
        if sample.status == SampleStatus::Error {
            self.consecutive_failures += 1;
            self.stats.failed += 1;
            let threshold = self.settings.connection_loss_cycles.max(1);
            self.observer.record(&PollEvent::CycleFailed {
                point: self.point.clone(),
                consecutive: self.consecutive_failures,
                threshold,
            });
            if self.consecutive_failures >= threshold {
                return Err(PollError::AllSourcesFailed {
                    point: self.point.clone(),
                    cycles: self.consecutive_failures,
                });
            }
            return Ok(PollState::Waiting);
        }
        self.consecutive_failures = 0;

        if sample.degraded {
            self.stats.degraded += 1;
            self.observer.record(&PollEvent::Degraded {
                point: self.point.clone(),
                timestamp: sample.timestamp,
                contributors: sample.contributors,
            });
        }

        if self.cursor.admits(sample.timestamp) {
            Ok(PollState::Delivering(sample))
        } else {
            self.stats.stale += 1;
            self.observer.record(&PollEvent::Stale {
                point: self.point.clone(),
                timestamp: sample.timestamp,
                cursor: self.cursor.last(),
            });
            Ok(PollState::Waiting)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{LogicalPoint, PhysicalSource};
    use crate::observe::RecordingObserver;
    use std::collections::{HashMap, VecDeque};
    use std::sync::atomic::{AtomicI64, AtomicUsize, Ordering};
    use std::sync::Mutex;

    #[derive(Default)]
    struct ScriptedReader {
        latest: Mutex<HashMap<String, VecDeque<Result<Sample, FetchError>>>>,
        windows: HashMap<String, Result<Vec<Sample>, FetchError>>,
        fetches: AtomicUsize,
        /// `fetch_latest` never resolves.
        stall_latest: bool,
    }

    impl ScriptedReader {
        fn script(self, endpoint: &str, steps: Vec<Result<Sample, FetchError>>) -> Self {
            self.latest
                .lock()
                .unwrap()
                .insert(endpoint.to_string(), steps.into());
            self
        }

        fn window(mut self, endpoint: &str, result: Result<Vec<Sample>, FetchError>) -> Self {
            self.windows.insert(endpoint.to_string(), result);
            self
        }
    }

    impl SourceReader for ScriptedReader {
        fn protocol(&self) -> &'static str {
            "scripted"
        }

        async fn fetch_window(
            &self,
            source: &PhysicalSource,
            start: i64,
            stop: i64,
        ) -> Result<Vec<Sample>, FetchError> {
            self.fetches.fetch_add(1, Ordering::SeqCst);
            match self.windows.get(&source.endpoint) {
                Some(Ok(samples)) => Ok(samples
                    .iter()
                    .copied()
                    .filter(|s| s.timestamp >= start && s.timestamp <= stop)
                    .collect()),
                Some(Err(err)) => Err(err.clone()),
                None => Err(FetchError::unavailable(&source.endpoint, "no window scripted")),
            }
        }

        async fn fetch_latest(&self, source: &PhysicalSource) -> Result<Sample, FetchError> {
            self.fetches.fetch_add(1, Ordering::SeqCst);
            if self.stall_latest {
                std::future::pending::<()>().await;
            }
            self.latest
                .lock()
                .unwrap()
                .get_mut(&source.endpoint)
                .and_then(|steps| steps.pop_front())
                .unwrap_or_else(|| Err(FetchError::unavailable(&source.endpoint, "script exhausted")))
        }
    }

    #[derive(Default)]
    struct MemorySink {
        writes: Mutex<Vec<(String, i64, f64)>>,
        failures: Mutex<VecDeque<SinkError>>,
        unreachable: bool,
        /// Cancelled from inside `append`, before the write lands.
        cancel_on_append: Option<CancellationToken>,
    }

    impl MemorySink {
        fn writes(&self) -> Vec<(String, i64, f64)> {
            self.writes.lock().unwrap().clone()
        }
    }

    impl Sink for MemorySink {
        async fn check(&self) -> Result<(), SinkError> {
            if self.unreachable {
                Err(SinkError::Unreachable("connection refused".into()))
            } else {
                Ok(())
            }
        }

        async fn append(&self, identity: &str, timestamp: i64, value: f64) -> Result<(), SinkError> {
            if let Some(token) = &self.cancel_on_append {
                token.cancel();
                tokio::task::yield_now().await;
            }
            let failure = self.failures.lock().unwrap().pop_front();
            if let Some(err) = failure {
                return Err(err);
            }
            self.writes
                .lock()
                .unwrap()
                .push((identity.to_string(), timestamp, value));
            Ok(())
        }
    }

    /// Sleeps return immediately; the token is cancelled on the `cancel_after`-th sleep.
    struct ManualClock {
        now: AtomicI64,
        sleeps: AtomicUsize,
        cancel_after: usize,
        cancel: CancellationToken,
    }

    impl ManualClock {
        fn new(cancel_after: usize, cancel: CancellationToken) -> Self {
            Self {
                now: AtomicI64::new(1_000),
                sleeps: AtomicUsize::new(0),
                cancel_after,
                cancel,
            }
        }
    }

    impl Clock for ManualClock {
        fn now(&self) -> i64 {
            self.now.load(Ordering::SeqCst)
        }

        fn sleep(&self, duration: Duration) -> impl Future<Output = ()> + Send {
            self.now
                .fetch_add(duration.as_secs().max(1) as i64, Ordering::SeqCst);
            let slept = self.sleeps.fetch_add(1, Ordering::SeqCst) + 1;
            if slept >= self.cancel_after {
                self.cancel.cancel();
            }
            std::future::ready(())
        }
    }

    fn two_pdu_point() -> LogicalPoint {
        LogicalPoint::new(
            "nova-3",
            vec![PhysicalSource::port("pdu-a", 3), PhysicalSource::port("pdu-b", 3)],
        )
    }

    fn one_pdu_point() -> LogicalPoint {
        LogicalPoint::new("nova-3", vec![PhysicalSource::port("pdu-a", 3)])
    }

    async fn scheduler(
        reader: ScriptedReader,
        point: LogicalPoint,
        sink: MemorySink,
        clock: ManualClock,
        settings: SchedulerSettings,
        observer: Arc<RecordingObserver>,
    ) -> Scheduler<ScriptedReader, MemorySink, ManualClock> {
        let aggregator = SourceAggregator::prepare(reader, point).await.unwrap();
        Scheduler::new(aggregator, sink, clock, settings, observer)
    }

    fn down() -> Result<Sample, FetchError> {
        Err(FetchError::unavailable("pdu", "timeout"))
    }

    #[tokio::test]
    async fn stale_cycle_is_not_written() {
        let cancel = CancellationToken::new();
        let reader = ScriptedReader::default()
            .script("pdu-a", vec![Ok(Sample::ok(100, 10.0)), Ok(Sample::ok(100, 10.0))]);
        let observer = Arc::new(RecordingObserver::default());
        let mut scheduler = scheduler(
            reader,
            one_pdu_point(),
            MemorySink::default(),
            ManualClock::new(2, cancel.clone()),
            SchedulerSettings::default(),
            observer.clone(),
        )
        .await;

        let stats = scheduler.run_continuous(&cancel).await.unwrap();

        assert_eq!(scheduler.sink().writes(), vec![("nova-3".to_string(), 100, 10.0)]);
        assert_eq!(scheduler.cursor().last(), Some(100));
        assert_eq!(stats.cycles, 2);
        assert_eq!(stats.stale, 1);
        assert_eq!(scheduler.state(), &PollState::Stopped);
        assert!(observer
            .events()
            .iter()
            .any(|e| matches!(e, PollEvent::Stale { timestamp: 100, cursor: Some(100), .. })));
    }

    #[tokio::test]
    async fn cursor_only_moves_forward() {
        let cancel = CancellationToken::new();
        let reader = ScriptedReader::default().script(
            "pdu-a",
            vec![
                Ok(Sample::ok(100, 1.0)),
                Ok(Sample::ok(103, 2.0)),
                Ok(Sample::ok(101, 3.0)),
                Ok(Sample::ok(104, 4.0)),
            ],
        );
        let mut scheduler = scheduler(
            reader,
            one_pdu_point(),
            MemorySink::default(),
            ManualClock::new(4, cancel.clone()),
            SchedulerSettings::default(),
            Arc::new(RecordingObserver::default()),
        )
        .await;

        scheduler.run_continuous(&cancel).await.unwrap();

        let written: Vec<i64> = scheduler.sink().writes().iter().map(|w| w.1).collect();
        assert_eq!(written, vec![100, 103, 104]);
        assert_eq!(scheduler.cursor().last(), Some(104));
    }

    #[tokio::test]
    async fn sums_sources_and_flags_degraded_cycles() {
        let cancel = CancellationToken::new();
        let reader = ScriptedReader::default()
            .script("pdu-a", vec![Ok(Sample::ok(100, 5.0)), Ok(Sample::ok(101, 5.0))])
            .script("pdu-b", vec![Ok(Sample::ok(100, 3.0)), down()]);
        let observer = Arc::new(RecordingObserver::default());
        let mut scheduler = scheduler(
            reader,
            two_pdu_point(),
            MemorySink::default(),
            ManualClock::new(2, cancel.clone()),
            SchedulerSettings::default(),
            observer.clone(),
        )
        .await;

        let stats = scheduler.run_continuous(&cancel).await.unwrap();

        let writes = scheduler.sink().writes();
        assert_eq!(writes[0].2, 8.0);
        assert_eq!(writes[1].2, 5.0);
        assert_eq!(stats.degraded, 1);
        assert!(observer.events().iter().any(|e| matches!(
            e,
            PollEvent::Delivered { timestamp: 101, degraded: true, .. }
        )));
    }

    #[tokio::test]
    async fn every_source_failing_stops_with_connection_loss() {
        let cancel = CancellationToken::new();
        let reader = ScriptedReader::default()
            .script("pdu-a", vec![down()])
            .script("pdu-b", vec![down()]);
        let mut scheduler = scheduler(
            reader,
            two_pdu_point(),
            MemorySink::default(),
            ManualClock::new(100, cancel.clone()),
            SchedulerSettings::default(),
            Arc::new(RecordingObserver::default()),
        )
        .await;

        let err = scheduler.run_continuous(&cancel).await.unwrap_err();

        assert_eq!(
            err,
            PollError::AllSourcesFailed {
                point: "nova-3".into(),
                cycles: 1
            }
        );
        assert!(scheduler.sink().writes().is_empty());
        assert_eq!(scheduler.state(), &PollState::Stopped);
    }

    #[tokio::test]
    async fn failed_cycles_below_threshold_are_skipped() {
        let cancel = CancellationToken::new();
        let reader = ScriptedReader::default()
            .script(
                "pdu-a",
                vec![down(), Ok(Sample::ok(100, 5.0)), down(), down()],
            )
            .script("pdu-b", vec![down(), down(), down(), down()]);
        let settings = SchedulerSettings {
            connection_loss_cycles: 2,
            ..SchedulerSettings::default()
        };
        let mut scheduler = scheduler(
            reader,
            two_pdu_point(),
            MemorySink::default(),
            ManualClock::new(100, cancel.clone()),
            settings,
            Arc::new(RecordingObserver::default()),
        )
        .await;

        let err = scheduler.run_continuous(&cancel).await.unwrap_err();

        assert_eq!(
            err,
            PollError::AllSourcesFailed {
                point: "nova-3".into(),
                cycles: 2
            }
        );
        assert_eq!(scheduler.sink().writes(), vec![("nova-3".to_string(), 100, 5.0)]);
        assert_eq!(scheduler.stats().failed, 3);
    }

    #[tokio::test]
    async fn rejected_write_leaves_cursor_behind() {
        let cancel = CancellationToken::new();
        let reader = ScriptedReader::default()
            .script("pdu-a", vec![Ok(Sample::ok(100, 1.0)), Ok(Sample::ok(100, 1.0))]);
        let sink = MemorySink::default();
        sink.failures
            .lock()
            .unwrap()
            .push_back(SinkError::WriteRejected("constraint".into()));
        let mut scheduler = scheduler(
            reader,
            one_pdu_point(),
            sink,
            ManualClock::new(2, cancel.clone()),
            SchedulerSettings::default(),
            Arc::new(RecordingObserver::default()),
        )
        .await;

        let stats = scheduler.run_continuous(&cancel).await.unwrap();

        assert_eq!(stats.rejected, 1);
        assert_eq!(scheduler.sink().writes().len(), 1);
        assert_eq!(scheduler.cursor().last(), Some(100));
    }

    #[tokio::test]
    async fn unreachable_sink_fails_before_polling() {
        let cancel = CancellationToken::new();
        let reader = ScriptedReader::default().script("pdu-a", vec![Ok(Sample::ok(1, 1.0))]);
        let sink = MemorySink {
            unreachable: true,
            ..MemorySink::default()
        };
        let mut scheduler = scheduler(
            reader,
            one_pdu_point(),
            sink,
            ManualClock::new(1, cancel.clone()),
            SchedulerSettings::default(),
            Arc::new(RecordingObserver::default()),
        )
        .await;

        let err = scheduler.run_continuous(&cancel).await.unwrap_err();

        assert!(matches!(err, PollError::SinkUnreachable(_)));
        assert_eq!(scheduler.aggregator.reader().fetches.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn unreachable_sink_during_delivery_is_fatal() {
        let cancel = CancellationToken::new();
        let reader = ScriptedReader::default().script("pdu-a", vec![Ok(Sample::ok(100, 1.0))]);
        let sink = MemorySink::default();
        sink.failures
            .lock()
            .unwrap()
            .push_back(SinkError::Unreachable("connection reset".into()));
        let mut scheduler = scheduler(
            reader,
            one_pdu_point(),
            sink,
            ManualClock::new(100, cancel.clone()),
            SchedulerSettings::default(),
            Arc::new(RecordingObserver::default()),
        )
        .await;

        let err = scheduler.run_continuous(&cancel).await.unwrap_err();

        assert_eq!(err, PollError::SinkUnreachable("connection reset".into()));
        assert!(scheduler.sink().writes().is_empty());
        assert_eq!(scheduler.cursor().last(), None);
        assert_eq!(scheduler.stats().delivered, 0);
    }

    #[tokio::test]
    async fn cancellation_abandons_in_flight_fan_out() {
        let cancel = CancellationToken::new();
        let reader = ScriptedReader {
            stall_latest: true,
            ..ScriptedReader::default()
        };
        let mut scheduler = scheduler(
            reader,
            one_pdu_point(),
            MemorySink::default(),
            ManualClock::new(100, cancel.clone()),
            SchedulerSettings::default(),
            Arc::new(RecordingObserver::default()),
        )
        .await;

        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            trigger.cancel();
        });
        let stats = tokio::time::timeout(Duration::from_secs(2), scheduler.run_continuous(&cancel))
            .await
            .expect("fan-out was not abandoned")
            .unwrap();

        assert_eq!(stats.cycles, 0);
        assert!(scheduler.sink().writes().is_empty());
        assert_eq!(scheduler.aggregator.reader().fetches.load(Ordering::SeqCst), 1);
        assert_eq!(scheduler.state(), &PollState::Stopped);
    }

    #[tokio::test]
    async fn started_write_completes_despite_cancellation() {
        let cancel = CancellationToken::new();
        let reader = ScriptedReader::default().script("pdu-a", vec![Ok(Sample::ok(100, 4.0))]);
        let sink = MemorySink {
            cancel_on_append: Some(cancel.clone()),
            ..MemorySink::default()
        };
        let mut scheduler = scheduler(
            reader,
            one_pdu_point(),
            sink,
            ManualClock::new(100, cancel.clone()),
            SchedulerSettings::default(),
            Arc::new(RecordingObserver::default()),
        )
        .await;

        let stats = scheduler.run_continuous(&cancel).await.unwrap();

        assert_eq!(scheduler.sink().writes(), vec![("nova-3".to_string(), 100, 4.0)]);
        assert_eq!(scheduler.cursor().last(), Some(100));
        assert_eq!(stats.delivered, 1);
        assert_eq!(stats.cycles, 1);
        assert_eq!(scheduler.state(), &PollState::Stopped);
    }

    #[tokio::test]
    async fn cancelled_token_stops_without_polling() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let reader = ScriptedReader::default().script("pdu-a", vec![Ok(Sample::ok(1, 1.0))]);
        let mut scheduler = scheduler(
            reader,
            one_pdu_point(),
            MemorySink::default(),
            ManualClock::new(1, cancel.clone()),
            SchedulerSettings::default(),
            Arc::new(RecordingObserver::default()),
        )
        .await;

        let stats = scheduler.run_continuous(&cancel).await.unwrap();

        assert_eq!(stats.cycles, 0);
        assert!(scheduler.sink().writes().is_empty());
    }

    #[tokio::test]
    async fn bounded_run_sums_and_aligns() {
        let cancel = CancellationToken::new();
        let reader = ScriptedReader::default()
            .window("pdu-a", Ok(vec![Sample::ok(100, 5.0), Sample::ok(101, 5.0)]))
            .window("pdu-b", Ok(vec![Sample::ok(100, 3.0)]));
        let observer = Arc::new(RecordingObserver::default());
        let mut scheduler = scheduler(
            reader,
            two_pdu_point(),
            MemorySink::default(),
            ManualClock::new(1, cancel),
            SchedulerSettings::default(),
            observer.clone(),
        )
        .await;

        let series = scheduler.run_bounded(100, 103, true).await.unwrap();

        assert_eq!(series.values(), vec![8.0, 5.0, -1.0, -1.0]);
        assert_eq!(
            scheduler.sink().writes(),
            vec![("nova-3".to_string(), 100, 8.0), ("nova-3".to_string(), 101, 5.0)]
        );
        assert_eq!(scheduler.cursor().last(), Some(101));
        assert_eq!(scheduler.stats().degraded, 1);
        let events = observer.events();
        assert!(events.iter().any(|e| matches!(
            e,
            PollEvent::Delivered { timestamp: 100, degraded: false, .. }
        )));
        assert!(events.iter().any(|e| matches!(
            e,
            PollEvent::Delivered { timestamp: 101, degraded: true, .. }
        )));
    }

    #[tokio::test]
    async fn bounded_run_with_every_source_down_marks_error_slots() {
        let cancel = CancellationToken::new();
        let reader = ScriptedReader::default()
            .window("pdu-a", Err(FetchError::unavailable("pdu-a", "down")))
            .window("pdu-b", Err(FetchError::unavailable("pdu-b", "down")));
        let mut scheduler = scheduler(
            reader,
            two_pdu_point(),
            MemorySink::default(),
            ManualClock::new(1, cancel),
            SchedulerSettings::default(),
            Arc::new(RecordingObserver::default()),
        )
        .await;

        let series = scheduler.run_bounded(100, 103, true).await.unwrap();

        assert_eq!(series.samples.len(), 4);
        assert!(series.samples.iter().all(|s| s.status == SampleStatus::Error));
        assert_eq!(series.values(), vec![-1.0; 4]);
        assert!(scheduler.sink().writes().is_empty());
    }

    #[tokio::test]
    async fn bounded_run_splits_into_sub_windows() {
        let cancel = CancellationToken::new();
        let reader = ScriptedReader::default()
            .window("pdu-a", Ok((0..10).map(|ts| Sample::ok(ts, 1.0)).collect()));
        let settings = SchedulerSettings {
            window_seconds: 4,
            ..SchedulerSettings::default()
        };
        let mut scheduler = scheduler(
            reader,
            one_pdu_point(),
            MemorySink::default(),
            ManualClock::new(1, cancel),
            settings,
            Arc::new(RecordingObserver::default()),
        )
        .await;

        let series = scheduler.run_bounded(0, 9, false).await.unwrap();

        assert_eq!(series.filled(), 10);
        assert_eq!(scheduler.aggregator.reader().fetches.load(Ordering::SeqCst), 3);
        assert!(scheduler.sink().writes().is_empty());
    }

    #[tokio::test]
    async fn bounded_run_rejects_inverted_window() {
        let cancel = CancellationToken::new();
        let reader = ScriptedReader::default();
        let mut scheduler = scheduler(
            reader,
            one_pdu_point(),
            MemorySink::default(),
            ManualClock::new(1, cancel),
            SchedulerSettings::default(),
            Arc::new(RecordingObserver::default()),
        )
        .await;

        let err = scheduler.run_bounded(10, 5, false).await.unwrap_err();
        assert_eq!(err, PollError::InvalidWindow { start: 10, stop: 5 });
    }
}
