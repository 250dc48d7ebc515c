//! The acquisition loop.
//!
//! Runs strictly sequential ticks on one task. Each tick reads one frame and
//! feeds the current timestamp to the [`CadenceGate`]; when the gate fires the
//! frame is persisted, recognized and every confident candidate reconciled.
//!
//! ```text
//! FrameSource -> CadenceGate -> SnapshotWriter -> PlateRecognizer -> Reconciler
//! ```
//!
//! A failed frame read closes the stream, waits the reconnect delay and
//! reopens it once. If that reopen fails the loop stops.

use crate::cadence::CadenceGate;
use crate::config::MonitorConfig;
use crate::reconcile::{ReconcileOutcome, Reconciler};
use crate::recognition::PlateRecognizer;
use crate::snapshot::{Snapshot, SnapshotWriter};
use crate::stream::{FrameSource, RawFrame, StreamError};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Source of wall-clock timestamps in whole seconds since the Unix epoch.
pub trait Clock: Send + Sync {
    fn now_unix(&self) -> i64;
}

/// Clock backed by the system time.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_unix(&self) -> i64 {
        chrono::Utc::now().timestamp()
    }
}

/// Loop timing and acceptance policy.
#[derive(Debug, Clone)]
pub struct AcquisitionSettings {
    pub cadence_secs: u64,
    pub poll_interval: Duration,
    pub reconnect_delay: Duration,
    pub min_confidence: f64,
    pub stats_interval: Duration,
}

impl AcquisitionSettings {
    pub fn from_config(config: &MonitorConfig) -> Self {
        Self {
            cadence_secs: config.acquisition.cadence_secs,
            poll_interval: config.acquisition.poll_interval(),
            reconnect_delay: config.camera.reconnect_delay(),
            min_confidence: config.recognition.min_confidence,
            stats_interval: Duration::from_secs(config.health.interval_secs.max(1)),
        }
    }
}

/// What a capture produced.
#[derive(Debug, Clone)]
pub struct CaptureReport {
    pub snapshot: Snapshot,
    /// One outcome per candidate at or above the confidence threshold
    pub accepted: Vec<ReconcileOutcome>,
    /// Candidates discarded for low confidence
    pub rejected: usize,
}

/// Result of a single tick.
#[derive(Debug, Clone)]
pub enum TickOutcome {
    /// A frame was read but the gate did not fire.
    Idle,
    /// A snapshot was captured and recognized.
    Captured(CaptureReport),
    /// The gate fired but the snapshot could not be written.
    SnapshotFailed,
    /// The snapshot was written but recognition failed.
    RecognitionFailed,
    /// The frame read failed and the stream was reopened.
    Recovered,
}

/// Why the loop stopped.
#[derive(Debug)]
pub enum LoopExit {
    /// Shutdown was requested.
    Shutdown,
    /// The stream could not be opened at startup.
    StreamUnavailable(StreamError),
    /// A read failed and the single reopen attempt failed too.
    StreamLost(StreamError),
}

impl LoopExit {
    pub fn is_fatal(&self) -> bool {
        !matches!(self, LoopExit::Shutdown)
    }
}

/// Counters kept by the loop.
#[derive(Debug, Default, Clone)]
pub struct LoopStats {
    pub ticks: u64,
    pub frames: u64,
    pub read_failures: u64,
    pub reconnects: u64,
    pub snapshots: u64,
    pub snapshot_failures: u64,
    pub recognition_failures: u64,
    pub candidates_accepted: u64,
    pub candidates_rejected: u64,
}

/// Sequential camera acquisition loop.
pub struct AcquisitionLoop<S: FrameSource> {
    source: S,
    gate: CadenceGate,
    writer: SnapshotWriter,
    recognizer: Arc<dyn PlateRecognizer>,
    reconciler: Reconciler,
    clock: Arc<dyn Clock>,
    settings: AcquisitionSettings,
    stats: LoopStats,
}

impl<S: FrameSource> AcquisitionLoop<S> {
    pub fn new(
        source: S,
        writer: SnapshotWriter,
        recognizer: Arc<dyn PlateRecognizer>,
        reconciler: Reconciler,
        clock: Arc<dyn Clock>,
        settings: AcquisitionSettings,
    ) -> Self {
        Self {
            source,
            gate: CadenceGate::new(settings.cadence_secs),
            writer,
            recognizer,
            reconciler,
            clock,
            settings,
            stats: LoopStats::default(),
        }
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    pub fn stats(&self) -> LoopStats {
        self.stats.clone()
    }

    /// Open the stream and tick until shutdown or stream loss. The stream is
    /// closed on every exit path.
    pub async fn run(&mut self, shutdown: CancellationToken) -> LoopExit {
        if let Err(e) = self.source.open().await {
            error!(error = %e, kind = e.kind(), "Camera stream could not be opened");
            self.source.close();
            return LoopExit::StreamUnavailable(e);
        }

        info!(
            cadence_secs = self.settings.cadence_secs,
            poll_ms = self.settings.poll_interval.as_millis() as u64,
            min_confidence = self.settings.min_confidence,
            "Acquisition loop started"
        );

        let mut last_report = Instant::now();
        let exit = loop {
            if shutdown.is_cancelled() {
                break LoopExit::Shutdown;
            }

            if let Err(e) = self.tick().await {
                error!(error = %e, kind = e.kind(), "Camera stream lost, stopping");
                break LoopExit::StreamLost(e);
            }

            if last_report.elapsed() >= self.settings.stats_interval {
                self.log_stats();
                last_report = Instant::now();
            }

            tokio::select! {
                _ = shutdown.cancelled() => break LoopExit::Shutdown,
                _ = tokio::time::sleep(self.settings.poll_interval) => {}
            }
        };

        self.source.close();
        info!(exit = ?exit, "Acquisition loop stopped");
        exit
    }

    /// Run one tick. Only an unrecoverable stream failure is an error.
    pub async fn tick(&mut self) -> Result<TickOutcome, StreamError> {
        self.stats.ticks += 1;
        let timestamp = self.clock.now_unix();

        let frame = match self.source.read_frame().await {
            Ok(frame) => frame,
            Err(e) => {
                self.stats.read_failures += 1;
                warn!(error = %e, kind = e.kind(), "Frame read failed, reconnecting");
                self.recover().await?;
                return Ok(TickOutcome::Recovered);
            }
        };
        self.stats.frames += 1;

        if !self.gate.observe(timestamp) {
            return Ok(TickOutcome::Idle);
        }

        Ok(self.capture(timestamp, &frame).await)
    }

    /// Close the stream, wait, and reopen it exactly once.
    async fn recover(&mut self) -> Result<(), StreamError> {
        self.source.close();
        tokio::time::sleep(self.settings.reconnect_delay).await;

        match self.source.open().await {
            Ok(()) => {
                self.stats.reconnects += 1;
                metrics::counter!("parkwatch.stream.reconnects").increment(1);
                info!(reconnects = self.stats.reconnects, "Camera stream reopened");
                Ok(())
            }
            Err(e) => {
                self.source.close();
                Err(e)
            }
        }
    }

    async fn capture(&mut self, timestamp: i64, frame: &RawFrame) -> TickOutcome {
        let snapshot = match self.writer.persist(timestamp, frame).await {
            Ok(snapshot) => snapshot,
            Err(e) => {
                self.stats.snapshot_failures += 1;
                warn!(timestamp, error = %e, "Snapshot could not be saved, skipping window");
                return TickOutcome::SnapshotFailed;
            }
        };
        self.stats.snapshots += 1;
        metrics::counter!("parkwatch.snapshots.captured").increment(1);
        debug!(timestamp, gate = %self.gate.state(), "Snapshot captured");

        let candidates = match self.recognizer.recognize(&snapshot.path).await {
            Ok(candidates) => candidates,
            Err(e) => {
                self.stats.recognition_failures += 1;
                metrics::counter!("parkwatch.recognition.failures").increment(1);
                warn!(timestamp, error = %e, "Plate recognition failed");
                return TickOutcome::RecognitionFailed;
            }
        };

        if candidates.is_empty() {
            debug!(timestamp, "No plate in snapshot");
        }

        let snapshot_path = snapshot.path_string();
        let mut accepted = Vec::new();
        let mut rejected = 0;

        for candidate in candidates {
            if candidate.confidence >= self.settings.min_confidence {
                self.stats.candidates_accepted += 1;
                metrics::counter!("parkwatch.candidates", "outcome" => "accepted").increment(1);
                let outcome = self
                    .reconciler
                    .reconcile(&candidate.plate, timestamp, &snapshot_path)
                    .await;
                accepted.push(outcome);
            } else {
                rejected += 1;
                self.stats.candidates_rejected += 1;
                metrics::counter!("parkwatch.candidates", "outcome" => "rejected").increment(1);
                info!(
                    plate = %candidate.plate,
                    confidence = candidate.confidence,
                    threshold = self.settings.min_confidence,
                    "Candidate below confidence threshold, discarded"
                );
            }
        }

        TickOutcome::Captured(CaptureReport {
            snapshot,
            accepted,
            rejected,
        })
    }

    pub fn log_stats(&self) {
        let stats = &self.stats;
        info!(
            ticks = stats.ticks,
            frames = stats.frames,
            read_failures = stats.read_failures,
            reconnects = stats.reconnects,
            snapshots = stats.snapshots,
            snapshot_failures = stats.snapshot_failures,
            recognition_failures = stats.recognition_failures,
            accepted = stats.candidates_accepted,
            rejected = stats.candidates_rejected,
            "Acquisition loop stats"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PlateMatchMode;
    use crate::notifier::MockNotifier;
    use crate::recognition::{MockPlateRecognizer, RecognitionCandidate, RecognitionError};
    use crate::store::tests::memory_store;
    use crate::store::{ParkingStore, PaymentStatus};
    use crate::stream::ConnectionState;
    use async_trait::async_trait;
    use bytes::Bytes;
    use parking_lot::Mutex;
    use std::collections::VecDeque;
    use std::path::PathBuf;

    /// Frame source replaying scripted results. Once a script runs out,
    /// opens succeed and reads return a small JPEG.
    #[derive(Default)]
    struct ScriptedSource {
        opens: VecDeque<Result<(), StreamError>>,
        reads: VecDeque<Result<(), StreamError>>,
        open_calls: usize,
        close_calls: usize,
        sequence: u64,
        state: Option<ConnectionState>,
    }

    impl ScriptedSource {
        fn with_reads(reads: Vec<Result<(), StreamError>>) -> Self {
            Self {
                reads: reads.into(),
                ..Default::default()
            }
        }

        fn with_opens(mut self, opens: Vec<Result<(), StreamError>>) -> Self {
            self.opens = opens.into();
            self
        }
    }

    #[async_trait]
    impl FrameSource for ScriptedSource {
        async fn open(&mut self) -> Result<(), StreamError> {
            self.open_calls += 1;
            let result = self.opens.pop_front().unwrap_or(Ok(()));
            self.state = Some(if result.is_ok() {
                ConnectionState::Connected
            } else {
                ConnectionState::Failed
            });
            result
        }

        async fn read_frame(&mut self) -> Result<RawFrame, StreamError> {
            self.reads.pop_front().unwrap_or(Ok(()))?;
            self.sequence += 1;
            Ok(RawFrame {
                data: Bytes::from_static(b"\xFF\xD8plate\xFF\xD9"),
                sequence: self.sequence,
                captured_at: Instant::now(),
            })
        }

        fn close(&mut self) {
            self.close_calls += 1;
            self.state = Some(ConnectionState::Disconnected);
        }

        fn state(&self) -> ConnectionState {
            self.state.unwrap_or(ConnectionState::Disconnected)
        }
    }

    /// Clock replaying timestamps; the last one repeats forever.
    struct ScriptedClock {
        times: Mutex<VecDeque<i64>>,
        last: Mutex<i64>,
    }

    impl ScriptedClock {
        fn new(times: Vec<i64>) -> Self {
            Self {
                times: Mutex::new(times.into()),
                last: Mutex::new(0),
            }
        }
    }

    impl Clock for ScriptedClock {
        fn now_unix(&self) -> i64 {
            let mut last = self.last.lock();
            if let Some(next) = self.times.lock().pop_front() {
                *last = next;
            }
            *last
        }
    }

    struct Harness {
        acquisition: AcquisitionLoop<ScriptedSource>,
        store: Arc<ParkingStore>,
        snapshot_dir: PathBuf,
        _root: tempfile::TempDir,
    }

    fn settings() -> AcquisitionSettings {
        AcquisitionSettings {
            cadence_secs: 10,
            poll_interval: Duration::from_millis(1),
            reconnect_delay: Duration::from_millis(10),
            min_confidence: 0.8,
            stats_interval: Duration::from_secs(60),
        }
    }

    async fn harness(
        source: ScriptedSource,
        times: Vec<i64>,
        recognizer: MockPlateRecognizer,
        notifier: MockNotifier,
    ) -> Harness {
        harness_with_settings(settings(), source, times, recognizer, notifier).await
    }

    async fn harness_with_settings(
        settings: AcquisitionSettings,
        source: ScriptedSource,
        times: Vec<i64>,
        recognizer: MockPlateRecognizer,
        notifier: MockNotifier,
    ) -> Harness {
        let root = tempfile::tempdir().unwrap();
        let snapshot_dir = root.path().join("photo");
        let writer = SnapshotWriter::new(&snapshot_dir).await.unwrap();

        let store = Arc::new(memory_store(PlateMatchMode::Exact).await);
        let reconciler = Reconciler::new(store.clone(), store.clone(), Arc::new(notifier));

        let acquisition = AcquisitionLoop::new(
            source,
            writer,
            Arc::new(recognizer),
            reconciler,
            Arc::new(ScriptedClock::new(times)),
            settings,
        );

        Harness {
            acquisition,
            store,
            snapshot_dir,
            _root: root,
        }
    }

    fn candidate(plate: &str, confidence: f64) -> RecognitionCandidate {
        RecognitionCandidate {
            plate: plate.to_string(),
            confidence,
        }
    }

    fn recognizer_returning(candidates: Vec<RecognitionCandidate>) -> MockPlateRecognizer {
        let mut recognizer = MockPlateRecognizer::new();
        recognizer
            .expect_recognize()
            .times(1)
            .returning(move |_| Ok(candidates.clone()));
        recognizer
    }

    fn unused_recognizer() -> MockPlateRecognizer {
        let mut recognizer = MockPlateRecognizer::new();
        recognizer.expect_recognize().times(0);
        recognizer
    }

    fn unused_notifier() -> MockNotifier {
        let mut notifier = MockNotifier::new();
        notifier.expect_notify().times(0);
        notifier
    }

    #[tokio::test]
    async fn test_paid_plate_end_to_end() {
        let mut notifier = MockNotifier::new();
        notifier
            .expect_notify()
            .withf(|plate: &str, status: &PaymentStatus| {
                plate == "abc1234" && *status == PaymentStatus::Paid
            })
            .times(1)
            .returning(|_, _| Ok(()));

        let mut h = harness(
            ScriptedSource::default(),
            vec![1_700_000_010],
            recognizer_returning(vec![candidate("abc1234", 0.92)]),
            notifier,
        )
        .await;
        h.store
            .set_payment_status("abc1234", PaymentStatus::Paid)
            .await
            .unwrap();

        let report = match h.acquisition.tick().await.unwrap() {
            TickOutcome::Captured(report) => report,
            other => panic!("expected capture, got {:?}", other),
        };

        assert_eq!(report.snapshot.path, h.snapshot_dir.join("1700000010.jpg"));
        assert!(report.snapshot.path.exists());
        assert_eq!(report.accepted.len(), 1);
        assert_eq!(report.rejected, 0);

        let rows = h.store.logs_for_plate("abc1234").await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].payment_status, PaymentStatus::Paid);
        assert_eq!(rows[0].timestamp, 1_700_000_010);
        assert_eq!(rows[0].snapshot_path, report.snapshot.path_string());
    }

    #[tokio::test]
    async fn test_unknown_plate_logged_unpaid() {
        let mut notifier = MockNotifier::new();
        notifier
            .expect_notify()
            .withf(|plate: &str, status: &PaymentStatus| {
                plate == "zzz0000" && *status == PaymentStatus::Unpaid
            })
            .times(1)
            .returning(|_, _| Ok(()));

        let mut h = harness(
            ScriptedSource::default(),
            vec![1_700_000_020],
            recognizer_returning(vec![candidate("zzz0000", 0.85)]),
            notifier,
        )
        .await;

        assert!(matches!(
            h.acquisition.tick().await.unwrap(),
            TickOutcome::Captured(_)
        ));
        let rows = h.store.logs_for_plate("zzz0000").await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].payment_status, PaymentStatus::Unpaid);
    }

    #[tokio::test]
    async fn test_low_confidence_candidate_is_discarded() {
        let mut h = harness(
            ScriptedSource::default(),
            vec![1_700_000_030],
            recognizer_returning(vec![candidate("abc1234", 0.79)]),
            unused_notifier(),
        )
        .await;

        match h.acquisition.tick().await.unwrap() {
            TickOutcome::Captured(report) => {
                assert!(report.accepted.is_empty());
                assert_eq!(report.rejected, 1);
            }
            other => panic!("expected capture, got {:?}", other),
        }
        assert_eq!(h.store.count_logs().await.unwrap(), 0);
        assert_eq!(h.acquisition.stats().candidates_rejected, 1);
    }

    #[tokio::test]
    async fn test_mixed_candidates_only_confident_reconciled() {
        let mut notifier = MockNotifier::new();
        notifier.expect_notify().times(1).returning(|_, _| Ok(()));

        let mut h = harness(
            ScriptedSource::default(),
            vec![1_700_000_040],
            recognizer_returning(vec![candidate("ajv1688", 0.8), candidate("nbx3388", 0.3)]),
            notifier,
        )
        .await;
        h.store.seed_demo_registry().await.unwrap();

        match h.acquisition.tick().await.unwrap() {
            TickOutcome::Captured(report) => {
                assert_eq!(report.accepted.len(), 1);
                assert_eq!(report.accepted[0].plate, "ajv1688");
                assert_eq!(report.accepted[0].status, PaymentStatus::Paid);
                assert_eq!(report.rejected, 1);
            }
            other => panic!("expected capture, got {:?}", other),
        }
        assert_eq!(h.store.count_logs().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_read_failure_recovers_without_logging() {
        let source =
            ScriptedSource::with_reads(vec![Err(StreamError::Read("connection reset".into()))]);
        let mut h = harness(
            source,
            vec![1_700_000_050, 1_700_000_051],
            recognizer_returning(vec![]),
            unused_notifier(),
        )
        .await;

        assert!(matches!(
            h.acquisition.tick().await.unwrap(),
            TickOutcome::Recovered
        ));
        assert_eq!(h.acquisition.source().close_calls, 1);
        assert_eq!(h.acquisition.source().open_calls, 1);
        assert_eq!(h.acquisition.source().state(), ConnectionState::Connected);
        assert_eq!(h.store.count_logs().await.unwrap(), 0);

        // The failed tick never reached the gate, so the window is still open.
        assert!(matches!(
            h.acquisition.tick().await.unwrap(),
            TickOutcome::Captured(_)
        ));
        assert_eq!(h.acquisition.stats().reconnects, 1);
    }

    #[tokio::test]
    async fn test_reopen_waits_for_reconnect_delay() {
        let delay = Duration::from_millis(150);
        let source = ScriptedSource::with_reads(vec![Err(StreamError::Ended)]);
        let mut h = harness_with_settings(
            AcquisitionSettings {
                reconnect_delay: delay,
                ..settings()
            },
            source,
            vec![100],
            unused_recognizer(),
            unused_notifier(),
        )
        .await;

        let started = Instant::now();
        assert!(matches!(
            h.acquisition.tick().await.unwrap(),
            TickOutcome::Recovered
        ));

        assert!(started.elapsed() >= delay);
        assert_eq!(h.acquisition.source().open_calls, 1);
    }

    #[tokio::test]
    async fn test_failed_reopen_is_fatal() {
        let source = ScriptedSource::with_reads(vec![Err(StreamError::Ended)])
            .with_opens(vec![Err(StreamError::ConnectionFailed("refused".into()))]);
        let mut h = harness(source, vec![100], unused_recognizer(), unused_notifier()).await;

        let err = h.acquisition.tick().await.unwrap_err();
        assert!(matches!(err, StreamError::ConnectionFailed(_)));
        assert_eq!(h.acquisition.source().state(), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn test_run_stops_when_stream_lost() {
        let source = ScriptedSource::with_reads(vec![Err(StreamError::Timeout(
            Duration::from_secs(10),
        ))])
        .with_opens(vec![
            Ok(()),
            Err(StreamError::ConnectionFailed("refused".into())),
        ]);
        let mut h = harness(source, vec![100], unused_recognizer(), unused_notifier()).await;

        let exit = h.acquisition.run(CancellationToken::new()).await;

        assert!(matches!(exit, LoopExit::StreamLost(_)));
        assert!(exit.is_fatal());
        assert_eq!(h.acquisition.source().open_calls, 2);
        assert_eq!(h.acquisition.source().state(), ConnectionState::Disconnected);
        assert_eq!(h.store.count_logs().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_run_fails_when_stream_never_opens() {
        let source = ScriptedSource::default()
            .with_opens(vec![Err(StreamError::ConnectionFailed("no route".into()))]);
        let mut h = harness(source, vec![100], unused_recognizer(), unused_notifier()).await;

        let exit = h.acquisition.run(CancellationToken::new()).await;

        assert!(matches!(exit, LoopExit::StreamUnavailable(_)));
        assert_eq!(h.acquisition.stats().ticks, 0);
        assert_eq!(h.acquisition.source().state(), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn test_snapshot_failure_does_not_refire_in_window() {
        let mut h = harness(
            ScriptedSource::default(),
            vec![200, 201, 209],
            unused_recognizer(),
            unused_notifier(),
        )
        .await;

        std::fs::remove_dir(&h.snapshot_dir).unwrap();
        std::fs::write(&h.snapshot_dir, b"not a directory").unwrap();

        assert!(matches!(
            h.acquisition.tick().await.unwrap(),
            TickOutcome::SnapshotFailed
        ));
        assert!(matches!(h.acquisition.tick().await.unwrap(), TickOutcome::Idle));
        assert!(matches!(h.acquisition.tick().await.unwrap(), TickOutcome::Idle));
        assert_eq!(h.acquisition.stats().snapshot_failures, 1);
        assert_eq!(h.store.count_logs().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_recognition_failure_skips_reconciliation() {
        let mut recognizer = MockPlateRecognizer::new();
        recognizer.expect_recognize().times(1).returning(|_| {
            Err(RecognitionError::Status {
                status: 500,
                body: "internal error".into(),
            })
        });

        let mut h = harness(ScriptedSource::default(), vec![300], recognizer, unused_notifier()).await;

        assert!(matches!(
            h.acquisition.tick().await.unwrap(),
            TickOutcome::RecognitionFailed
        ));
        assert_eq!(h.acquisition.stats().recognition_failures, 1);
        assert_eq!(h.store.count_logs().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_one_capture_per_window_over_many_ticks() {
        // Three polls per second from 100 through 129.
        let times: Vec<i64> = (100..130).flat_map(|s| [s, s, s]).collect();
        let ticks = times.len();

        let mut recognizer = MockPlateRecognizer::new();
        recognizer
            .expect_recognize()
            .times(3)
            .returning(|_| Ok(Vec::new()));

        let mut h = harness(ScriptedSource::default(), times, recognizer, unused_notifier()).await;

        let mut captured = Vec::new();
        for _ in 0..ticks {
            if let TickOutcome::Captured(report) = h.acquisition.tick().await.unwrap() {
                captured.push(report.snapshot.timestamp);
            }
        }

        assert_eq!(captured, vec![100, 110, 120]);
        assert_eq!(h.acquisition.stats().frames, ticks as u64);
    }

    #[tokio::test]
    async fn test_run_exits_on_shutdown() {
        let mut recognizer = MockPlateRecognizer::new();
        recognizer.expect_recognize().returning(|_| Ok(Vec::new()));

        let mut h = harness(ScriptedSource::default(), vec![400], recognizer, unused_notifier()).await;

        let token = CancellationToken::new();
        let canceller = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            canceller.cancel();
        });

        let exit = h.acquisition.run(token).await;

        assert!(matches!(exit, LoopExit::Shutdown));
        assert!(!exit.is_fatal());
        assert!(h.acquisition.stats().ticks > 0);
        assert_eq!(h.acquisition.stats().snapshots, 1);
        assert_eq!(h.acquisition.source().state(), ConnectionState::Disconnected);
    }
}
