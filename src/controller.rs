//! Runs one recording session by feeding device, timer and analysis results
//! into [`session::transition`] and carrying out the effects it returns.

use std::collections::VecDeque;
use std::future::Future;
use std::path::PathBuf;
use std::time::Duration;

use tokio::time::{Instant, Interval, MissedTickBehavior};

use crate::analysis::AnalysisService;
use crate::capture::CaptureDevice;
use crate::export;
use crate::session::{self, Effect, Event, Notice, SessionInfo, SessionState};

#[derive(Debug)]
pub struct SessionOutcome {
    pub state: SessionState,
    pub notices: Vec<Notice>,
    pub exported: Option<PathBuf>,
    /// Set when the report could not be written; the session still completes.
    pub export_error: Option<String>,
}

pub struct SessionController<'a, C, A> {
    capture: C,
    analysis: &'a A,
    tick_period: Duration,
    export_dir: Option<PathBuf>,
}

#[derive(Default)]
struct RunState {
    pending: VecDeque<Event>,
    timer: Option<Interval>,
    notices: Vec<Notice>,
    exported: Option<PathBuf>,
    export_error: Option<String>,
    device_open: bool,
}

async fn next_tick(timer: &mut Option<Interval>) {
    match timer {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending::<()>().await,
    }
}

impl<'a, C, A> SessionController<'a, C, A>
where
    C: CaptureDevice,
    A: AnalysisService,
{
    pub fn new(capture: C, analysis: &'a A) -> Self {
        Self {
            capture,
            analysis,
            tick_period: Duration::from_secs(1),
            export_dir: None,
        }
    }

    /// Writes the text report into `dir` once the session completes.
    pub fn with_export_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.export_dir = Some(dir.into());
        self
    }

    /// Runs a session from `Idle` until it completes or falls back to `Idle`.
    /// `stop` ends the recording early; it has no effect once analysis has
    /// started.
    pub async fn run<S>(
        &mut self,
        session: Option<SessionInfo>,
        stop: S,
    ) -> SessionOutcome
    where
        S: Future<Output = ()>,
    {
        tokio::pin!(stop);
        let mut run = RunState::default();
        let mut state = SessionState::Idle;
        let mut stop_requested = false;
        let mut export_requested = false;
        run.pending.push_back(Event::Start { session });

        'session: loop {
            while let Some(event) = run.pending.pop_front() {
                let from = state.name();
                let event_name = event.name();
                let (next, effects) = session::transition(state, event);
                state = next;
                if from != state.name() {
                    tracing::info!(from, to = state.name(), event = event_name, "session state changed");
                }
                for effect in effects {
                    self.apply(effect, &mut run).await;
                }
            }

            match &state {
                SessionState::Recording { .. } => {
                    let remaining = state.remaining_secs().unwrap_or(0);
                    let event = tokio::select! {
                        _ = next_tick(&mut run.timer) => {
                            if remaining % 60 == 1 {
                                tracing::info!(
                                    remaining = %session::format_countdown(remaining - 1),
                                    "recording"
                                );
                            }
                            Event::Tick
                        }
                        fragment = self.capture.next_fragment() => match fragment {
                            Some(bytes) => Event::Fragment(bytes),
                            None => {
                                tracing::warn!("capture stream ended before stop");
                                Event::Stop
                            }
                        },
                        _ = &mut stop, if !stop_requested => {
                            stop_requested = true;
                            tracing::info!("stop requested");
                            Event::Stop
                        }
                    };
                    run.pending.push_back(event);
                }
                SessionState::Complete { .. } if self.export_dir.is_some() && !export_requested => {
                    export_requested = true;
                    run.pending.push_back(Event::Export);
                }
                SessionState::Analyzing { .. } => {
                    tracing::warn!("session stalled while analyzing");
                    break 'session;
                }
                SessionState::Idle | SessionState::Complete { .. } => break 'session,
            }
        }

        if run.device_open {
            self.capture.close().await;
        }

        SessionOutcome {
            state,
            notices: run.notices,
            exported: run.exported,
            export_error: run.export_error,
        }
    }

    async fn apply(&mut self, effect: Effect, run: &mut RunState) {
        match effect {
            Effect::AcquireDevices => match self.capture.open().await {
                Ok(()) => run.device_open = true,
                Err(err) => {
                    tracing::error!(error = %err, "failed to acquire capture device");
                    run.pending.push_back(Event::DeviceFailed {
                        reason: err.to_string(),
                    });
                }
            },
            Effect::ArmTimer => {
                let mut interval =
                    tokio::time::interval_at(Instant::now() + self.tick_period, self.tick_period);
                interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
                run.timer = Some(interval);
            }
            Effect::CancelTimer => run.timer = None,
            Effect::StopCapture => {
                let trailing = if run.device_open {
                    run.device_open = false;
                    self.capture.close().await
                } else {
                    Vec::new()
                };
                run.pending.push_back(Event::CaptureClosed {
                    trailing,
                    mime_type: self.capture.mime_type().to_string(),
                });
            }
            Effect::SubmitAnalysis(payload) => {
                let result = self.analysis.analyze(&payload).await.map_err(|err| {
                    tracing::error!(error = %err, "session analysis failed");
                    err.to_string()
                });
                run.pending.push_back(Event::AnalysisFinished(result));
            }
            Effect::Notify(notice) => {
                tracing::warn!(title = notice.title(), "{}", notice.description());
                run.notices.push(notice);
            }
            Effect::WriteExport(artifact) => {
                if let Some(dir) = &self.export_dir {
                    match export::write_artifact(dir, &artifact).await {
                        Ok(path) => {
                            tracing::info!(path = %path.display(), "session report exported");
                            run.exported = Some(path);
                        }
                        Err(err) => {
                            tracing::error!(error = %format!("{err:#}"), "failed to export session report");
                            run.export_error = Some(format!("{err:#}"));
                        }
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use assert_matches::assert_matches;
    use async_trait::async_trait;
    use chrono::{FixedOffset, TimeZone};

    use crate::analysis::AnalysisError;
    use crate::capture::CaptureError;
    use crate::models::SessionReport;
    use crate::session::AudioPayload;

    #[derive(Default)]
    struct Counters {
        opened: AtomicUsize,
        closed: AtomicUsize,
    }

    struct FakeCapture {
        fragments: VecDeque<Vec<u8>>,
        trailing: Vec<u8>,
        fail_open: bool,
        counters: Arc<Counters>,
    }

    impl FakeCapture {
        fn new(fragments: Vec<&[u8]>, trailing: &[u8]) -> (Self, Arc<Counters>) {
            let counters = Arc::new(Counters::default());
            let capture = Self {
                fragments: fragments.into_iter().map(<[u8]>::to_vec).collect(),
                trailing: trailing.to_vec(),
                fail_open: false,
                counters: counters.clone(),
            };
            (capture, counters)
        }
    }

    #[async_trait]
    impl CaptureDevice for FakeCapture {
        fn mime_type(&self) -> &str {
            "audio/webm"
        }

        async fn open(&mut self) -> Result<(), CaptureError> {
            self.counters.opened.fetch_add(1, Ordering::SeqCst);
            if self.fail_open {
                return Err(CaptureError::EmptyCommand);
            }
            Ok(())
        }

        async fn next_fragment(&mut self) -> Option<Vec<u8>> {
            match self.fragments.pop_front() {
                Some(fragment) => Some(fragment),
                None => std::future::pending().await,
            }
        }

        async fn close(&mut self) -> Vec<u8> {
            self.counters.closed.fetch_add(1, Ordering::SeqCst);
            std::mem::take(&mut self.trailing)
        }
    }

    struct FakeAnalysis {
        calls: AtomicUsize,
        report: Option<SessionReport>,
        received: std::sync::Mutex<Vec<u8>>,
    }

    impl FakeAnalysis {
        fn answering(report: Option<SessionReport>) -> Self {
            Self {
                calls: AtomicUsize::new(0),
                report,
                received: std::sync::Mutex::new(Vec::new()),
            }
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl AnalysisService for FakeAnalysis {
        async fn analyze(&self, payload: &AudioPayload) -> Result<SessionReport, AnalysisError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            *self.received.lock().unwrap() = payload.bytes.clone();
            self.report
                .clone()
                .ok_or_else(|| AnalysisError::Malformed("model returned no output".into()))
        }
    }

    fn report() -> SessionReport {
        SessionReport {
            transcript: "T".to_string(),
            evaluation: "E".to_string(),
        }
    }

    fn info(ceiling_secs: u32) -> SessionInfo {
        SessionInfo {
            student_id: "stu-1".to_string(),
            student_name: "student".to_string(),
            teacher_name: "teacher".to_string(),
            started_at: FixedOffset::east_opt(0)
                .unwrap()
                .with_ymd_and_hms(2026, 5, 11, 14, 0, 0)
                .unwrap(),
            ceiling_secs,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn countdown_expiry_analyzes_once() {
        let (capture, counters) = FakeCapture::new(vec![b"ab", b"cd"], b"ef");
        let analysis = FakeAnalysis::answering(Some(report()));
        let mut controller = SessionController::new(capture, &analysis);

        let outcome = controller
            .run(Some(info(3)), std::future::pending())
            .await;

        assert_matches!(outcome.state, SessionState::Complete { remaining_secs: 0, .. });
        assert!(outcome.notices.is_empty());
        assert_eq!(analysis.calls(), 1);
        assert_eq!(*analysis.received.lock().unwrap(), b"abcdef".to_vec());
        assert_eq!(counters.opened.load(Ordering::SeqCst), 1);
        assert_eq!(counters.closed.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn manual_stop_ends_recording_early() {
        let (capture, counters) = FakeCapture::new(vec![b"audio"], b"");
        let analysis = FakeAnalysis::answering(Some(report()));
        let mut controller = SessionController::new(capture, &analysis);

        let stop = tokio::time::sleep(Duration::from_millis(2500));
        let outcome = controller.run(Some(info(60)), stop).await;

        assert_matches!(outcome.state, SessionState::Complete { remaining_secs: 58, .. });
        assert_eq!(analysis.calls(), 1);
        assert_eq!(counters.closed.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn empty_capture_never_reaches_analysis() {
        let (capture, _) = FakeCapture::new(vec![], b"");
        let analysis = FakeAnalysis::answering(Some(report()));
        let mut controller = SessionController::new(capture, &analysis);

        let stop = tokio::time::sleep(Duration::from_millis(1500));
        let outcome = controller.run(Some(info(60)), stop).await;

        assert_eq!(outcome.state, SessionState::Idle);
        assert_eq!(outcome.notices, vec![Notice::EmptyRecording]);
        assert_eq!(analysis.calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn device_failure_returns_to_idle() {
        let (mut capture, counters) = FakeCapture::new(vec![b"ab"], b"");
        capture.fail_open = true;
        let analysis = FakeAnalysis::answering(Some(report()));
        let mut controller = SessionController::new(capture, &analysis);

        let outcome = controller
            .run(Some(info(60)), std::future::pending())
            .await;

        assert_eq!(outcome.state, SessionState::Idle);
        assert_matches!(&outcome.notices[..], [Notice::MediaAccessDenied { .. }]);
        assert_eq!(analysis.calls(), 0);
        assert_eq!(counters.closed.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_analysis_returns_to_idle() {
        let (capture, _) = FakeCapture::new(vec![b"ab"], b"");
        let analysis = FakeAnalysis::answering(None);
        let mut controller = SessionController::new(capture, &analysis);

        let outcome = controller
            .run(Some(info(2)), std::future::pending())
            .await;

        assert_eq!(outcome.state, SessionState::Idle);
        assert_matches!(&outcome.notices[..], [Notice::AnalysisFailed { .. }]);
        assert_eq!(analysis.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn no_student_leaves_devices_alone() {
        let (capture, counters) = FakeCapture::new(vec![b"ab"], b"");
        let analysis = FakeAnalysis::answering(Some(report()));
        let mut controller = SessionController::new(capture, &analysis);

        let outcome = controller
            .run(None, std::future::pending())
            .await;

        assert_eq!(outcome.state, SessionState::Idle);
        assert_eq!(counters.opened.load(Ordering::SeqCst), 0);
        assert_eq!(analysis.calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn completed_session_is_exported() {
        let dir = tempfile::tempdir().expect("temp dir");
        let (capture, _) = FakeCapture::new(vec![b"ab"], b"");
        let analysis = FakeAnalysis::answering(Some(report()));
        let mut controller = SessionController::new(capture, &analysis).with_export_dir(dir.path());

        let outcome = controller
            .run(Some(info(1)), std::future::pending())
            .await;

        let path = outcome.exported.expect("report exported");
        assert_eq!(
            path.file_name().and_then(|name| name.to_str()),
            Some("260511_1400_teacher_student.txt")
        );
        let contents = std::fs::read_to_string(&path).expect("readable export");
        assert!(contents.contains("Organizing the contents of the class:\nE\n"));
        assert!(contents.ends_with("Transcript:\nT"));
    }

    #[tokio::test(start_paused = true)]
    async fn unwritable_export_keeps_the_report() {
        let dir = tempfile::tempdir().expect("temp dir");
        let not_a_dir = dir.path().join("not-a-dir");
        std::fs::write(&not_a_dir, "occupied").expect("plain file");
        let (capture, _) = FakeCapture::new(vec![b"ab"], b"");
        let analysis = FakeAnalysis::answering(Some(report()));
        let mut controller = SessionController::new(capture, &analysis).with_export_dir(&not_a_dir);

        let outcome = controller
            .run(Some(info(1)), std::future::pending())
            .await;

        assert_eq!(analysis.calls(), 1);
        assert_matches!(&outcome.state, SessionState::Complete { report, .. } if report.evaluation == "E");
        assert_eq!(outcome.exported, None);
        assert!(outcome.export_error.is_some());
    }
}
