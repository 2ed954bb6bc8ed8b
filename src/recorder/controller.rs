//! Session controller
//!
//! Drives one capture adapter and one encoding session through the recording
//! lifecycle. Control operations are serialized by an async mutex; the
//! current state sits behind its own lock so readers never wait on a
//! control operation in flight.

use super::state::{
    PipelineStats, RecordingConfig, RecordingOutput, RecordingState, RecordingTimeline,
};
use crate::capture::adapter::CaptureAdapter;
use crate::capture::dispatcher::{FrameDispatcher, StreamFailure};
use crate::capture::traits::{CapturableContent, CaptureTarget};
use crate::encoding::muxer::Muxer;
use crate::encoding::session::EncodingSession;
use crate::encoding::types::EncodingStats;
use crate::utils::error::{ErrorResponse, RecorderError, RecorderResult};
use parking_lot::{Mutex, RwLock};
use std::sync::{Arc, Weak};
use tokio::sync::{broadcast, oneshot};
use uuid::Uuid;

/// Events emitted during recording
#[derive(Debug, Clone, PartialEq)]
pub enum RecordingEvent {
    StateChanged(RecordingState),
    /// The live stream now shows a different target
    Retargeted(CaptureTarget),
    /// The capture stream failed; a forced stop follows
    StreamFailed(String),
}

struct ActiveRecording {
    id: Uuid,
    config: RecordingConfig,
    /// Dropping this ends the failure watcher
    _cancel: oneshot::Sender<()>,
}

/// Everything a control operation may touch
struct ControlPlane {
    adapter: CaptureAdapter,
    muxer: Arc<dyn Muxer>,
    session: Option<EncodingSession>,
    recording: Option<ActiveRecording>,
    finished_stats: Option<EncodingStats>,
}

impl ControlPlane {
    /// Bring up capture, then encoding, then connect the two
    fn open(&mut self, config: &RecordingConfig) -> RecorderResult<EncodingSession> {
        self.adapter
            .begin(config.target.clone(), config.capture.clone())?;
        let capture = self
            .adapter
            .active_config()
            .cloned()
            .unwrap_or_else(|| config.capture.clone());
        let session =
            EncodingSession::start(self.muxer.as_ref(), &config.output, &capture, config.quality)?;
        self.adapter.attach_routes(session.routes());
        Ok(session)
    }
}

struct ControllerInner {
    control: tokio::sync::Mutex<ControlPlane>,
    state: RwLock<RecordingState>,
    timeline: Mutex<Option<RecordingTimeline>>,
    last_error: RwLock<Option<ErrorResponse>>,
    dispatcher: Arc<FrameDispatcher>,
    event_tx: broadcast::Sender<RecordingEvent>,
}

impl ControllerInner {
    fn state(&self) -> RecordingState {
        *self.state.read()
    }

    fn set_state(&self, next: RecordingState) {
        let previous = std::mem::replace(&mut *self.state.write(), next);
        if previous != next {
            tracing::info!("Recording state: {} -> {}", previous, next);
            let _ = self.event_tx.send(RecordingEvent::StateChanged(next));
        }
    }

    fn record_error(&self, error: &RecorderError) {
        *self.last_error.write() = Some(ErrorResponse {
            code: error.code().to_string(),
            message: error.to_string(),
        });
    }

    /// Stop capture, drain and finalize. `forced` stops end in Failed even
    /// when the container was written.
    async fn stop_locked(
        &self,
        control: &mut ControlPlane,
        forced: bool,
    ) -> RecorderResult<RecordingOutput> {
        self.set_state(RecordingState::Stopping);

        let (duration_ms, segments) = match self.timeline.lock().as_mut() {
            Some(timeline) => {
                timeline.close_segment();
                (timeline.duration_ms(), timeline.segments().to_vec())
            }
            None => (0.0, Vec::new()),
        };

        control.adapter.end();
        let id = control.recording.take().map(|r| r.id).unwrap_or_else(Uuid::nil);

        let Some(mut session) = control.session.take() else {
            let error = RecorderError::NotRecording;
            self.record_error(&error);
            self.set_state(RecordingState::Failed);
            return Err(error);
        };

        let result = session.finish().await;
        match result {
            Ok(encoding) => {
                control.finished_stats = Some(encoding.clone());
                let output = RecordingOutput {
                    id,
                    path: session.target().path.clone(),
                    format: session.target().format,
                    duration_ms,
                    segments,
                    stats: PipelineStats {
                        dispatch: self.dispatcher.stats(),
                        encoding: Some(encoding),
                    },
                };
                tracing::info!(
                    "Recording {} written to {:?}: {:.0}ms in {} segment(s)",
                    id,
                    output.path,
                    output.duration_ms,
                    output.segments.len()
                );
                self.set_state(if forced {
                    RecordingState::Failed
                } else {
                    RecordingState::Completed
                });
                Ok(output)
            }
            Err(e) => {
                tracing::error!("Recording {} could not be finalized: {}", id, e);
                control.finished_stats = Some(session.stats());
                if !forced {
                    self.record_error(&e);
                }
                self.set_state(RecordingState::Failed);
                Err(e)
            }
        }
    }

    async fn handle_stream_failure(&self, id: Uuid, failure: StreamFailure) {
        let mut control = self.control.lock().await;
        let current = control.recording.as_ref().map(|r| r.id);
        if current != Some(id) || !self.state().is_recording() {
            tracing::debug!("Ignoring stream failure for inactive recording {}", id);
            return;
        }

        let error = RecorderError::StreamFailure(failure.reason.clone());
        tracing::error!("Recording {} interrupted at {}: {}", id, failure.at, error);
        self.record_error(&error);
        let _ = self
            .event_tx
            .send(RecordingEvent::StreamFailed(failure.reason));

        match self.stop_locked(&mut control, true).await {
            Ok(output) => tracing::warn!(
                "Partial recording kept at {:?} ({:.0}ms)",
                output.path,
                output.duration_ms
            ),
            Err(e) => tracing::warn!("Forced stop did not finalize the recording: {}", e),
        }
    }
}

/// Owns the recording lifecycle
#[derive(Clone)]
pub struct SessionController {
    inner: Arc<ControllerInner>,
}

impl SessionController {
    pub fn new(adapter: CaptureAdapter, muxer: Arc<dyn Muxer>) -> Self {
        let (event_tx, _) = broadcast::channel(100);
        let dispatcher = Arc::clone(adapter.dispatcher());
        Self {
            inner: Arc::new(ControllerInner {
                control: tokio::sync::Mutex::new(ControlPlane {
                    adapter,
                    muxer,
                    session: None,
                    recording: None,
                    finished_stats: None,
                }),
                state: RwLock::new(RecordingState::Idle),
                timeline: Mutex::new(None),
                last_error: RwLock::new(None),
                dispatcher,
                event_tx,
            }),
        }
    }

    pub fn state(&self) -> RecordingState {
        self.inner.state()
    }

    /// Subscribe to recording events
    pub fn subscribe(&self) -> broadcast::Receiver<RecordingEvent> {
        self.inner.event_tx.subscribe()
    }

    /// Recorded time of the current or last recording, excluding pauses
    pub fn duration_ms(&self) -> f64 {
        self.inner
            .timeline
            .lock()
            .as_ref()
            .map(|t| t.duration_ms())
            .unwrap_or(0.0)
    }

    /// The error that ended the last recording, if any
    pub fn last_error(&self) -> Option<ErrorResponse> {
        self.inner.last_error.read().clone()
    }

    pub async fn stats(&self) -> PipelineStats {
        let control = self.inner.control.lock().await;
        PipelineStats {
            dispatch: self.inner.dispatcher.stats(),
            encoding: control
                .session
                .as_ref()
                .map(|s| s.stats())
                .or_else(|| control.finished_stats.clone()),
        }
    }

    pub async fn available_content(&self) -> RecorderResult<CapturableContent> {
        let control = self.inner.control.lock().await;
        control.adapter.available_content()
    }

    /// Configuration of the live recording, with its current target
    pub async fn active_recording(&self) -> Option<(Uuid, RecordingConfig)> {
        let control = self.inner.control.lock().await;
        control
            .recording
            .as_ref()
            .map(|r| (r.id, r.config.clone()))
    }

    /// Start a new recording
    pub async fn start(&self, config: RecordingConfig) -> RecorderResult<Uuid> {
        let inner = &self.inner;
        let mut control = inner.control.lock().await;
        if !inner.state().can_start() {
            return Err(RecorderError::AlreadyRecording);
        }

        tracing::info!(
            "Starting recording of {} to {:?}",
            config.target,
            config.output.path
        );
        *inner.last_error.write() = None;
        inner.set_state(RecordingState::Starting);

        // subscribe before the stream exists so no failure is missed
        let failures = inner.dispatcher.subscribe_failures();
        let session = match control.open(&config) {
            Ok(session) => session,
            Err(e) => {
                tracing::warn!("Start failed, rolling back capture: {}", e);
                control.adapter.end();
                inner.record_error(&e);
                inner.set_state(RecordingState::Idle);
                return Err(e);
            }
        };

        let id = Uuid::new_v4();
        let (cancel_tx, cancel_rx) = oneshot::channel();
        tokio::spawn(watch_failures(
            Arc::downgrade(inner),
            id,
            failures,
            cancel_rx,
        ));

        control.session = Some(session);
        control.finished_stats = None;
        control.recording = Some(ActiveRecording {
            id,
            config,
            _cancel: cancel_tx,
        });
        *inner.timeline.lock() = Some(RecordingTimeline::start());
        inner.set_state(RecordingState::Capturing);

        tracing::info!("Recording {} started", id);
        Ok(id)
    }

    /// Stop capture and finalize the container
    pub async fn stop(&self) -> RecorderResult<RecordingOutput> {
        let mut control = self.inner.control.lock().await;
        if !self.inner.state().is_recording() {
            return Err(RecorderError::NotRecording);
        }
        tracing::info!("Stopping recording");
        self.inner.stop_locked(&mut control, false).await
    }

    /// Drop frames until resumed. Returns false when not capturing.
    pub async fn pause(&self) -> bool {
        let control = self.inner.control.lock().await;
        if self.inner.state() != RecordingState::Capturing {
            return false;
        }
        control.adapter.pause();
        if let Some(timeline) = self.inner.timeline.lock().as_mut() {
            timeline.close_segment();
        }
        self.inner.set_state(RecordingState::Paused);
        true
    }

    /// Let frames through again. Returns false when not paused.
    pub async fn resume(&self) -> bool {
        let control = self.inner.control.lock().await;
        if self.inner.state() != RecordingState::Paused {
            return false;
        }
        control.adapter.resume();
        if let Some(timeline) = self.inner.timeline.lock().as_mut() {
            timeline.open_segment();
        }
        self.inner.set_state(RecordingState::Capturing);
        true
    }

    /// Point the live stream at a different target
    pub async fn retarget(&self, target: CaptureTarget) -> RecorderResult<()> {
        let mut control = self.inner.control.lock().await;
        if !self.inner.state().is_recording() {
            return Err(RecorderError::NotRecording);
        }
        control.adapter.retarget(target.clone())?;
        if let Some(recording) = control.recording.as_mut() {
            recording.config.target = target.clone();
        }
        let _ = self.inner.event_tx.send(RecordingEvent::Retargeted(target));
        Ok(())
    }
}

/// Waits for a stream failure on the recording `id` and forces a stop
async fn watch_failures(
    inner: Weak<ControllerInner>,
    id: Uuid,
    mut failures: broadcast::Receiver<StreamFailure>,
    mut cancel: oneshot::Receiver<()>,
) {
    loop {
        tokio::select! {
            _ = &mut cancel => return,
            received = failures.recv() => match received {
                Ok(failure) => {
                    if let Some(inner) = inner.upgrade() {
                        inner.handle_stream_failure(id, failure).await;
                    }
                    return;
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!("Failure watcher lagged by {} messages", skipped);
                }
                Err(broadcast::error::RecvError::Closed) => return,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::provider::ProviderError;
    use crate::capture::traits::{CaptureConfig, MediaKind};
    use crate::encoding::types::{ContainerFormat, EncodeQuality, OutputTarget};
    use crate::testing::{wait_until, MemoryMuxer, ScriptedCaptureProvider};
    use std::time::Duration;

    fn controller_with(provider: &ScriptedCaptureProvider) -> (SessionController, MemoryMuxer) {
        let muxer = MemoryMuxer::new();
        let adapter = CaptureAdapter::new(Arc::new(provider.clone()));
        (SessionController::new(adapter, Arc::new(muxer.clone())), muxer)
    }

    fn controller() -> (SessionController, ScriptedCaptureProvider, MemoryMuxer) {
        let provider = ScriptedCaptureProvider::new();
        let (controller, muxer) = controller_with(&provider);
        (controller, provider, muxer)
    }

    fn config() -> RecordingConfig {
        RecordingConfig {
            target: CaptureTarget::default(),
            capture: CaptureConfig::default(),
            output: OutputTarget::new("/tmp/recording.mp4", ContainerFormat::Mp4),
            quality: EncodeQuality::High,
        }
    }

    fn drain(events: &mut broadcast::Receiver<RecordingEvent>) -> Vec<RecordingEvent> {
        let mut received = Vec::new();
        while let Ok(event) = events.try_recv() {
            received.push(event);
        }
        received
    }

    fn ms(value: u64) -> Duration {
        Duration::from_millis(value)
    }

    #[tokio::test]
    async fn test_start_brings_up_capture_and_encoding() {
        let (controller, provider, muxer) = controller();
        let mut events = controller.subscribe();

        let id = controller.start(config()).await.unwrap();

        assert_eq!(controller.state(), RecordingState::Capturing);
        assert!(provider.is_running());
        assert_eq!(muxer.tracks(), vec![MediaKind::Video, MediaKind::Audio]);
        assert_eq!(controller.active_recording().await.unwrap().0, id);
        assert_eq!(
            drain(&mut events),
            vec![
                RecordingEvent::StateChanged(RecordingState::Starting),
                RecordingEvent::StateChanged(RecordingState::Capturing),
            ]
        );
    }

    #[tokio::test]
    async fn test_second_start_is_rejected_without_side_effects() {
        let (controller, provider, muxer) = controller();
        let first = controller.start(config()).await.unwrap();

        let err = controller.start(config()).await.unwrap_err();

        assert!(matches!(err, RecorderError::AlreadyRecording));
        assert_eq!(controller.state(), RecordingState::Capturing);
        assert_eq!(provider.open_count(), 1);
        assert_eq!(muxer.writers_created(), 1);
        assert!(provider.is_running());
        assert_eq!(controller.active_recording().await.unwrap().0, first);
    }

    #[tokio::test]
    async fn test_stop_when_idle_is_not_recording() {
        let (controller, provider, muxer) = controller();
        let mut events = controller.subscribe();

        let err = controller.stop().await.unwrap_err();

        assert!(matches!(err, RecorderError::NotRecording));
        assert_eq!(controller.state(), RecordingState::Idle);
        assert_eq!(provider.stop_count(), 0);
        assert_eq!(muxer.writers_created(), 0);
        assert!(drain(&mut events).is_empty());
    }

    #[tokio::test]
    async fn test_pause_resume_recording() {
        let (controller, provider, muxer) = controller();
        controller.start(config()).await.unwrap();

        provider.push_video(0);
        wait_until(|| muxer.samples_of(MediaKind::Video).len() == 1).await;
        provider.push_audio(10);
        wait_until(|| muxer.samples_of(MediaKind::Audio).len() == 1).await;

        assert!(controller.pause().await);
        assert_eq!(controller.state(), RecordingState::Paused);
        provider.push_video(20);
        assert!(controller.resume().await);
        provider.push_video(50);

        let output = controller.stop().await.unwrap();

        assert_eq!(controller.state(), RecordingState::Completed);
        assert_eq!(
            muxer.samples(),
            vec![
                (MediaKind::Video, ms(0)),
                (MediaKind::Audio, ms(10)),
                (MediaKind::Video, ms(50)),
            ]
        );
        let encoding = output.stats.encoding.unwrap();
        assert_eq!(encoding.baseline(), Some(Duration::ZERO));
        assert_eq!(encoding.video.appended, 2);
        assert_eq!(output.stats.dispatch.suppressed, 1);
        assert_eq!(output.segments.len(), 2);
        assert_eq!(output.path, config().output.path);
        assert!(muxer.is_finalized());
        assert!(!provider.is_running());
    }

    #[tokio::test]
    async fn test_pause_and_resume_outside_their_states_do_nothing() {
        let (controller, _provider, _muxer) = controller();
        assert!(!controller.pause().await);
        assert!(!controller.resume().await);
        assert_eq!(controller.state(), RecordingState::Idle);

        controller.start(config()).await.unwrap();
        assert!(!controller.resume().await);
        assert!(controller.pause().await);
        assert!(!controller.pause().await);
        assert_eq!(controller.state(), RecordingState::Paused);
    }

    #[tokio::test]
    async fn test_stop_while_paused_completes() {
        let (controller, provider, muxer) = controller();
        controller.start(config()).await.unwrap();
        provider.push_video(0);
        controller.pause().await;
        provider.push_video(40);

        controller.stop().await.unwrap();

        assert_eq!(controller.state(), RecordingState::Completed);
        assert_eq!(muxer.samples_of(MediaKind::Video), vec![ms(0)]);
    }

    #[tokio::test]
    async fn test_retarget_keeps_baseline() {
        let (controller, provider, muxer) = controller();
        controller.start(config()).await.unwrap();
        let mut events = controller.subscribe();

        provider.push_video(100);
        wait_until(|| muxer.samples().len() == 1).await;

        let window = CaptureTarget::Window { id: 10 };
        controller.retarget(window.clone()).await.unwrap();
        provider.push_video(133);

        let (filter, _) = provider.current_update().unwrap();
        assert_eq!(filter.window_id, Some(10));
        assert_eq!(controller.active_recording().await.unwrap().1.target, window);
        assert_eq!(drain(&mut events), vec![RecordingEvent::Retargeted(window)]);

        let output = controller.stop().await.unwrap();
        assert_eq!(output.stats.encoding.unwrap().baseline(), Some(ms(100)));
        assert_eq!(muxer.session_start_calls(), 1);
        assert_eq!(muxer.samples_of(MediaKind::Video), vec![ms(100), ms(133)]);
    }

    #[tokio::test]
    async fn test_retarget_errors() {
        let (controller, provider, _muxer) = controller();
        let err = controller.retarget(CaptureTarget::default()).await.unwrap_err();
        assert!(matches!(err, RecorderError::NotRecording));

        controller.start(config()).await.unwrap();
        let err = controller
            .retarget(CaptureTarget::Window { id: 404 })
            .await
            .unwrap_err();
        assert!(matches!(err, RecorderError::TargetUnavailable(_)));

        provider.fail_next_update(ProviderError::Rejected("bad filter".into()));
        let err = controller
            .retarget(CaptureTarget::Window { id: 10 })
            .await
            .unwrap_err();
        assert!(matches!(err, RecorderError::ConfigurationRejected(_)));
        assert_eq!(controller.state(), RecordingState::Capturing);
        assert_eq!(
            controller.active_recording().await.unwrap().1.target,
            CaptureTarget::default()
        );
    }

    #[tokio::test]
    async fn test_no_displays_is_target_unavailable() {
        let provider = ScriptedCaptureProvider::with_content(CapturableContent::default());
        let (controller, muxer) = controller_with(&provider);

        let err = controller.start(config()).await.unwrap_err();

        assert!(matches!(err, RecorderError::TargetUnavailable(_)));
        assert_eq!(controller.state(), RecordingState::Idle);
        assert_eq!(provider.open_count(), 0);
        assert_eq!(muxer.writers_created(), 0);
        assert_eq!(controller.last_error().unwrap().code, "TARGET_UNAVAILABLE");
    }

    #[tokio::test]
    async fn test_permission_denied_start() {
        let (controller, provider, _muxer) = controller();
        provider.deny_permission();

        let err = controller.start(config()).await.unwrap_err();

        assert!(matches!(err, RecorderError::PermissionDenied(_)));
        assert_eq!(controller.state(), RecordingState::Idle);
    }

    #[tokio::test]
    async fn test_encoder_failure_rolls_back_capture() {
        let (controller, provider, muxer) = controller();
        muxer.fail_open();
        let mut events = controller.subscribe();

        let err = controller.start(config()).await.unwrap_err();

        assert!(matches!(err, RecorderError::ConfigurationRejected(_)));
        assert_eq!(controller.state(), RecordingState::Idle);
        assert_eq!(provider.open_count(), 1);
        assert_eq!(provider.stop_count(), 1);
        assert!(!provider.is_running());
        assert_eq!(
            drain(&mut events),
            vec![
                RecordingEvent::StateChanged(RecordingState::Starting),
                RecordingEvent::StateChanged(RecordingState::Idle),
            ]
        );
    }

    #[tokio::test]
    async fn test_finalize_error_fails_recording() {
        let (controller, provider, muxer) = controller();
        muxer.fail_finalize("disk full");
        controller.start(config()).await.unwrap();
        provider.push_video(0);

        let err = controller.stop().await.unwrap_err();

        assert!(matches!(err, RecorderError::MuxFinalizeError(_)));
        assert_eq!(controller.state(), RecordingState::Failed);
        assert!(!provider.is_running());
        assert_eq!(provider.stop_count(), 1);
        assert_eq!(controller.last_error().unwrap().code, "MUX_FINALIZE_ERROR");
        // tracks were still drained and finished
        assert_eq!(muxer.finished_tracks().len(), 2);
        assert!(controller.stats().await.encoding.is_some());
    }

    #[tokio::test]
    async fn test_stream_failure_forces_stop() {
        let (controller, provider, muxer) = controller();
        controller.start(config()).await.unwrap();
        let mut events = controller.subscribe();

        provider.push_video(0);
        wait_until(|| muxer.samples().len() == 1).await;
        provider.fail_stream("display disconnected");
        wait_until(|| controller.state() == RecordingState::Failed).await;

        assert!(!provider.is_running());
        assert!(muxer.is_finalized());
        assert_eq!(controller.last_error().unwrap().code, "STREAM_FAILURE");

        let events = drain(&mut events);
        assert_eq!(
            events,
            vec![
                RecordingEvent::StreamFailed("display disconnected".to_string()),
                RecordingEvent::StateChanged(RecordingState::Stopping),
                RecordingEvent::StateChanged(RecordingState::Failed),
            ]
        );
        assert!(matches!(
            controller.stop().await,
            Err(RecorderError::NotRecording)
        ));
    }

    #[tokio::test]
    async fn test_stream_failure_while_paused_forces_stop() {
        let (controller, provider, _muxer) = controller();
        controller.start(config()).await.unwrap();
        provider.push_video(0);
        controller.pause().await;

        provider.fail_stream("window closed");
        wait_until(|| controller.state() == RecordingState::Failed).await;
        assert_eq!(provider.stop_count(), 1);
    }

    #[tokio::test]
    async fn test_late_failure_after_stop_is_ignored() {
        let (controller, provider, _muxer) = controller();
        controller.start(config()).await.unwrap();
        provider.push_video(0);
        controller.stop().await.unwrap();

        provider.fail_stream("late teardown error");
        tokio::time::sleep(ms(50)).await;

        assert_eq!(controller.state(), RecordingState::Completed);
        assert!(controller.last_error().is_none());
    }

    #[tokio::test]
    async fn test_restart_after_completed() {
        let (controller, provider, muxer) = controller();
        let first = controller.start(config()).await.unwrap();
        provider.push_video(0);
        controller.stop().await.unwrap();

        let second = controller.start(config()).await.unwrap();
        assert_ne!(first, second);
        assert_eq!(controller.state(), RecordingState::Capturing);
        assert_eq!(muxer.writers_created(), 2);
        assert_eq!(provider.open_count(), 2);

        provider.push_video(500);
        let output = controller.stop().await.unwrap();
        assert_eq!(output.id, second);
        assert_eq!(output.stats.encoding.unwrap().baseline(), Some(ms(500)));
    }

    #[tokio::test]
    async fn test_duration_excludes_pauses() {
        let (controller, _provider, _muxer) = controller();
        controller.start(config()).await.unwrap();
        tokio::time::sleep(ms(20)).await;
        controller.pause().await;
        let paused = controller.duration_ms();
        tokio::time::sleep(ms(30)).await;

        assert_eq!(controller.duration_ms(), paused);
        assert!(paused >= 20.0);
    }
}
