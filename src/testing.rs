//! Test doubles shared by the unit tests

use crate::capture::dispatcher::FrameSink;
use crate::capture::provider::{CaptureProvider, CaptureStream, ProviderError};
use crate::capture::traits::{
    AudioBuffer, CapturableContent, CaptureConfig, ContentFilter, DisplayInfo, Frame, FramePayload,
    MediaKind, PixelFormat, Rect, VideoBuffer, WindowInfo,
};
use crate::encoding::muxer::{ContainerWriter, Muxer, MuxerError, TrackInput};
use crate::encoding::types::{OutputTarget, TrackSettings};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

pub fn video_frame(ms: u64) -> Frame {
    Frame::video(
        Duration::from_millis(ms),
        VideoBuffer {
            data: vec![0x40; 4 * 2 * 4],
            width: 4,
            height: 2,
            bytes_per_row: 16,
            format: PixelFormat::Bgra,
        },
    )
}

pub fn audio_frame(ms: u64) -> Frame {
    Frame::audio(
        Duration::from_millis(ms),
        AudioBuffer {
            samples: vec![0.0; 480 * 2],
            sample_rate: 48_000,
            channels: 2,
        },
    )
}

/// Two side-by-side displays, one visible and one hidden window
pub fn sample_content() -> CapturableContent {
    let display = |id: u32, x: i32, primary: bool| DisplayInfo {
        id,
        name: format!("Display {}", id),
        x,
        y: 0,
        width: 1920,
        height: 1080,
        scale_factor: 1.0,
        is_primary: primary,
        refresh_rate: Some(60),
    };
    CapturableContent {
        displays: vec![display(1, 0, true), display(2, 1920, false)],
        windows: vec![
            WindowInfo {
                id: 10,
                title: "Browser".to_string(),
                app_name: "browser".to_string(),
                display_id: 1,
                bounds: Rect::new(100, 100, 1280, 720),
                is_on_screen: true,
            },
            WindowInfo {
                id: 11,
                title: "Hidden".to_string(),
                app_name: "notes".to_string(),
                display_id: 1,
                bounds: Rect::new(0, 0, 800, 600),
                is_on_screen: false,
            },
        ],
    }
}

/// Poll `condition` until it holds; panics after two seconds
pub async fn wait_until(mut condition: impl FnMut() -> bool) {
    for _ in 0..400 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("condition not met within 2s");
}

#[derive(Default)]
struct ScriptState {
    content: CapturableContent,
    deny_permission: bool,
    open_error: Option<ProviderError>,
    start_error: Option<ProviderError>,
    output_error: Option<(MediaKind, ProviderError)>,
    update_error: Option<ProviderError>,
    outputs: Vec<MediaKind>,
    sink: Option<FrameSink>,
    running: bool,
    open_count: usize,
    stop_count: usize,
    current: Option<(ContentFilter, CaptureConfig)>,
}

/// Capture provider whose stream is driven by the test
#[derive(Clone)]
pub struct ScriptedCaptureProvider {
    state: Arc<Mutex<ScriptState>>,
}

impl ScriptedCaptureProvider {
    pub fn new() -> Self {
        Self::with_content(sample_content())
    }

    pub fn with_content(content: CapturableContent) -> Self {
        Self {
            state: Arc::new(Mutex::new(ScriptState {
                content,
                ..ScriptState::default()
            })),
        }
    }

    pub fn deny_permission(&self) {
        self.state.lock().deny_permission = true;
    }

    pub fn fail_open(&self, error: ProviderError) {
        self.state.lock().open_error = Some(error);
    }

    pub fn fail_start(&self, error: ProviderError) {
        self.state.lock().start_error = Some(error);
    }

    /// Refuse registration of the given output kind
    pub fn fail_add_output(&self, kind: MediaKind, error: ProviderError) {
        self.state.lock().output_error = Some((kind, error));
    }

    pub fn fail_next_update(&self, error: ProviderError) {
        self.state.lock().update_error = Some(error);
    }

    pub fn is_running(&self) -> bool {
        self.state.lock().running
    }

    pub fn outputs(&self) -> Vec<MediaKind> {
        self.state.lock().outputs.clone()
    }

    pub fn open_count(&self) -> usize {
        self.state.lock().open_count
    }

    pub fn stop_count(&self) -> usize {
        self.state.lock().stop_count
    }

    /// Filter and config most recently applied to the stream
    pub fn current_update(&self) -> Option<(ContentFilter, CaptureConfig)> {
        self.state.lock().current.clone()
    }

    fn running_sink(&self) -> Option<FrameSink> {
        let state = self.state.lock();
        state.running.then(|| state.sink.clone()).flatten()
    }

    /// Deliver a frame as the platform would, if the stream is running
    pub fn push(&self, frame: Frame) {
        if let Some(sink) = self.running_sink() {
            sink.deliver(frame);
        }
    }

    pub fn push_video(&self, ms: u64) {
        self.push(video_frame(ms));
    }

    pub fn push_audio(&self, ms: u64) {
        self.push(audio_frame(ms));
    }

    /// Report an asynchronous stream failure
    pub fn fail_stream(&self, reason: &str) {
        let sink = self.state.lock().sink.clone();
        if let Some(sink) = sink {
            sink.fail(reason);
        }
    }
}

impl CaptureProvider for ScriptedCaptureProvider {
    fn name(&self) -> &str {
        "scripted"
    }

    fn enumerate_content(&self) -> Result<CapturableContent, ProviderError> {
        let state = self.state.lock();
        if state.deny_permission {
            return Err(ProviderError::PermissionDenied(
                "screen recording not authorized".to_string(),
            ));
        }
        Ok(state.content.clone())
    }

    fn open_stream(
        &self,
        filter: &ContentFilter,
        config: &CaptureConfig,
    ) -> Result<Box<dyn CaptureStream>, ProviderError> {
        let mut state = self.state.lock();
        state.open_count += 1;
        if let Some(error) = state.open_error.clone() {
            return Err(error);
        }
        state.outputs.clear();
        state.sink = None;
        state.current = Some((filter.clone(), config.clone()));
        Ok(Box::new(ScriptedStream {
            state: self.state.clone(),
        }))
    }
}

struct ScriptedStream {
    state: Arc<Mutex<ScriptState>>,
}

impl CaptureStream for ScriptedStream {
    fn add_output(&mut self, kind: MediaKind, sink: FrameSink) -> Result<(), ProviderError> {
        let mut state = self.state.lock();
        if state.output_error.as_ref().map(|(k, _)| *k) == Some(kind) {
            if let Some((_, error)) = state.output_error.take() {
                return Err(error);
            }
        }
        state.outputs.push(kind);
        state.sink = Some(sink);
        Ok(())
    }

    fn update(&mut self, filter: &ContentFilter, config: &CaptureConfig) -> Result<(), ProviderError> {
        let mut state = self.state.lock();
        if let Some(error) = state.update_error.take() {
            return Err(error);
        }
        state.current = Some((filter.clone(), config.clone()));
        Ok(())
    }

    fn start(&mut self) -> Result<(), ProviderError> {
        let mut state = self.state.lock();
        if let Some(error) = state.start_error.take() {
            return Err(error);
        }
        state.running = true;
        Ok(())
    }

    fn stop(&mut self) -> Result<(), ProviderError> {
        let mut state = self.state.lock();
        state.running = false;
        state.stop_count += 1;
        Ok(())
    }
}

#[derive(Default)]
struct MuxState {
    writers_created: usize,
    tracks: Vec<MediaKind>,
    writing: bool,
    session_start: Option<Duration>,
    session_start_calls: usize,
    fail_track_registration: bool,
    fail_open: bool,
    fail_finalize: Option<String>,
    not_ready: HashSet<MediaKind>,
    rejecting: HashSet<MediaKind>,
    samples: Vec<(MediaKind, Duration)>,
    finished: Vec<MediaKind>,
    finalized: bool,
}

/// Muxer that records every sample instead of writing a file
///
/// Per-writer state resets when a new writer is created; injected failures
/// persist.
#[derive(Clone, Default)]
pub struct MemoryMuxer {
    state: Arc<Mutex<MuxState>>,
}

impl MemoryMuxer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_track_registration(&self) {
        self.state.lock().fail_track_registration = true;
    }

    pub fn fail_open(&self) {
        self.state.lock().fail_open = true;
    }

    pub fn fail_finalize(&self, message: &str) {
        self.state.lock().fail_finalize = Some(message.to_string());
    }

    pub fn set_ready(&self, kind: MediaKind, ready: bool) {
        let mut state = self.state.lock();
        if ready {
            state.not_ready.remove(&kind);
        } else {
            state.not_ready.insert(kind);
        }
    }

    pub fn reject_appends(&self, kind: MediaKind) {
        self.state.lock().rejecting.insert(kind);
    }

    pub fn writers_created(&self) -> usize {
        self.state.lock().writers_created
    }

    pub fn tracks(&self) -> Vec<MediaKind> {
        self.state.lock().tracks.clone()
    }

    pub fn is_writing(&self) -> bool {
        self.state.lock().writing
    }

    pub fn session_start(&self) -> Option<Duration> {
        self.state.lock().session_start
    }

    pub fn session_start_calls(&self) -> usize {
        self.state.lock().session_start_calls
    }

    pub fn samples(&self) -> Vec<(MediaKind, Duration)> {
        self.state.lock().samples.clone()
    }

    pub fn samples_of(&self, kind: MediaKind) -> Vec<Duration> {
        self.state
            .lock()
            .samples
            .iter()
            .filter(|(k, _)| *k == kind)
            .map(|(_, pts)| *pts)
            .collect()
    }

    pub fn finished_tracks(&self) -> Vec<MediaKind> {
        self.state.lock().finished.clone()
    }

    pub fn is_finalized(&self) -> bool {
        self.state.lock().finalized
    }
}

impl Muxer for MemoryMuxer {
    fn create_writer(&self, _target: &OutputTarget) -> Result<Arc<dyn ContainerWriter>, MuxerError> {
        let mut state = self.state.lock();
        state.writers_created += 1;
        state.tracks.clear();
        state.writing = false;
        state.session_start = None;
        state.session_start_calls = 0;
        state.samples.clear();
        state.finished.clear();
        state.finalized = false;
        Ok(Arc::new(MemoryWriter {
            state: self.state.clone(),
        }))
    }
}

struct MemoryWriter {
    state: Arc<Mutex<MuxState>>,
}

#[async_trait]
impl ContainerWriter for MemoryWriter {
    fn add_track_input(&self, settings: TrackSettings) -> Result<Box<dyn TrackInput>, MuxerError> {
        let mut state = self.state.lock();
        if state.fail_track_registration {
            return Err(MuxerError::Track("unsupported codec settings".to_string()));
        }
        let kind = settings.kind();
        state.tracks.push(kind);
        Ok(Box::new(MemoryTrack {
            kind,
            state: self.state.clone(),
        }))
    }

    fn start_writing(&self) -> Result<(), MuxerError> {
        let mut state = self.state.lock();
        if state.fail_open {
            return Err(MuxerError::Open("output not writable".to_string()));
        }
        state.writing = true;
        Ok(())
    }

    fn start_session(&self, at: Duration) {
        let mut state = self.state.lock();
        state.session_start = Some(at);
        state.session_start_calls += 1;
    }

    async fn finalize(&self) -> Result<(), MuxerError> {
        let mut state = self.state.lock();
        if let Some(message) = state.fail_finalize.clone() {
            return Err(MuxerError::Finalize(message));
        }
        if state.finished.len() != state.tracks.len() {
            return Err(MuxerError::Finalize("unfinished track inputs".to_string()));
        }
        state.finalized = true;
        Ok(())
    }
}

struct MemoryTrack {
    kind: MediaKind,
    state: Arc<Mutex<MuxState>>,
}

impl TrackInput for MemoryTrack {
    fn kind(&self) -> MediaKind {
        self.kind
    }

    fn is_ready_for_more_data(&self) -> bool {
        !self.state.lock().not_ready.contains(&self.kind)
    }

    fn append(&mut self, payload: &FramePayload, pts: Duration) -> Result<(), MuxerError> {
        let mut state = self.state.lock();
        if state.rejecting.contains(&self.kind) {
            return Err(MuxerError::Append("encoder refused sample".to_string()));
        }
        let matches = matches!(
            (self.kind, payload),
            (MediaKind::Video, FramePayload::Video(_)) | (MediaKind::Audio, FramePayload::Audio(_))
        );
        if !matches {
            return Err(MuxerError::Append("payload kind mismatch".to_string()));
        }
        state.samples.push((self.kind, pts));
        Ok(())
    }

    fn mark_finished(&mut self) {
        self.state.lock().finished.push(self.kind);
    }
}
