//! Capture adapter
//!
//! Owns at most one capture stream. Resolves capture targets against the
//! provider's enumerated content, opens/updates/closes the stream, and
//! wires the stream's output into the frame dispatcher.

use super::dispatcher::{FrameDispatcher, FrameRoutes, FrameSink};
use super::provider::{CaptureProvider, CaptureStream, ProviderError};
use super::traits::{CapturableContent, CaptureConfig, CaptureTarget, ContentFilter, MediaKind};
use crate::utils::error::{RecorderError, RecorderResult};
use std::sync::Arc;

struct ActiveStream {
    stream: Box<dyn CaptureStream>,
    target: CaptureTarget,
    filter: ContentFilter,
    config: CaptureConfig,
}

/// Wraps a platform capture provider
pub struct CaptureAdapter {
    provider: Arc<dyn CaptureProvider>,
    dispatcher: Arc<FrameDispatcher>,
    active: Option<ActiveStream>,
}

impl CaptureAdapter {
    pub fn new(provider: Arc<dyn CaptureProvider>) -> Self {
        Self {
            provider,
            dispatcher: FrameDispatcher::new(),
            active: None,
        }
    }

    pub fn dispatcher(&self) -> &Arc<FrameDispatcher> {
        &self.dispatcher
    }

    pub fn is_active(&self) -> bool {
        self.active.is_some()
    }

    pub fn active_target(&self) -> Option<&CaptureTarget> {
        self.active.as_ref().map(|a| &a.target)
    }

    pub fn active_filter(&self) -> Option<&ContentFilter> {
        self.active.as_ref().map(|a| &a.filter)
    }

    pub fn active_config(&self) -> Option<&CaptureConfig> {
        self.active.as_ref().map(|a| &a.config)
    }

    /// Everything the provider currently allows us to capture
    pub fn available_content(&self) -> RecorderResult<CapturableContent> {
        Ok(self.provider.enumerate_content()?)
    }

    /// Open and start a capture stream for `target`
    pub fn begin(&mut self, target: CaptureTarget, config: CaptureConfig) -> RecorderResult<()> {
        if self.active.is_some() {
            return Err(RecorderError::AlreadyRecording);
        }
        config
            .validate()
            .map_err(RecorderError::ConfigurationRejected)?;

        let content = self.provider.enumerate_content()?;
        let (filter, config) = resolve_target(&content, &target, &config)?;

        let mut stream = self.provider.open_stream(&filter, &config)?;

        self.dispatcher.set_suppressed(false);
        if let Err(e) = connect(stream.as_mut(), self.dispatcher.sink(), config.capture_audio) {
            if let Err(stop_err) = stream.stop() {
                tracing::warn!("Failed to stop stream after start failure: {}", stop_err);
            }
            return Err(e.into());
        }

        tracing::info!(
            "Capture started via {}: {} ({}x{} @ {}fps, audio: {})",
            self.provider.name(),
            target,
            config.resolution.width,
            config.resolution.height,
            config.frame_rate,
            config.capture_audio
        );

        self.active = Some(ActiveStream {
            stream,
            target,
            filter,
            config,
        });
        Ok(())
    }

    /// Stop the stream if one is active. Safe to call repeatedly.
    pub fn end(&mut self) {
        self.dispatcher.detach();
        self.dispatcher.set_suppressed(false);

        let Some(mut active) = self.active.take() else {
            return;
        };
        if let Err(e) = active.stream.stop() {
            tracing::warn!("Capture stream reported an error while stopping: {}", e);
        }
        tracing::info!("Capture stopped: {}", active.target);
    }

    /// Swap the capture target without restarting the stream
    ///
    /// Filter and configuration are applied as one update. If the update
    /// fails the previous pair is re-applied and stays recorded as active.
    pub fn retarget(&mut self, target: CaptureTarget) -> RecorderResult<()> {
        let Some(active) = self.active.as_mut() else {
            return Err(RecorderError::NotRecording);
        };

        let content = self.provider.enumerate_content()?;
        let (filter, config) = resolve_target(&content, &target, &active.config)?;

        if let Err(e) = active.stream.update(&filter, &config) {
            tracing::warn!("Retarget to {} failed: {}", target, e);
            if let Err(restore_err) = active.stream.update(&active.filter, &active.config) {
                tracing::error!(
                    "Failed to restore previous capture target {}: {}",
                    active.target,
                    restore_err
                );
            }
            return Err(e.into());
        }

        tracing::info!("Capture retargeted: {} -> {}", active.target, target);
        active.target = target;
        active.filter = filter;
        active.config = config;
        Ok(())
    }

    /// Suppress frame delivery without touching the stream
    pub fn pause(&self) {
        self.dispatcher.set_suppressed(true);
    }

    pub fn resume(&self) {
        self.dispatcher.set_suppressed(false);
    }

    /// Point the dispatcher at an encoding session's channels
    pub fn attach_routes(&self, routes: FrameRoutes) {
        self.dispatcher.attach(routes);
    }
}

impl Drop for CaptureAdapter {
    fn drop(&mut self) {
        self.end();
    }
}

/// Register outputs on a freshly opened stream and start it
fn connect(
    stream: &mut dyn CaptureStream,
    sink: FrameSink,
    capture_audio: bool,
) -> Result<(), ProviderError> {
    stream.add_output(MediaKind::Video, sink.clone())?;
    if capture_audio {
        stream.add_output(MediaKind::Audio, sink)?;
    }
    stream.start()
}

/// Resolve a target against enumerated content into the filter to show and
/// the stream configuration to use with it
pub fn resolve_target(
    content: &CapturableContent,
    target: &CaptureTarget,
    base: &CaptureConfig,
) -> RecorderResult<(ContentFilter, CaptureConfig)> {
    if content.displays.is_empty() {
        return Err(RecorderError::TargetUnavailable(
            "no capturable displays".to_string(),
        ));
    }

    let mut config = base.clone();
    let filter = match target {
        CaptureTarget::FullScreen { display_id } => {
            let display = match display_id {
                Some(id) => content.display(*id),
                None => content.primary_display(),
            }
            .ok_or_else(|| RecorderError::TargetUnavailable(target.to_string()))?;
            config.source_rect = None;
            ContentFilter {
                display_id: display.id,
                window_id: None,
            }
        }
        CaptureTarget::Window { id } => {
            let window = content
                .window(*id)
                .filter(|w| w.is_on_screen)
                .ok_or_else(|| RecorderError::TargetUnavailable(target.to_string()))?;
            config.source_rect = None;
            ContentFilter {
                display_id: window.display_id,
                window_id: Some(window.id),
            }
        }
        CaptureTarget::Region { rect } => {
            if rect.is_empty() {
                return Err(RecorderError::ConfigurationRejected(format!(
                    "empty capture region: {}",
                    target
                )));
            }
            let display = content
                .displays
                .iter()
                .find(|d| d.bounds().contains(rect))
                .ok_or_else(|| RecorderError::TargetUnavailable(target.to_string()))?;
            config.source_rect = Some(rect.relative_to(&display.bounds()));
            ContentFilter {
                display_id: display.id,
                window_id: None,
            }
        }
    };

    Ok((filter, config))
}
