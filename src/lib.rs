//! capture-pipeline - real-time screen and audio capture into a container.
//!
//! A capture adapter owns the platform stream, a frame dispatcher routes
//! its frames into per-track channels, an encoding session writes them to
//! a muxer, and the session controller drives the whole lifecycle.

pub mod capture;
pub mod encoding;
pub mod recorder;
pub mod utils;

#[cfg(test)]
pub(crate) mod testing;

pub use capture::{CaptureAdapter, CaptureConfig, CaptureTarget, SyntheticCaptureProvider};
pub use encoding::{ContainerFormat, EncodeQuality, FfmpegMuxer, OutputTarget};
pub use recorder::{RecorderSettings, RecordingConfig, RecordingEvent, RecordingState, SessionController};
pub use utils::{ErrorResponse, RecorderError, RecorderResult};

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Install the global tracing subscriber
pub fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "capture_pipeline=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}
