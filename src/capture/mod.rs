//! Capture side of the pipeline
//!
//! The platform provider interface, the adapter that owns a capture stream,
//! the dispatcher that routes its frames, and a synthetic source.

pub mod adapter;
pub mod dispatcher;
pub mod provider;
pub mod synthetic;
pub mod traits;

pub use adapter::CaptureAdapter;
pub use dispatcher::{DispatchStats, FrameDispatcher, FrameRoutes, FrameSink, StreamFailure, TrackRoute};
pub use provider::{CaptureProvider, CaptureStream, ProviderError};
pub use synthetic::SyntheticCaptureProvider;
pub use traits::{
    AudioBuffer, CapturableContent, CaptureConfig, CaptureTarget, ContentFilter, DisplayInfo, Frame,
    FramePayload, MediaKind, PixelFormat, Rect, Resolution, VideoBuffer, WindowInfo,
};
