//! Recording lifecycle
//!
//! The session controller state machine, its states and results, and the
//! settings file front ends build recordings from.

pub mod controller;
pub mod settings;
pub mod state;

pub use controller::{RecordingEvent, SessionController};
pub use settings::RecorderSettings;
pub use state::{
    PipelineStats, RecordingConfig, RecordingOutput, RecordingSegment, RecordingState, RecordingTimeline,
};
