//! Encoding side of the pipeline

pub mod ffmpeg;
pub mod muxer;
pub mod session;
pub mod types;

pub use ffmpeg::FfmpegMuxer;
pub use muxer::{ContainerWriter, Muxer, MuxerError, TrackInput};
pub use session::EncodingSession;
pub use types::{
    AppendOutcome, AudioSettings, ContainerFormat, DropReason, EncodeQuality, EncodingStats, OutputTarget,
    TrackSettings, TrackStats, VideoSettings,
};
