//! Encoding types and configuration
//!
//! Container formats, quality levels, track codec settings and the
//! bookkeeping types an encoding session reports.

use crate::capture::traits::{CaptureConfig, MediaKind, PixelFormat};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Output container formats
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContainerFormat {
    Mp4,
    Mov,
}

impl Default for ContainerFormat {
    fn default() -> Self {
        Self::Mp4
    }
}

impl ContainerFormat {
    /// Get the file extension for this format
    pub fn extension(&self) -> &'static str {
        match self {
            ContainerFormat::Mp4 => "mp4",
            ContainerFormat::Mov => "mov",
        }
    }

    /// Get the FFmpeg muxer name for this format
    pub fn ffmpeg_format(&self) -> &'static str {
        match self {
            ContainerFormat::Mp4 => "mp4",
            ContainerFormat::Mov => "mov",
        }
    }
}

/// Encode quality levels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EncodeQuality {
    Low,
    Medium,
    High,
    Lossless,
}

impl Default for EncodeQuality {
    fn default() -> Self {
        Self::High
    }
}

impl EncodeQuality {
    /// Get the CRF value for H.264 encoding
    /// Lower values = higher quality, larger files
    pub fn crf(&self) -> u8 {
        match self {
            EncodeQuality::Low => 28,
            EncodeQuality::Medium => 23,
            EncodeQuality::High => 18,
            // CRF 0 has compatibility issues with yuv420p
            EncodeQuality::Lossless => 1,
        }
    }

    /// Get the FFmpeg preset for H.264 encoding. Live capture favours
    /// speed over compression.
    pub fn h264_preset(&self) -> &'static str {
        match self {
            EncodeQuality::Low => "ultrafast",
            EncodeQuality::Medium => "superfast",
            EncodeQuality::High => "veryfast",
            EncodeQuality::Lossless => "faster",
        }
    }

    /// AAC bitrate in kbit/s
    pub fn audio_bitrate_kbps(&self) -> u32 {
        match self {
            EncodeQuality::Low => 96,
            EncodeQuality::Medium => 128,
            EncodeQuality::High => 192,
            EncodeQuality::Lossless => 256,
        }
    }
}

/// Where a recording is written
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutputTarget {
    pub path: PathBuf,
    pub format: ContainerFormat,
}

impl OutputTarget {
    pub fn new(path: impl Into<PathBuf>, format: ContainerFormat) -> Self {
        Self {
            path: path.into(),
            format,
        }
    }
}

/// Video track codec settings (H.264)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VideoSettings {
    pub width: u32,
    pub height: u32,
    pub frame_rate: u32,
    pub pixel_format: PixelFormat,
    pub quality: EncodeQuality,
}

/// Audio track codec settings (AAC)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AudioSettings {
    pub sample_rate: u32,
    pub channels: u16,
    pub bitrate_kbps: u32,
}

/// Settings for one track input
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", tag = "kind")]
pub enum TrackSettings {
    Video(VideoSettings),
    Audio(AudioSettings),
}

impl TrackSettings {
    pub fn kind(&self) -> MediaKind {
        match self {
            TrackSettings::Video(_) => MediaKind::Video,
            TrackSettings::Audio(_) => MediaKind::Audio,
        }
    }

    pub fn video_for(config: &CaptureConfig, quality: EncodeQuality) -> Self {
        TrackSettings::Video(VideoSettings {
            width: config.resolution.width,
            height: config.resolution.height,
            frame_rate: config.frame_rate,
            pixel_format: config.pixel_format,
            quality,
        })
    }

    pub fn audio_for(config: &CaptureConfig, quality: EncodeQuality) -> Self {
        TrackSettings::Audio(AudioSettings {
            sample_rate: config.sample_rate,
            channels: config.channels,
            bitrate_kbps: quality.audio_bitrate_kbps(),
        })
    }
}

/// Why the encoding session dropped a frame
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum DropReason {
    /// Track input was not ready for more data
    NotReady,
    /// Track input already marked finished
    TrackFinished,
    /// No track of this kind in the session
    NoTrack,
    /// Timestamp precedes the session baseline
    BeforeBaseline,
    /// Track input refused the sample
    Rejected,
}

/// Result of offering a frame to the encoding session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppendOutcome {
    Appended,
    Dropped(DropReason),
}

impl AppendOutcome {
    pub fn is_appended(&self) -> bool {
        matches!(self, AppendOutcome::Appended)
    }
}

/// Per-track counters
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackStats {
    pub appended: u64,
    pub not_ready: u64,
    pub after_finish: u64,
    pub before_baseline: u64,
    pub rejected: u64,
}

impl TrackStats {
    pub fn dropped(&self) -> u64 {
        self.not_ready + self.after_finish + self.before_baseline + self.rejected
    }
}

/// Snapshot of an encoding session
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EncodingStats {
    /// Baseline timestamp in milliseconds on the capture clock
    pub baseline_ms: Option<f64>,
    pub video: TrackStats,
    pub audio: Option<TrackStats>,
    /// Frames of a kind the session has no track for
    pub untracked: u64,
}

impl EncodingStats {
    pub fn baseline(&self) -> Option<Duration> {
        self.baseline_ms.map(|ms| Duration::from_secs_f64(ms / 1000.0))
    }
}
