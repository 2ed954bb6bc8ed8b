//! Recorder settings
//!
//! JSON settings file for front ends. Every field has a default, so a file
//! only needs to name what it changes.

use super::state::RecordingConfig;
use crate::capture::traits::{CaptureConfig, CaptureTarget, PixelFormat, Resolution};
use crate::encoding::types::{ContainerFormat, EncodeQuality, OutputTarget};
use crate::utils::error::{RecorderError, RecorderResult};
use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RecorderSettings {
    /// Directory recordings are written to
    pub output_dir: PathBuf,

    /// File name prefix; a timestamp and extension are appended
    pub file_stem: String,

    pub format: ContainerFormat,
    pub quality: EncodeQuality,
    pub target: CaptureTarget,
    pub width: u32,
    pub height: u32,
    pub frame_rate: u32,
    pub queue_depth: usize,
    pub show_cursor: bool,
    pub capture_audio: bool,
    pub pixel_format: PixelFormat,
    pub sample_rate: u32,
    pub channels: u16,
}

impl Default for RecorderSettings {
    fn default() -> Self {
        let capture = CaptureConfig::default();
        Self {
            output_dir: PathBuf::from("recordings"),
            file_stem: "recording".to_string(),
            format: ContainerFormat::default(),
            quality: EncodeQuality::default(),
            target: CaptureTarget::default(),
            width: capture.resolution.width,
            height: capture.resolution.height,
            frame_rate: capture.frame_rate,
            queue_depth: capture.queue_depth,
            show_cursor: capture.show_cursor,
            capture_audio: capture.capture_audio,
            pixel_format: capture.pixel_format,
            sample_rate: capture.sample_rate,
            channels: capture.channels,
        }
    }
}

impl RecorderSettings {
    /// Read settings from a JSON file
    pub fn load(path: impl AsRef<Path>) -> RecorderResult<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)?;
        let settings: Self = serde_json::from_str(&content)?;
        tracing::debug!("Loaded settings from {:?}", path);
        Ok(settings)
    }

    pub fn save(&self, path: impl AsRef<Path>) -> RecorderResult<()> {
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    pub fn validate(&self) -> RecorderResult<()> {
        if self.file_stem.trim().is_empty() {
            return Err(RecorderError::ConfigurationRejected(
                "file stem must not be empty".to_string(),
            ));
        }
        self.capture_config()
            .validate()
            .map_err(RecorderError::ConfigurationRejected)
    }

    pub fn capture_config(&self) -> CaptureConfig {
        CaptureConfig {
            resolution: Resolution {
                width: self.width,
                height: self.height,
            },
            frame_rate: self.frame_rate,
            queue_depth: self.queue_depth,
            show_cursor: self.show_cursor,
            capture_audio: self.capture_audio,
            pixel_format: self.pixel_format,
            sample_rate: self.sample_rate,
            channels: self.channels,
            source_rect: None,
        }
    }

    /// Output path for a recording started at `at`
    pub fn output_target_at(&self, at: DateTime<Local>) -> OutputTarget {
        let name = format!(
            "{}-{}.{}",
            self.file_stem,
            at.format("%Y%m%d-%H%M%S"),
            self.format.extension()
        );
        OutputTarget::new(self.output_dir.join(name), self.format)
    }

    pub fn output_target(&self) -> OutputTarget {
        self.output_target_at(Local::now())
    }

    /// Validated configuration for a recording starting now
    pub fn recording_config(&self) -> RecorderResult<RecordingConfig> {
        self.validate()?;
        Ok(RecordingConfig {
            target: self.target.clone(),
            capture: self.capture_config(),
            output: self.output_target(),
            quality: self.quality,
        })
    }
}
