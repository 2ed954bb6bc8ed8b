//! Capture data model
//!
//! Platform-agnostic descriptions of what can be captured, what is being
//! captured, and the frames a capture stream produces.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// A rectangle in global screen coordinates
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rect {
    pub x: i32,
    pub y: i32,
    pub width: u32,
    pub height: u32,
}

impl Rect {
    pub fn new(x: i32, y: i32, width: u32, height: u32) -> Self {
        Self { x, y, width, height }
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    fn right(&self) -> i64 {
        self.x as i64 + self.width as i64
    }

    fn bottom(&self) -> i64 {
        self.y as i64 + self.height as i64
    }

    /// Whether `other` lies entirely inside this rectangle
    pub fn contains(&self, other: &Rect) -> bool {
        other.x >= self.x
            && other.y >= self.y
            && other.right() <= self.right()
            && other.bottom() <= self.bottom()
    }

    /// Express this rectangle relative to the origin of `outer`
    pub fn relative_to(&self, outer: &Rect) -> Rect {
        Rect {
            x: self.x - outer.x,
            y: self.y - outer.y,
            width: self.width,
            height: self.height,
        }
    }
}

/// Information about a display/screen
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DisplayInfo {
    /// Unique display ID
    pub id: u32,

    /// Display name
    pub name: String,

    /// Origin in global coordinates
    pub x: i32,
    pub y: i32,

    /// Width in pixels
    pub width: u32,

    /// Height in pixels
    pub height: u32,

    /// Scale factor (e.g., 2.0 for Retina)
    pub scale_factor: f64,

    /// Whether this is the primary display
    pub is_primary: bool,

    /// Refresh rate in Hz (if available)
    pub refresh_rate: Option<u32>,
}

impl DisplayInfo {
    pub fn bounds(&self) -> Rect {
        Rect::new(self.x, self.y, self.width, self.height)
    }
}

/// Information about a capturable window
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WindowInfo {
    /// Unique window ID
    pub id: u32,

    /// Window title
    pub title: String,

    /// Application name
    pub app_name: String,

    /// Display the window currently sits on
    pub display_id: u32,

    /// Window bounds in global coordinates
    pub bounds: Rect,

    /// Whether the window is on screen
    pub is_on_screen: bool,
}

/// Everything the platform currently allows us to capture
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CapturableContent {
    pub displays: Vec<DisplayInfo>,
    pub windows: Vec<WindowInfo>,
}

impl CapturableContent {
    pub fn is_empty(&self) -> bool {
        self.displays.is_empty() && self.windows.is_empty()
    }

    /// The primary display, falling back to the first one enumerated
    pub fn primary_display(&self) -> Option<&DisplayInfo> {
        self.displays
            .iter()
            .find(|d| d.is_primary)
            .or_else(|| self.displays.first())
    }

    pub fn display(&self, id: u32) -> Option<&DisplayInfo> {
        self.displays.iter().find(|d| d.id == id)
    }

    pub fn window(&self, id: u32) -> Option<&WindowInfo> {
        self.windows.iter().find(|w| w.id == id)
    }
}

/// What is being captured
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", tag = "type")]
pub enum CaptureTarget {
    /// A whole display (the primary one when no ID is given)
    FullScreen {
        #[serde(default, rename = "displayId")]
        display_id: Option<u32>,
    },
    /// A single window
    Window { id: u32 },
    /// A rectangular region in global coordinates
    Region { rect: Rect },
}

impl Default for CaptureTarget {
    fn default() -> Self {
        CaptureTarget::FullScreen { display_id: None }
    }
}

impl fmt::Display for CaptureTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CaptureTarget::FullScreen { display_id: Some(id) } => write!(f, "display {}", id),
            CaptureTarget::FullScreen { display_id: None } => write!(f, "primary display"),
            CaptureTarget::Window { id } => write!(f, "window {}", id),
            CaptureTarget::Region { rect } => write!(
                f,
                "region {}x{}+{}+{}",
                rect.width, rect.height, rect.x, rect.y
            ),
        }
    }
}

/// A target resolved against enumerated content: which display and,
/// optionally, which single window the stream should show
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContentFilter {
    pub display_id: u32,
    pub window_id: Option<u32>,
}

/// Pixel layout of captured video frames
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PixelFormat {
    Bgra,
    Rgba,
}

impl PixelFormat {
    pub fn bytes_per_pixel(&self) -> u32 {
        4
    }

    /// Name understood by FFmpeg's rawvideo demuxer
    pub fn ffmpeg_name(&self) -> &'static str {
        match self {
            PixelFormat::Bgra => "bgra",
            PixelFormat::Rgba => "rgba",
        }
    }
}

/// Video resolution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resolution {
    pub width: u32,
    pub height: u32,
}

/// Stream configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CaptureConfig {
    /// Output frame size; captured content is scaled to fit
    pub resolution: Resolution,

    /// Upper bound on delivered video frames per second
    pub frame_rate: u32,

    /// Depth of each per-kind delivery queue
    pub queue_depth: usize,

    pub show_cursor: bool,

    pub capture_audio: bool,

    pub pixel_format: PixelFormat,

    pub sample_rate: u32,

    pub channels: u16,

    /// Sub-rectangle of the display to capture, relative to the display
    /// origin. Updated by retargeting.
    pub source_rect: Option<Rect>,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            resolution: Resolution {
                width: 1920,
                height: 1080,
            },
            frame_rate: 30,
            queue_depth: 8,
            show_cursor: true,
            capture_audio: true,
            pixel_format: PixelFormat::Bgra,
            sample_rate: 48_000,
            channels: 2,
            source_rect: None,
        }
    }
}

impl CaptureConfig {
    /// Reject configurations no stream could be built from
    pub fn validate(&self) -> Result<(), String> {
        if self.resolution.width == 0 || self.resolution.height == 0 {
            return Err(format!(
                "invalid resolution {}x{}",
                self.resolution.width, self.resolution.height
            ));
        }
        // yuv420p needs even dimensions
        if self.resolution.width % 2 != 0 || self.resolution.height % 2 != 0 {
            return Err(format!(
                "resolution {}x{} must have even dimensions",
                self.resolution.width, self.resolution.height
            ));
        }
        if self.frame_rate == 0 {
            return Err("frame rate must be greater than zero".to_string());
        }
        if self.queue_depth == 0 {
            return Err("queue depth must be greater than zero".to_string());
        }
        if self.capture_audio && (self.sample_rate == 0 || self.channels == 0) {
            return Err("audio capture needs a sample rate and channel count".to_string());
        }
        Ok(())
    }

    /// Interval between two video frames at the configured rate
    pub fn frame_interval(&self) -> Duration {
        Duration::from_secs_f64(1.0 / self.frame_rate.max(1) as f64)
    }
}

/// Kind of media carried by a frame
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Video,
    Audio,
}

impl fmt::Display for MediaKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MediaKind::Video => write!(f, "video"),
            MediaKind::Audio => write!(f, "audio"),
        }
    }
}

/// Raw pixel buffer
#[derive(Debug, Clone)]
pub struct VideoBuffer {
    pub data: Vec<u8>,
    pub width: u32,
    pub height: u32,
    /// Bytes per row (may include padding)
    pub bytes_per_row: u32,
    pub format: PixelFormat,
}

impl VideoBuffer {
    /// Bytes in one row of pixels, without padding
    pub fn row_bytes(&self) -> usize {
        self.width as usize * self.format.bytes_per_pixel() as usize
    }

    /// Check that the stride covers a row and the data covers every row
    pub fn check_layout(&self) -> Result<(), String> {
        let row = self.row_bytes();
        let stride = self.bytes_per_row as usize;
        if stride < row {
            return Err(format!(
                "row stride {} is shorter than a {}px row ({} bytes)",
                stride, self.width, row
            ));
        }
        let needed = match self.height as usize {
            0 => 0,
            rows => stride * (rows - 1) + row,
        };
        if self.data.len() < needed {
            return Err(format!(
                "buffer holds {} bytes, {}x{} with stride {} needs {}",
                self.data.len(),
                self.width,
                self.height,
                stride,
                needed
            ));
        }
        Ok(())
    }

    /// Pixel data with any row padding removed. Expects a layout that
    /// passes [`VideoBuffer::check_layout`].
    pub fn packed(&self) -> std::borrow::Cow<'_, [u8]> {
        let row = self.row_bytes();
        let stride = self.bytes_per_row as usize;
        let size = row * self.height as usize;
        if stride == row {
            return std::borrow::Cow::Borrowed(self.data.get(..size).unwrap_or(&self.data));
        }
        let mut packed = Vec::with_capacity(size);
        for chunk in self.data.chunks(stride.max(1)).take(self.height as usize) {
            packed.extend_from_slice(&chunk[..row.min(chunk.len())]);
        }
        std::borrow::Cow::Owned(packed)
    }
}

/// Block of interleaved f32 audio samples
#[derive(Debug, Clone)]
pub struct AudioBuffer {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
    pub channels: u16,
}

impl AudioBuffer {
    /// Number of sample frames (one sample per channel)
    pub fn frame_count(&self) -> usize {
        self.samples.len() / self.channels.max(1) as usize
    }
}

/// Payload of a captured frame
#[derive(Debug, Clone)]
pub enum FramePayload {
    Video(VideoBuffer),
    Audio(AudioBuffer),
}

/// One unit of captured media
#[derive(Debug, Clone)]
pub struct Frame {
    pub payload: FramePayload,

    /// Presentation timestamp on the capture clock
    pub pts: Duration,
}

impl Frame {
    pub fn video(pts: Duration, buffer: VideoBuffer) -> Self {
        Self {
            payload: FramePayload::Video(buffer),
            pts,
        }
    }

    pub fn audio(pts: Duration, buffer: AudioBuffer) -> Self {
        Self {
            payload: FramePayload::Audio(buffer),
            pts,
        }
    }

    pub fn kind(&self) -> MediaKind {
        match self.payload {
            FramePayload::Video(_) => MediaKind::Video,
            FramePayload::Audio(_) => MediaKind::Audio,
        }
    }
}
