//! Synthetic capture source
//!
//! A test-pattern provider that behaves like a platform capture stream:
//! frames are produced on a dedicated thread at the configured frame rate,
//! audio is a sine tone delivered in blocks, and filter updates take effect
//! on the next frame.

use super::dispatcher::FrameSink;
use super::provider::{CaptureProvider, CaptureStream, ProviderError};
use super::traits::{
    AudioBuffer, CapturableContent, CaptureConfig, ContentFilter, DisplayInfo, Frame, MediaKind,
    Rect, VideoBuffer, WindowInfo,
};
use parking_lot::RwLock;
use std::f32::consts::TAU;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

const TONE_HZ: f32 = 440.0;

/// Provider producing a moving gradient and a sine tone
pub struct SyntheticCaptureProvider {
    content: CapturableContent,
}

impl SyntheticCaptureProvider {
    pub fn new(content: CapturableContent) -> Self {
        Self { content }
    }
}

impl Default for SyntheticCaptureProvider {
    fn default() -> Self {
        Self::new(CapturableContent {
            displays: vec![DisplayInfo {
                id: 1,
                name: "Synthetic Display".to_string(),
                x: 0,
                y: 0,
                width: 1920,
                height: 1080,
                scale_factor: 1.0,
                is_primary: true,
                refresh_rate: Some(60),
            }],
            windows: vec![
                WindowInfo {
                    id: 100,
                    title: "Terminal".to_string(),
                    app_name: "synthetic-term".to_string(),
                    display_id: 1,
                    bounds: Rect::new(80, 60, 960, 600),
                    is_on_screen: true,
                },
                WindowInfo {
                    id: 101,
                    title: "Editor".to_string(),
                    app_name: "synthetic-edit".to_string(),
                    display_id: 1,
                    bounds: Rect::new(700, 300, 1100, 700),
                    is_on_screen: true,
                },
            ],
        })
    }
}

impl CaptureProvider for SyntheticCaptureProvider {
    fn name(&self) -> &str {
        "synthetic"
    }

    fn enumerate_content(&self) -> Result<CapturableContent, ProviderError> {
        Ok(self.content.clone())
    }

    fn open_stream(
        &self,
        filter: &ContentFilter,
        config: &CaptureConfig,
    ) -> Result<Box<dyn CaptureStream>, ProviderError> {
        config.validate().map_err(ProviderError::Rejected)?;
        Ok(Box::new(SyntheticStream {
            settings: Arc::new(RwLock::new((filter.clone(), config.clone()))),
            sink: None,
            kinds: Vec::new(),
            running: Arc::new(AtomicBool::new(false)),
            handle: None,
        }))
    }
}

struct SyntheticStream {
    settings: Arc<RwLock<(ContentFilter, CaptureConfig)>>,
    sink: Option<FrameSink>,
    kinds: Vec<MediaKind>,
    running: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl CaptureStream for SyntheticStream {
    fn add_output(&mut self, kind: MediaKind, sink: FrameSink) -> Result<(), ProviderError> {
        if !self.kinds.contains(&kind) {
            self.kinds.push(kind);
        }
        self.sink = Some(sink);
        Ok(())
    }

    fn update(&mut self, filter: &ContentFilter, config: &CaptureConfig) -> Result<(), ProviderError> {
        config.validate().map_err(ProviderError::Rejected)?;
        // both halves land under one write lock
        *self.settings.write() = (filter.clone(), config.clone());
        Ok(())
    }

    fn start(&mut self) -> Result<(), ProviderError> {
        if self.running.load(Ordering::SeqCst) {
            return Ok(());
        }
        let sink = self
            .sink
            .clone()
            .ok_or_else(|| ProviderError::Rejected("no output registered".to_string()))?;

        self.running.store(true, Ordering::SeqCst);
        let running = self.running.clone();
        let settings = self.settings.clone();
        let with_audio = self.kinds.contains(&MediaKind::Audio);

        let handle = std::thread::Builder::new()
            .name("synthetic-capture".to_string())
            .spawn(move || generate(sink, settings, running, with_audio))
            .map_err(|e| ProviderError::Platform(format!("failed to spawn capture thread: {}", e)))?;
        self.handle = Some(handle);
        Ok(())
    }

    fn stop(&mut self) -> Result<(), ProviderError> {
        self.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.handle.take() {
            handle
                .join()
                .map_err(|_| ProviderError::Platform("capture thread panicked".to_string()))?;
        }
        Ok(())
    }
}

impl Drop for SyntheticStream {
    fn drop(&mut self) {
        let _ = self.stop();
    }
}

fn generate(
    sink: FrameSink,
    settings: Arc<RwLock<(ContentFilter, CaptureConfig)>>,
    running: Arc<AtomicBool>,
    with_audio: bool,
) {
    let start = Instant::now();
    let mut frame_index = 0u64;
    let mut audio_position = 0u64;

    while running.load(Ordering::SeqCst) {
        let tick = Instant::now();
        let (filter, config) = settings.read().clone();
        let pts = start.elapsed();

        sink.deliver(Frame::video(pts, pattern(&filter, &config, frame_index)));

        if with_audio && config.capture_audio {
            // audio clock follows elapsed time so blocks stay contiguous
            let due = (pts.as_secs_f64() * config.sample_rate as f64) as u64;
            if frame_index == 0 {
                // first block starts with the first video frame
                audio_position = due;
            }
            if due > audio_position {
                let block = tone(audio_position, due - audio_position, &config);
                let audio_pts = Duration::from_secs_f64(audio_position as f64 / config.sample_rate as f64);
                sink.deliver(Frame::audio(audio_pts, block));
                audio_position = due;
            }
        }

        frame_index += 1;
        if frame_index % 300 == 0 {
            tracing::debug!("Synthetic capture produced {} frames", frame_index);
        }

        let interval = config.frame_interval();
        let elapsed = tick.elapsed();
        if elapsed < interval {
            std::thread::sleep(interval - elapsed);
        }
    }
}

fn pattern(filter: &ContentFilter, config: &CaptureConfig, frame_index: u64) -> VideoBuffer {
    let width = config.resolution.width;
    let height = config.resolution.height;
    let bpp = config.pixel_format.bytes_per_pixel();
    let shift = (frame_index % 256) as u32;
    let tint = filter.window_id.map(|id| (id.wrapping_mul(37) % 256) as u8).unwrap_or(0);
    let offset = config.source_rect.map(|r| (r.x.max(0) as u32, r.y.max(0) as u32)).unwrap_or((0, 0));

    let mut data = vec![0u8; (width * height * bpp) as usize];
    for (y, row) in data.chunks_mut((width * bpp) as usize).enumerate() {
        let gy = (y as u32 + offset.1) % 256;
        for (x, px) in row.chunks_mut(bpp as usize).enumerate() {
            let gx = (x as u32 + offset.0 + shift) % 256;
            px[0] = gx as u8;
            px[1] = gy as u8;
            px[2] = tint;
            px[3] = 255;
        }
    }

    VideoBuffer {
        data,
        width,
        height,
        bytes_per_row: width * bpp,
        format: config.pixel_format,
    }
}

fn tone(start: u64, frames: u64, config: &CaptureConfig) -> AudioBuffer {
    let channels = config.channels.max(1) as usize;
    let rate = config.sample_rate as f32;
    let mut samples = Vec::with_capacity(frames as usize * channels);
    for i in 0..frames {
        let t = (start + i) as f32 / rate;
        let value = (t * TONE_HZ * TAU).sin() * 0.2;
        samples.extend(std::iter::repeat(value).take(channels));
    }
    AudioBuffer {
        samples,
        sample_rate: config.sample_rate,
        channels: config.channels,
    }
}
