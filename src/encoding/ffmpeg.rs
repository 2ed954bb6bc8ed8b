//! FFmpeg-backed muxer
//!
//! Video frames are piped as rawvideo into an FFmpeg process that encodes
//! H.264 into an intermediate Matroska file. Audio is spooled as
//! interleaved f32 PCM into a temporary file. Both tracks are laid out on
//! the session timeline: gaps in video repeat the previous frame, gaps in
//! audio are filled with silence. `finalize` muxes the intermediates into
//! the requested container with AAC audio.

use super::muxer::{ContainerWriter, Muxer, MuxerError, TrackInput};
use super::types::{AudioSettings, ContainerFormat, OutputTarget, TrackSettings, VideoSettings};
use crate::capture::traits::{FramePayload, MediaKind};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStdin, Command, Stdio};
use std::sync::{Arc, OnceLock};
use std::time::Duration;

/// What a finished track left on disk
#[derive(Debug, Clone)]
struct TrackOutput {
    path: PathBuf,
    samples_written: u64,
}

type Completion = Arc<Mutex<Option<Result<TrackOutput, MuxerError>>>>;

/// Largest run of silence written in one call when padding an audio gap
const SILENCE_BLOCK_FRAMES: u64 = 4096;

/// Muxer that drives the `ffmpeg` binary
pub struct FfmpegMuxer {
    binary: PathBuf,
}

impl FfmpegMuxer {
    pub fn new(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
        }
    }

    /// Check that the FFmpeg binary can be run
    pub fn is_available(&self) -> bool {
        Command::new(&self.binary)
            .arg("-version")
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .map(|s| s.success())
            .unwrap_or(false)
    }
}

impl Default for FfmpegMuxer {
    fn default() -> Self {
        Self::new("ffmpeg")
    }
}

impl Muxer for FfmpegMuxer {
    fn create_writer(&self, target: &OutputTarget) -> Result<Arc<dyn ContainerWriter>, MuxerError> {
        if let Some(parent) = target.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| MuxerError::Create(format!("{:?}: {}", parent, e)))?;
            }
        }
        let work_dir = tempfile::Builder::new()
            .prefix("capture-pipeline-")
            .tempdir()
            .map_err(|e| MuxerError::Create(format!("failed to create work dir: {}", e)))?;

        Ok(Arc::new(FfmpegWriter {
            binary: self.binary.clone(),
            target: target.clone(),
            work_dir,
            baseline: Arc::new(OnceLock::new()),
            state: Mutex::new(WriterState::default()),
        }))
    }
}

#[derive(Default)]
struct WriterState {
    video: Option<Completion>,
    audio: Option<(AudioSettings, Completion)>,
    writing: bool,
}

struct FfmpegWriter {
    binary: PathBuf,
    target: OutputTarget,
    work_dir: tempfile::TempDir,
    baseline: Arc<OnceLock<Duration>>,
    state: Mutex<WriterState>,
}

#[async_trait]
impl ContainerWriter for FfmpegWriter {
    fn add_track_input(&self, settings: TrackSettings) -> Result<Box<dyn TrackInput>, MuxerError> {
        let mut state = self.state.lock();
        if state.writing {
            return Err(MuxerError::Track("writer already started".to_string()));
        }
        let completion: Completion = Arc::new(Mutex::new(None));

        match settings {
            TrackSettings::Video(settings) => {
                if state.video.is_some() {
                    return Err(MuxerError::Track("video track already added".to_string()));
                }
                let output = self.work_dir.path().join("video.mkv");
                let input = FfmpegVideoInput::spawn(
                    &self.binary,
                    settings,
                    output,
                    self.baseline.clone(),
                    completion.clone(),
                )?;
                state.video = Some(completion);
                Ok(Box::new(input))
            }
            TrackSettings::Audio(settings) => {
                if state.audio.is_some() {
                    return Err(MuxerError::Track("audio track already added".to_string()));
                }
                let output = self.work_dir.path().join("audio.f32le");
                let input = FfmpegAudioInput::create(
                    settings.clone(),
                    output,
                    self.baseline.clone(),
                    completion.clone(),
                )?;
                state.audio = Some((settings, completion));
                Ok(Box::new(input))
            }
        }
    }

    fn start_writing(&self) -> Result<(), MuxerError> {
        let mut state = self.state.lock();
        if state.video.is_none() {
            return Err(MuxerError::Open("no video track registered".to_string()));
        }
        state.writing = true;
        Ok(())
    }

    fn start_session(&self, at: Duration) {
        if self.baseline.set(at).is_err() {
            tracing::warn!("Session already started; ignoring start at {:?}", at);
        }
    }

    async fn finalize(&self) -> Result<(), MuxerError> {
        let (video, audio) = {
            let state = self.state.lock();
            let video = state
                .video
                .as_ref()
                .and_then(|c| c.lock().take())
                .ok_or_else(|| MuxerError::Finalize("video track was not finished".to_string()))??;
            let audio = match &state.audio {
                Some((settings, completion)) => {
                    let output = completion.lock().take().ok_or_else(|| {
                        MuxerError::Finalize("audio track was not finished".to_string())
                    })??;
                    Some((settings.clone(), output))
                }
                None => None,
            };
            (video, audio)
        };

        if video.samples_written == 0 {
            return Err(MuxerError::Finalize("no video frames were written".to_string()));
        }
        let audio = audio.filter(|(_, out)| out.samples_written > 0);

        let args = mux_args(
            &video.path,
            audio.as_ref().map(|(settings, out)| (out.path.as_path(), settings)),
            &self.target,
        );
        tracing::info!("Muxing container: {:?}", args);

        let output = tokio::process::Command::new(&self.binary)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .output()
            .await
            .map_err(|e| MuxerError::Finalize(format!("failed to run FFmpeg: {}", e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(MuxerError::Finalize(format!(
                "FFmpeg exited with error: {}",
                stderr.trim()
            )));
        }

        tracing::info!(
            "FFmpeg mux finished: {} video frames, {} audio frames -> {:?}",
            video.samples_written,
            audio.as_ref().map(|(_, out)| out.samples_written).unwrap_or(0),
            self.target.path
        );
        Ok(())
    }
}

/// Video track input feeding an FFmpeg encoder over stdin
struct FfmpegVideoInput {
    settings: VideoSettings,
    process: Option<Child>,
    stdin: Option<ChildStdin>,
    output: PathBuf,
    baseline: Arc<OnceLock<Duration>>,
    next_slot: u64,
    last_frame: Option<Vec<u8>>,
    frames_written: u64,
    coalesced: u64,
    completion: Completion,
}

impl FfmpegVideoInput {
    fn spawn(
        binary: &Path,
        settings: VideoSettings,
        output: PathBuf,
        baseline: Arc<OnceLock<Duration>>,
        completion: Completion,
    ) -> Result<Self, MuxerError> {
        let args = encode_args(&settings, &output);
        let mut process = Command::new(binary)
            .args(&args)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| MuxerError::Track(format!("Failed to start FFmpeg encoder: {}", e)))?;

        let stdin = process
            .stdin
            .take()
            .ok_or_else(|| MuxerError::Track("Failed to capture FFmpeg stdin".to_string()))?;

        tracing::info!(
            "Started FFmpeg encoder: {}x{} @ {}fps, crf {}",
            settings.width,
            settings.height,
            settings.frame_rate,
            settings.quality.crf()
        );

        Ok(Self {
            settings,
            process: Some(process),
            stdin: Some(stdin),
            output,
            baseline,
            next_slot: 0,
            last_frame: None,
            frames_written: 0,
            coalesced: 0,
            completion,
        })
    }

    fn write_frame(&mut self, data: &[u8]) -> Result<(), MuxerError> {
        let stdin = self
            .stdin
            .as_mut()
            .ok_or_else(|| MuxerError::Append("encoder input closed".to_string()))?;
        stdin
            .write_all(data)
            .map_err(|e| MuxerError::Append(format!("Failed to write frame: {}", e)))?;
        self.frames_written += 1;
        Ok(())
    }
}

impl TrackInput for FfmpegVideoInput {
    fn kind(&self) -> MediaKind {
        MediaKind::Video
    }

    fn is_ready_for_more_data(&self) -> bool {
        self.stdin.is_some()
    }

    fn append(&mut self, payload: &FramePayload, pts: Duration) -> Result<(), MuxerError> {
        let FramePayload::Video(buffer) = payload else {
            return Err(MuxerError::Append("expected a video frame".to_string()));
        };
        if buffer.width != self.settings.width || buffer.height != self.settings.height {
            return Err(MuxerError::Append(format!(
                "frame is {}x{}, track expects {}x{}",
                buffer.width, buffer.height, self.settings.width, self.settings.height
            )));
        }
        buffer.check_layout().map_err(MuxerError::Append)?;
        let baseline = *self
            .baseline
            .get()
            .ok_or_else(|| MuxerError::Append("session not started".to_string()))?;

        let slot = frame_slot(pts.saturating_sub(baseline), self.settings.frame_rate);
        if slot < self.next_slot {
            // slot already filled by an earlier frame
            self.coalesced += 1;
            return Ok(());
        }

        let data = buffer.packed().into_owned();
        while self.next_slot < slot {
            let fill = self.last_frame.take().unwrap_or_else(|| data.clone());
            let result = self.write_frame(&fill);
            self.last_frame = Some(fill);
            result?;
            self.next_slot += 1;
        }
        self.write_frame(&data)?;
        self.next_slot = slot + 1;
        self.last_frame = Some(data);
        Ok(())
    }

    fn mark_finished(&mut self) {
        drop(self.stdin.take());
        self.last_frame = None;

        let Some(process) = self.process.take() else {
            return;
        };
        let result = match process.wait_with_output() {
            Ok(output) if output.status.success() => {
                tracing::info!(
                    "FFmpeg encoder finished: {} frames written, {} coalesced",
                    self.frames_written,
                    self.coalesced
                );
                Ok(TrackOutput {
                    path: self.output.clone(),
                    samples_written: self.frames_written,
                })
            }
            Ok(output) => {
                let stderr = String::from_utf8_lossy(&output.stderr);
                Err(MuxerError::Finalize(format!(
                    "FFmpeg encoder exited with {}: {}",
                    output.status,
                    stderr.trim()
                )))
            }
            Err(e) => Err(MuxerError::Finalize(format!("Failed to wait for FFmpeg: {}", e))),
        };
        *self.completion.lock() = Some(result);
    }
}

impl Drop for FfmpegVideoInput {
    fn drop(&mut self) {
        if let Some(mut process) = self.process.take() {
            drop(self.stdin.take());
            let _ = process.kill();
            let _ = process.wait();
        }
    }
}

/// Audio track input spooling PCM to a file
struct FfmpegAudioInput {
    settings: AudioSettings,
    file: Option<BufWriter<File>>,
    path: PathBuf,
    baseline: Arc<OnceLock<Duration>>,
    frames_written: u64,
    completion: Completion,
}

impl FfmpegAudioInput {
    fn create(
        settings: AudioSettings,
        path: PathBuf,
        baseline: Arc<OnceLock<Duration>>,
        completion: Completion,
    ) -> Result<Self, MuxerError> {
        let file = File::create(&path)
            .map_err(|e| MuxerError::Track(format!("failed to create audio spool: {}", e)))?;
        Ok(Self {
            settings,
            file: Some(BufWriter::new(file)),
            path,
            baseline,
            frames_written: 0,
            completion,
        })
    }

    fn write_samples(&mut self, samples: &[f32]) -> Result<(), MuxerError> {
        let file = self
            .file
            .as_mut()
            .ok_or_else(|| MuxerError::Append("audio spool closed".to_string()))?;
        for sample in samples {
            file.write_all(&sample.to_le_bytes())
                .map_err(|e| MuxerError::Append(format!("Failed to write audio: {}", e)))?;
        }
        Ok(())
    }
}

impl TrackInput for FfmpegAudioInput {
    fn kind(&self) -> MediaKind {
        MediaKind::Audio
    }

    fn is_ready_for_more_data(&self) -> bool {
        self.file.is_some()
    }

    fn append(&mut self, payload: &FramePayload, pts: Duration) -> Result<(), MuxerError> {
        let FramePayload::Audio(buffer) = payload else {
            return Err(MuxerError::Append("expected an audio block".to_string()));
        };
        if buffer.sample_rate != self.settings.sample_rate || buffer.channels != self.settings.channels {
            return Err(MuxerError::Append(format!(
                "audio is {}Hz/{}ch, track expects {}Hz/{}ch",
                buffer.sample_rate, buffer.channels, self.settings.sample_rate, self.settings.channels
            )));
        }
        let baseline = *self
            .baseline
            .get()
            .ok_or_else(|| MuxerError::Append("session not started".to_string()))?;

        let rate = self.settings.sample_rate as u64;
        let channels = self.settings.channels as usize;
        let start = (pts.saturating_sub(baseline).as_secs_f64() * rate as f64).round() as u64;
        let frames = buffer.frame_count() as u64;
        // up to 1ms of clock jitter counts as contiguous
        let tolerance = rate / 1000;

        let mut skip = 0u64;
        if start > self.frames_written + tolerance {
            let gap = start - self.frames_written;
            let silence = vec![0.0f32; gap.min(SILENCE_BLOCK_FRAMES) as usize * channels];
            let mut remaining = gap;
            while remaining > 0 {
                let n = remaining.min(SILENCE_BLOCK_FRAMES) as usize;
                self.write_samples(&silence[..n * channels])?;
                remaining -= n as u64;
            }
            self.frames_written = start;
        } else if start + tolerance < self.frames_written {
            skip = (self.frames_written - start).min(frames);
        }

        let samples = &buffer.samples[skip as usize * channels..frames as usize * channels];
        self.write_samples(samples)?;
        self.frames_written += frames - skip;
        Ok(())
    }

    fn mark_finished(&mut self) {
        let Some(mut file) = self.file.take() else {
            return;
        };
        let result = match file.flush() {
            Ok(()) => Ok(TrackOutput {
                path: self.path.clone(),
                samples_written: self.frames_written,
            }),
            Err(e) => Err(MuxerError::Finalize(format!("failed to flush audio spool: {}", e))),
        };
        *self.completion.lock() = Some(result);
    }
}

/// Timeline slot of a frame `offset` after the baseline
fn frame_slot(offset: Duration, frame_rate: u32) -> u64 {
    (offset.as_secs_f64() * frame_rate as f64).round() as u64
}

/// Arguments for the per-recording video encoder process
fn encode_args(settings: &VideoSettings, output: &Path) -> Vec<String> {
    let fps = settings.frame_rate;
    vec![
        "-y".to_string(),
        "-loglevel".to_string(),
        "error".to_string(),
        "-nostats".to_string(),
        "-f".to_string(),
        "rawvideo".to_string(),
        "-pixel_format".to_string(),
        settings.pixel_format.ffmpeg_name().to_string(),
        "-video_size".to_string(),
        format!("{}x{}", settings.width, settings.height),
        "-framerate".to_string(),
        fps.to_string(),
        "-i".to_string(),
        "-".to_string(),
        "-c:v".to_string(),
        "libx264".to_string(),
        "-preset".to_string(),
        settings.quality.h264_preset().to_string(),
        "-pix_fmt".to_string(),
        "yuv420p".to_string(),
        "-crf".to_string(),
        settings.quality.crf().to_string(),
        "-g".to_string(),
        (fps * 2).to_string(),
        "-f".to_string(),
        "matroska".to_string(),
        output.to_string_lossy().to_string(),
    ]
}

/// Arguments for the final mux into the output container
fn mux_args(video: &Path, audio: Option<(&Path, &AudioSettings)>, target: &OutputTarget) -> Vec<String> {
    let mut args = vec![
        "-y".to_string(),
        "-loglevel".to_string(),
        "error".to_string(),
        "-i".to_string(),
        video.to_string_lossy().to_string(),
    ];

    if let Some((path, settings)) = audio {
        args.extend([
            "-f".to_string(),
            "f32le".to_string(),
            "-ar".to_string(),
            settings.sample_rate.to_string(),
            "-ac".to_string(),
            settings.channels.to_string(),
            "-i".to_string(),
            path.to_string_lossy().to_string(),
            "-map".to_string(),
            "0:v".to_string(),
            "-map".to_string(),
            "1:a".to_string(),
            "-c:a".to_string(),
            "aac".to_string(),
            "-b:a".to_string(),
            format!("{}k", settings.bitrate_kbps),
        ]);
    } else {
        args.extend(["-map".to_string(), "0:v".to_string()]);
    }

    args.extend(["-c:v".to_string(), "copy".to_string()]);
    if target.format == ContainerFormat::Mp4 {
        args.extend(["-movflags".to_string(), "+faststart".to_string()]);
    }
    args.extend([
        "-f".to_string(),
        target.format.ffmpeg_format().to_string(),
        target.path.to_string_lossy().to_string(),
    ]);
    args
}
