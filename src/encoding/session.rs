//! Encoding session
//!
//! Owns a container writer and its track inputs. Each track is drained from
//! its delivery channel by a dedicated worker thread, so appends to one
//! track never wait on the other. The first frame accepted on either track
//! claims the timing baseline exactly once.

use super::muxer::{ContainerWriter, Muxer, TrackInput};
use super::types::{
    AppendOutcome, DropReason, EncodeQuality, EncodingStats, OutputTarget, TrackSettings, TrackStats,
};
use crate::capture::dispatcher::{FrameRoutes, TrackRoute};
use crate::capture::traits::{CaptureConfig, Frame, MediaKind};
use crate::utils::error::{RecorderError, RecorderResult};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};

#[derive(Default)]
struct TrackCounters {
    appended: AtomicU64,
    not_ready: AtomicU64,
    after_finish: AtomicU64,
    before_baseline: AtomicU64,
    rejected: AtomicU64,
}

impl TrackCounters {
    fn record(&self, reason: DropReason) {
        let counter = match reason {
            DropReason::NotReady => &self.not_ready,
            DropReason::TrackFinished => &self.after_finish,
            DropReason::BeforeBaseline => &self.before_baseline,
            DropReason::Rejected | DropReason::NoTrack => &self.rejected,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    fn snapshot(&self) -> TrackStats {
        TrackStats {
            appended: self.appended.load(Ordering::Relaxed),
            not_ready: self.not_ready.load(Ordering::Relaxed),
            after_finish: self.after_finish.load(Ordering::Relaxed),
            before_baseline: self.before_baseline.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
        }
    }
}

struct TrackSlot {
    input: Box<dyn TrackInput>,
    finished: bool,
}

struct Track {
    kind: MediaKind,
    slot: Mutex<TrackSlot>,
    counters: TrackCounters,
}

impl Track {
    fn new(input: Box<dyn TrackInput>) -> Self {
        Self {
            kind: input.kind(),
            slot: Mutex::new(TrackSlot {
                input,
                finished: false,
            }),
            counters: TrackCounters::default(),
        }
    }

    fn drop_frame(&self, reason: DropReason) -> AppendOutcome {
        self.counters.record(reason);
        AppendOutcome::Dropped(reason)
    }

    fn mark_finished(&self) {
        let mut slot = self.slot.lock();
        if !slot.finished {
            slot.input.mark_finished();
            slot.finished = true;
        }
    }
}

/// State shared between the session handle and its track workers
struct SessionCore {
    writer: Arc<dyn ContainerWriter>,
    baseline: OnceLock<Duration>,
    video: Track,
    audio: Option<Track>,
    untracked: AtomicU64,
}

impl SessionCore {
    fn track(&self, kind: MediaKind) -> Option<&Track> {
        match kind {
            MediaKind::Video => Some(&self.video),
            MediaKind::Audio => self.audio.as_ref(),
        }
    }

    fn append(&self, frame: Frame) -> AppendOutcome {
        let Some(track) = self.track(frame.kind()) else {
            self.untracked.fetch_add(1, Ordering::Relaxed);
            return AppendOutcome::Dropped(DropReason::NoTrack);
        };

        let mut slot = track.slot.lock();
        if slot.finished {
            return track.drop_frame(DropReason::TrackFinished);
        }
        if !slot.input.is_ready_for_more_data() {
            return track.drop_frame(DropReason::NotReady);
        }

        // first arrival wins; concurrent first frames wait for the winner
        let baseline = *self.baseline.get_or_init(|| {
            tracing::info!(
                "Session baseline set by {} frame at {:.3}s",
                track.kind,
                frame.pts.as_secs_f64()
            );
            self.writer.start_session(frame.pts);
            frame.pts
        });
        if frame.pts < baseline {
            return track.drop_frame(DropReason::BeforeBaseline);
        }

        match slot.input.append(&frame.payload, frame.pts) {
            Ok(()) => {
                let appended = track.counters.appended.fetch_add(1, Ordering::Relaxed) + 1;
                if appended % 300 == 0 {
                    tracing::debug!("{} track: {} samples appended", track.kind, appended);
                }
                AppendOutcome::Appended
            }
            Err(e) => {
                tracing::warn!("{} sample at {:?} rejected: {}", track.kind, frame.pts, e);
                track.drop_frame(DropReason::Rejected)
            }
        }
    }

    fn stats(&self) -> EncodingStats {
        EncodingStats {
            baseline_ms: self.baseline.get().map(|b| b.as_secs_f64() * 1000.0),
            video: self.video.counters.snapshot(),
            audio: self.audio.as_ref().map(|a| a.counters.snapshot()),
            untracked: self.untracked.load(Ordering::Relaxed),
        }
    }
}

/// One recording's encoder side
pub struct EncodingSession {
    target: OutputTarget,
    core: Arc<SessionCore>,
    routes: FrameRoutes,
    workers: Vec<oneshot::Receiver<()>>,
    finished: AtomicBool,
}

impl EncodingSession {
    /// Create the writer, register tracks, open it and start the track workers
    pub fn start(
        muxer: &dyn Muxer,
        target: &OutputTarget,
        config: &CaptureConfig,
        quality: EncodeQuality,
    ) -> RecorderResult<Self> {
        let writer = muxer
            .create_writer(target)
            .map_err(|e| RecorderError::ConfigurationRejected(e.to_string()))?;

        let video_input = writer
            .add_track_input(TrackSettings::video_for(config, quality))
            .map_err(|e| RecorderError::ConfigurationRejected(e.to_string()))?;
        let audio_input = if config.capture_audio {
            Some(
                writer
                    .add_track_input(TrackSettings::audio_for(config, quality))
                    .map_err(|e| RecorderError::ConfigurationRejected(e.to_string()))?,
            )
        } else {
            None
        };

        writer
            .start_writing()
            .map_err(|e| RecorderError::ConfigurationRejected(e.to_string()))?;

        let core = Arc::new(SessionCore {
            writer,
            baseline: OnceLock::new(),
            video: Track::new(video_input),
            audio: audio_input.map(Track::new),
            untracked: AtomicU64::new(0),
        });

        let (video_route, video_rx) = TrackRoute::channel(MediaKind::Video, config.queue_depth);
        let mut workers = vec![spawn_worker(&core, MediaKind::Video, video_rx)?];

        let audio_route = if core.audio.is_some() {
            let (route, rx) = TrackRoute::channel(MediaKind::Audio, config.queue_depth);
            match spawn_worker(&core, MediaKind::Audio, rx) {
                Ok(done) => workers.push(done),
                Err(e) => {
                    video_route.close();
                    return Err(e);
                }
            }
            Some(route)
        } else {
            None
        };

        tracing::info!(
            "Encoding session opened: {:?} ({:?}, audio: {})",
            target.path,
            target.format,
            audio_route.is_some()
        );

        Ok(Self {
            target: target.clone(),
            core,
            routes: FrameRoutes {
                video: video_route,
                audio: audio_route,
            },
            workers,
            finished: AtomicBool::new(false),
        })
    }

    pub fn target(&self) -> &OutputTarget {
        &self.target
    }

    /// Channels the dispatcher should deliver into
    pub fn routes(&self) -> FrameRoutes {
        self.routes.clone()
    }

    pub fn baseline(&self) -> Option<Duration> {
        self.core.baseline.get().copied()
    }

    pub fn stats(&self) -> EncodingStats {
        self.core.stats()
    }

    /// Offer a frame directly to its track input. Drops are counted, never
    /// returned as errors.
    pub fn append(&self, frame: Frame) -> AppendOutcome {
        self.core.append(frame)
    }

    /// Drain the delivery channels, finish both tracks and finalize the
    /// container
    pub async fn finish(&mut self) -> RecorderResult<EncodingStats> {
        if self.finished.swap(true, Ordering::SeqCst) {
            return Err(RecorderError::MuxFinalizeError(
                "session already finished".to_string(),
            ));
        }

        self.routes.close_all();
        for done in self.workers.drain(..) {
            // the track is still finished below if its worker died
            if done.await.is_err() {
                tracing::error!("Track worker exited without reporting; finishing anyway");
            }
        }

        self.core.video.mark_finished();
        if let Some(audio) = &self.core.audio {
            audio.mark_finished();
        }

        let stats = self.core.stats();
        tracing::info!(
            "Finalizing {:?}: {} video / {} audio samples, {} dropped",
            self.target.path,
            stats.video.appended,
            stats.audio.as_ref().map(|a| a.appended).unwrap_or(0),
            stats.video.dropped() + stats.audio.as_ref().map(|a| a.dropped()).unwrap_or(0)
        );

        self.core
            .writer
            .finalize()
            .await
            .map_err(|e| RecorderError::MuxFinalizeError(e.to_string()))?;

        tracing::info!("Container finalized: {:?}", self.target.path);
        Ok(stats)
    }
}

impl Drop for EncodingSession {
    fn drop(&mut self) {
        // lets the workers exit if finish() never ran
        self.routes.close_all();
    }
}

fn spawn_worker(
    core: &Arc<SessionCore>,
    kind: MediaKind,
    mut rx: mpsc::Receiver<Frame>,
) -> RecorderResult<oneshot::Receiver<()>> {
    let (done_tx, done_rx) = oneshot::channel();
    let core = Arc::clone(core);
    std::thread::Builder::new()
        .name(format!("{}-track", kind))
        .spawn(move || {
            while let Some(frame) = rx.blocking_recv() {
                core.append(frame);
            }
            tracing::debug!("{} track worker drained", kind);
            let _ = done_tx.send(());
        })
        .map_err(|e| {
            RecorderError::ConfigurationRejected(format!("failed to spawn {} worker: {}", kind, e))
        })?;
    Ok(done_rx)
}
