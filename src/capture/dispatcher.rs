//! Frame dispatcher
//!
//! Sits between a capture stream and the encoding session. Frames arrive on
//! the capture thread through a [`FrameSink`]; the dispatcher drops them
//! while paused and otherwise hands them to one bounded channel per media
//! kind without ever blocking the caller.

use super::traits::{Frame, MediaKind};
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};

/// Asynchronous failure reported by a capture stream
#[derive(Debug, Clone)]
pub struct StreamFailure {
    pub reason: String,
    pub at: DateTime<Utc>,
}

/// Why a route refused a frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteError {
    /// The consumer has not caught up; the frame is dropped
    Full,
    /// The consumer is gone
    Closed,
}

/// Sending half of one per-kind delivery channel
///
/// The sender lives behind a lock so the owning session can close the
/// channel while the dispatcher still holds the route.
pub struct TrackRoute {
    kind: MediaKind,
    sender: RwLock<Option<mpsc::Sender<Frame>>>,
}

impl TrackRoute {
    /// Create a route and the receiver that drains it
    pub fn channel(kind: MediaKind, depth: usize) -> (Arc<Self>, mpsc::Receiver<Frame>) {
        let (tx, rx) = mpsc::channel(depth.max(1));
        let route = Arc::new(Self {
            kind,
            sender: RwLock::new(Some(tx)),
        });
        (route, rx)
    }

    pub fn kind(&self) -> MediaKind {
        self.kind
    }

    pub fn try_send(&self, frame: Frame) -> Result<(), RouteError> {
        let guard = self.sender.read();
        let sender = guard.as_ref().ok_or(RouteError::Closed)?;
        sender.try_send(frame).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => RouteError::Full,
            mpsc::error::TrySendError::Closed(_) => RouteError::Closed,
        })
    }

    /// Drop the sender; the receiver drains what is queued and then ends
    pub fn close(&self) {
        self.sender.write().take();
    }

    pub fn is_closed(&self) -> bool {
        self.sender.read().is_none()
    }
}

/// The pair of routes frames are dispatched to
#[derive(Clone)]
pub struct FrameRoutes {
    pub video: Arc<TrackRoute>,
    pub audio: Option<Arc<TrackRoute>>,
}

impl FrameRoutes {
    fn route(&self, kind: MediaKind) -> Option<&Arc<TrackRoute>> {
        match kind {
            MediaKind::Video => Some(&self.video),
            MediaKind::Audio => self.audio.as_ref(),
        }
    }

    pub fn close_all(&self) {
        self.video.close();
        if let Some(audio) = &self.audio {
            audio.close();
        }
    }
}

#[derive(Default)]
struct Counters {
    video_delivered: AtomicU64,
    audio_delivered: AtomicU64,
    suppressed: AtomicU64,
    queue_full: AtomicU64,
    unrouted: AtomicU64,
    failures: AtomicU64,
}

/// Snapshot of dispatcher counters
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DispatchStats {
    pub video_delivered: u64,
    pub audio_delivered: u64,
    /// Dropped because dispatch was paused
    pub suppressed: u64,
    /// Dropped because the delivery queue was full
    pub queue_full: u64,
    /// Dropped because no open route existed for the frame's kind
    pub unrouted: u64,
    pub failures: u64,
}

/// Routes frames from a capture stream to per-kind channels
pub struct FrameDispatcher {
    suppressed: AtomicBool,
    routes: RwLock<Option<FrameRoutes>>,
    failure_tx: broadcast::Sender<StreamFailure>,
    counters: Counters,
}

impl FrameDispatcher {
    pub fn new() -> Arc<Self> {
        let (failure_tx, _) = broadcast::channel(16);
        Arc::new(Self {
            suppressed: AtomicBool::new(false),
            routes: RwLock::new(None),
            failure_tx,
            counters: Counters::default(),
        })
    }

    /// Sink handed to capture streams
    pub fn sink(self: &Arc<Self>) -> FrameSink {
        FrameSink {
            dispatcher: Arc::clone(self),
        }
    }

    /// Subscribe to stream failures
    pub fn subscribe_failures(&self) -> broadcast::Receiver<StreamFailure> {
        self.failure_tx.subscribe()
    }

    pub fn attach(&self, routes: FrameRoutes) {
        *self.routes.write() = Some(routes);
    }

    pub fn detach(&self) {
        self.routes.write().take();
    }

    pub fn set_suppressed(&self, suppressed: bool) {
        self.suppressed.store(suppressed, Ordering::SeqCst);
    }

    pub fn is_suppressed(&self) -> bool {
        self.suppressed.load(Ordering::SeqCst)
    }

    /// Route one frame. Never blocks.
    pub fn dispatch(&self, frame: Frame) {
        if self.suppressed.load(Ordering::SeqCst) {
            self.counters.suppressed.fetch_add(1, Ordering::Relaxed);
            return;
        }

        let kind = frame.kind();
        let routes = self.routes.read();
        let Some(route) = routes.as_ref().and_then(|r| r.route(kind)) else {
            self.counters.unrouted.fetch_add(1, Ordering::Relaxed);
            return;
        };

        match route.try_send(frame) {
            Ok(()) => {
                let counter = match kind {
                    MediaKind::Video => &self.counters.video_delivered,
                    MediaKind::Audio => &self.counters.audio_delivered,
                };
                counter.fetch_add(1, Ordering::Relaxed);
            }
            Err(RouteError::Full) => {
                let dropped = self.counters.queue_full.fetch_add(1, Ordering::Relaxed) + 1;
                if dropped % 100 == 1 {
                    tracing::warn!("{} queue full, dropped {} frames so far", kind, dropped);
                }
            }
            Err(RouteError::Closed) => {
                self.counters.unrouted.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    /// Forward a stream failure; delivered even while paused
    pub fn fail(&self, reason: String) {
        self.counters.failures.fetch_add(1, Ordering::Relaxed);
        tracing::error!("Capture stream failed: {}", reason);
        let _ = self.failure_tx.send(StreamFailure {
            reason,
            at: Utc::now(),
        });
    }

    pub fn stats(&self) -> DispatchStats {
        let c = &self.counters;
        DispatchStats {
            video_delivered: c.video_delivered.load(Ordering::Relaxed),
            audio_delivered: c.audio_delivered.load(Ordering::Relaxed),
            suppressed: c.suppressed.load(Ordering::Relaxed),
            queue_full: c.queue_full.load(Ordering::Relaxed),
            unrouted: c.unrouted.load(Ordering::Relaxed),
            failures: c.failures.load(Ordering::Relaxed),
        }
    }
}

/// Handle a capture stream uses to publish frames and failures
#[derive(Clone)]
pub struct FrameSink {
    dispatcher: Arc<FrameDispatcher>,
}

impl FrameSink {
    pub fn deliver(&self, frame: Frame) {
        self.dispatcher.dispatch(frame);
    }

    pub fn fail(&self, reason: impl Into<String>) {
        self.dispatcher.fail(reason.into());
    }
}
