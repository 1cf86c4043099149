//! Shared state between a stream and its acquisition thread.

use crate::config::StreamConfig;
use crate::driver::CaptureError;
use crate::frame::Frame;
use crate::slot::{FrameReader, FrameSlot};
use crate::stream::StreamError;
use std::ops::ControlFlow;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;

/// Granularity of stop checks while backing off after a failed capture.
const BACKOFF_SLICE: Duration = Duration::from_millis(10);

/// Lifecycle of a stream's acquisition loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamState {
    /// Constructed, loop not launched.
    Idle,
    Running,
    /// Loop observed the stop request and released the device.
    Stopped,
    /// Loop gave up after too many consecutive capture failures.
    Failed,
}

impl StreamState {
    pub fn is_terminal(self) -> bool {
        matches!(self, StreamState::Stopped | StreamState::Failed)
    }
}

/// Point-in-time capture counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamStats {
    pub frames_captured: u64,
    pub capture_failures: u64,
    /// Outcome of the most recent grab.
    pub last_grab_ok: bool,
    pub state: StreamState,
}

struct Shared {
    slot: Arc<FrameSlot>,
    stop_requested: AtomicBool,
    frames_captured: AtomicU64,
    capture_failures: AtomicU64,
    last_grab_ok: AtomicBool,
    state: watch::Sender<StreamState>,
}

/// Owns the frame slot, stop flag, lifecycle and counters of one stream.
pub struct StreamHandle {
    shared: Arc<Shared>,
    source: &'static str,
    failure_backoff: Duration,
    max_consecutive_failures: u32,
}

impl StreamHandle {
    pub(crate) fn new(source: &'static str, config: &StreamConfig) -> Self {
        let (state, _) = watch::channel(StreamState::Idle);
        Self {
            shared: Arc::new(Shared {
                slot: Arc::new(FrameSlot::new()),
                stop_requested: AtomicBool::new(false),
                frames_captured: AtomicU64::new(0),
                capture_failures: AtomicU64::new(0),
                last_grab_ok: AtomicBool::new(false),
                state,
            }),
            source,
            failure_backoff: config.failure_backoff(),
            max_consecutive_failures: config.max_consecutive_failures,
        }
    }

    /// Source label used in logs and thread names.
    pub fn source(&self) -> &'static str {
        self.source
    }

    pub fn read(&self) -> Option<Arc<Frame>> {
        self.shared.slot.get()
    }

    pub fn reader(&self) -> FrameReader {
        FrameReader::new(Arc::clone(&self.shared.slot))
    }

    pub fn state(&self) -> StreamState {
        *self.shared.state.borrow()
    }

    pub fn stats(&self) -> StreamStats {
        StreamStats {
            frames_captured: self.shared.frames_captured.load(Ordering::Relaxed),
            capture_failures: self.shared.capture_failures.load(Ordering::Relaxed),
            last_grab_ok: self.shared.last_grab_ok.load(Ordering::Relaxed),
            state: self.state(),
        }
    }

    pub fn stop_requested(&self) -> bool {
        self.shared.stop_requested.load(Ordering::Acquire)
    }

    /// Request the loop to exit. Returns `false` if a stop was already requested.
    pub fn stop(&self) -> bool {
        let first = !self.shared.stop_requested.swap(true, Ordering::AcqRel);
        if first {
            tracing::info!(source = self.source, state = ?self.state(), "stop requested");
        }
        first
    }

    /// Fail unless the loop could be launched right now.
    pub(crate) fn check_startable(&self) -> Result<(), StreamError> {
        match self.state() {
            StreamState::Running => Err(StreamError::AlreadyStarted),
            StreamState::Stopped | StreamState::Failed => Err(StreamError::AlreadyStopped),
            StreamState::Idle if self.stop_requested() => Err(StreamError::AlreadyStopped),
            StreamState::Idle => Ok(()),
        }
    }

    /// Move to `Running` and hand out the loop-side context.
    pub(crate) fn begin(&self) -> Result<Acquisition, StreamError> {
        self.check_startable()?;
        self.shared.state.send_replace(StreamState::Running);
        tracing::info!(source = self.source, "acquisition started");
        Ok(Acquisition {
            shared: Arc::clone(&self.shared),
            source: self.source,
            failure_backoff: self.failure_backoff,
            max_consecutive_failures: self.max_consecutive_failures,
            consecutive_failures: 0,
        })
    }

    /// Run `body` on a detached, named thread.
    pub(crate) fn spawn<F>(&self, acquisition: Acquisition, body: F) -> Result<(), StreamError>
    where
        F: FnOnce(Acquisition) + Send + 'static,
    {
        let spawned = std::thread::Builder::new()
            .name(format!("framestream-{}", self.source))
            .spawn(move || body(acquisition));

        if let Err(e) = spawned {
            self.shared.state.send_replace(StreamState::Failed);
            return Err(StreamError::Spawn(e));
        }
        Ok(())
    }

    /// Wait until the acquisition thread has released the device and exited.
    ///
    /// Returns immediately if the loop was never launched.
    pub async fn wait_stopped(&self, timeout: Duration) -> Result<(), StreamError> {
        let mut rx = self.shared.state.subscribe();
        if *rx.borrow() == StreamState::Idle {
            return Ok(());
        }
        let exited = tokio::time::timeout(timeout, rx.wait_for(|s| s.is_terminal()))
            .await
            .is_ok();
        if !exited {
            tracing::warn!(
                source = self.source,
                timeout_ms = timeout.as_millis() as u64,
                "acquisition thread did not exit in time"
            );
            return Err(StreamError::StopTimeout(timeout));
        }
        Ok(())
    }
}

/// Loop-side view of a [`StreamHandle`], moved into the acquisition thread.
pub(crate) struct Acquisition {
    shared: Arc<Shared>,
    source: &'static str,
    failure_backoff: Duration,
    max_consecutive_failures: u32,
    consecutive_failures: u32,
}

impl Acquisition {
    pub(crate) fn should_stop(&self) -> bool {
        self.shared.stop_requested.load(Ordering::Acquire)
    }

    pub(crate) fn publish(&mut self, frame: Frame) {
        tracing::trace!(source = self.source, seq = frame.sequence, "frame published");
        self.consecutive_failures = 0;
        self.shared.slot.set(frame);
        self.shared.frames_captured.fetch_add(1, Ordering::Relaxed);
        self.shared.last_grab_ok.store(true, Ordering::Relaxed);
    }

    /// Count a failed capture and back off. Breaks once the consecutive
    /// failure limit is hit.
    pub(crate) fn record_failure(&mut self, err: &CaptureError) -> ControlFlow<()> {
        self.consecutive_failures += 1;
        self.shared.capture_failures.fetch_add(1, Ordering::Relaxed);
        self.shared.last_grab_ok.store(false, Ordering::Relaxed);
        tracing::warn!(
            source = self.source,
            error = %err,
            consecutive = self.consecutive_failures,
            "capture failed; keeping previous frame"
        );

        if self.max_consecutive_failures > 0
            && self.consecutive_failures >= self.max_consecutive_failures
        {
            tracing::error!(
                source = self.source,
                limit = self.max_consecutive_failures,
                "too many consecutive capture failures; giving up"
            );
            return ControlFlow::Break(());
        }
        self.backoff();
        ControlFlow::Continue(())
    }

    /// Sleep for the failure backoff in short slices, cutting it short once
    /// stop is requested.
    fn backoff(&self) {
        let deadline = Instant::now() + self.failure_backoff;
        while !self.should_stop() {
            let now = Instant::now();
            if now >= deadline {
                break;
            }
            std::thread::sleep((deadline - now).min(BACKOFF_SLICE));
        }
    }

    /// Publish the terminal state. Call after the device has been released.
    pub(crate) fn finish(self, state: StreamState) {
        tracing::info!(
            source = self.source,
            state = ?state,
            frames = self.shared.frames_captured.load(Ordering::Relaxed),
            "acquisition exited"
        );
        self.shared.state.send_replace(state);
    }
}
