//! The shared "latest frame" cell.

use crate::frame::Frame;
use std::sync::{Arc, PoisonError, RwLock};

/// Single-producer, multi-reader cell holding the most recent frame.
///
/// Writers replace the whole `Arc` under the lock, so a reader either sees the
/// previous frame or the new one, never a partial write.
#[derive(Debug, Default)]
pub struct FrameSlot {
    latest: RwLock<Option<Arc<Frame>>>,
}

impl FrameSlot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Publish `frame`, replacing whatever was there.
    pub fn set(&self, frame: Frame) {
        let frame = Arc::new(frame);
        *self.latest.write().unwrap_or_else(PoisonError::into_inner) = Some(frame);
    }

    /// The most recently published frame, or `None` before the first one.
    pub fn get(&self) -> Option<Arc<Frame>> {
        self.latest
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

/// Cloneable read-only view of a stream's [`FrameSlot`].
///
/// Hand one to each consumer thread; it stays valid after the stream stops
/// and keeps returning the last published frame.
#[derive(Debug, Clone)]
pub struct FrameReader {
    slot: Arc<FrameSlot>,
}

impl FrameReader {
    pub(crate) fn new(slot: Arc<FrameSlot>) -> Self {
        Self { slot }
    }

    pub fn read(&self) -> Option<Arc<Frame>> {
        self.slot.get()
    }
}
