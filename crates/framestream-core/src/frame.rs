//! Frame types — the published image and the reusable capture buffer.

use std::time::Instant;

/// A captured frame, packed row-major.
///
/// Three-channel frames are BGR; single-channel frames are grayscale.
#[derive(Debug, Clone)]
pub struct Frame {
    pub data: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub channels: u8,
    /// Sequence number assigned by the source. Non-decreasing per stream.
    pub sequence: u64,
    pub captured_at: Instant,
}

impl Frame {
    /// Bytes one frame of this geometry should occupy.
    pub fn expected_len(&self) -> usize {
        self.width as usize * self.height as usize * self.channels as usize
    }

    /// Whether `data` holds exactly one full frame of the declared geometry.
    pub fn is_complete(&self) -> bool {
        self.data.len() == self.expected_len()
    }
}

/// Reusable buffer the camera-module driver writes each capture into.
///
/// The acquisition loop copies the contents out with [`to_frame`](Self::to_frame)
/// and then calls [`truncate`](Self::truncate) so bytes from one capture never
/// bleed into the next.
#[derive(Debug, Default)]
pub struct CaptureBuffer {
    pub data: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub channels: u8,
    pub sequence: u64,
}

impl CaptureBuffer {
    /// Buffer pre-sized for one frame of the given geometry.
    pub fn with_capacity(width: u32, height: u32, channels: u8) -> Self {
        Self {
            data: Vec::with_capacity(width as usize * height as usize * channels as usize),
            width,
            height,
            channels,
            sequence: 0,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Clear pixel bytes and metadata, keeping the allocation.
    pub fn truncate(&mut self) {
        self.data.clear();
        self.width = 0;
        self.height = 0;
        self.channels = 0;
        self.sequence = 0;
    }

    /// Copy the current contents into a standalone [`Frame`].
    pub fn to_frame(&self) -> Frame {
        Frame {
            data: self.data.clone(),
            width: self.width,
            height: self.height,
            channels: self.channels,
            sequence: self.sequence,
            captured_at: Instant::now(),
        }
    }
}
