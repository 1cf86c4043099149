//! Driver traits — the only way the core touches capture hardware.

use crate::config::CaptureFormat;
use crate::frame::{CaptureBuffer, Frame};
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CaptureError {
    #[error("device not found: {0}")]
    DeviceNotFound(String),
    #[error("device busy")]
    DeviceBusy,
    #[error("format negotiation failed: {0}")]
    FormatNegotiationFailed(String),
    #[error("capture failed: {0}")]
    CaptureFailed(String),
    #[error("capture timed out after {0:?}")]
    Timeout(Duration),
    #[error("device not open")]
    NotOpen,
}

/// USB webcam: opened when constructed, grabs and decodes one frame per call.
pub trait WebcamDriver: Send {
    /// Block until one frame is grabbed and decoded.
    fn grab(&mut self) -> Result<Frame, CaptureError>;

    /// Release the device. Called exactly once by the owning stream.
    fn release(&mut self);
}

/// Camera module with continuous capture into a caller-owned reusable buffer.
pub trait ModuleDriver: Send {
    /// Open and configure the device. Called once, from `start`.
    fn open(&mut self, format: CaptureFormat) -> Result<(), CaptureError>;

    /// Block until the next frame has been written into `buffer`.
    ///
    /// `buffer` arrives with no pixel data; the driver fills data and metadata.
    fn capture(&mut self, buffer: &mut CaptureBuffer) -> Result<(), CaptureError>;

    /// Stop capture and release the device.
    fn close(&mut self);
}

/// Constructs drivers for [`LatestFrameStream::open`](crate::LatestFrameStream::open).
pub trait DriverFactory {
    /// Open the webcam at `index`. `format` is a request; the device may
    /// negotiate something else.
    fn open_webcam(
        &self,
        index: u32,
        format: CaptureFormat,
    ) -> Result<Box<dyn WebcamDriver>, CaptureError>;

    /// An unopened camera-module driver.
    fn camera_module(&self) -> Result<Box<dyn ModuleDriver>, CaptureError>;
}
