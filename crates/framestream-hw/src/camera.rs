//! V4L2 capture drivers via the `v4l` crate.

use crate::convert::PixelFormat;
use framestream_core::{
    CaptureBuffer, CaptureError, CaptureFormat, DriverFactory, Frame, ModuleDriver, WebcamDriver,
};
use std::path::Path;
use std::time::{Duration, Instant};
use v4l::buffer::Type as BufType;
use v4l::io::traits::CaptureStream;
use v4l::prelude::*;
use v4l::video::Capture;
use v4l::FourCC;

/// Buffers queued in the mmap ring.
const BUFFER_COUNT: u32 = 4;

/// Dequeue timeout; a device that stops delivering surfaces as an error
/// instead of hanging the acquisition thread.
const DEQUEUE_TIMEOUT: Duration = Duration::from_secs(2);

/// Info about a discovered V4L2 device.
#[derive(Debug, Clone)]
pub struct DeviceInfo {
    pub path: String,
    pub name: String,
    pub driver: String,
    pub bus: String,
}

/// An open device with a running mmap stream.
struct Session {
    // Declared before `device` so the stream is torn down first.
    stream: MmapStream<'static>,
    _device: Device,
    device_path: String,
    width: u32,
    height: u32,
    pixel_format: PixelFormat,
}

impl Session {
    fn open(device_path: &str, format: CaptureFormat) -> Result<Self, CaptureError> {
        if !Path::new(device_path).exists() {
            return Err(CaptureError::DeviceNotFound(device_path.to_string()));
        }

        let device = Device::with_path(device_path).map_err(|e| {
            if e.to_string().contains("busy") || e.to_string().contains("EBUSY") {
                CaptureError::DeviceBusy
            } else {
                CaptureError::DeviceNotFound(format!("{device_path}: {e}"))
            }
        })?;

        let caps = device.query_caps().map_err(|e| {
            CaptureError::CaptureFailed(format!("failed to query capabilities: {e}"))
        })?;
        if !caps
            .capabilities
            .contains(v4l::capability::Flags::VIDEO_CAPTURE)
        {
            return Err(CaptureError::FormatNegotiationFailed(format!(
                "{device_path} is not a video capture device"
            )));
        }
        tracing::info!(
            device = device_path,
            driver = %caps.driver,
            card = %caps.card,
            "opened capture device"
        );

        // Ask for YUYV at the requested size; accept whatever supported format
        // the driver settles on.
        let mut fmt = device.format().map_err(|e| {
            CaptureError::FormatNegotiationFailed(format!("failed to get format: {e}"))
        })?;
        fmt.fourcc = FourCC::new(b"YUYV");
        fmt.width = format.resolution.width;
        fmt.height = format.resolution.height;

        let negotiated = device.set_format(&fmt).map_err(|e| {
            CaptureError::FormatNegotiationFailed(format!("failed to set format: {e}"))
        })?;
        let pixel_format = PixelFormat::from_fourcc(negotiated.fourcc).ok_or_else(|| {
            CaptureError::FormatNegotiationFailed(format!(
                "unsupported pixel format: {:?} (need YUYV, GREY, BGR3 or RGB3)",
                negotiated.fourcc
            ))
        })?;

        let params = v4l::video::capture::Parameters::with_fps(format.framerate);
        if let Err(e) = device.set_params(&params) {
            tracing::warn!(device = device_path, error = %e, "failed to set frame rate");
        }

        tracing::info!(
            width = negotiated.width,
            height = negotiated.height,
            fourcc = ?negotiated.fourcc,
            fps = format.framerate,
            "negotiated format"
        );

        let mut stream = MmapStream::with_buffers(&device, BufType::VideoCapture, BUFFER_COUNT)
            .map_err(|e| {
                CaptureError::CaptureFailed(format!("failed to create mmap stream: {e}"))
            })?;
        stream.set_timeout(DEQUEUE_TIMEOUT);

        Ok(Self {
            stream,
            _device: device,
            device_path: device_path.to_string(),
            width: negotiated.width,
            height: negotiated.height,
            pixel_format,
        })
    }

    /// Dequeue one buffer and append it to `out` as BGR. Returns the driver's
    /// sequence number.
    fn next_bgr(&mut self, out: &mut Vec<u8>) -> Result<u64, CaptureError> {
        let (buf, meta) = self.stream.next().map_err(|e| {
            if e.kind() == std::io::ErrorKind::TimedOut {
                CaptureError::Timeout(DEQUEUE_TIMEOUT)
            } else {
                CaptureError::CaptureFailed(format!("failed to dequeue buffer: {e}"))
            }
        })?;
        let sequence = meta.sequence as u64;

        self.pixel_format
            .to_bgr(buf, self.width, self.height, out)
            .map_err(|e| CaptureError::CaptureFailed(format!("conversion failed: {e}")))?;
        Ok(sequence)
    }
}

/// USB webcam at `/dev/video<index>`, opened on construction.
pub struct V4lWebcam {
    session: Option<Session>,
}

impl V4lWebcam {
    pub fn open(index: u32, format: CaptureFormat) -> Result<Self, CaptureError> {
        let session = Session::open(&format!("/dev/video{index}"), format)?;
        Ok(Self {
            session: Some(session),
        })
    }
}

impl WebcamDriver for V4lWebcam {
    fn grab(&mut self) -> Result<Frame, CaptureError> {
        let session = self.session.as_mut().ok_or(CaptureError::NotOpen)?;
        let mut data = Vec::new();
        let sequence = session.next_bgr(&mut data)?;
        Ok(Frame {
            data,
            width: session.width,
            height: session.height,
            channels: 3,
            sequence,
            captured_at: Instant::now(),
        })
    }

    fn release(&mut self) {
        if let Some(session) = self.session.take() {
            tracing::info!(device = %session.device_path, "webcam released");
        }
    }
}

/// Camera module exposed through a V4L2 node (libcamera's compatibility
/// layer on a Pi). Opened lazily by the stream.
pub struct V4lCameraModule {
    device_path: String,
    session: Option<Session>,
}

impl V4lCameraModule {
    pub fn new(device_path: impl Into<String>) -> Self {
        Self {
            device_path: device_path.into(),
            session: None,
        }
    }
}

impl ModuleDriver for V4lCameraModule {
    fn open(&mut self, format: CaptureFormat) -> Result<(), CaptureError> {
        self.session = Some(Session::open(&self.device_path, format)?);
        Ok(())
    }

    fn capture(&mut self, buffer: &mut CaptureBuffer) -> Result<(), CaptureError> {
        let session = self.session.as_mut().ok_or(CaptureError::NotOpen)?;
        let sequence = session.next_bgr(&mut buffer.data)?;
        buffer.width = session.width;
        buffer.height = session.height;
        buffer.channels = 3;
        buffer.sequence = sequence;
        Ok(())
    }

    fn close(&mut self) {
        if self.session.take().is_some() {
            tracing::info!(device = %self.device_path, "camera module closed");
        }
    }
}

/// [`DriverFactory`] backed by real V4L2 devices.
#[derive(Debug, Clone)]
pub struct V4lDrivers {
    /// Node used for the camera module.
    pub module_device: String,
}

impl Default for V4lDrivers {
    fn default() -> Self {
        Self {
            module_device: "/dev/video0".to_string(),
        }
    }
}

impl V4lDrivers {
    /// Defaults, with `FRAMESTREAM_MODULE_DEVICE` overriding the module node.
    pub fn from_env() -> Self {
        Self {
            module_device: std::env::var("FRAMESTREAM_MODULE_DEVICE")
                .unwrap_or_else(|_| Self::default().module_device),
        }
    }
}

impl DriverFactory for V4lDrivers {
    fn open_webcam(
        &self,
        index: u32,
        format: CaptureFormat,
    ) -> Result<Box<dyn WebcamDriver>, CaptureError> {
        Ok(Box::new(V4lWebcam::open(index, format)?))
    }

    fn camera_module(&self) -> Result<Box<dyn ModuleDriver>, CaptureError> {
        Ok(Box::new(V4lCameraModule::new(self.module_device.clone())))
    }
}

/// List available V4L2 video capture devices.
pub fn list_devices() -> Vec<DeviceInfo> {
    let mut devices = Vec::new();

    for i in 0..16 {
        let path = format!("/dev/video{i}");
        if !Path::new(&path).exists() {
            continue;
        }
        let Ok(dev) = Device::with_path(&path) else {
            continue;
        };
        let Ok(caps) = dev.query_caps() else {
            continue;
        };
        if !caps.capabilities.contains(v4l::capability::Flags::VIDEO_CAPTURE) {
            continue;
        }
        devices.push(DeviceInfo {
            path,
            name: caps.card.clone(),
            driver: caps.driver.clone(),
            bus: caps.bus.clone(),
        });
    }

    devices
}
