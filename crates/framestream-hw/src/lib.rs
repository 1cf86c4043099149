//! framestream-hw — V4L2 capture drivers for framestream streams.
//!
//! Implements the core's driver traits on top of the `v4l` crate and
//! converts negotiated pixel formats to packed BGR.

pub mod camera;
pub mod convert;

pub use camera::{list_devices, DeviceInfo, V4lCameraModule, V4lDrivers, V4lWebcam};
pub use convert::{FrameError, PixelFormat};
