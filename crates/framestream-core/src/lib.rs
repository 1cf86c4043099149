//! framestream-core — threaded "latest frame" streams over camera drivers.
//!
//! A background acquisition loop keeps overwriting a single [`FrameSlot`];
//! consumers poll [`FrameSource::read`] for the newest frame without ever
//! blocking on device I/O. Hardware is reached only through the traits in
//! [`driver`].

pub mod config;
pub mod driver;
pub mod frame;
pub mod handle;
pub mod module;
pub mod slot;
pub mod stream;
pub mod webcam;

pub use config::{CaptureFormat, ConfigError, Resolution, SourceConfig, StreamConfig};
pub use driver::{CaptureError, DriverFactory, ModuleDriver, WebcamDriver};
pub use frame::{CaptureBuffer, Frame};
pub use handle::{StreamHandle, StreamState, StreamStats};
pub use module::ModuleStream;
pub use slot::{FrameReader, FrameSlot};
pub use stream::{FrameSource, LatestFrameStream, StreamError};
pub use webcam::WebcamStream;
