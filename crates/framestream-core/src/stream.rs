use crate::config::{ConfigError, SourceConfig, StreamConfig};
use crate::driver::{CaptureError, DriverFactory};
use crate::frame::Frame;
use crate::handle::{StreamHandle, StreamState, StreamStats};
use crate::module::ModuleStream;
use crate::slot::FrameReader;
use crate::webcam::WebcamStream;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StreamError {
    #[error("failed to open capture device: {0}")]
    Open(#[source] CaptureError),
    #[error("invalid stream config: {0}")]
    Config(#[from] ConfigError),
    #[error("stream already started")]
    AlreadyStarted,
    #[error("stream already stopped")]
    AlreadyStopped,
    #[error("failed to spawn acquisition thread: {0}")]
    Spawn(#[source] std::io::Error),
    #[error("acquisition thread still running after {0:?}")]
    StopTimeout(Duration),
}

/// The capability contract shared by both backends and the facade.
pub trait FrameSource {
    /// Launch the acquisition loop on a detached background thread.
    fn start(&mut self) -> Result<&mut Self, StreamError>;

    /// Run the acquisition loop on the calling thread until stopped.
    fn update(&mut self) -> Result<(), StreamError>;

    fn handle(&self) -> &StreamHandle;

    /// Most recently completed frame; `None` before the first capture.
    fn read(&self) -> Option<Arc<Frame>> {
        self.handle().read()
    }

    /// Request the loop to exit. Non-blocking and idempotent.
    fn stop(&self) {
        self.handle().stop();
    }

    fn stats(&self) -> StreamStats {
        self.handle().stats()
    }

    fn reader(&self) -> FrameReader {
        self.handle().reader()
    }
}

enum Backend {
    Webcam(WebcamStream),
    CameraModule(ModuleStream),
}

/// Latest-frame stream over whichever source the config selects.
///
/// ```no_run
/// # use framestream_core::{DriverFactory, StreamError};
/// # async fn demo(drivers: &dyn DriverFactory) -> Result<(), StreamError> {
/// use framestream_core::{FrameSource, LatestFrameStream, StreamConfig};
///
/// let mut stream = LatestFrameStream::open(StreamConfig::default(), drivers)?;
/// stream.start()?;
/// if let Some(frame) = stream.read() {
///     println!("{}x{} seq {}", frame.width, frame.height, frame.sequence);
/// }
/// stream.stop();
/// stream.wait_stopped(stream.config().stop_timeout()).await?;
/// # Ok(())
/// # }
/// ```
pub struct LatestFrameStream {
    backend: Backend,
    config: StreamConfig,
}

impl LatestFrameStream {
    /// Resolve the configured source into a backend. Webcams are opened here;
    /// camera modules are opened on `start`.
    pub fn open(config: StreamConfig, drivers: &dyn DriverFactory) -> Result<Self, StreamError> {
        config.validate()?;

        let backend = match config.source {
            SourceConfig::Webcam { index } => {
                let driver = drivers
                    .open_webcam(index, config.capture_format())
                    .map_err(StreamError::Open)?;
                tracing::info!(index, "webcam opened");
                Backend::Webcam(WebcamStream::new(driver, &config))
            }
            SourceConfig::CameraModule => {
                let driver = drivers.camera_module().map_err(StreamError::Open)?;
                Backend::CameraModule(ModuleStream::new(driver, &config))
            }
        };

        Ok(Self { backend, config })
    }

    pub fn config(&self) -> &StreamConfig {
        &self.config
    }

    pub fn state(&self) -> StreamState {
        self.handle().state()
    }

    /// Wait for the acquisition thread to release the device and exit.
    pub async fn wait_stopped(&self, timeout: Duration) -> Result<(), StreamError> {
        self.handle().wait_stopped(timeout).await
    }

    /// `stop()` followed by `wait_stopped` with the configured timeout.
    pub async fn shutdown(&self) -> Result<(), StreamError> {
        self.stop();
        self.wait_stopped(self.config.stop_timeout()).await
    }
}

impl FrameSource for LatestFrameStream {
    fn start(&mut self) -> Result<&mut Self, StreamError> {
        match &mut self.backend {
            Backend::Webcam(s) => {
                s.start()?;
            }
            Backend::CameraModule(s) => {
                s.start()?;
            }
        }
        Ok(self)
    }

    fn update(&mut self) -> Result<(), StreamError> {
        match &mut self.backend {
            Backend::Webcam(s) => s.update(),
            Backend::CameraModule(s) => s.update(),
        }
    }

    fn handle(&self) -> &StreamHandle {
        match &self.backend {
            Backend::Webcam(s) => s.handle(),
            Backend::CameraModule(s) => s.handle(),
        }
    }
}
