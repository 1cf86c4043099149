//! Camera-module backend: continuous capture into a reusable buffer.
//!
//! Each iteration captures, publishes a copy, truncates the buffer, and only
//! then checks the stop flag. The frame captured on the last iteration is
//! therefore still in the slot after the loop exits.

use crate::config::{CaptureFormat, StreamConfig};
use crate::driver::ModuleDriver;
use crate::frame::CaptureBuffer;
use crate::handle::{Acquisition, StreamHandle, StreamState};
use crate::stream::{FrameSource, StreamError};

/// An opened camera module. Closed exactly once, when this is dropped.
struct OpenModule(Box<dyn ModuleDriver>);

impl Drop for OpenModule {
    fn drop(&mut self) {
        self.0.close();
    }
}

pub struct ModuleStream {
    handle: StreamHandle,
    driver: Option<Box<dyn ModuleDriver>>,
    format: CaptureFormat,
}

impl ModuleStream {
    /// Wrap an unopened camera-module driver. The device is opened on `start`.
    pub fn new(driver: Box<dyn ModuleDriver>, config: &StreamConfig) -> Self {
        Self {
            handle: StreamHandle::new("camera-module", config),
            driver: Some(driver),
            format: config.capture_format(),
        }
    }

    fn open(&mut self) -> Result<(OpenModule, Acquisition), StreamError> {
        self.handle.check_startable()?;
        let driver = self.driver.as_mut().ok_or(StreamError::AlreadyStarted)?;
        driver.open(self.format).map_err(StreamError::Open)?;
        tracing::info!(
            resolution = %self.format.resolution,
            framerate = self.format.framerate,
            "camera module opened"
        );

        let module = self.driver.take().map(OpenModule).ok_or(StreamError::AlreadyStarted)?;
        let acquisition = self.handle.begin()?;
        Ok((module, acquisition))
    }
}

impl FrameSource for ModuleStream {
    fn start(&mut self) -> Result<&mut Self, StreamError> {
        let (module, acquisition) = self.open()?;
        let format = self.format;
        self.handle.spawn(acquisition, move |acq| run(module, acq, format))?;
        Ok(self)
    }

    fn update(&mut self) -> Result<(), StreamError> {
        let (module, acquisition) = self.open()?;
        run(module, acquisition, self.format);
        Ok(())
    }

    fn handle(&self) -> &StreamHandle {
        &self.handle
    }
}

impl Drop for ModuleStream {
    fn drop(&mut self) {
        self.handle.stop();
    }
}

fn run(mut module: OpenModule, mut acq: Acquisition, format: CaptureFormat) {
    let mut buffer = CaptureBuffer::with_capacity(
        format.resolution.width,
        format.resolution.height,
        3,
    );
    let mut outcome = StreamState::Stopped;

    loop {
        let gave_up = match module.0.capture(&mut buffer) {
            Ok(()) => {
                acq.publish(buffer.to_frame());
                false
            }
            Err(err) => acq.record_failure(&err).is_break(),
        };

        // Always reset before the stop check so nothing leaks into the next capture.
        buffer.truncate();

        if gave_up {
            outcome = StreamState::Failed;
            break;
        }
        if acq.should_stop() {
            break;
        }
    }

    drop(buffer);
    drop(module);
    acq.finish(outcome);
}
