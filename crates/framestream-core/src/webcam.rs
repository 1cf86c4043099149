//! USB webcam backend: grab-and-decode loop with a top-of-loop stop check.

use crate::config::StreamConfig;
use crate::driver::WebcamDriver;
use crate::handle::{Acquisition, StreamHandle, StreamState};
use crate::stream::{FrameSource, StreamError};

/// An opened webcam. Released exactly once, when this is dropped.
struct OpenWebcam(Box<dyn WebcamDriver>);

impl Drop for OpenWebcam {
    fn drop(&mut self) {
        self.0.release();
    }
}

pub struct WebcamStream {
    handle: StreamHandle,
    /// Present until the loop takes ownership on `start`/`update`.
    webcam: Option<OpenWebcam>,
}

impl WebcamStream {
    /// Wrap an already-open webcam driver.
    pub fn new(driver: Box<dyn WebcamDriver>, config: &StreamConfig) -> Self {
        Self {
            handle: StreamHandle::new("webcam", config),
            webcam: Some(OpenWebcam(driver)),
        }
    }

    fn take_webcam(&mut self) -> Result<(OpenWebcam, Acquisition), StreamError> {
        let acquisition = self.handle.begin()?;
        let webcam = self.webcam.take().ok_or(StreamError::AlreadyStarted)?;
        Ok((webcam, acquisition))
    }
}

impl FrameSource for WebcamStream {
    fn start(&mut self) -> Result<&mut Self, StreamError> {
        let (webcam, acquisition) = self.take_webcam()?;
        self.handle.spawn(acquisition, move |acq| run(webcam, acq))?;
        Ok(self)
    }

    fn update(&mut self) -> Result<(), StreamError> {
        let (webcam, acquisition) = self.take_webcam()?;
        run(webcam, acquisition);
        Ok(())
    }

    fn handle(&self) -> &StreamHandle {
        &self.handle
    }
}

impl Drop for WebcamStream {
    fn drop(&mut self) {
        // A webcam that was never started is released with the field.
        self.handle.stop();
    }
}

fn run(mut webcam: OpenWebcam, mut acq: Acquisition) {
    let mut outcome = StreamState::Stopped;

    while !acq.should_stop() {
        match webcam.0.grab() {
            Ok(frame) => acq.publish(frame),
            Err(err) => {
                if acq.record_failure(&err).is_break() {
                    outcome = StreamState::Failed;
                    break;
                }
            }
        }
    }

    drop(webcam);
    acq.finish(outcome);
}
