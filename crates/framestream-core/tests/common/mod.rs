//! Scripted fake drivers for exercising streams without hardware.

#![allow(dead_code)]

use framestream_core::{
    CaptureBuffer, CaptureError, CaptureFormat, DriverFactory, Frame, FrameSource, ModuleDriver,
    WebcamDriver,
};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

/// One scripted driver response. Scripts repeat from the start when exhausted.
#[derive(Debug, Clone, Copy)]
pub enum Step {
    /// A 2x2 BGR frame filled with this byte.
    Frame(u8),
    Fail,
    /// Block until [`DriverLog::unhang`] is called, then fail.
    Hang,
}

/// Counters shared between a fake driver and the test body.
#[derive(Debug, Default)]
pub struct DriverLog {
    pub opened: AtomicUsize,
    pub released: AtomicUsize,
    pub captures: AtomicU64,
    pub last_sequence: AtomicU64,
    /// Captures that were handed a buffer still holding bytes.
    pub dirty_buffers: AtomicUsize,
    hung: AtomicBool,
    unhang: AtomicBool,
}

impl DriverLog {
    pub fn released(&self) -> usize {
        self.released.load(Ordering::SeqCst)
    }

    pub fn opened(&self) -> usize {
        self.opened.load(Ordering::SeqCst)
    }

    pub fn is_hung(&self) -> bool {
        self.hung.load(Ordering::SeqCst)
    }

    pub fn unhang(&self) {
        self.unhang.store(true, Ordering::SeqCst);
    }
}

struct Script {
    steps: Vec<Step>,
    pos: usize,
    delay: Duration,
    sequence: u64,
    log: Arc<DriverLog>,
}

impl Script {
    fn new(steps: &[Step], delay: Duration, log: Arc<DriverLog>) -> Self {
        assert!(!steps.is_empty());
        Self {
            steps: steps.to_vec(),
            pos: 0,
            delay,
            sequence: 0,
            log,
        }
    }

    /// Advance one step; returns the fill byte and sequence on success.
    fn next(&mut self) -> Result<(u8, u64), CaptureError> {
        if !self.delay.is_zero() {
            std::thread::sleep(self.delay);
        }
        let step = self.steps[self.pos % self.steps.len()];
        self.pos += 1;
        match step {
            Step::Frame(tag) => {
                self.sequence += 1;
                self.log.captures.fetch_add(1, Ordering::SeqCst);
                self.log
                    .last_sequence
                    .store(self.sequence, Ordering::SeqCst);
                Ok((tag, self.sequence))
            }
            Step::Fail => Err(CaptureError::CaptureFailed("scripted failure".into())),
            Step::Hang => {
                self.log.hung.store(true, Ordering::SeqCst);
                while !self.log.unhang.load(Ordering::SeqCst) {
                    std::thread::sleep(Duration::from_millis(5));
                }
                Err(CaptureError::Timeout(Duration::ZERO))
            }
        }
    }
}

pub struct FakeWebcam {
    script: Script,
}

impl FakeWebcam {
    pub fn new(steps: &[Step], delay: Duration, log: Arc<DriverLog>) -> Self {
        log.opened.fetch_add(1, Ordering::SeqCst);
        Self {
            script: Script::new(steps, delay, log),
        }
    }
}

impl WebcamDriver for FakeWebcam {
    fn grab(&mut self) -> Result<Frame, CaptureError> {
        let (tag, sequence) = self.script.next()?;
        Ok(Frame {
            data: vec![tag; 12],
            width: 2,
            height: 2,
            channels: 3,
            sequence,
            captured_at: Instant::now(),
        })
    }

    fn release(&mut self) {
        self.script.log.released.fetch_add(1, Ordering::SeqCst);
    }
}

pub struct FakeModule {
    script: Script,
    fail_open: bool,
}

impl FakeModule {
    pub fn new(steps: &[Step], delay: Duration, log: Arc<DriverLog>) -> Self {
        Self {
            script: Script::new(steps, delay, log),
            fail_open: false,
        }
    }

    pub fn failing_open(log: Arc<DriverLog>) -> Self {
        Self {
            fail_open: true,
            ..Self::new(&[Step::Frame(0)], Duration::ZERO, log)
        }
    }
}

impl ModuleDriver for FakeModule {
    fn open(&mut self, _format: CaptureFormat) -> Result<(), CaptureError> {
        if self.fail_open {
            return Err(CaptureError::DeviceNotFound("fake-module".into()));
        }
        self.script.log.opened.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn capture(&mut self, buffer: &mut CaptureBuffer) -> Result<(), CaptureError> {
        if !buffer.is_empty() {
            self.script.log.dirty_buffers.fetch_add(1, Ordering::SeqCst);
        }
        let (tag, sequence) = self.script.next()?;
        buffer.data.extend_from_slice(&[tag; 12]);
        buffer.width = 2;
        buffer.height = 2;
        buffer.channels = 3;
        buffer.sequence = sequence;
        Ok(())
    }

    fn close(&mut self) {
        self.script.log.released.fetch_add(1, Ordering::SeqCst);
    }
}

/// Factory handing out one pre-built fake per source kind.
#[derive(Default)]
pub struct FakeDrivers {
    webcam: Mutex<Option<FakeWebcam>>,
    module: Mutex<Option<FakeModule>>,
    pub requested_index: Mutex<Option<u32>>,
}

impl FakeDrivers {
    pub fn with_webcam(webcam: FakeWebcam) -> Self {
        Self {
            webcam: Mutex::new(Some(webcam)),
            ..Self::default()
        }
    }

    pub fn with_module(module: FakeModule) -> Self {
        Self {
            module: Mutex::new(Some(module)),
            ..Self::default()
        }
    }
}

impl DriverFactory for FakeDrivers {
    fn open_webcam(
        &self,
        index: u32,
        _format: CaptureFormat,
    ) -> Result<Box<dyn WebcamDriver>, CaptureError> {
        *self.requested_index.lock().unwrap() = Some(index);
        match self.webcam.lock().unwrap().take() {
            Some(w) => Ok(Box::new(w)),
            None => Err(CaptureError::DeviceNotFound(format!("/dev/video{index}"))),
        }
    }

    fn camera_module(&self) -> Result<Box<dyn ModuleDriver>, CaptureError> {
        match self.module.lock().unwrap().take() {
            Some(m) => Ok(Box::new(m)),
            None => Err(CaptureError::DeviceNotFound("camera module".into())),
        }
    }
}

/// Poll `read()` until a frame shows up or `timeout` passes.
pub fn poll_frame<S: FrameSource>(stream: &S, timeout: Duration) -> Option<Arc<Frame>> {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if let Some(frame) = stream.read() {
            return Some(frame);
        }
        std::thread::sleep(Duration::from_millis(1));
    }
    None
}

/// Poll until `cond` holds or `timeout` passes.
pub fn poll_until(timeout: Duration, cond: impl Fn() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(1));
    }
    cond()
}
