//! Scripted stand-ins for cameras and models, shared by unit tests

use anyhow::{anyhow, Result};
use image::{Rgb, RgbImage};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::capture::{Frame, SourceError, VideoSource};
use crate::shared::CancelToken;
use crate::vision::{BoxCoords, Candidate, PlateDetector, PlateRect, Roi, TextRecognizer};

/// Poll `condition` until it holds, failing the test after five seconds
pub fn wait_for(condition: impl Fn() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while !condition() {
        assert!(Instant::now() < deadline, "condition not met within 5s");
        std::thread::sleep(Duration::from_millis(2));
    }
}

/// Uniform gray frame
pub fn solid_frame(width: u32, height: u32, sequence: u64) -> Frame {
    Frame::new(RgbImage::from_pixel(width, height, Rgb([80, 80, 80])), sequence)
}

/// Small ROI whose pixels encode `index`, readable by [`EncodedPlateRecognizer`]
pub fn plate_roi(index: u64) -> Roi {
    let pixel = Rgb([(index / 256) as u8, (index % 256) as u8, 0]);
    let frame = RgbImage::from_pixel(4, 2, pixel);
    let rect = PlateRect::clamped(&BoxCoords::new(0.0, 0.0, 4.0, 2.0, 1.0), 4, 2)
        .expect("non-empty rect");
    Roi::from_frame(&frame, rect, 1.0, index)
}

/// Observations a test can make about a [`ScriptedSource`] it handed away
#[derive(Clone, Default)]
pub struct SourceObserver {
    open_calls: Arc<AtomicU32>,
    closed: Arc<AtomicBool>,
    minimal_buffering: Arc<AtomicBool>,
}

impl SourceObserver {
    pub fn open_calls(&self) -> u32 {
        self.open_calls.load(Ordering::SeqCst)
    }

    /// `close` was called since the last successful open
    pub fn closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn minimal_buffering_requested(&self) -> bool {
        self.minimal_buffering.load(Ordering::SeqCst)
    }
}

/// In-memory video source following a fixed script.
///
/// Fails the first `failing_opens` opens, then serves one session of
/// `transient_failures` failed reads followed by `frames` frames (forever if
/// `None`), then disconnects. Later opens fail.
pub struct ScriptedSource {
    failing_opens: u32,
    transient_failures: u32,
    frames: Option<u64>,
    delivered: u64,
    session_used: bool,
    open: bool,
    stall: Option<Duration>,
    cancel: Option<CancelToken>,
    observer: SourceObserver,
}

impl ScriptedSource {
    fn new(failing_opens: u32, transient_failures: u32, frames: Option<u64>) -> (Self, SourceObserver) {
        let observer = SourceObserver::default();
        let source = Self {
            failing_opens,
            transient_failures,
            frames,
            delivered: 0,
            session_used: false,
            open: false,
            stall: None,
            cancel: None,
            observer: observer.clone(),
        };
        (source, observer)
    }

    pub fn frames(count: u64) -> (Self, SourceObserver) {
        Self::new(0, 0, Some(count))
    }

    pub fn with_transient_failures(frames: u64, failures: u32) -> (Self, SourceObserver) {
        Self::new(0, failures, Some(frames))
    }

    pub fn failing_opens(failures: u32, frames_after: u64) -> (Self, SourceObserver) {
        Self::new(failures, 0, Some(frames_after))
    }

    pub fn endless() -> (Self, SourceObserver) {
        Self::new(0, 0, None)
    }

    /// Opens fine, then every read blocks for `block` before failing
    /// transiently, unless the attached cancel token fires first
    pub fn stalled(block: Duration) -> (Self, SourceObserver) {
        let (mut source, observer) = Self::new(0, 0, None);
        source.stall = Some(block);
        (source, observer)
    }
}

impl VideoSource for ScriptedSource {
    fn open(&mut self) -> Result<(), SourceError> {
        self.observer.open_calls.fetch_add(1, Ordering::SeqCst);
        if self.failing_opens > 0 {
            self.failing_opens -= 1;
            return Err(SourceError::Open {
                uri: self.describe(),
                reason: "scripted failure".to_string(),
            });
        }
        if self.session_used {
            return Err(SourceError::Open {
                uri: self.describe(),
                reason: "script exhausted".to_string(),
            });
        }
        self.session_used = true;
        self.open = true;
        self.observer.closed.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn set_minimal_buffering(&mut self) {
        self.observer.minimal_buffering.store(true, Ordering::SeqCst);
    }

    fn attach_cancel(&mut self, cancel: CancelToken) {
        self.cancel = Some(cancel);
    }

    fn read_frame(&mut self) -> Result<Frame, SourceError> {
        if !self.open {
            return Err(SourceError::Disconnected("not open".to_string()));
        }
        if let Some(block) = self.stall {
            match &self.cancel {
                Some(cancel) => {
                    cancel.wait_timeout(block);
                }
                None => std::thread::sleep(block),
            }
            return Err(SourceError::Transient("stalled".to_string()));
        }
        if self.transient_failures > 0 {
            self.transient_failures -= 1;
            return Err(SourceError::Transient("scripted glitch".to_string()));
        }
        match self.frames {
            Some(total) if self.delivered >= total => {
                Err(SourceError::Disconnected("end of script".to_string()))
            }
            Some(_) => {
                self.delivered += 1;
                Ok(solid_frame(16, 8, self.delivered - 1))
            }
            None => {
                std::thread::sleep(Duration::from_micros(200));
                self.delivered += 1;
                Ok(solid_frame(16, 8, self.delivered - 1))
            }
        }
    }

    fn close(&mut self) {
        self.open = false;
        self.observer.closed.store(true, Ordering::SeqCst);
    }

    fn describe(&self) -> String {
        "scripted".to_string()
    }
}

enum DetectorScript {
    Always(Vec<BoxCoords>),
    Failing,
    Panicking,
}

/// Detector returning the same answer for every frame
pub struct ScriptedDetector {
    script: DetectorScript,
}

impl ScriptedDetector {
    pub fn always(boxes: Vec<BoxCoords>) -> Self {
        Self {
            script: DetectorScript::Always(boxes),
        }
    }

    pub fn failing() -> Self {
        Self {
            script: DetectorScript::Failing,
        }
    }

    pub fn panicking() -> Self {
        Self {
            script: DetectorScript::Panicking,
        }
    }
}

impl PlateDetector for ScriptedDetector {
    fn detect(&mut self, _image: &RgbImage) -> Result<Vec<BoxCoords>> {
        match &self.script {
            DetectorScript::Always(boxes) => Ok(boxes.clone()),
            DetectorScript::Failing => Err(anyhow!("scripted detector failure")),
            DetectorScript::Panicking => panic!("scripted detector panic"),
        }
    }
}

/// Recognizer replaying queued responses, then a fixed fallback
pub struct ScriptedRecognizer {
    queued: VecDeque<Result<Vec<Candidate>, String>>,
    fallback: Vec<Candidate>,
    delay: Duration,
}

impl ScriptedRecognizer {
    pub fn always(candidates: Vec<Candidate>) -> Self {
        Self {
            queued: VecDeque::new(),
            fallback: candidates,
            delay: Duration::ZERO,
        }
    }

    /// Fail once, then answer `candidates`
    pub fn fail_then(candidates: Vec<Candidate>) -> Self {
        let mut recognizer = Self::always(candidates);
        recognizer.queued.push_back(Err("scripted recognizer failure".to_string()));
        recognizer
    }

    /// Sleep this long inside every call
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }
}

impl TextRecognizer for ScriptedRecognizer {
    fn recognize(&mut self, _crop: &RgbImage) -> Result<Vec<Candidate>> {
        if !self.delay.is_zero() {
            std::thread::sleep(self.delay);
        }
        match self.queued.pop_front() {
            Some(Ok(candidates)) => Ok(candidates),
            Some(Err(message)) => Err(anyhow!(message)),
            None => Ok(self.fallback.clone()),
        }
    }
}

/// Reads the index written by [`plate_roi`] back as plate `ABC0000`..`ABC9999`
pub struct EncodedPlateRecognizer;

impl TextRecognizer for EncodedPlateRecognizer {
    fn recognize(&mut self, crop: &RgbImage) -> Result<Vec<Candidate>> {
        let pixel = crop.get_pixel(0, 0);
        let index = pixel[0] as u32 * 256 + pixel[1] as u32;
        Ok(vec![
            Candidate::new(format!("abc{:04}", index), 0.9),
            Candidate::new("noise", 0.1),
        ])
    }
}
