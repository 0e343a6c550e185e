//! Vision Layer
//!
//! Plate localization and text recognition on captured frames. The models
//! themselves sit behind two traits so the pipeline can run with any backend:
//! - [`PlateDetector`]: finds plate boxes in a downsampled frame
//! - [`TextRecognizer`]: reads text candidates from a plate crop
//!
//! ONNX Runtime implementations of both are available with the `onnx` feature.

pub mod detection;
pub mod models;
pub mod plate;

#[cfg(feature = "onnx")]
pub mod ocr;
#[cfg(feature = "onnx")]
pub mod plate_detector;
#[cfg(feature = "onnx")]
pub mod preprocess;

use anyhow::Result;
use image::RgbImage;

pub use detection::{DetectionStage, DisplayFrame, TickOutcome};
pub use models::{ModelManager, ModelType};
pub use plate::{normalize_plate, BrazilianPlateFormat, PlateValidator};

#[cfg(feature = "onnx")]
pub use models::OnnxSession;
#[cfg(feature = "onnx")]
pub use ocr::CtcTextRecognizer;
#[cfg(feature = "onnx")]
pub use plate_detector::YoloPlateDetector;

/// Axis-aligned box reported by a detector, in the coordinates of the image
/// it was given
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoxCoords {
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
    /// Detector score (0.0 - 1.0)
    pub confidence: f32,
}

impl BoxCoords {
    pub fn new(x1: f32, y1: f32, x2: f32, y2: f32, confidence: f32) -> Self {
        Self { x1, y1, x2, y2, confidence }
    }

    pub fn area(&self) -> f32 {
        (self.x2 - self.x1).max(0.0) * (self.y2 - self.y1).max(0.0)
    }

    /// Intersection over union with `other`
    pub fn iou(&self, other: &BoxCoords) -> f32 {
        let ix1 = self.x1.max(other.x1);
        let iy1 = self.y1.max(other.y1);
        let ix2 = self.x2.min(other.x2);
        let iy2 = self.y2.min(other.y2);
        let intersection = (ix2 - ix1).max(0.0) * (iy2 - iy1).max(0.0);
        let union = self.area() + other.area() - intersection;
        if union <= 0.0 {
            0.0
        } else {
            intersection / union
        }
    }

    /// Scale by independent horizontal and vertical factors
    pub fn scaled(&self, sx: f32, sy: f32) -> Self {
        Self {
            x1: self.x1 * sx,
            y1: self.y1 * sy,
            x2: self.x2 * sx,
            y2: self.y2 * sy,
            confidence: self.confidence,
        }
    }
}

/// Greedy non-maximum suppression: keep the strongest box of every cluster
/// overlapping by more than `iou_threshold`
pub fn non_max_suppression(mut boxes: Vec<BoxCoords>, iou_threshold: f32) -> Vec<BoxCoords> {
    boxes.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));
    let mut kept: Vec<BoxCoords> = Vec::with_capacity(boxes.len());
    for candidate in boxes {
        if kept.iter().all(|k| k.iou(&candidate) <= iou_threshold) {
            kept.push(candidate);
        }
    }
    kept
}

/// Integer plate rectangle in source-frame pixels.
///
/// Always non-empty and inside the frame it was clamped against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlateRect {
    x1: u32,
    y1: u32,
    x2: u32,
    y2: u32,
}

impl PlateRect {
    /// Round `coords` to pixels and clamp them to a `width`×`height` frame.
    /// Returns `None` when nothing of the box is left.
    pub fn clamped(coords: &BoxCoords, width: u32, height: u32) -> Option<Self> {
        let clamp = |v: f32, max: u32| -> u32 {
            if v.is_nan() {
                0
            } else {
                v.round().clamp(0.0, max as f32) as u32
            }
        };
        let (x1, x2) = (clamp(coords.x1, width), clamp(coords.x2, width));
        let (y1, y2) = (clamp(coords.y1, height), clamp(coords.y2, height));
        let (x1, x2) = (x1.min(x2), x1.max(x2));
        let (y1, y2) = (y1.min(y2), y1.max(y2));
        (x1 < x2 && y1 < y2).then_some(Self { x1, y1, x2, y2 })
    }

    pub fn x1(&self) -> u32 {
        self.x1
    }

    pub fn y1(&self) -> u32 {
        self.y1
    }

    pub fn x2(&self) -> u32 {
        self.x2
    }

    pub fn y2(&self) -> u32 {
        self.y2
    }

    pub fn width(&self) -> u32 {
        self.x2 - self.x1
    }

    pub fn height(&self) -> u32 {
        self.y2 - self.y1
    }
}

/// A plate region cut out of a frame, handed to the recognition stage
#[derive(Debug, Clone)]
pub struct Roi {
    /// Where the crop came from, in source-frame pixels
    pub rect: PlateRect,
    /// Detector score for this region
    pub detection_confidence: f32,
    /// Owned copy of the plate pixels
    pub crop: RgbImage,
    /// Sequence number of the source frame
    pub frame_sequence: u64,
}

impl Roi {
    /// Crop `rect` out of `frame`
    pub fn from_frame(frame: &RgbImage, rect: PlateRect, detection_confidence: f32, frame_sequence: u64) -> Self {
        let crop =
            image::imageops::crop_imm(frame, rect.x1, rect.y1, rect.width(), rect.height()).to_image();
        Self {
            rect,
            detection_confidence,
            crop,
            frame_sequence,
        }
    }
}

/// A text reading proposed by a recognizer
#[derive(Debug, Clone, PartialEq)]
pub struct Candidate {
    pub text: String,
    /// Recognition score (0.0 - 1.0)
    pub confidence: f32,
}

impl Candidate {
    pub fn new(text: impl Into<String>, confidence: f32) -> Self {
        Self {
            text: text.into(),
            confidence,
        }
    }
}

/// Highest-confidence candidate, if any
pub fn best_candidate(candidates: Vec<Candidate>) -> Option<Candidate> {
    candidates
        .into_iter()
        .filter(|c| !c.confidence.is_nan())
        .max_by(|a, b| a.confidence.total_cmp(&b.confidence))
}

/// Locates license plates in an image
pub trait PlateDetector: Send {
    /// Boxes in the coordinates of `image`
    fn detect(&mut self, image: &RgbImage) -> Result<Vec<BoxCoords>>;
}

/// Reads text from a plate crop
pub trait TextRecognizer: Send {
    /// Zero or more readings of `crop`, in any order
    fn recognize(&mut self, crop: &RgbImage) -> Result<Vec<Candidate>>;
}

/// Treats the whole frame as one plate region.
///
/// For sources that already deliver tight plate crops, such as image sets
/// exported from another detector.
#[derive(Debug, Clone, Copy, Default)]
pub struct WholeFrameDetector;

impl PlateDetector for WholeFrameDetector {
    fn detect(&mut self, image: &RgbImage) -> Result<Vec<BoxCoords>> {
        if image.width() == 0 || image.height() == 0 {
            return Ok(Vec::new());
        }
        Ok(vec![BoxCoords::new(
            0.0,
            0.0,
            image.width() as f32,
            image.height() as f32,
            1.0,
        )])
    }
}
