//! YOLO license plate detector on ONNX Runtime
//!
//! Expects a YOLOv8-style export with one `[1, 4 + classes, anchors]` output
//! of center-format boxes and per-class scores.

use anyhow::{bail, Context, Result};
use image::RgbImage;
use ndarray::ArrayViewD;
use ort::value::Tensor;
use std::path::Path;

use super::models::OnnxSession;
use super::preprocess::{preprocess_for_detection, Letterbox};
use super::{non_max_suppression, BoxCoords, PlateDetector};
use crate::config::DetectionSettings;

/// Square input size of the exported model
pub const DEFAULT_INPUT_SIZE: u32 = 640;

/// Plate detector backed by a YOLO ONNX model
pub struct YoloPlateDetector {
    session: OnnxSession,
    input_size: u32,
    confidence_threshold: f32,
    iou_threshold: f32,
}

impl YoloPlateDetector {
    pub fn new(model_path: &Path, settings: &DetectionSettings) -> Result<Self> {
        Ok(Self {
            session: OnnxSession::new(model_path, 4)?,
            input_size: DEFAULT_INPUT_SIZE,
            confidence_threshold: settings.confidence_threshold,
            iou_threshold: settings.iou_threshold,
        })
    }
}

impl PlateDetector for YoloPlateDetector {
    fn detect(&mut self, image: &RgbImage) -> Result<Vec<BoxCoords>> {
        let (input, letterbox) = preprocess_for_detection(image, self.input_size);
        let input_name = self.session.input_name().to_string();
        let output_name = self.session.output_name().to_string();

        let outputs = self
            .session
            .session_mut()
            .run(ort::inputs![input_name.as_str() => Tensor::from_array(input)?])
            .context("plate detection inference failed")?;
        let output: ArrayViewD<f32> = outputs[output_name.as_str()]
            .try_extract_array()
            .context("failed to extract detector output")?;

        let boxes = decode_predictions(&output, &letterbox, self.confidence_threshold)?;
        let (width, height) = image.dimensions();
        let boxes = boxes
            .into_iter()
            .map(|b| BoxCoords {
                x1: b.x1.clamp(0.0, width as f32),
                y1: b.y1.clamp(0.0, height as f32),
                x2: b.x2.clamp(0.0, width as f32),
                y2: b.y2.clamp(0.0, height as f32),
                confidence: b.confidence,
            })
            .collect();

        Ok(non_max_suppression(boxes, self.iou_threshold))
    }
}

/// Turn raw `[1, 4 + classes, anchors]` predictions into boxes in the
/// coordinates of the image before letterboxing
fn decode_predictions(
    output: &ArrayViewD<f32>,
    letterbox: &Letterbox,
    confidence_threshold: f32,
) -> Result<Vec<BoxCoords>> {
    let shape = output.shape();
    if shape.len() != 3 || shape[0] != 1 || shape[1] < 5 {
        bail!("unexpected detector output shape {:?}", shape);
    }
    let attributes = shape[1];
    let anchors = shape[2];

    let mut boxes = Vec::new();
    for i in 0..anchors {
        let score = (4..attributes)
            .map(|c| output[[0, c, i]])
            .fold(f32::MIN, f32::max);
        if score < confidence_threshold {
            continue;
        }

        let cx = output[[0, 0, i]];
        let cy = output[[0, 1, i]];
        let w = output[[0, 2, i]];
        let h = output[[0, 3, i]];
        let (x1, y1) = letterbox.unmap(cx - w / 2.0, cy - h / 2.0);
        let (x2, y2) = letterbox.unmap(cx + w / 2.0, cy + h / 2.0);
        boxes.push(BoxCoords::new(x1, y1, x2, y2, score));
    }
    Ok(boxes)
}
