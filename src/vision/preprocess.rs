//! Image preprocessing for ONNX models
//!
//! Handles resizing, normalization, and tensor conversion for the plate
//! detector and the text recognizer.

use image::imageops::{self, FilterType};
use image::{Rgb, RgbImage};
use ndarray::{Array3, Array4};

/// Gray used to pad letterboxed detector input
const LETTERBOX_FILL: Rgb<u8> = Rgb([114, 114, 114]);

/// Recognizer input configuration
#[derive(Debug, Clone)]
pub struct RecognizerInput {
    /// Fixed input height (typically 32 or 48)
    pub height: u32,
    /// Maximum input width; wider crops are squeezed
    pub max_width: u32,
    /// Mean values for normalization [R, G, B]
    pub mean: [f32; 3],
    /// Std values for normalization [R, G, B]
    pub std: [f32; 3],
}

impl Default for RecognizerInput {
    fn default() -> Self {
        Self {
            height: 48,
            max_width: 320,
            // (pixel / 255 - 0.5) / 0.5 maps [0, 255] to [-1, 1]
            mean: [0.5, 0.5, 0.5],
            std: [0.5, 0.5, 0.5],
        }
    }
}

/// How an image was fitted into a square model input
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Letterbox {
    pub scale: f32,
    pub pad_x: f32,
    pub pad_y: f32,
}

impl Letterbox {
    /// Map a model-space coordinate back to the original image
    pub fn unmap(&self, x: f32, y: f32) -> (f32, f32) {
        ((x - self.pad_x) / self.scale, (y - self.pad_y) / self.scale)
    }
}

/// Convert an RGB image to an HWC f32 array in 0-1
pub fn rgb_to_f32(image: &RgbImage) -> Array3<f32> {
    let (width, height) = image.dimensions();
    Array3::from_shape_fn((height as usize, width as usize, 3), |(y, x, c)| {
        image.get_pixel(x as u32, y as u32)[c] as f32 / 255.0
    })
}

/// Normalize image with mean and std
pub fn normalize(image: &Array3<f32>, mean: &[f32; 3], std: &[f32; 3]) -> Array3<f32> {
    let mut normalized = image.clone();
    for ((_, _, c), value) in normalized.indexed_iter_mut() {
        *value = (*value - mean[c]) / std[c];
    }
    normalized
}

/// Convert HWC image to NCHW tensor (batch size 1)
pub fn hwc_to_nchw(image: &Array3<f32>) -> Array4<f32> {
    let (h, w, c) = image.dim();
    Array4::from_shape_fn((1, c, h, w), |(_, ch, y, x)| image[[y, x, ch]])
}

/// Fit `image` into a `size`×`size` square, keeping aspect ratio and padding
/// the rest with gray
pub fn letterbox(image: &RgbImage, size: u32) -> (RgbImage, Letterbox) {
    let (width, height) = image.dimensions();
    let scale = size as f32 / width.max(height).max(1) as f32;
    let new_w = ((width as f32 * scale).round() as u32).clamp(1, size);
    let new_h = ((height as f32 * scale).round() as u32).clamp(1, size);
    let resized = imageops::resize(image, new_w, new_h, FilterType::Triangle);

    let pad_x = (size - new_w) / 2;
    let pad_y = (size - new_h) / 2;
    let mut canvas = RgbImage::from_pixel(size, size, LETTERBOX_FILL);
    imageops::replace(&mut canvas, &resized, pad_x as i64, pad_y as i64);

    (
        canvas,
        Letterbox {
            scale,
            pad_x: pad_x as f32,
            pad_y: pad_y as f32,
        },
    )
}

/// Detector input: letterboxed, scaled to 0-1, NCHW
pub fn preprocess_for_detection(image: &RgbImage, size: u32) -> (Array4<f32>, Letterbox) {
    let (boxed, letterbox) = letterbox(image, size);
    (hwc_to_nchw(&rgb_to_f32(&boxed)), letterbox)
}

/// Recognizer input: fixed height, aspect-preserving width, normalized, NCHW
pub fn preprocess_for_recognition(crop: &RgbImage, input: &RecognizerInput) -> Array4<f32> {
    let (width, height) = crop.dimensions();
    let scale = input.height as f32 / height.max(1) as f32;
    let new_w = ((width as f32 * scale).round() as u32).clamp(1, input.max_width);
    let resized = imageops::resize(crop, new_w, input.height, FilterType::Triangle);

    let normalized = normalize(&rgb_to_f32(&resized), &input.mean, &input.std);
    hwc_to_nchw(&normalized)
}
