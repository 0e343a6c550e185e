//! Frame data structures for decoded video

use chrono::{DateTime, Local};
use image::RgbImage;
use std::sync::Arc;
use std::time::Instant;

/// A decoded video frame
///
/// Pixels are shared behind an `Arc`; cloning a frame never copies the bitmap
/// and nothing mutates it after capture.
#[derive(Debug, Clone)]
pub struct Frame {
    /// RGB pixel data
    image: Arc<RgbImage>,
    /// Monotonic capture time
    pub captured_at: Instant,
    /// Wall-clock capture time
    pub captured_wall: DateTime<Local>,
    /// Capture order within one frame source run
    pub sequence: u64,
}

impl Frame {
    /// Wrap a decoded image, stamping it with the current time
    pub fn new(image: RgbImage, sequence: u64) -> Self {
        Self {
            image: Arc::new(image),
            captured_at: Instant::now(),
            captured_wall: Local::now(),
            sequence,
        }
    }

    /// Build a frame from packed RGB24 bytes
    pub fn from_rgb(data: Vec<u8>, width: u32, height: u32, sequence: u64) -> Option<Self> {
        RgbImage::from_raw(width, height, data).map(|image| Self::new(image, sequence))
    }

    pub fn image(&self) -> &RgbImage {
        &self.image
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    /// Get frame dimensions as (width, height)
    pub fn dimensions(&self) -> (u32, u32) {
        self.image.dimensions()
    }
}
