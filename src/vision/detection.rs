//! Plate detection stage
//!
//! Runs once per render tick on the newest captured frame: downsample,
//! detect, map boxes back to source resolution, cut one ROI per box and hand
//! each to the recognition dispatcher. Also produces the annotated frame the
//! presentation layer shows.

use chrono::{DateTime, Local};
use image::imageops::{self, FilterType};
use image::{Rgb, RgbImage};
use imageproc::drawing::draw_hollow_rect_mut;
use imageproc::rect::Rect;
use std::sync::Arc;
use tracing::{debug, trace, warn};

use super::{PlateDetector, PlateRect, Roi};
use crate::capture::{Frame, LatestSlot};
use crate::config::{DetectionSettings, DisplaySettings};
use crate::recognition::{Dispatcher, SubmitOutcome};
use crate::shared::{guarded, PipelineStats};

/// Box outline color on the display frame
const BOX_COLOR: Rgb<u8> = Rgb([0, 255, 0]);
/// Box outline thickness in source pixels
const BOX_THICKNESS: u32 = 2;

/// Frame prepared for the presentation layer
#[derive(Debug, Clone)]
pub struct DisplayFrame {
    /// Source frame with plate boxes drawn, resized to the display resolution
    pub image: RgbImage,
    /// Most recent plate crop, resized to the preview resolution
    pub preview: Option<RgbImage>,
    /// Plate boxes in source-frame pixels
    pub plates: Vec<PlateRect>,
    /// Sequence number of the source frame
    pub frame_sequence: u64,
    /// Wall-clock capture time of the source frame
    pub captured_at: DateTime<Local>,
}

/// Result of one detection tick
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// No new frame since the last tick
    Idle,
    /// A frame was processed
    Processed {
        /// Boxes that survived clamping
        plates: usize,
        /// ROIs accepted by the dispatcher
        enqueued: usize,
    },
    /// The detector failed; the frame was still shown, without boxes
    DetectorFailed,
}

/// Geometry used by the stage
#[derive(Debug, Clone, Copy)]
pub struct StageGeometry {
    pub work_size: (u32, u32),
    pub display_size: (u32, u32),
    pub preview_size: (u32, u32),
}

impl StageGeometry {
    pub fn from_settings(detection: &DetectionSettings, display: &DisplaySettings) -> Self {
        Self {
            work_size: (detection.work_width, detection.work_height),
            display_size: (display.width, display.height),
            preview_size: (display.preview_width, display.preview_height),
        }
    }
}

impl Default for StageGeometry {
    fn default() -> Self {
        Self::from_settings(&DetectionSettings::default(), &DisplaySettings::default())
    }
}

/// The detection stage. Owned by the ticker thread.
pub struct DetectionStage {
    frames: Arc<LatestSlot<Frame>>,
    display: Arc<LatestSlot<DisplayFrame>>,
    detector: Box<dyn PlateDetector>,
    dispatcher: Dispatcher,
    geometry: StageGeometry,
    last_preview: Option<RgbImage>,
    stats: Arc<PipelineStats>,
}

impl DetectionStage {
    pub fn new(
        frames: Arc<LatestSlot<Frame>>,
        display: Arc<LatestSlot<DisplayFrame>>,
        detector: Box<dyn PlateDetector>,
        dispatcher: Dispatcher,
        geometry: StageGeometry,
        stats: Arc<PipelineStats>,
    ) -> Self {
        Self {
            frames,
            display,
            detector,
            dispatcher,
            geometry,
            last_preview: None,
            stats,
        }
    }

    /// Process the newest frame, if there is one. Never waits for a frame.
    pub fn tick(&mut self) -> TickOutcome {
        self.stats.ticked();
        let Some(frame) = self.frames.try_take() else {
            return TickOutcome::Idle;
        };
        self.stats.frame_processed();

        let (plates, failed) = self.locate_plates(&frame);
        let mut enqueued = 0;
        for rect in &plates {
            let roi = Roi::from_frame(frame.image(), rect.0, rect.1, frame.sequence);
            self.last_preview = Some(imageops::resize(
                &roi.crop,
                self.geometry.preview_size.0,
                self.geometry.preview_size.1,
                FilterType::Triangle,
            ));
            match self.dispatcher.submit(roi) {
                SubmitOutcome::Enqueued => enqueued += 1,
                outcome => trace!(?outcome, "roi not enqueued"),
            }
        }

        let rects: Vec<PlateRect> = plates.into_iter().map(|(rect, _)| rect).collect();
        self.display.publish(self.render(&frame, &rects));

        if failed {
            TickOutcome::DetectorFailed
        } else {
            TickOutcome::Processed {
                plates: rects.len(),
                enqueued,
            }
        }
    }

    /// Detect on a downsampled copy and map the boxes back to source pixels.
    /// Returns the clamped rectangles with their scores and whether the
    /// detector failed.
    fn locate_plates(&mut self, frame: &Frame) -> (Vec<(PlateRect, f32)>, bool) {
        let (frame_w, frame_h) = frame.dimensions();
        let (work_w, work_h) = self.geometry.work_size;
        if frame_w == 0 || frame_h == 0 {
            return (Vec::new(), false);
        }

        let small = imageops::resize(frame.image(), work_w, work_h, FilterType::Triangle);
        let detector = &mut self.detector;
        let boxes = match guarded(|| detector.detect(&small)) {
            Ok(boxes) => boxes,
            Err(e) => {
                warn!(error = %e, frame = frame.sequence, "plate detector failed");
                self.stats.collaborator_failed();
                return (Vec::new(), true);
            }
        };
        self.stats.add_detections(boxes.len());

        let sx = frame_w as f32 / work_w as f32;
        let sy = frame_h as f32 / work_h as f32;
        let plates: Vec<(PlateRect, f32)> = boxes
            .iter()
            .filter_map(|b| {
                PlateRect::clamped(&b.scaled(sx, sy), frame_w, frame_h).map(|r| (r, b.confidence))
            })
            .collect();

        if plates.len() != boxes.len() {
            debug!(
                reported = boxes.len(),
                kept = plates.len(),
                "dropped degenerate plate boxes"
            );
        }
        (plates, false)
    }

    fn render(&self, frame: &Frame, plates: &[PlateRect]) -> DisplayFrame {
        let mut annotated = frame.image().clone();
        for plate in plates {
            draw_plate_box(&mut annotated, plate);
        }
        let (display_w, display_h) = self.geometry.display_size;
        DisplayFrame {
            image: imageops::resize(&annotated, display_w, display_h, FilterType::Triangle),
            preview: self.last_preview.clone(),
            plates: plates.to_vec(),
            frame_sequence: frame.sequence,
            captured_at: frame.captured_wall,
        }
    }
}

/// Draw a `BOX_THICKNESS` wide outline just inside `plate`
fn draw_plate_box(image: &mut RgbImage, plate: &PlateRect) {
    for inset in 0..BOX_THICKNESS {
        let width = plate.width().saturating_sub(2 * inset);
        let height = plate.height().saturating_sub(2 * inset);
        if width == 0 || height == 0 {
            break;
        }
        let rect = Rect::at((plate.x1() + inset) as i32, (plate.y1() + inset) as i32)
            .of_size(width, height);
        draw_hollow_rect_mut(image, rect, BOX_COLOR);
    }
}
