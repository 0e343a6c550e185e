//! Pipeline counters
//!
//! Lock-free counters bumped by every stage and read by the presentation
//! layer and the shutdown report.

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

/// Counters shared by all pipeline stages
#[derive(Debug, Default)]
pub struct PipelineStats {
    frames_captured: AtomicU64,
    frames_overwritten: AtomicU64,
    read_failures: AtomicU64,
    reconnects: AtomicU64,
    ticks: AtomicU64,
    frames_processed: AtomicU64,
    detections: AtomicU64,
    rois_enqueued: AtomicU64,
    rois_rate_limited: AtomicU64,
    rois_saturated: AtomicU64,
    readings_accepted: AtomicU64,
    readings_rejected: AtomicU64,
    collaborator_failures: AtomicU64,
}

/// Point-in-time copy of [`PipelineStats`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StatsSnapshot {
    pub frames_captured: u64,
    pub frames_overwritten: u64,
    pub read_failures: u64,
    pub reconnects: u64,
    pub ticks: u64,
    pub frames_processed: u64,
    pub detections: u64,
    pub rois_enqueued: u64,
    pub rois_rate_limited: u64,
    pub rois_saturated: u64,
    pub readings_accepted: u64,
    pub readings_rejected: u64,
    pub collaborator_failures: u64,
}

macro_rules! counter {
    ($inc:ident, $field:ident) => {
        pub fn $inc(&self) {
            self.$field.fetch_add(1, Ordering::Relaxed);
        }
    };
}

impl PipelineStats {
    pub fn new() -> Self {
        Self::default()
    }

    counter!(frame_captured, frames_captured);
    counter!(frame_overwritten, frames_overwritten);
    counter!(read_failed, read_failures);
    counter!(reconnected, reconnects);
    counter!(ticked, ticks);
    counter!(frame_processed, frames_processed);
    counter!(roi_enqueued, rois_enqueued);
    counter!(roi_rate_limited, rois_rate_limited);
    counter!(roi_saturated, rois_saturated);
    counter!(reading_accepted, readings_accepted);
    counter!(reading_rejected, readings_rejected);
    counter!(collaborator_failed, collaborator_failures);

    /// Add `count` boxes reported by the detector
    pub fn add_detections(&self, count: usize) {
        self.detections.fetch_add(count as u64, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            frames_captured: self.frames_captured.load(Ordering::Relaxed),
            frames_overwritten: self.frames_overwritten.load(Ordering::Relaxed),
            read_failures: self.read_failures.load(Ordering::Relaxed),
            reconnects: self.reconnects.load(Ordering::Relaxed),
            ticks: self.ticks.load(Ordering::Relaxed),
            frames_processed: self.frames_processed.load(Ordering::Relaxed),
            detections: self.detections.load(Ordering::Relaxed),
            rois_enqueued: self.rois_enqueued.load(Ordering::Relaxed),
            rois_rate_limited: self.rois_rate_limited.load(Ordering::Relaxed),
            rois_saturated: self.rois_saturated.load(Ordering::Relaxed),
            readings_accepted: self.readings_accepted.load(Ordering::Relaxed),
            readings_rejected: self.readings_rejected.load(Ordering::Relaxed),
            collaborator_failures: self.collaborator_failures.load(Ordering::Relaxed),
        }
    }
}

impl std::fmt::Display for StatsSnapshot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "frames {} (overwritten {}, processed {}), detections {}, rois {} queued / {} rate-limited / {} saturated, readings {} accepted / {} rejected, failures {} read / {} collaborator, reconnects {}",
            self.frames_captured,
            self.frames_overwritten,
            self.frames_processed,
            self.detections,
            self.rois_enqueued,
            self.rois_rate_limited,
            self.rois_saturated,
            self.readings_accepted,
            self.readings_rejected,
            self.read_failures,
            self.collaborator_failures,
            self.reconnects,
        )
    }
}
