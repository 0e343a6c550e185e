//! Rate-limited hand-off from detection to recognition

use crossbeam_channel::{unbounded, Receiver, Sender};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::trace;

use crate::config::RecognitionSettings;
use crate::shared::PipelineStats;
use crate::vision::Roi;

/// What happened to a submitted ROI
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitOutcome {
    /// Queued for a worker
    Enqueued,
    /// Dropped: the previous enqueue was too recent
    RateLimited,
    /// Dropped: the queue already holds `max_queue_depth` ROIs
    Saturated,
    /// Dropped: no worker is listening anymore
    Closed,
}

/// Single global gate in front of the recognition queue.
///
/// At most one ROI is let through per `min_interval`, whichever frame or box
/// it comes from. A zero interval disables the rate limit.
pub struct Dispatcher {
    sender: Sender<Roi>,
    min_interval: Duration,
    max_queue_depth: usize,
    last_enqueue: Mutex<Option<Instant>>,
    stats: Arc<PipelineStats>,
}

impl Dispatcher {
    /// Create a dispatcher and the queue its workers consume
    pub fn channel(
        min_interval: Duration,
        max_queue_depth: usize,
        stats: Arc<PipelineStats>,
    ) -> (Self, Receiver<Roi>) {
        let (sender, receiver) = unbounded();
        let dispatcher = Self {
            sender,
            min_interval,
            max_queue_depth: max_queue_depth.max(1),
            last_enqueue: Mutex::new(None),
            stats,
        };
        (dispatcher, receiver)
    }

    pub fn from_settings(
        settings: &RecognitionSettings,
        stats: Arc<PipelineStats>,
    ) -> (Self, Receiver<Roi>) {
        Self::channel(
            Duration::from_millis(settings.min_interval_ms),
            settings.max_queue_depth,
            stats,
        )
    }

    /// Offer `roi` to the workers. Never blocks beyond the gate lock.
    pub fn submit(&self, roi: Roi) -> SubmitOutcome {
        let mut last_enqueue = self.last_enqueue.lock();
        let now = Instant::now();

        if !self.min_interval.is_zero() {
            if let Some(previous) = *last_enqueue {
                if now.duration_since(previous) <= self.min_interval {
                    self.stats.roi_rate_limited();
                    return SubmitOutcome::RateLimited;
                }
            }
        }

        if self.sender.len() >= self.max_queue_depth {
            self.stats.roi_saturated();
            trace!(depth = self.sender.len(), "recognition queue saturated");
            return SubmitOutcome::Saturated;
        }

        match self.sender.send(roi) {
            Ok(()) => {
                *last_enqueue = Some(now);
                self.stats.roi_enqueued();
                SubmitOutcome::Enqueued
            }
            Err(_) => SubmitOutcome::Closed,
        }
    }

    /// ROIs waiting for a worker
    pub fn queue_depth(&self) -> usize {
        self.sender.len()
    }

    pub fn min_interval(&self) -> Duration {
        self.min_interval
    }
}
