//! FFmpeg-backed stream source (RTSP, HTTP, files)
//!
//! FFmpeg pushes decoded frames into a filter callback on its own threads. The
//! filter converts each frame to packed RGB and drops it into a private
//! [`LatestSlot`], which [`FfmpegSource::read_frame`] drains. Decoder-side
//! buffering is switched off so the newest frame is always the one read.
//!
//! A stream that stops delivering without FFmpeg noticing is reported as
//! disconnected after `max_stalled_reads` empty reads in a row, so the
//! reconnect loop takes over.

use ez_ffmpeg::core::context::null_output::create_null_output;
use ez_ffmpeg::core::scheduler::ffmpeg_scheduler::{FfmpegScheduler, Running};
use ez_ffmpeg::filter::frame_filter::FrameFilter;
use ez_ffmpeg::filter::frame_filter_context::FrameFilterContext;
use ez_ffmpeg::filter::frame_pipeline_builder::FramePipelineBuilder;
use ez_ffmpeg::{AVMediaType, FfmpegContext, Input};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use super::{redact_uri, Frame, LatestSlot, SourceError, VideoSource};
use crate::shared::CancelToken;

/// Longest a read waits before looking at the cancel token again
const CANCEL_POLL: Duration = Duration::from_millis(50);

/// Copies RGB24 frames out of FFmpeg into the shared slot
struct RgbSink {
    slot: Arc<LatestSlot<Frame>>,
    ended: Arc<AtomicBool>,
    sequence: Arc<AtomicU64>,
}

impl FrameFilter for RgbSink {
    fn media_type(&self) -> AVMediaType {
        AVMediaType::AVMEDIA_TYPE_VIDEO
    }

    fn init(&mut self, _ctx: &FrameFilterContext) -> Result<(), String> {
        debug!("ffmpeg decode filter started");
        Ok(())
    }

    fn filter_frame(
        &mut self,
        frame: ez_ffmpeg::Frame,
        _ctx: &FrameFilterContext,
    ) -> Result<Option<ez_ffmpeg::Frame>, String> {
        // SAFETY: the frame pointer is owned by FFmpeg for the duration of this
        // call; only plane 0 is read, which `format=rgb24` guarantees is packed
        // RGB with `linesize[0] >= width * 3`.
        unsafe {
            let raw = frame.as_ptr();
            if raw.is_null() || (*raw).data[0].is_null() {
                return Ok(Some(frame));
            }

            let width = (*raw).width as usize;
            let height = (*raw).height as usize;
            let stride = (*raw).linesize[0] as usize;
            let plane = (*raw).data[0];
            if width == 0 || height == 0 || stride < width * 3 {
                return Ok(Some(frame));
            }

            let row_bytes = width * 3;
            let mut data = Vec::with_capacity(row_bytes * height);
            for row in 0..height {
                let src = std::slice::from_raw_parts(plane.add(row * stride), row_bytes);
                data.extend_from_slice(src);
            }

            let sequence = self.sequence.fetch_add(1, Ordering::Relaxed);
            if let Some(decoded) = Frame::from_rgb(data, width as u32, height as u32, sequence) {
                self.slot.publish(decoded);
            }
        }

        Ok(Some(frame))
    }

    fn uninit(&mut self, _ctx: &FrameFilterContext) {
        self.ended.store(true, Ordering::Release);
        debug!("ffmpeg decode filter stopped");
    }
}

/// Video source decoded by FFmpeg
pub struct FfmpegSource {
    uri: String,
    read_timeout: Duration,
    low_latency: bool,
    max_stalled_reads: u32,
    stalled_reads: u32,
    cancel: Option<CancelToken>,
    slot: Arc<LatestSlot<Frame>>,
    ended: Arc<AtomicBool>,
    sequence: Arc<AtomicU64>,
    scheduler: Option<FfmpegScheduler<Running>>,
}

impl FfmpegSource {
    /// Buffering is minimal by default; see [`with_low_latency`](Self::with_low_latency)
    pub fn new(uri: impl Into<String>, read_timeout: Duration) -> Self {
        Self {
            uri: uri.into(),
            read_timeout,
            low_latency: true,
            max_stalled_reads: 3,
            stalled_reads: 0,
            cancel: None,
            slot: Arc::new(LatestSlot::new()),
            ended: Arc::new(AtomicBool::new(false)),
            sequence: Arc::new(AtomicU64::new(0)),
            scheduler: None,
        }
    }

    /// Toggle `fflags=nobuffer` and `flags=low_delay` on the input
    pub fn with_low_latency(mut self, enabled: bool) -> Self {
        self.low_latency = enabled;
        self
    }

    /// Empty reads in a row after which the stream counts as lost (min 1)
    pub fn with_max_stalled_reads(mut self, reads: u32) -> Self {
        self.max_stalled_reads = reads.max(1);
        self
    }

    /// FFmpeg input options for this URI
    fn input_options(&self) -> Vec<(&'static str, String)> {
        // Socket timeouts are in microseconds
        let timeout_us = self.read_timeout.as_micros().to_string();
        let mut opts = Vec::new();
        if self.uri.starts_with("rtsp://") || self.uri.starts_with("rtsps://") {
            opts.push(("rtsp_transport", "tcp".to_string()));
            opts.push(("timeout", timeout_us));
        } else if self.uri.starts_with("http://") || self.uri.starts_with("https://") {
            opts.push(("rw_timeout", timeout_us));
        }
        if self.low_latency {
            opts.push(("fflags", "nobuffer".to_string()));
            opts.push(("flags", "low_delay".to_string()));
        }
        opts
    }

    fn input(&self) -> Input {
        let options = self.input_options();
        let opts: HashMap<&str, &str> = options
            .iter()
            .map(|(key, value)| (*key, value.as_str()))
            .collect();
        Input::new(self.uri.as_str()).set_input_opts(opts)
    }

    fn is_cancelled(&self) -> bool {
        self.cancel.as_ref().map(|c| c.is_cancelled()).unwrap_or(false)
    }

    /// Wait for the next decoded frame of the open stream
    fn next_frame(&mut self) -> Result<Frame, SourceError> {
        let started = Instant::now();
        loop {
            let remaining = self.read_timeout.saturating_sub(started.elapsed());
            if let Some(frame) = self.slot.take_timeout(remaining.min(CANCEL_POLL)) {
                self.stalled_reads = 0;
                return Ok(frame);
            }
            if self.ended.load(Ordering::Acquire) {
                return Err(SourceError::Disconnected("stream ended".to_string()));
            }
            if self.is_cancelled() {
                return Err(SourceError::Transient("read cancelled".to_string()));
            }
            if started.elapsed() >= self.read_timeout {
                break;
            }
        }

        self.stalled_reads += 1;
        if self.stalled_reads >= self.max_stalled_reads {
            warn!(
                source = %self.describe(),
                reads = self.stalled_reads,
                "stream stalled, treating it as disconnected"
            );
            self.stalled_reads = 0;
            return Err(SourceError::Disconnected(format!(
                "no frame in {} reads of {} ms",
                self.max_stalled_reads,
                self.read_timeout.as_millis()
            )));
        }
        Err(SourceError::Transient(format!(
            "no frame within {} ms",
            self.read_timeout.as_millis()
        )))
    }

    fn open_err(&self, reason: impl ToString) -> SourceError {
        SourceError::Open {
            uri: self.describe(),
            reason: reason.to_string(),
        }
    }
}

impl VideoSource for FfmpegSource {
    fn open(&mut self) -> Result<(), SourceError> {
        self.close();

        // A fresh slot per connection so nothing from the previous one leaks through
        self.slot = Arc::new(LatestSlot::new());
        self.ended = Arc::new(AtomicBool::new(false));
        self.stalled_reads = 0;

        let sink = RgbSink {
            slot: self.slot.clone(),
            ended: self.ended.clone(),
            sequence: self.sequence.clone(),
        };
        let pipe: FramePipelineBuilder = AVMediaType::AVMEDIA_TYPE_VIDEO.into();
        let pipe = pipe.filter("plate-reader-sink", Box::new(sink));
        let output = create_null_output().add_frame_pipeline(pipe);

        let context = FfmpegContext::builder()
            .input(self.input())
            .filter_desc("format=rgb24")
            .output(output)
            .build()
            .map_err(|e| self.open_err(e))?;
        let scheduler = context.start().map_err(|e| self.open_err(e))?;

        info!(source = %self.describe(), "ffmpeg stream opened");
        self.scheduler = Some(scheduler);
        Ok(())
    }

    fn set_minimal_buffering(&mut self) {
        // The input flags are fixed once FFmpeg has opened the stream
        if !self.low_latency {
            debug!("low-latency flags are applied on the next open");
        }
    }

    fn attach_cancel(&mut self, cancel: CancelToken) {
        self.cancel = Some(cancel);
    }

    fn read_frame(&mut self) -> Result<Frame, SourceError> {
        if self.scheduler.is_none() {
            return Err(SourceError::Disconnected("stream not open".to_string()));
        }
        self.next_frame()
    }

    fn close(&mut self) {
        if let Some(scheduler) = self.scheduler.take() {
            scheduler.abort();
            debug!(source = %self.describe(), "ffmpeg stream closed");
        }
    }

    fn describe(&self) -> String {
        redact_uri(&self.uri)
    }
}

impl Drop for FfmpegSource {
    fn drop(&mut self) {
        self.close();
    }
}
