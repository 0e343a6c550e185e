//! Application Coordinator
//!
//! Builds every pipeline stage, wires them together and owns their threads:
//! frame source → latest-frame slot → detection ticker → dispatcher →
//! recognition workers → result aggregator. The presentation layer only
//! talks to the handles exposed here.

use anyhow::{Context, Result};
use crossbeam_channel::{select, tick};
use parking_lot::RwLock;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use crate::capture::{self, Backoff, ConnectionState, Frame, FrameSource, LatestSlot, SourceExit, VideoSource};
use crate::config::AppConfig;
use crate::recognition::{Dispatcher, PoolContext, RecognitionPool, ShutdownReport};
use crate::shared::{CancelToken, PipelineStats, ResultAggregator, StatsSnapshot};
use crate::vision::detection::StageGeometry;
use crate::vision::{
    BrazilianPlateFormat, DetectionStage, DisplayFrame, ModelManager, PlateDetector, PlateValidator,
    TextRecognizer, WholeFrameDetector,
};

/// Creates one recognizer per worker, given the worker index
pub type RecognizerFactory = Box<dyn FnMut(usize) -> Result<Box<dyn TextRecognizer>> + Send>;

/// How often the detection thread logs pipeline counters
const STATS_LOG_INTERVAL: Duration = Duration::from_secs(30);

/// The external pieces a pipeline runs with
pub struct Collaborators {
    pub source: Box<dyn VideoSource>,
    pub detector: Box<dyn PlateDetector>,
    pub recognizers: RecognizerFactory,
    pub validator: Arc<dyn PlateValidator>,
}

impl Collaborators {
    /// Build the source and models named in `config`
    pub fn from_config(config: &AppConfig) -> Result<Self> {
        // Before any camera connection or model directory is touched
        ensure_recognition_available()?;
        let source = capture::open_source(&config.stream)?;
        let models = ModelManager::new()?;
        Ok(Self {
            source,
            detector: build_detector(config, &models)?,
            recognizers: build_recognizer_factory(config, &models)?,
            validator: Arc::new(BrazilianPlateFormat),
        })
    }
}

#[cfg(not(feature = "onnx"))]
const NO_RECOGNITION: &str =
    "text recognition needs a build with the `onnx` feature (cargo build --features onnx)";

#[cfg(feature = "onnx")]
fn ensure_recognition_available() -> Result<()> {
    Ok(())
}

#[cfg(not(feature = "onnx"))]
fn ensure_recognition_available() -> Result<()> {
    anyhow::bail!(NO_RECOGNITION)
}

#[cfg(feature = "onnx")]
fn build_detector(config: &AppConfig, models: &ModelManager) -> Result<Box<dyn PlateDetector>> {
    use crate::vision::{ModelType, YoloPlateDetector};

    let configured = config.detection.model_path.as_deref();
    match models.resolve(ModelType::PlateDetector, configured) {
        Ok(path) => Ok(Box::new(YoloPlateDetector::new(&path, &config.detection)?)),
        Err(e) if configured.is_none() => {
            warn!(error = %e, "no plate detector model, treating whole frames as plates");
            Ok(Box::new(WholeFrameDetector))
        }
        Err(e) => Err(e),
    }
}

#[cfg(not(feature = "onnx"))]
fn build_detector(config: &AppConfig, _models: &ModelManager) -> Result<Box<dyn PlateDetector>> {
    if config.detection.model_path.is_some() {
        anyhow::bail!("detection.model_path is set but this build has no `onnx` feature");
    }
    warn!("built without `onnx`, treating whole frames as plates");
    Ok(Box::new(WholeFrameDetector))
}

#[cfg(feature = "onnx")]
fn build_recognizer_factory(config: &AppConfig, models: &ModelManager) -> Result<RecognizerFactory> {
    use crate::vision::{CtcTextRecognizer, ModelType};

    let model = models.resolve(ModelType::TextRecognizer, config.recognition.model_path.as_deref())?;
    let dictionary = models.resolve(ModelType::Dictionary, config.recognition.dictionary_path.as_deref())?;
    Ok(Box::new(move |_worker| {
        Ok(Box::new(CtcTextRecognizer::new(&model, &dictionary)?) as Box<dyn TextRecognizer>)
    }))
}

#[cfg(not(feature = "onnx"))]
fn build_recognizer_factory(_config: &AppConfig, _models: &ModelManager) -> Result<RecognizerFactory> {
    anyhow::bail!(NO_RECOGNITION)
}

/// What [`PlatePipeline::shutdown`] managed to stop
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ShutdownSummary {
    pub source_stopped: bool,
    pub detection_stopped: bool,
    pub workers: ShutdownReport,
}

/// Main application coordinator
pub struct PlatePipeline {
    cancel: CancelToken,
    aggregator: Arc<ResultAggregator>,
    stats: Arc<PipelineStats>,
    display: Arc<LatestSlot<DisplayFrame>>,
    connection: Arc<RwLock<ConnectionState>>,
    source_thread: Option<JoinHandle<SourceExit>>,
    detection_thread: Option<JoinHandle<()>>,
    pool: Option<RecognitionPool>,
    grace: Duration,
    started_at: Instant,
    stopped: bool,
}

impl PlatePipeline {
    /// Validate `config`, then start every stage
    pub fn start(config: &AppConfig, collaborators: Collaborators) -> Result<Self> {
        config.validate()?;
        let Collaborators {
            source,
            detector,
            recognizers,
            validator,
        } = collaborators;

        let cancel = CancelToken::new();
        let stats = Arc::new(PipelineStats::new());
        let aggregator = Arc::new(ResultAggregator::new(config.history.capacity));
        let frames: Arc<LatestSlot<Frame>> = Arc::new(LatestSlot::new());
        let display = Arc::new(LatestSlot::new());
        let grace = Duration::from_millis(config.recognition.shutdown_grace_ms);

        let (dispatcher, queue) = Dispatcher::from_settings(&config.recognition, stats.clone());
        let context = PoolContext {
            aggregator: aggregator.clone(),
            validator,
            stats: stats.clone(),
            min_confidence: config.recognition.min_confidence,
        };
        let pool = RecognitionPool::spawn(
            config.recognition.workers,
            queue,
            context,
            cancel.clone(),
            grace,
            recognizers,
        )?;

        let mut pipeline = Self {
            cancel: cancel.clone(),
            aggregator,
            stats: stats.clone(),
            display: display.clone(),
            connection: Arc::new(RwLock::new(ConnectionState::Connecting)),
            source_thread: None,
            detection_thread: None,
            pool: Some(pool),
            grace,
            started_at: Instant::now(),
            stopped: false,
        };

        let stage = DetectionStage::new(
            frames.clone(),
            display,
            detector,
            dispatcher,
            StageGeometry::from_settings(&config.detection, &config.display),
            stats.clone(),
        );
        let tick_interval = Duration::from_millis(config.detection.render_tick_ms);
        pipeline.detection_thread = Some(spawn_detection(stage, tick_interval, stats.clone(), cancel.clone())?);

        let frame_source = FrameSource::new(source, Backoff::from_settings(&config.stream), stats);
        pipeline.connection = frame_source.state_handle();
        pipeline.source_thread = Some(
            frame_source
                .spawn(frames, cancel)
                .context("failed to spawn frame source thread")?,
        );

        info!(
            workers = config.recognition.workers,
            tick_ms = config.detection.render_tick_ms,
            min_interval_ms = config.recognition.min_interval_ms,
            "pipeline started"
        );
        Ok(pipeline)
    }

    /// Shared result state (target, current match, history)
    pub fn aggregator(&self) -> Arc<ResultAggregator> {
        self.aggregator.clone()
    }

    /// Newest annotated frame for display
    pub fn display(&self) -> Arc<LatestSlot<DisplayFrame>> {
        self.display.clone()
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    pub fn connection_state(&self) -> ConnectionState {
        *self.connection.read()
    }

    /// Token that stops the whole pipeline when cancelled
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    pub fn uptime(&self) -> Duration {
        self.started_at.elapsed()
    }

    /// False once cancelled or once the frame source has given up
    pub fn is_running(&self) -> bool {
        !self.cancel.is_cancelled()
            && self
                .source_thread
                .as_ref()
                .map(|h| !h.is_finished())
                .unwrap_or(false)
    }

    /// Stop every stage. Threads that do not exit within the grace period
    /// are detached with a warning.
    pub fn shutdown(&mut self) -> ShutdownSummary {
        if self.stopped {
            return ShutdownSummary::default();
        }
        self.stopped = true;
        info!("pipeline shutting down");
        self.cancel.cancel();

        let detection_stopped = join_within(self.detection_thread.take(), self.grace, "detection").is_some();
        let source_stopped = match join_within(self.source_thread.take(), self.grace, "frame source") {
            Some(exit) => {
                debug!(?exit, "frame source joined");
                true
            }
            None => false,
        };
        let workers = self
            .pool
            .as_mut()
            .map(|pool| pool.shutdown())
            .unwrap_or_default();

        let summary = ShutdownSummary {
            source_stopped,
            detection_stopped,
            workers,
        };
        info!(stats = %self.stats.snapshot(), "pipeline stopped");
        summary
    }
}

impl Drop for PlatePipeline {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Run the detection stage once per tick until cancelled
fn spawn_detection(
    mut stage: DetectionStage,
    interval: Duration,
    stats: Arc<PipelineStats>,
    cancel: CancelToken,
) -> Result<JoinHandle<()>> {
    std::thread::Builder::new()
        .name("detection".to_string())
        .spawn(move || {
            let ticker = tick(interval);
            let stats_ticker = tick(STATS_LOG_INTERVAL);
            loop {
                select! {
                    recv(cancel.signal()) -> _ => break,
                    recv(ticker) -> _ => {
                        stage.tick();
                    }
                    recv(stats_ticker) -> _ => info!(stats = %stats.snapshot(), "pipeline stats"),
                }
            }
            debug!("detection stage stopped");
            // Dropping the stage drops the dispatcher and closes the work queue
        })
        .context("failed to spawn detection thread")
}

/// Join `handle` if it finishes within `grace`, else detach it
fn join_within<T>(handle: Option<JoinHandle<T>>, grace: Duration, name: &str) -> Option<T> {
    let handle = handle?;
    let deadline = Instant::now() + grace;
    while !handle.is_finished() {
        if Instant::now() >= deadline {
            warn!(thread = name, grace_ms = grace.as_millis() as u64, "thread did not stop in time, detaching");
            return None;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    match handle.join() {
        Ok(value) => Some(value),
        Err(_) => {
            warn!(thread = name, "thread panicked");
            None
        }
    }
}
