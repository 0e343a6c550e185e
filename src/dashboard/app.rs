//! Console dashboard
//!
//! Polls the pipeline every refresh interval and prints what changed: the
//! status line, new readings, and connection state. Optionally emits JSON
//! lines instead of text and keeps a PNG snapshot of the annotated frame.

use anyhow::{Context, Result};
use crossbeam_channel::{never, select, tick, Receiver};
use image::{imageops, ImageFormat, Rgb, RgbImage};
use serde::Serialize;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

use crate::app::PlatePipeline;
use crate::capture::{ConnectionState, LatestSlot};
use crate::config::DisplaySettings;
use crate::dashboard::commands::{Command, HELP};
use crate::dashboard::state::{describe_connection, DashboardState};
use crate::shared::{Reading, ResultAggregator, StatsSnapshot};
use crate::vision::{BrazilianPlateFormat, DisplayFrame, PlateValidator};

/// Border drawn around the plate preview in snapshots
const PREVIEW_BORDER: Rgb<u8> = Rgb([255, 255, 255]);

/// Dashboard output options
#[derive(Debug, Clone)]
pub struct DashboardOptions {
    pub refresh: Duration,
    /// Print JSON lines instead of text
    pub json: bool,
    /// Where to keep the latest annotated frame as PNG
    pub snapshot: Option<PathBuf>,
    /// Minimum time between two snapshot writes
    pub snapshot_interval: Duration,
}

impl DashboardOptions {
    pub fn from_settings(display: &DisplaySettings) -> Self {
        Self {
            refresh: Duration::from_millis(display.refresh_ms.max(1)),
            json: false,
            snapshot: None,
            snapshot_interval: Duration::from_secs(1),
        }
    }
}

/// Whether the dashboard loop should keep going
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Quit,
}

#[derive(Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
enum Event<'a> {
    Status {
        status: String,
        target: Option<&'a str>,
    },
    Reading {
        #[serde(flatten)]
        reading: &'a Reading,
    },
    Connection {
        state: String,
    },
    Stats {
        #[serde(flatten)]
        stats: &'a StatsSnapshot,
    },
    History {
        readings: &'a [Reading],
    },
}

/// Terminal presentation of a running pipeline
pub struct ConsoleDashboard<W: Write> {
    aggregator: Arc<ResultAggregator>,
    display: Arc<LatestSlot<DisplayFrame>>,
    options: DashboardOptions,
    state: DashboardState,
    out: W,
    latest_frame: Option<DisplayFrame>,
    frame_dirty: bool,
    last_snapshot: Option<Instant>,
}

impl<W: Write> ConsoleDashboard<W> {
    pub fn new(
        aggregator: Arc<ResultAggregator>,
        display: Arc<LatestSlot<DisplayFrame>>,
        options: DashboardOptions,
        out: W,
    ) -> Self {
        Self {
            aggregator,
            display,
            options,
            state: DashboardState::default(),
            out,
            latest_frame: None,
            frame_dirty: false,
            last_snapshot: None,
        }
    }

    /// Drive the dashboard until `quit`, cancellation, or the pipeline stops.
    /// `lines` carries raw stdin lines.
    pub fn run(&mut self, pipeline: &PlatePipeline, lines: Receiver<String>) -> Result<()> {
        let cancel = pipeline.cancel_token();
        let ticker = tick(self.options.refresh);
        let mut stdin_open = true;

        self.print_status()?;
        loop {
            let commands = if stdin_open { lines.clone() } else { never() };
            select! {
                recv(cancel.signal()) -> _ => break,
                recv(commands) -> line => match line {
                    Ok(line) => {
                        if self.handle_line(&line, pipeline.stats())? == Flow::Quit {
                            break;
                        }
                    }
                    Err(_) => {
                        debug!("stdin closed, commands disabled");
                        stdin_open = false;
                    }
                },
                recv(ticker) -> _ => {
                    self.refresh(pipeline.connection_state())?;
                    if !pipeline.is_running() {
                        warn!("pipeline stopped on its own");
                        break;
                    }
                }
            }
        }
        // Flush whatever arrived since the last tick
        self.refresh(pipeline.connection_state())
    }

    /// Print changes since the previous refresh and update the snapshot
    pub fn refresh(&mut self, connection: ConnectionState) -> Result<()> {
        if self.state.observe_connection(connection) {
            let state = describe_connection(&connection);
            if self.options.json {
                self.emit(&Event::Connection { state })?;
            } else {
                writeln!(self.out, "source: {}", state)?;
            }
        }

        self.print_changes()?;

        if let Some(frame) = self.display.try_take() {
            self.latest_frame = Some(frame);
            self.frame_dirty = true;
        }
        self.write_snapshot_if_due();
        Ok(())
    }

    /// Print readings and status changes the console has not shown yet
    fn print_changes(&mut self) -> Result<()> {
        let observed = self.state.observe(&self.aggregator.snapshot());
        for reading in &observed.readings {
            if self.options.json {
                self.emit(&Event::Reading { reading })?;
            } else {
                writeln!(
                    self.out,
                    "{}  {} ({:.2})",
                    reading.log_line(),
                    reading.status.label(),
                    reading.confidence
                )?;
            }
        }
        if observed.status_changed {
            self.print_status()?;
        }
        self.out.flush()?;
        Ok(())
    }

    /// Parse and apply one stdin line
    pub fn handle_line(&mut self, line: &str, stats: StatsSnapshot) -> Result<Flow> {
        match Command::parse(line) {
            Ok(Some(command)) => self.apply(command, stats),
            Ok(None) => Ok(Flow::Continue),
            Err(e) => {
                writeln!(self.out, "{}", e)?;
                Ok(Flow::Continue)
            }
        }
    }

    fn apply(&mut self, command: Command, stats: StatsSnapshot) -> Result<Flow> {
        match command {
            Command::SetTarget(raw) => {
                let target = self.aggregator.set_target(&raw);
                if !self.options.json && !BrazilianPlateFormat.is_valid(&target) {
                    writeln!(self.out, "note: {} is not a valid plate format, it can never match", target)?;
                }
                self.print_changes()?;
            }
            Command::ClearTarget => {
                self.aggregator.clear_target();
                self.print_changes()?;
            }
            Command::History => {
                let history = self.aggregator.history();
                if self.options.json {
                    self.emit(&Event::History { readings: &history })?;
                } else if history.is_empty() {
                    writeln!(self.out, "no readings yet")?;
                } else {
                    for reading in &history {
                        writeln!(self.out, "{}", reading.log_line())?;
                    }
                }
            }
            Command::Stats => {
                if self.options.json {
                    self.emit(&Event::Stats { stats: &stats })?;
                } else {
                    writeln!(self.out, "{}", stats)?;
                }
            }
            Command::Help => writeln!(self.out, "{}", HELP)?,
            Command::Quit => return Ok(Flow::Quit),
        }
        self.out.flush()?;
        Ok(Flow::Continue)
    }

    fn print_status(&mut self) -> Result<()> {
        if self.options.json {
            let target = self.state.target.clone();
            self.emit(&Event::Status {
                status: self.state.status.to_string(),
                target: target.as_deref(),
            })
        } else {
            writeln!(self.out, "== {} ==", self.state.status)?;
            Ok(())
        }
    }

    fn emit(&mut self, event: &Event<'_>) -> Result<()> {
        let line = serde_json::to_string(event).context("failed to encode dashboard event")?;
        writeln!(self.out, "{}", line)?;
        Ok(())
    }

    fn write_snapshot_if_due(&mut self) {
        let Some(path) = self.options.snapshot.clone() else {
            return;
        };
        let due = self
            .last_snapshot
            .map(|at| at.elapsed() >= self.options.snapshot_interval)
            .unwrap_or(true);
        if !self.frame_dirty || !due {
            return;
        }
        let Some(frame) = &self.latest_frame else {
            return;
        };

        let image = compose_snapshot(frame);
        let tmp = path.with_extension("png.tmp");
        let written = image
            .save_with_format(&tmp, ImageFormat::Png)
            .context("failed to encode snapshot")
            .and_then(|_| std::fs::rename(&tmp, &path).context("failed to replace snapshot"));
        match written {
            Ok(()) => debug!(path = %path.display(), "snapshot written"),
            Err(e) => warn!(error = %e, "snapshot not written"),
        }
        self.frame_dirty = false;
        self.last_snapshot = Some(Instant::now());
    }

    /// Give the writer back, e.g. to inspect test output
    pub fn into_inner(self) -> W {
        self.out
    }
}

/// The annotated frame with the plate preview pasted in its top-right corner
pub fn compose_snapshot(frame: &DisplayFrame) -> RgbImage {
    let mut image = frame.image.clone();
    let Some(preview) = &frame.preview else {
        return image;
    };
    let (width, height) = image.dimensions();
    let (pw, ph) = preview.dimensions();
    if pw + 4 > width || ph + 4 > height {
        return image;
    }

    let x = width - pw - 2;
    let y = 2;
    for bx in x - 1..x + pw + 1 {
        image.put_pixel(bx, y - 1, PREVIEW_BORDER);
        image.put_pixel(bx, y + ph, PREVIEW_BORDER);
    }
    for by in y - 1..y + ph + 1 {
        image.put_pixel(x - 1, by, PREVIEW_BORDER);
        image.put_pixel(x + pw, by, PREVIEW_BORDER);
    }
    imageops::replace(&mut image, preview, x as i64, y as i64);
    image
}
