//! Directory-of-images video source
//!
//! Replays still images in file-name order at a fixed frame rate. Useful for
//! offline testing against recorded footage without a camera.

use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

use super::{Frame, SourceError, VideoSource};

const IMAGE_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "bmp"];

/// Video source backed by a directory of still images
pub struct ImageDirSource {
    dir: PathBuf,
    frame_interval: Duration,
    loop_source: bool,
    files: Vec<PathBuf>,
    position: usize,
    sequence: u64,
    next_due: Option<Instant>,
    opened: bool,
}

impl ImageDirSource {
    /// `fps` of zero disables pacing
    pub fn new(dir: impl Into<PathBuf>, fps: u32, loop_source: bool) -> Self {
        let frame_interval = if fps == 0 {
            Duration::ZERO
        } else {
            Duration::from_secs_f64(1.0 / fps as f64)
        };
        Self {
            dir: dir.into(),
            frame_interval,
            loop_source,
            files: Vec::new(),
            position: 0,
            sequence: 0,
            next_due: None,
            opened: false,
        }
    }

    fn list_images(dir: &Path) -> std::io::Result<Vec<PathBuf>> {
        let mut files: Vec<PathBuf> = std::fs::read_dir(dir)?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|path| {
                path.extension()
                    .and_then(|ext| ext.to_str())
                    .map(|ext| IMAGE_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
                    .unwrap_or(false)
            })
            .collect();
        files.sort();
        Ok(files)
    }

    /// Sleep until the next frame is due
    fn pace(&mut self) {
        if self.frame_interval.is_zero() {
            return;
        }
        let now = Instant::now();
        let due = self.next_due.unwrap_or(now);
        if due > now {
            std::thread::sleep(due - now);
        }
        // Don't try to catch up after a stall
        self.next_due = Some(due.max(now) + self.frame_interval);
    }
}

impl VideoSource for ImageDirSource {
    fn open(&mut self) -> Result<(), SourceError> {
        let files = Self::list_images(&self.dir).map_err(|e| SourceError::Open {
            uri: self.describe(),
            reason: e.to_string(),
        })?;
        if files.is_empty() {
            return Err(SourceError::Open {
                uri: self.describe(),
                reason: "no images found".to_string(),
            });
        }

        debug!(dir = %self.dir.display(), count = files.len(), "image directory opened");
        self.files = files;
        self.position = 0;
        self.next_due = None;
        self.opened = true;
        Ok(())
    }

    fn read_frame(&mut self) -> Result<Frame, SourceError> {
        if !self.opened {
            return Err(SourceError::Disconnected("source not open".to_string()));
        }
        if self.position >= self.files.len() {
            if !self.loop_source {
                return Err(SourceError::Disconnected("end of image sequence".to_string()));
            }
            self.position = 0;
        }

        self.pace();

        let path = self.files[self.position].clone();
        self.position += 1;

        match image::open(&path) {
            Ok(img) => {
                let frame = Frame::new(img.to_rgb8(), self.sequence);
                self.sequence += 1;
                Ok(frame)
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "failed to decode image");
                Err(SourceError::Transient(format!("{}: {}", path.display(), e)))
            }
        }
    }

    fn close(&mut self) {
        self.opened = false;
        self.files.clear();
    }

    fn describe(&self) -> String {
        format!("dir://{}", self.dir.display())
    }
}
