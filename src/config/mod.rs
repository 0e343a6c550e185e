//! Application Configuration
//!
//! Pipeline settings stored in TOML format. Every section and key is optional
//! in the file; missing values fall back to the defaults below.

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// File name looked up in the platform config directory
pub const CONFIG_FILE_NAME: &str = "config.toml";

/// Upper bound for any configured delay or timeout (one day)
pub const MAX_DURATION_MS: u64 = 86_400_000;

/// Application settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Video source and reconnect behavior
    pub stream: StreamSettings,
    /// Plate detection stage
    pub detection: DetectionSettings,
    /// Text recognition dispatcher and workers
    pub recognition: RecognitionSettings,
    /// Reading history
    pub history: HistorySettings,
    /// Presentation
    pub display: DisplaySettings,
    /// Log output
    pub logging: LoggingSettings,
}

/// Video source settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamSettings {
    /// `rtsp://…`, a file path, `dir://path` or a directory of images
    pub uri: String,
    /// First reconnect delay
    pub reconnect_initial_ms: u64,
    /// Reconnect delay ceiling
    pub reconnect_max_ms: u64,
    /// Give up after this many consecutive failed attempts (never if unset)
    pub max_reconnect_attempts: Option<u32>,
    /// How long a stream read may wait for a decoded frame
    pub read_timeout_ms: u64,
    /// Consecutive reads without a frame before the stream counts as lost
    pub max_stalled_reads: u32,
    /// Restart image-directory sources at the first file when they run out
    pub loop_source: bool,
    /// Replay rate of image-directory sources (0 = as fast as possible)
    pub source_fps: u32,
}

impl Default for StreamSettings {
    fn default() -> Self {
        Self {
            uri: String::new(),
            reconnect_initial_ms: 500,
            reconnect_max_ms: 30_000,
            max_reconnect_attempts: None,
            read_timeout_ms: 5_000,
            max_stalled_reads: 3,
            loop_source: true,
            source_fps: 25,
        }
    }
}

/// Detection stage settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectionSettings {
    /// Plate detector ONNX model
    pub model_path: Option<PathBuf>,
    /// Working resolution frames are downsampled to before detection
    pub work_width: u32,
    pub work_height: u32,
    /// Minimum detector score
    pub confidence_threshold: f32,
    /// Overlap above which weaker boxes are suppressed
    pub iou_threshold: f32,
    /// Interval between detection ticks
    pub render_tick_ms: u64,
}

impl Default for DetectionSettings {
    fn default() -> Self {
        Self {
            model_path: None,
            work_width: 640,
            work_height: 360,
            confidence_threshold: 0.25,
            iou_threshold: 0.45,
            render_tick_ms: 30,
        }
    }
}

/// Recognition settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RecognitionSettings {
    /// Text recognizer ONNX model
    pub model_path: Option<PathBuf>,
    /// Character dictionary, one symbol per line
    pub dictionary_path: Option<PathBuf>,
    /// Minimum time between two enqueued ROIs
    pub min_interval_ms: u64,
    /// Number of recognition workers
    pub workers: usize,
    /// Queue depth at which new ROIs are refused
    pub max_queue_depth: usize,
    /// Candidates below this confidence are ignored
    pub min_confidence: f32,
    /// How long shutdown waits for busy workers
    pub shutdown_grace_ms: u64,
}

impl Default for RecognitionSettings {
    fn default() -> Self {
        Self {
            model_path: None,
            dictionary_path: None,
            min_interval_ms: 200,
            workers: 2,
            max_queue_depth: 8,
            min_confidence: 0.0,
            shutdown_grace_ms: 2_000,
        }
    }
}

/// History settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HistorySettings {
    /// Number of readings kept
    pub capacity: usize,
}

impl Default for HistorySettings {
    fn default() -> Self {
        Self {
            capacity: crate::shared::state::DEFAULT_HISTORY_CAPACITY,
        }
    }
}

/// Presentation settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DisplaySettings {
    /// Annotated frame size
    pub width: u32,
    pub height: u32,
    /// Plate preview size
    pub preview_width: u32,
    pub preview_height: u32,
    /// Console refresh interval
    pub refresh_ms: u64,
}

impl Default for DisplaySettings {
    fn default() -> Self {
        Self {
            width: 800,
            height: 450,
            preview_width: 200,
            preview_height: 60,
            refresh_ms: 250,
        }
    }
}

/// Logging settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    /// Default filter when `RUST_LOG` is unset
    pub level: String,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

impl AppConfig {
    /// Reject settings the pipeline cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.recognition.workers == 0 {
            bail!("recognition.workers must be at least 1");
        }
        if self.recognition.max_queue_depth == 0 {
            bail!("recognition.max_queue_depth must be at least 1");
        }
        if self.history.capacity == 0 {
            bail!("history.capacity must be at least 1");
        }
        if self.detection.work_width == 0 || self.detection.work_height == 0 {
            bail!("detection work size must be non-zero");
        }
        if self.detection.render_tick_ms == 0 {
            bail!("detection.render_tick_ms must be at least 1");
        }
        if self.display.width == 0 || self.display.height == 0 {
            bail!("display size must be non-zero");
        }
        if self.display.preview_width == 0 || self.display.preview_height == 0 {
            bail!("display preview size must be non-zero");
        }
        if !(0.0..=1.0).contains(&self.detection.confidence_threshold) {
            bail!("detection.confidence_threshold must be within 0..=1");
        }
        if !(0.0..=1.0).contains(&self.detection.iou_threshold) {
            bail!("detection.iou_threshold must be within 0..=1");
        }
        if self.stream.reconnect_initial_ms == 0 {
            bail!("stream.reconnect_initial_ms must be at least 1");
        }
        if self.stream.max_stalled_reads == 0 {
            bail!("stream.max_stalled_reads must be at least 1");
        }
        for (key, value) in [
            ("stream.reconnect_initial_ms", self.stream.reconnect_initial_ms),
            ("stream.reconnect_max_ms", self.stream.reconnect_max_ms),
            ("stream.read_timeout_ms", self.stream.read_timeout_ms),
            ("recognition.min_interval_ms", self.recognition.min_interval_ms),
            ("recognition.shutdown_grace_ms", self.recognition.shutdown_grace_ms),
            ("detection.render_tick_ms", self.detection.render_tick_ms),
            ("display.refresh_ms", self.display.refresh_ms),
        ] {
            if value > MAX_DURATION_MS {
                bail!("{} must be at most {} ms", key, MAX_DURATION_MS);
            }
        }
        Ok(())
    }
}

/// Load configuration from file
pub fn load_config(path: &Path) -> Result<AppConfig> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read config {}", path.display()))?;
    let config: AppConfig = toml::from_str(&content)
        .with_context(|| format!("failed to parse config {}", path.display()))?;
    Ok(config)
}

/// Save configuration to file
pub fn save_config(config: &AppConfig, path: &Path) -> Result<()> {
    let content = toml::to_string_pretty(config)?;
    std::fs::write(path, content)?;
    Ok(())
}

/// Default config file location in the platform config directory
pub fn default_config_path() -> Result<PathBuf> {
    Ok(crate::storage::get_config_dir()?.join(CONFIG_FILE_NAME))
}

/// Load `path` if given, else the default location if it exists, else defaults
pub fn load_or_default(path: Option<&Path>) -> Result<AppConfig> {
    if let Some(path) = path {
        return load_config(path);
    }
    match default_config_path() {
        Ok(default_path) if default_path.exists() => load_config(&default_path),
        _ => Ok(AppConfig::default()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_default_app_config() {
        let config = AppConfig::default();

        assert!(config.stream.uri.is_empty());
        assert_eq!(config.stream.reconnect_initial_ms, 500);
        assert_eq!(config.stream.reconnect_max_ms, 30_000);
        assert!(config.stream.max_reconnect_attempts.is_none());
        assert_eq!(config.stream.max_stalled_reads, 3);

        assert_eq!(config.detection.work_width, 640);
        assert_eq!(config.detection.work_height, 360);
        assert_eq!(config.detection.render_tick_ms, 30);

        assert_eq!(config.recognition.min_interval_ms, 200);
        assert_eq!(config.recognition.workers, 2);

        assert_eq!(config.history.capacity, 10);

        assert_eq!(config.display.width, 800);
        assert_eq!(config.display.height, 450);
        assert_eq!((config.display.preview_width, config.display.preview_height), (200, 60));

        assert_eq!(config.logging.level, "info");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_with_custom_values() {
        let mut config = AppConfig::default();
        config.stream.uri = "rtsp://camera/live".to_string();
        config.stream.max_reconnect_attempts = Some(5);
        config.recognition.workers = 4;
        config.detection.model_path = Some(PathBuf::from("models/plate.onnx"));

        let toml_str = toml::to_string_pretty(&config).unwrap();
        let parsed: AppConfig = toml::from_str(&toml_str).unwrap();

        assert_eq!(parsed.stream.uri, "rtsp://camera/live");
        assert_eq!(parsed.stream.max_reconnect_attempts, Some(5));
        assert_eq!(parsed.recognition.workers, 4);
        assert_eq!(parsed.detection.model_path, Some(PathBuf::from("models/plate.onnx")));
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let parsed: AppConfig = toml::from_str(
            r#"
            [stream]
            uri = "dir://frames"

            [recognition]
            min_interval_ms = 500
            "#,
        )
        .unwrap();

        assert_eq!(parsed.stream.uri, "dir://frames");
        assert_eq!(parsed.stream.source_fps, 25);
        assert_eq!(parsed.recognition.min_interval_ms, 500);
        assert_eq!(parsed.recognition.workers, 2);
        assert_eq!(parsed.history.capacity, 10);
    }

    #[test]
    fn test_save_and_load_config() {
        let mut config = AppConfig::default();
        config.history.capacity = 25;

        let temp_file = NamedTempFile::new().unwrap();
        save_config(&config, temp_file.path()).unwrap();
        let loaded = load_config(temp_file.path()).unwrap();

        assert_eq!(loaded.history.capacity, 25);
        assert_eq!(loaded.recognition.workers, config.recognition.workers);
    }

    #[test]
    fn test_load_or_default_prefers_explicit_path() {
        let mut temp_file = NamedTempFile::new().unwrap();
        writeln!(temp_file, "[history]\ncapacity = 3").unwrap();

        let loaded = load_or_default(Some(temp_file.path())).unwrap();
        assert_eq!(loaded.history.capacity, 3);
    }

    #[test]
    fn test_load_config_file_not_found() {
        let result = load_config(Path::new("/nonexistent/path/config.toml"));
        assert!(result.is_err());
    }

    #[test]
    fn test_load_config_invalid_toml() {
        let mut temp_file = NamedTempFile::new().unwrap();
        writeln!(temp_file, "this is not valid toml {{{{").unwrap();

        let result = load_config(temp_file.path());
        assert!(result.is_err());
    }

    #[test]
    fn test_validate_rejects_unusable_values() {
        let mut config = AppConfig::default();
        config.recognition.workers = 0;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.history.capacity = 0;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.detection.work_height = 0;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.detection.iou_threshold = 1.5;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.stream.max_stalled_reads = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_bounds_durations() {
        let mut config = AppConfig::default();
        config.stream.reconnect_max_ms = u64::MAX;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("stream.reconnect_max_ms"));

        let mut config = AppConfig::default();
        config.stream.read_timeout_ms = MAX_DURATION_MS + 1;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.stream.read_timeout_ms = MAX_DURATION_MS;
        assert!(config.validate().is_ok());
    }
}
