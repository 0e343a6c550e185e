//! Model file management
//!
//! Resolves detector, recognizer and dictionary files from explicit config
//! paths or the application models directory, and wraps ONNX Runtime
//! sessions when built with the `onnx` feature.

use anyhow::{bail, Result};
use std::path::{Path, PathBuf};
use tracing::debug;

#[cfg(feature = "onnx")]
use anyhow::Context;
#[cfg(feature = "onnx")]
use ort::session::{builder::GraphOptimizationLevel, Session};
#[cfg(feature = "onnx")]
use tracing::info;

/// Model files the pipeline can load
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelType {
    /// License plate detector (YOLO family, single class)
    PlateDetector,
    /// Plate text recognizer (CRNN with CTC head)
    TextRecognizer,
    /// Character dictionary for the recognizer
    Dictionary,
}

impl ModelType {
    /// Get the default filename for this model type
    pub fn filename(&self) -> &'static str {
        match self {
            ModelType::PlateDetector => "plate_detector.onnx",
            ModelType::TextRecognizer => "plate_recognizer.onnx",
            ModelType::Dictionary => "plate_dict.txt",
        }
    }

    /// Display name for logs and errors
    pub fn display_name(&self) -> &'static str {
        match self {
            ModelType::PlateDetector => "Plate Detector",
            ModelType::TextRecognizer => "Text Recognizer",
            ModelType::Dictionary => "Character Dictionary",
        }
    }
}

/// Locates model files on disk
pub struct ModelManager {
    models_dir: PathBuf,
}

impl ModelManager {
    /// Use the application models directory
    pub fn new() -> Result<Self> {
        Ok(Self {
            models_dir: crate::storage::get_models_dir()?,
        })
    }

    /// Create model manager with custom directory
    pub fn with_dir(models_dir: PathBuf) -> Self {
        Self { models_dir }
    }

    /// Get the models directory path
    pub fn models_dir(&self) -> &Path {
        &self.models_dir
    }

    /// Default location of a model file
    pub fn model_path(&self, model_type: ModelType) -> PathBuf {
        self.models_dir.join(model_type.filename())
    }

    /// Check if a non-empty model file is present at its default location
    pub fn is_model_available(&self, model_type: ModelType) -> bool {
        std::fs::metadata(self.model_path(model_type))
            .map(|m| m.is_file() && m.len() > 0)
            .unwrap_or(false)
    }

    /// Get availability of all model files
    pub fn get_model_status(&self) -> Vec<(ModelType, bool)> {
        [
            ModelType::PlateDetector,
            ModelType::TextRecognizer,
            ModelType::Dictionary,
        ]
        .into_iter()
        .map(|model_type| (model_type, self.is_model_available(model_type)))
        .collect()
    }

    /// Find the file for `model_type`.
    ///
    /// A configured path is used as given when it exists, otherwise it is
    /// looked up relative to the models directory. Without a configured path
    /// the default file name in the models directory is used.
    pub fn resolve(&self, model_type: ModelType, configured: Option<&Path>) -> Result<PathBuf> {
        let candidates: Vec<PathBuf> = match configured {
            Some(path) if path.is_absolute() => vec![path.to_path_buf()],
            Some(path) => vec![path.to_path_buf(), self.models_dir.join(path)],
            None => vec![self.model_path(model_type)],
        };

        for candidate in &candidates {
            if candidate.is_file() {
                debug!(model = model_type.display_name(), path = %candidate.display(), "model resolved");
                return Ok(candidate.clone());
            }
        }

        bail!(
            "{} not found (looked in {})",
            model_type.display_name(),
            candidates
                .iter()
                .map(|p| p.display().to_string())
                .collect::<Vec<_>>()
                .join(", ")
        )
    }
}

/// ONNX Runtime session wrapper
#[cfg(feature = "onnx")]
pub struct OnnxSession {
    session: Session,
    input_names: Vec<String>,
    output_names: Vec<String>,
}

#[cfg(feature = "onnx")]
impl OnnxSession {
    /// Create a new ONNX session from a model file
    pub fn new(model_path: &Path, intra_threads: usize) -> Result<Self> {
        info!("Loading ONNX model from {:?}", model_path);

        let session = Session::builder()?
            .with_optimization_level(GraphOptimizationLevel::Level3)?
            .with_intra_threads(intra_threads.max(1))?
            .commit_from_file(model_path)
            .with_context(|| format!("Failed to load ONNX model {}", model_path.display()))?;

        let input_names: Vec<String> = session
            .inputs
            .iter()
            .map(|input| input.name.clone())
            .collect();

        let output_names: Vec<String> = session
            .outputs
            .iter()
            .map(|output| output.name.clone())
            .collect();

        if input_names.is_empty() || output_names.is_empty() {
            bail!("ONNX model {} has no inputs or outputs", model_path.display());
        }

        info!(
            "Model loaded. Inputs: {:?}, Outputs: {:?}",
            input_names, output_names
        );

        Ok(Self {
            session,
            input_names,
            output_names,
        })
    }

    /// Get the underlying session mutably for running inference
    pub fn session_mut(&mut self) -> &mut Session {
        &mut self.session
    }

    /// Name of the first model input
    pub fn input_name(&self) -> &str {
        &self.input_names[0]
    }

    /// Name of the first model output
    pub fn output_name(&self) -> &str {
        &self.output_names[0]
    }

    /// Get input names
    pub fn input_names(&self) -> &[String] {
        &self.input_names
    }

    /// Get output names
    pub fn output_names(&self) -> &[String] {
        &self.output_names
    }
}
