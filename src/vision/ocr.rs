//! Plate text recognition on ONNX Runtime
//!
//! A CRNN-style recognizer with a CTC head: the model emits per-timestep
//! class probabilities over `blank + dictionary + space`, decoded greedily.

use anyhow::{bail, Context, Result};
use image::RgbImage;
use ndarray::{ArrayView2, ArrayViewD, Ix2};
use ort::value::Tensor;
use std::path::Path;

use super::models::OnnxSession;
use super::preprocess::{preprocess_for_recognition, RecognizerInput};
use super::{Candidate, TextRecognizer};

/// Text recognizer backed by a CTC ONNX model
pub struct CtcTextRecognizer {
    session: OnnxSession,
    /// Symbol for every class index; index 0 is the CTC blank
    symbols: Vec<String>,
    input: RecognizerInput,
}

impl CtcTextRecognizer {
    pub fn new(model_path: &Path, dictionary_path: &Path) -> Result<Self> {
        let symbols = load_dictionary(dictionary_path)?;
        Ok(Self {
            // Several workers each hold a session; keep them from fighting over cores
            session: OnnxSession::new(model_path, 1)?,
            symbols,
            input: RecognizerInput::default(),
        })
    }
}

impl TextRecognizer for CtcTextRecognizer {
    fn recognize(&mut self, crop: &RgbImage) -> Result<Vec<Candidate>> {
        if crop.width() == 0 || crop.height() == 0 {
            return Ok(Vec::new());
        }
        let input = preprocess_for_recognition(crop, &self.input);
        let input_name = self.session.input_name().to_string();
        let output_name = self.session.output_name().to_string();

        let outputs = self
            .session
            .session_mut()
            .run(ort::inputs![input_name.as_str() => Tensor::from_array(input)?])
            .context("text recognition inference failed")?;
        let output: ArrayViewD<f32> = outputs[output_name.as_str()]
            .try_extract_array()
            .context("failed to extract recognizer output")?;

        let shape = output.shape().to_vec();
        if shape.len() != 3 || shape[0] != 1 {
            bail!("unexpected recognizer output shape {:?}", shape);
        }
        let probs = output
            .index_axis(ndarray::Axis(0), 0)
            .into_dimensionality::<Ix2>()
            .context("recognizer output is not [1, T, C]")?;

        Ok(ctc_greedy_decode(probs, &self.symbols)
            .map(|(text, confidence)| vec![Candidate::new(text, confidence)])
            .unwrap_or_default())
    }
}

/// Read a dictionary file with one symbol per line and add the CTC blank in
/// front and a space at the end
pub fn load_dictionary(path: &Path) -> Result<Vec<String>> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read dictionary {}", path.display()))?;
    let mut symbols = vec![String::new()];
    symbols.extend(
        content
            .lines()
            .map(|line| line.trim_end_matches('\r').to_string())
            .filter(|line| !line.is_empty()),
    );
    if symbols.len() == 1 {
        bail!("dictionary {} is empty", path.display());
    }
    symbols.push(" ".to_string());
    Ok(symbols)
}

/// Best-path CTC decoding of `[timesteps, classes]` probabilities.
///
/// Takes the arg-max class per step, collapses repeats and drops blanks.
/// Confidence is the mean probability of the emitted symbols. Returns `None`
/// when nothing is emitted.
pub fn ctc_greedy_decode(probs: ArrayView2<f32>, symbols: &[String]) -> Option<(String, f32)> {
    let mut text = String::new();
    let mut scores = Vec::new();
    let mut previous = 0usize;

    for row in probs.rows() {
        let (class, score) = row
            .iter()
            .enumerate()
            .fold((0usize, f32::MIN), |best, (i, &p)| if p > best.1 { (i, p) } else { best });

        if class != 0 && class != previous {
            if let Some(symbol) = symbols.get(class) {
                text.push_str(symbol);
                scores.push(score);
            }
        }
        previous = class;
    }

    if scores.is_empty() {
        return None;
    }
    let confidence = scores.iter().sum::<f32>() / scores.len() as f32;
    Some((text, confidence))
}
