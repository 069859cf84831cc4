//! Sentence embeddings with all-MiniLM-L6-v2.
//!
//! The tokenizer comes from the model's `tokenizer.json`; the encoder is the
//! exported ONNX graph. Token states are mean-pooled over the attention mask
//! and L2-normalized, matching sentence-transformers.

use ndarray::Array2;
use ort::session::Session;
use ort::value::TensorRef;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokenizers::{Tokenizer, TruncationParams};

/// all-MiniLM-L6-v2 embedding size.
pub const MINILM_DIM: usize = 384;
/// all-MiniLM-L6-v2 max tokens.
const MAX_TOKENS: usize = 256;

#[derive(Error, Debug)]
pub enum TextEmbedError {
    #[error("text model file not found: {0}")]
    ModelNotFound(String),
    #[error("tokenizer: {0}")]
    Tokenizer(String),
    #[error("unexpected encoder output: {0}")]
    BadOutput(String),
    #[error("shape: {0}")]
    Shape(#[from] ndarray::ShapeError),
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

/// Encodes text into fixed-length vectors, one per input, in input order.
pub trait TextEmbedder: Send {
    fn embed(&mut self, texts: &[String]) -> Result<Vec<Vec<f32>>, TextEmbedError>;
}

pub struct MiniLmEmbedder {
    session: Session,
    tokenizer: Tokenizer,
    /// Some exports drop the `token_type_ids` input.
    wants_token_types: bool,
}

impl MiniLmEmbedder {
    /// Load from a model directory holding `tokenizer.json` and either
    /// `model.onnx` or `onnx/model.onnx`.
    pub fn load(model_dir: &Path) -> Result<Self, TextEmbedError> {
        let model_path = locate_model(model_dir)?;
        let tokenizer_path = model_dir.join("tokenizer.json");
        if !tokenizer_path.exists() {
            return Err(TextEmbedError::ModelNotFound(tokenizer_path.display().to_string()));
        }

        let mut tokenizer = Tokenizer::from_file(&tokenizer_path)
            .map_err(|e| TextEmbedError::Tokenizer(e.to_string()))?;
        tokenizer
            .with_truncation(Some(TruncationParams {
                max_length: MAX_TOKENS,
                ..Default::default()
            }))
            .map_err(|e| TextEmbedError::Tokenizer(e.to_string()))?;

        let session = Session::builder()?
            .with_intra_threads(2)?
            .commit_from_file(&model_path)?;
        let wants_token_types = session.inputs().iter().any(|i| i.name() == "token_type_ids");

        tracing::info!(
            path = %model_path.display(),
            token_type_ids = wants_token_types,
            "loaded MiniLM encoder"
        );
        Ok(Self { session, tokenizer, wants_token_types })
    }

    fn embed_one(&mut self, text: &str) -> Result<Vec<f32>, TextEmbedError> {
        let encoding = self
            .tokenizer
            .encode(text, true)
            .map_err(|e| TextEmbedError::Tokenizer(e.to_string()))?;
        let len = encoding.get_ids().len();
        let widen = |xs: &[u32]| xs.iter().map(|&x| x as i64).collect::<Vec<i64>>();

        let mask = widen(encoding.get_attention_mask());
        let ids = Array2::from_shape_vec((1, len), widen(encoding.get_ids()))?;
        let attention = Array2::from_shape_vec((1, len), mask.clone())?;
        let types = Array2::from_shape_vec((1, len), widen(encoding.get_type_ids()))?;

        let outputs = if self.wants_token_types {
            self.session.run(ort::inputs![
                "input_ids" => TensorRef::from_array_view(ids.view())?,
                "attention_mask" => TensorRef::from_array_view(attention.view())?,
                "token_type_ids" => TensorRef::from_array_view(types.view())?,
            ])?
        } else {
            self.session.run(ort::inputs![
                "input_ids" => TensorRef::from_array_view(ids.view())?,
                "attention_mask" => TensorRef::from_array_view(attention.view())?,
            ])?
        };

        let (shape, hidden) = outputs[0].try_extract_tensor::<f32>()?;
        let dim = shape.last().copied().unwrap_or(0) as usize;
        if dim == 0 || hidden.len() != len * dim {
            return Err(TextEmbedError::BadOutput(format!(
                "hidden state of {} values for {len} tokens",
                hidden.len()
            )));
        }

        let mut pooled = mean_pool(hidden, &mask, dim);
        normalize(&mut pooled);
        Ok(pooled)
    }
}

impl TextEmbedder for MiniLmEmbedder {
    fn embed(&mut self, texts: &[String]) -> Result<Vec<Vec<f32>>, TextEmbedError> {
        texts.iter().map(|t| self.embed_one(t)).collect()
    }
}

fn locate_model(model_dir: &Path) -> Result<PathBuf, TextEmbedError> {
    [model_dir.join("model.onnx"), model_dir.join("onnx").join("model.onnx")]
        .into_iter()
        .find(|p| p.exists())
        .ok_or_else(|| TextEmbedError::ModelNotFound(model_dir.join("model.onnx").display().to_string()))
}

/// Average the token vectors whose mask is set. `hidden` is `tokens × dim`.
fn mean_pool(hidden: &[f32], mask: &[i64], dim: usize) -> Vec<f32> {
    let mut sum = vec![0.0f32; dim];
    let mut count = 0.0f32;
    for (token, &m) in hidden.chunks_exact(dim).zip(mask.iter()) {
        if m == 0 {
            continue;
        }
        count += 1.0;
        for (s, v) in sum.iter_mut().zip(token) {
            *s += v;
        }
    }
    if count > 0.0 {
        sum.iter_mut().for_each(|s| *s /= count);
    }
    sum
}

fn normalize(v: &mut [f32]) {
    let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 1e-12 {
        v.iter_mut().for_each(|x| *x /= norm);
    }
}
