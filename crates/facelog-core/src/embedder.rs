//! Face embedding extraction.
//!
//! The resolver depends only on [`Embedder`]. [`OnnxEmbedder`] runs an
//! ArcFace-style recognition model (e.g. w600k_r50) via ONNX Runtime on
//! aligned RGB crops.

use crate::crop::FaceCrop;
use crate::types::Embedding;
use image::imageops::{self, FilterType};
use image::RgbImage;
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use std::path::Path;
use std::sync::Mutex;
use thiserror::Error;

const EMBEDDER_INPUT_SIZE: usize = 112;
const EMBEDDER_MEAN: f32 = 127.5;
const EMBEDDER_STD: f32 = 127.5;
pub const DEFAULT_EMBEDDING_DIM: usize = 512;

#[derive(Error, Debug)]
pub enum EmbedError {
    #[error("model file not found: {0}")]
    ModelNotFound(String),
    #[error("inference failed: {0}")]
    InferenceFailed(String),
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

/// Turns a face crop into a fixed-length embedding vector.
pub trait Embedder: Send + Sync {
    fn embed(&self, crop: &FaceCrop) -> Result<Embedding, EmbedError>;
}

/// ONNX Runtime face embedder.
pub struct OnnxEmbedder {
    session: Mutex<Session>,
    dim: usize,
}

impl OnnxEmbedder {
    /// Load a recognition model producing `dim`-dimensional embeddings.
    pub fn load(model_path: &str, dim: usize) -> Result<Self, EmbedError> {
        if !Path::new(model_path).exists() {
            return Err(EmbedError::ModelNotFound(model_path.to_string()));
        }

        let session = Session::builder()?
            .with_intra_threads(2)?
            .commit_from_file(model_path)?;

        tracing::info!(
            path = model_path,
            dim,
            inputs = ?session.inputs().iter().map(|i| (i.name(), i.dtype())).collect::<Vec<_>>(),
            outputs = ?session.outputs().iter().map(|o| o.name()).collect::<Vec<_>>(),
            "loaded embedding model"
        );

        Ok(Self {
            session: Mutex::new(session),
            dim,
        })
    }

    /// Resize an RGB crop to the model input and build a normalized NCHW tensor.
    fn preprocess(crop: &RgbImage) -> Array4<f32> {
        let size = EMBEDDER_INPUT_SIZE;
        let resized = if crop.width() as usize == size && crop.height() as usize == size {
            crop.clone()
        } else {
            imageops::resize(crop, size as u32, size as u32, FilterType::Triangle)
        };

        let mut tensor = Array4::<f32>::zeros((1, 3, size, size));
        for (x, y, pixel) in resized.enumerate_pixels() {
            for c in 0..3 {
                tensor[[0, c, y as usize, x as usize]] = (pixel.0[c] as f32 - EMBEDDER_MEAN) / EMBEDDER_STD;
            }
        }
        tensor
    }
}

impl Embedder for OnnxEmbedder {
    fn embed(&self, crop: &FaceCrop) -> Result<Embedding, EmbedError> {
        let input = Self::preprocess(crop.image());

        let raw: Vec<f32> = {
            let mut session = self
                .session
                .lock()
                .map_err(|_| EmbedError::InferenceFailed("session lock poisoned".into()))?;
            let outputs = session.run(ort::inputs![TensorRef::from_array_view(input.view())?])?;
            let (_, raw_data) = outputs[0]
                .try_extract_tensor::<f32>()
                .map_err(|e| EmbedError::InferenceFailed(format!("embedding extraction: {e}")))?;
            raw_data.to_vec()
        };

        if raw.len() != self.dim {
            return Err(EmbedError::InferenceFailed(format!(
                "expected {}-dim embedding, got {}",
                self.dim,
                raw.len()
            )));
        }

        Ok(Embedding::new(l2_normalize(raw)))
    }
}

/// Scale a vector to unit length. Zero vectors are returned unchanged.
pub fn l2_normalize(raw: Vec<f32>) -> Vec<f32> {
    let norm: f32 = raw.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        raw.iter().map(|x| x / norm).collect()
    } else {
        raw
    }
}
