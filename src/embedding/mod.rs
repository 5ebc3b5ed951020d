//! Image embedding extraction.
//!
//! Turns raw image bytes into fixed-length feature vectors that can be
//! compared with cosine similarity.
//!
//! # Architecture
//!
//! - `model`: Wraps a fastembed vision model (ResNet-50 by default)
//! - `histogram`: Model-free color histogram extractor
//!
//! Extractors are constructed once at startup and shared behind
//! `Arc<dyn EmbeddingExtractor>`. Every implementation must accept
//! concurrent `extract` calls.

mod histogram;
mod model;

use std::path::PathBuf;
use std::sync::Arc;

pub use histogram::HistogramExtractor;
pub use model::ImageModel;

/// Default embedding model name (same backbone the catalog was tuned on)
pub const DEFAULT_MODEL: &str = "resnet50";

/// Name of the model-free extractor
pub const HISTOGRAM_MODEL: &str = "histogram";

/// Error type for embedding operations
#[derive(Debug, thiserror::Error)]
pub enum EmbeddingError {
    #[error("image could not be decoded: {0}")]
    Decode(String),

    #[error("embedding extraction failed: {0}")]
    Extraction(String),

    #[error("model initialization failed: {0}")]
    InitFailed(String),

    #[error("invalid model name: {0}")]
    InvalidModel(String),
}

/// Embedding of a single image.
///
/// Only extractors build these, so every vector produced by one extractor
/// has the same length.
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureVector(Vec<f32>);

impl FeatureVector {
    pub fn new(values: Vec<f32>) -> Self {
        Self(values)
    }

    pub fn as_slice(&self) -> &[f32] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// L2 norm, accumulated in f64 so large components do not overflow
    pub fn norm(&self) -> f64 {
        self.0
            .iter()
            .map(|&x| f64::from(x) * f64::from(x))
            .sum::<f64>()
            .sqrt()
    }
}

impl From<Vec<f32>> for FeatureVector {
    fn from(values: Vec<f32>) -> Self {
        Self(values)
    }
}

/// Turns an encoded image into a feature vector.
///
/// Implementations must be deterministic: the same bytes always yield the
/// same vector, and the vector length never changes over the lifetime of
/// the extractor.
pub trait EmbeddingExtractor: Send + Sync {
    fn extract(&self, image: &[u8]) -> Result<FeatureVector, EmbeddingError>;

    /// Name of the underlying model, for logging
    fn name(&self) -> &str;

    fn dimensions(&self) -> usize;
}

/// Decode image bytes, mapping any failure to `EmbeddingError::Decode`.
pub fn decode_image(bytes: &[u8]) -> Result<image::DynamicImage, EmbeddingError> {
    if bytes.is_empty() {
        return Err(EmbeddingError::Decode("empty input".to_string()));
    }

    image::load_from_memory(bytes).map_err(|e| EmbeddingError::Decode(e.to_string()))
}

/// Build the extractor selected by `model_name`.
///
/// This is the single place where the (expensive) model gets loaded.
pub fn build_extractor(
    model_name: &str,
    cache_dir: PathBuf,
) -> Result<Arc<dyn EmbeddingExtractor>, EmbeddingError> {
    if model_name.eq_ignore_ascii_case(HISTOGRAM_MODEL) {
        return Ok(Arc::new(HistogramExtractor::default()));
    }

    let model = ImageModel::new(model_name, cache_dir)?;
    log::info!(
        "loaded embedding model {} ({} dimensions)",
        model.name(),
        model.dimensions()
    );
    Ok(Arc::new(model))
}
