//! Vision model wrapper for fastembed.
//!
//! - Model download into a configurable cache directory on first start
//! - Dimensions probed once at construction
//! - Inference serialized through a mutex

use fastembed::{ImageEmbedding, ImageEmbeddingModel, ImageInitOptions};
use image::{ImageFormat, RgbImage};
use std::io::Cursor;
use std::path::PathBuf;
use std::sync::Mutex;

use super::{decode_image, EmbeddingError, EmbeddingExtractor, FeatureVector};

/// Wrapper around fastembed's ImageEmbedding model.
/// Uses a Mutex because fastembed's embed calls require &mut self.
pub struct ImageModel {
    model: Mutex<ImageEmbedding>,
    model_name: String,
    dimensions: usize,
}

impl ImageModel {
    /// Load the model with the given name.
    ///
    /// The model is downloaded if it is not cached yet. Models are cached in
    /// the `models/` subdirectory of `cache_dir`.
    pub fn new(model_name: &str, cache_dir: PathBuf) -> Result<Self, EmbeddingError> {
        let model_enum = Self::parse_model_name(model_name)?;

        let models_dir = cache_dir.join("models");
        std::fs::create_dir_all(&models_dir).map_err(|e| {
            EmbeddingError::InitFailed(format!("failed to create models directory: {}", e))
        })?;

        let options = ImageInitOptions::new(model_enum)
            .with_cache_dir(models_dir)
            .with_show_download_progress(true);

        let mut model = ImageEmbedding::try_new(options)
            .map_err(|e| EmbeddingError::InitFailed(e.to_string()))?;

        let dimensions = Self::probe_dimensions(&mut model)?;

        Ok(Self {
            model: Mutex::new(model),
            model_name: model_name.to_lowercase(),
            dimensions,
        })
    }

    fn parse_model_name(name: &str) -> Result<ImageEmbeddingModel, EmbeddingError> {
        match name.to_lowercase().as_str() {
            "resnet50" | "resnet-50" => Ok(ImageEmbeddingModel::Resnet50),
            "clip-vit-b32" | "clipvitb32" => Ok(ImageEmbeddingModel::ClipVitB32),
            "unicom-vit-b16" | "unicomvitb16" => Ok(ImageEmbeddingModel::UnicomVitB16),
            "unicom-vit-b32" | "unicomvitb32" => Ok(ImageEmbeddingModel::UnicomVitB32),
            "nomic-embed-vision-v1.5" | "nomicembedvisionv15" => {
                Ok(ImageEmbeddingModel::NomicEmbedVisionV15)
            }
            _ => Err(EmbeddingError::InvalidModel(format!(
                "Unknown model: {}. Supported models: resnet50, clip-vit-b32, unicom-vit-b16, unicom-vit-b32, nomic-embed-vision-v1.5, histogram",
                name
            ))),
        }
    }

    /// Embed a tiny synthetic image to learn the output length.
    fn probe_dimensions(model: &mut ImageEmbedding) -> Result<usize, EmbeddingError> {
        let probe = RgbImage::from_pixel(32, 32, image::Rgb([127, 127, 127]));
        let mut buf = Cursor::new(Vec::new());
        probe
            .write_to(&mut buf, ImageFormat::Png)
            .map_err(|e| EmbeddingError::InitFailed(format!("failed to encode probe: {}", e)))?;
        let bytes = buf.into_inner();

        let embeddings = model
            .embed_bytes(&[bytes.as_slice()], None)
            .map_err(|e| EmbeddingError::InitFailed(format!("failed to probe dimensions: {}", e)))?;

        embeddings
            .first()
            .map(|v| v.len())
            .ok_or_else(|| EmbeddingError::InitFailed("model returned no embedding".to_string()))
    }
}

impl EmbeddingExtractor for ImageModel {
    fn extract(&self, image: &[u8]) -> Result<FeatureVector, EmbeddingError> {
        // fastembed reports decode failures as opaque errors
        decode_image(image)?;

        let mut model = self.model.lock().map_err(|e| {
            EmbeddingError::Extraction(format!("failed to acquire model lock: {}", e))
        })?;

        let embedding = model
            .embed_bytes(&[image], None)
            .map_err(|e| EmbeddingError::Extraction(e.to_string()))?
            .into_iter()
            .next()
            .ok_or_else(|| EmbeddingError::Extraction("no embedding returned".to_string()))?;

        if embedding.len() != self.dimensions {
            return Err(EmbeddingError::Extraction(format!(
                "expected {} dimensions, got {}",
                self.dimensions,
                embedding.len()
            )));
        }

        Ok(FeatureVector::new(embedding))
    }

    fn name(&self) -> &str {
        &self.model_name
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }
}
