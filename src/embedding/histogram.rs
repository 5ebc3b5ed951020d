//! Joint RGB color histogram extractor.
//!
//! Needs no model download. Images are scaled to a fixed thumbnail so the
//! histogram does not depend on the source resolution.

use image::imageops::FilterType;

use super::{decode_image, EmbeddingError, EmbeddingExtractor, FeatureVector, HISTOGRAM_MODEL};

const DEFAULT_BINS_PER_CHANNEL: usize = 8;
const THUMBNAIL_SIZE: u32 = 64;

pub struct HistogramExtractor {
    bins_per_channel: usize,
}

impl Default for HistogramExtractor {
    fn default() -> Self {
        Self {
            bins_per_channel: DEFAULT_BINS_PER_CHANNEL,
        }
    }
}

impl HistogramExtractor {
    fn bin(&self, channel: u8) -> usize {
        channel as usize * self.bins_per_channel / 256
    }
}

impl EmbeddingExtractor for HistogramExtractor {
    fn extract(&self, image: &[u8]) -> Result<FeatureVector, EmbeddingError> {
        let img = decode_image(image)?;
        let thumb = img
            .resize_exact(THUMBNAIL_SIZE, THUMBNAIL_SIZE, FilterType::Triangle)
            .to_rgb8();

        let bins = self.bins_per_channel;
        let mut histogram = vec![0f32; self.dimensions()];
        for pixel in thumb.pixels() {
            let [r, g, b] = pixel.0;
            let idx = (self.bin(r) * bins + self.bin(g)) * bins + self.bin(b);
            histogram[idx] += 1.0;
        }

        let norm = histogram.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm < f32::EPSILON {
            return Err(EmbeddingError::Extraction("empty histogram".to_string()));
        }
        for value in histogram.iter_mut() {
            *value /= norm;
        }

        Ok(FeatureVector::new(histogram))
    }

    fn name(&self) -> &str {
        HISTOGRAM_MODEL
    }

    fn dimensions(&self) -> usize {
        self.bins_per_channel.pow(3)
    }
}
