//! Shared fixtures for pipeline and web tests.
//!
//! `TextVectorExtractor` reads a vector literally from the image bytes
//! ("0.9,0.1"), which lets tests pick exact similarity scores.
//! `MapFetcher` serves images from memory into a per-test temp directory.


use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::catalog::{Candidate, Product};
use crate::embedding::{EmbeddingError, EmbeddingExtractor, FeatureVector};
use crate::fetch::{FetchError, FetchedImage, ImageFetcher};

pub struct TextVectorExtractor;

impl EmbeddingExtractor for TextVectorExtractor {
    fn extract(&self, image: &[u8]) -> Result<FeatureVector, EmbeddingError> {
        let text = std::str::from_utf8(image).map_err(|e| EmbeddingError::Decode(e.to_string()))?;

        if text == "explode" {
            return Err(EmbeddingError::Extraction("model failure".to_string()));
        }

        text.split(',')
            .map(|v| v.trim().parse::<f32>())
            .collect::<Result<Vec<_>, _>>()
            .map(FeatureVector::new)
            .map_err(|e| EmbeddingError::Decode(e.to_string()))
    }

    fn name(&self) -> &str {
        "text-vector"
    }

    fn dimensions(&self) -> usize {
        2
    }
}

pub struct MapFetcher {
    images: HashMap<String, Vec<u8>>,
    delays: HashMap<String, Duration>,
    dir: PathBuf,
    pub calls: AtomicUsize,
    in_flight: AtomicUsize,
    pub max_in_flight: AtomicUsize,
}

impl MapFetcher {
    pub fn new(dir: PathBuf) -> Self {
        Self {
            images: HashMap::new(),
            delays: HashMap::new(),
            dir,
            calls: AtomicUsize::new(0),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
        }
    }

    pub fn with_image(mut self, url: &str, bytes: impl Into<Vec<u8>>) -> Self {
        self.images.insert(url.to_string(), bytes.into());
        self
    }

    pub fn with_delay(mut self, url: &str, delay: Duration) -> Self {
        self.delays.insert(url.to_string(), delay);
        self
    }
}

impl ImageFetcher for MapFetcher {
    async fn fetch(&self, url: &str) -> Result<FetchedImage, FetchError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let current = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(current, Ordering::SeqCst);

        let delay = self
            .delays
            .get(url)
            .copied()
            .unwrap_or(Duration::from_millis(5));
        tokio::time::sleep(delay).await;

        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        match self.images.get(url) {
            Some(bytes) => Ok(FetchedImage::from_bytes_in(&self.dir, bytes)?),
            None => Err(FetchError::Status(404)),
        }
    }
}

pub fn product(id: u64, image_url: &str) -> Product {
    Product {
        id,
        product_code: format!("SP{id:03}"),
        name: format!("product {id}"),
        price: 100.0 * id as f64,
        image_url: image_url.to_string(),
        is_active: true,
        category: serde_json::json!({"id": 1, "name": "Shirts"}),
        variants: serde_json::json!([]),
        ..Default::default()
    }
}

pub fn candidate(id: u64, image_url: &str) -> Candidate<Product> {
    Candidate {
        id,
        image_urls: crate::catalog::split_image_urls(image_url),
        metadata: product(id, image_url),
    }
}

pub fn extractor() -> Arc<dyn EmbeddingExtractor> {
    Arc::new(TextVectorExtractor)
}

/// Files left behind in a fetch directory.
pub fn leftover_files(dir: &std::path::Path) -> usize {
    std::fs::read_dir(dir).map(|d| d.count()).unwrap_or(0)
}
