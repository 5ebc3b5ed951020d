//! Product catalog access.
//!
//! The search only reads a candidate's id and image urls; everything else
//! in `Product` is carried through untouched for presentation.

mod file;
mod remote;

use serde::{Deserialize, Serialize};

pub use file::CsvCatalog;
pub use remote::HttpCatalog;

#[derive(Debug, thiserror::Error)]
pub enum CatalogError {
    #[error("catalog io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("catalog csv error: {0}")]
    Csv(#[from] csv::Error),

    #[error("catalog request failed: {0}")]
    Http(#[from] reqwest::Error),
}

/// One catalog entry under evaluation.
#[derive(Debug, Clone, Serialize)]
pub struct Candidate<M> {
    pub id: u64,
    /// Ordered; the first url is the primary image
    pub image_urls: Vec<String>,
    pub metadata: M,
}

impl<M> Candidate<M> {
    pub fn primary_image(&self) -> Option<&str> {
        self.image_urls.first().map(String::as_str)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Product {
    pub id: u64,
    #[serde(default)]
    pub product_code: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub price: f64,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub total_quantity: i64,
    #[serde(default)]
    pub sold_quantity: i64,
    #[serde(default)]
    pub rating: f64,
    #[serde(default)]
    pub discount: f64,
    /// Comma-delimited image urls
    #[serde(default)]
    pub image_url: String,
    #[serde(default)]
    pub is_active: bool,
    #[serde(default)]
    pub category: serde_json::Value,
    #[serde(default)]
    pub variants: serde_json::Value,
}

impl Product {
    pub fn image_urls(&self) -> Vec<String> {
        split_image_urls(&self.image_url)
    }

    /// Active products with at least one image url become candidates.
    pub fn into_candidate(self) -> Option<Candidate<Product>> {
        if !self.is_active {
            return None;
        }

        let image_urls = self.image_urls();
        if image_urls.is_empty() {
            return None;
        }

        Some(Candidate {
            id: self.id,
            image_urls,
            metadata: self,
        })
    }
}

pub fn split_image_urls(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|url| !url.is_empty())
        .map(ToString::to_string)
        .collect()
}

pub fn active_candidates(products: Vec<Product>) -> Vec<Candidate<Product>> {
    products
        .into_iter()
        .filter_map(Product::into_candidate)
        .collect()
}

pub trait CatalogGateway: Send + Sync {
    /// Active products that have at least one image url.
    fn list_active_products_with_images(&self) -> Result<Vec<Candidate<Product>>, CatalogError>;
}

/// In-memory catalog.
#[cfg(test)]
pub struct StaticCatalog {
    products: Vec<Product>,
}

#[cfg(test)]
impl StaticCatalog {
    pub fn new(products: Vec<Product>) -> Self {
        Self { products }
    }
}

#[cfg(test)]
impl CatalogGateway for StaticCatalog {
    fn list_active_products_with_images(&self) -> Result<Vec<Candidate<Product>>, CatalogError> {
        Ok(active_candidates(self.products.clone()))
    }
}
