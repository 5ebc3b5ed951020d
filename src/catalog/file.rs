//! CSV catalog export.
//!
//! One product per row with a header line. `category` and `variants` hold
//! JSON documents, `is_active` accepts `1/0` as well as `true/false`.

use std::path::PathBuf;

use serde::Deserialize;

use super::{active_candidates, Candidate, CatalogError, CatalogGateway, Product};

#[derive(Debug, Deserialize)]
struct ProductRow {
    id: u64,
    #[serde(default)]
    product_code: String,
    #[serde(default)]
    name: String,
    #[serde(default)]
    price: f64,
    #[serde(default)]
    description: String,
    #[serde(default)]
    total_quantity: i64,
    #[serde(default)]
    sold_quantity: i64,
    #[serde(default)]
    rating: f64,
    #[serde(default)]
    discount: f64,
    #[serde(default)]
    image_url: String,
    #[serde(default)]
    is_active: String,
    #[serde(default)]
    category: String,
    #[serde(default)]
    variants: String,
}

fn parse_flag(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes"
    )
}

fn parse_json(value: &str, empty: serde_json::Value) -> serde_json::Result<serde_json::Value> {
    if value.trim().is_empty() {
        return Ok(empty);
    }
    serde_json::from_str(value)
}

impl TryFrom<ProductRow> for Product {
    type Error = serde_json::Error;

    fn try_from(row: ProductRow) -> Result<Self, Self::Error> {
        Ok(Product {
            id: row.id,
            product_code: row.product_code,
            name: row.name,
            price: row.price,
            description: row.description,
            total_quantity: row.total_quantity,
            sold_quantity: row.sold_quantity,
            rating: row.rating,
            discount: row.discount,
            image_url: row.image_url,
            is_active: parse_flag(&row.is_active),
            category: parse_json(&row.category, serde_json::Value::Null)?,
            variants: parse_json(&row.variants, serde_json::Value::Array(vec![]))?,
        })
    }
}

pub struct CsvCatalog {
    path: PathBuf,
}

impl CsvCatalog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Read every parseable row. Malformed rows are logged and skipped.
    pub fn load(&self) -> Result<Vec<Product>, CatalogError> {
        let mut csv_reader = csv::Reader::from_path(&self.path)?;

        let mut products = Vec::new();
        for (idx, row) in csv_reader.deserialize::<ProductRow>().enumerate() {
            // header is line 1
            let line = idx + 2;
            let row = match row {
                Ok(row) => row,
                Err(err) => {
                    log::warn!("{}:{line}: skipping row: {err}", self.path.display());
                    continue;
                }
            };

            let id = row.id;
            match Product::try_from(row) {
                Ok(product) => products.push(product),
                Err(err) => {
                    log::warn!(
                        "{}:{line}: skipping product {id}: malformed metadata: {err}",
                        self.path.display()
                    );
                }
            }
        }

        Ok(products)
    }
}

impl CatalogGateway for CsvCatalog {
    fn list_active_products_with_images(&self) -> Result<Vec<Candidate<Product>>, CatalogError> {
        Ok(active_candidates(self.load()?))
    }
}
