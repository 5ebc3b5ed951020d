use std::time::Duration;

use super::{active_candidates, Candidate, CatalogError, CatalogGateway, Product};

/// Catalog served as a JSON array of products by another service.
///
/// Uses the blocking client; call it off the async runtime.
pub struct HttpCatalog {
    url: String,
    timeout: Duration,
}

impl HttpCatalog {
    pub fn new(url: &str, timeout: Duration) -> Self {
        Self {
            url: url.to_string(),
            timeout,
        }
    }
}

impl CatalogGateway for HttpCatalog {
    fn list_active_products_with_images(&self) -> Result<Vec<Candidate<Product>>, CatalogError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(self.timeout)
            .build()?;

        log::debug!("loading catalog from {}", self.url);
        let products: Vec<Product> = client
            .get(&self.url)
            .send()?
            .error_for_status()?
            .json()?;

        Ok(active_candidates(products))
    }
}
