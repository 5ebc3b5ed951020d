//! Search service used by the HTTP and CLI front ends.

use std::sync::Arc;

use super::{CancelToken, SearchError, SearchOptions, SearchPipeline, SearchReport};
use crate::catalog::{Candidate, CatalogGateway, Product};
use crate::embedding::EmbeddingExtractor;
use crate::fetch::ImageFetcher;

pub struct SearchService<F> {
    pipeline: SearchPipeline<F>,
    catalog: Arc<dyn CatalogGateway>,
    options: SearchOptions,
}

impl<F: ImageFetcher> SearchService<F> {
    pub fn new(
        extractor: Arc<dyn EmbeddingExtractor>,
        fetcher: Arc<F>,
        catalog: Arc<dyn CatalogGateway>,
        options: SearchOptions,
    ) -> Self {
        Self {
            pipeline: SearchPipeline::new(extractor, fetcher),
            catalog,
            options,
        }
    }

    /// Default options for requests that do not override them.
    pub fn options(&self) -> &SearchOptions {
        &self.options
    }

    pub fn model_name(&self) -> &str {
        self.pipeline.extractor().name()
    }

    /// Load catalog candidates off the async runtime.
    pub async fn list_products(&self) -> Result<Vec<Candidate<Product>>, SearchError> {
        let catalog = self.catalog.clone();
        tokio::task::spawn_blocking(move || catalog.list_active_products_with_images())
            .await
            .map_err(|e| SearchError::Internal(format!("catalog task failed: {e}")))?
            .map_err(SearchError::CatalogUnavailable)
    }

    pub async fn search_by_image(
        &self,
        image: Vec<u8>,
        cancel: &CancelToken,
    ) -> Result<SearchReport<Product>, SearchError> {
        self.search_with(image, &self.options, cancel).await
    }

    /// The query is embedded before the catalog is read, so an unusable
    /// query image costs no catalog or network work.
    pub async fn search_with(
        &self,
        image: Vec<u8>,
        options: &SearchOptions,
        cancel: &CancelToken,
    ) -> Result<SearchReport<Product>, SearchError> {
        let query = self.pipeline.embed_query(image).await?;
        let candidates = self.list_products().await?;
        Ok(self.pipeline.rank(query, candidates, options, cancel).await)
    }
}
