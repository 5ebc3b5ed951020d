use std::sync::Arc;

use anyhow::{Context, Result};

use crate::{
    catalog::{CatalogGateway, CsvCatalog, HttpCatalog},
    config::{CatalogSource, Config},
    embedding::build_extractor,
    fetch::HttpFetcher,
    search::SearchService,
};

pub fn build_catalog(config: &Config) -> Arc<dyn CatalogGateway> {
    match config.catalog_source() {
        CatalogSource::Csv(path) => {
            log::info!("using csv catalog: {}", path.display());
            Arc::new(CsvCatalog::new(path))
        }
        CatalogSource::Http(url) => {
            log::info!("using remote catalog: {url}");
            Arc::new(HttpCatalog::new(&url, config.catalog_timeout()))
        }
    }
}

/// Wire up the search service. Loads the embedding model, so this is slow
/// on first run and must only happen once per process.
pub fn build_service(config: &Config) -> Result<SearchService<HttpFetcher>> {
    let extractor = build_extractor(&config.search.model, config.base_path().to_path_buf())
        .context("failed to initialize embedding model")?;

    let mut fetcher = HttpFetcher::new(config.fetch_timeout(), config.search.max_image_bytes)
        .context("failed to build http client")?;
    if let Some(dir) = config.download_dir() {
        std::fs::create_dir_all(&dir)
            .with_context(|| format!("failed to create {}", dir.display()))?;
        fetcher = fetcher.with_temp_dir(dir);
    }

    let service = SearchService::new(
        extractor,
        Arc::new(fetcher),
        build_catalog(config),
        config.search_options(),
    );
    log::info!(
        "search ready: model {}, threshold {}, concurrency {}",
        service.model_name(),
        service.options().threshold,
        service.options().max_concurrency
    );

    Ok(service)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_service_with_histogram_model() {
        let tmp = tempfile::tempdir().unwrap();
        let mut config = Config::load_with(tmp.path()).unwrap();
        config.search.model = "histogram".to_string();

        let service = build_service(&config).unwrap();
        assert_eq!(service.model_name(), "histogram");
        assert_eq!(service.options().threshold, 0.4);
    }

    #[test]
    fn test_build_service_creates_download_dir() {
        let tmp = tempfile::tempdir().unwrap();
        let mut config = Config::load_with(tmp.path()).unwrap();
        config.search.model = "histogram".to_string();
        let downloads = tmp.path().join("downloads");
        config.search.download_dir = Some(downloads.to_string_lossy().into_owned());

        build_service(&config).unwrap();
        assert!(downloads.is_dir());
    }

    #[test]
    fn test_build_service_rejects_unknown_model() {
        let tmp = tempfile::tempdir().unwrap();
        let mut config = Config::load_with(tmp.path()).unwrap();
        config.search.model = "no-such-model".to_string();

        assert!(build_service(&config).is_err());
    }
}
