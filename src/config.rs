use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use homedir::my_home;
use serde::{Deserialize, Serialize};

use crate::embedding::DEFAULT_MODEL;
use crate::fetch::RetryPolicy;
use crate::search::{SearchOptions, DEFAULT_MAX_CONCURRENCY, DEFAULT_THRESHOLD};

const CONFIG_FILE: &str = "config.yaml";
const DEFAULT_CATALOG_FILE: &str = "products.csv";
const DEFAULT_LISTEN_ADDR: &str = "0.0.0.0:7000";
const DEFAULT_FETCH_TIMEOUT_SECS: u64 = 10;
const DEFAULT_CATALOG_TIMEOUT_SECS: u64 = 10;
const DEFAULT_RETRY_BACKOFF_MS: u64 = 500;
const DEFAULT_MAX_IMAGE_BYTES: u64 = 20 * 1024 * 1024;
const DEFAULT_UPLOAD_LIMIT_BYTES: usize = 16 * 1024 * 1024;
const MAX_CONCURRENCY_LIMIT: usize = 256;

/// Where products come from
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CatalogConfig {
    /// CSV export; defaults to `products.csv` in the base directory
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,

    /// HTTP endpoint returning a JSON array of products
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,

    #[serde(default = "default_catalog_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for CatalogConfig {
    fn default() -> Self {
        Self {
            path: None,
            url: None,
            timeout_secs: DEFAULT_CATALOG_TIMEOUT_SECS,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum CatalogSource {
    Csv(PathBuf),
    Http(String),
}

/// Configuration for the similarity search
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SearchConfig {
    /// Embedding model (e.g. "resnet50", "clip-vit-b32", "histogram")
    #[serde(default = "default_model")]
    pub model: String,

    /// Minimum similarity [0.0, 1.0], inclusive
    #[serde(default = "default_threshold")]
    pub similarity_threshold: f32,

    /// Maximum number of results; all matches when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_k: Option<usize>,

    /// Catalog images processed at once
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,

    #[serde(default = "default_fetch_timeout_secs")]
    pub fetch_timeout_secs: u64,

    /// Extra attempts for transient download failures
    #[serde(default)]
    pub fetch_retries: u8,

    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,

    /// Budget for a whole search; partial results are returned when hit
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub search_timeout_secs: Option<u64>,

    #[serde(default = "default_max_image_bytes")]
    pub max_image_bytes: u64,

    /// Directory for downloaded catalog images; system temp dir when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub download_dir: Option<String>,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            model: DEFAULT_MODEL.to_string(),
            similarity_threshold: DEFAULT_THRESHOLD,
            top_k: None,
            max_concurrency: DEFAULT_MAX_CONCURRENCY,
            fetch_timeout_secs: DEFAULT_FETCH_TIMEOUT_SECS,
            fetch_retries: 0,
            retry_backoff_ms: DEFAULT_RETRY_BACKOFF_MS,
            search_timeout_secs: None,
            max_image_bytes: DEFAULT_MAX_IMAGE_BYTES,
            download_dir: None,
        }
    }
}

fn default_model() -> String {
    DEFAULT_MODEL.to_string()
}

fn default_threshold() -> f32 {
    DEFAULT_THRESHOLD
}

fn default_max_concurrency() -> usize {
    DEFAULT_MAX_CONCURRENCY
}

fn default_fetch_timeout_secs() -> u64 {
    DEFAULT_FETCH_TIMEOUT_SECS
}

fn default_catalog_timeout_secs() -> u64 {
    DEFAULT_CATALOG_TIMEOUT_SECS
}

fn default_retry_backoff_ms() -> u64 {
    DEFAULT_RETRY_BACKOFF_MS
}

fn default_max_image_bytes() -> u64 {
    DEFAULT_MAX_IMAGE_BYTES
}

fn default_listen_addr() -> String {
    DEFAULT_LISTEN_ADDR.to_string()
}

fn default_upload_limit_bytes() -> usize {
    DEFAULT_UPLOAD_LIMIT_BYTES
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,
    #[serde(default = "default_upload_limit_bytes")]
    pub upload_limit_bytes: usize,
    #[serde(default)]
    pub catalog: CatalogConfig,
    #[serde(default)]
    pub search: SearchConfig,

    #[serde(skip_serializing, skip_deserializing)]
    base_path: PathBuf,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
            upload_limit_bytes: default_upload_limit_bytes(),
            catalog: CatalogConfig::default(),
            search: SearchConfig::default(),
            base_path: PathBuf::new(),
        }
    }
}

/// Base directory for config, models and the default catalog.
pub fn base_path() -> Result<PathBuf> {
    if let Ok(path) = std::env::var("VISEARCH_BASE_PATH") {
        return Ok(PathBuf::from(path));
    }

    let home = my_home()
        .context("could not determine home directory")?
        .context("home directory path is empty")?;
    Ok(home.join(".local/share/visearch"))
}

impl Config {
    pub fn validate(&self) -> Result<()> {
        let search = &self.search;

        if !(0.0..=1.0).contains(&search.similarity_threshold) {
            bail!(
                "search.similarity_threshold must be between 0.0 and 1.0, got {}",
                search.similarity_threshold
            );
        }

        if search.max_concurrency == 0 || search.max_concurrency > MAX_CONCURRENCY_LIMIT {
            bail!(
                "search.max_concurrency must be between 1 and {MAX_CONCURRENCY_LIMIT}, got {}",
                search.max_concurrency
            );
        }

        if search.top_k == Some(0) {
            bail!("search.top_k must be greater than 0 when set");
        }

        if search.fetch_timeout_secs == 0 {
            bail!("search.fetch_timeout_secs must be greater than 0");
        }

        if search.search_timeout_secs == Some(0) {
            bail!("search.search_timeout_secs must be greater than 0 when set");
        }

        if search.max_image_bytes == 0 {
            bail!("search.max_image_bytes must be greater than 0");
        }

        if self.catalog.path.is_some() && self.catalog.url.is_some() {
            bail!("catalog.path and catalog.url are mutually exclusive");
        }

        if self.catalog.timeout_secs == 0 {
            bail!("catalog.timeout_secs must be greater than 0");
        }

        if self.upload_limit_bytes == 0 {
            bail!("upload_limit_bytes must be greater than 0");
        }

        Ok(())
    }

    /// Environment variables take precedence over the config file.
    pub fn apply_env<V>(&mut self, var: V)
    where
        V: Fn(&str) -> Option<String>,
    {
        if let Some(addr) = var("VISEARCH_ADDR") {
            self.listen_addr = addr;
        }

        if let Some(model) = var("VISEARCH_MODEL") {
            self.search.model = model;
        }

        if let Some(path) = var("VISEARCH_CATALOG_PATH") {
            self.catalog.path = Some(path);
            self.catalog.url = None;
        }

        if let Some(url) = var("VISEARCH_CATALOG_URL") {
            self.catalog.url = Some(url);
            self.catalog.path = None;
        }
    }

    pub fn load() -> Result<Self> {
        let base_path = base_path()?;
        Self::load_with(&base_path)
    }

    pub fn load_with(base_path: &Path) -> Result<Self> {
        std::fs::create_dir_all(base_path)
            .with_context(|| format!("failed to create {}", base_path.display()))?;

        let config_path = base_path.join(CONFIG_FILE);

        // create new if does not exist
        if !config_path.exists() {
            std::fs::write(&config_path, serde_yml::to_string(&Self::default())?)
                .with_context(|| format!("failed to write {}", config_path.display()))?;
        }

        let config_str = std::fs::read_to_string(&config_path)
            .with_context(|| format!("failed to read {}", config_path.display()))?;
        let mut config: Self = serde_yml::from_str(&config_str).context("config is malformed")?;

        config.base_path = base_path.to_path_buf();

        // resave in case config version needs an upgrade
        let upgraded = serde_yml::to_string(&config)?;
        if config_str != upgraded {
            std::fs::write(&config_path, upgraded)
                .with_context(|| format!("failed to write {}", config_path.display()))?;
        }

        config.apply_env(|key| std::env::var(key).ok());
        config.validate()?;

        Ok(config)
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    pub fn catalog_source(&self) -> CatalogSource {
        match (&self.catalog.url, &self.catalog.path) {
            (Some(url), _) => CatalogSource::Http(url.clone()),
            (None, Some(path)) => CatalogSource::Csv(PathBuf::from(path)),
            (None, None) => CatalogSource::Csv(self.base_path.join(DEFAULT_CATALOG_FILE)),
        }
    }

    pub fn catalog_timeout(&self) -> Duration {
        Duration::from_secs(self.catalog.timeout_secs)
    }

    pub fn download_dir(&self) -> Option<PathBuf> {
        self.search.download_dir.as_ref().map(PathBuf::from)
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.search.fetch_timeout_secs)
    }

    pub fn search_options(&self) -> SearchOptions {
        let search = &self.search;
        SearchOptions {
            threshold: search.similarity_threshold,
            top_k: search.top_k,
            max_concurrency: search.max_concurrency,
            timeout: search.search_timeout_secs.map(Duration::from_secs),
            retry: RetryPolicy {
                max_retries: search.fetch_retries,
                backoff: Duration::from_millis(search.retry_backoff_ms),
            },
        }
    }
}
