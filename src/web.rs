use crate::{
    app,
    catalog::{Candidate, Product},
    config::Config,
    fetch::ImageFetcher,
    search::{CancelToken, ScoredResult, SearchError, SearchReport, SearchService},
};
use axum::{
    extract::{DefaultBodyLimit, Multipart, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;
use serde_json::json;
use std::sync::Arc;
use tokio::signal;

const ALLOWED_EXTENSIONS: [&str; 3] = ["png", "jpg", "jpeg"];
const UPLOAD_FIELD: &str = "image";
const SUCCESS_MESSAGE: &str = "Thành công";

pub struct SharedState<F> {
    service: Arc<SearchService<F>>,
    /// Cancelled on shutdown so running searches return early
    shutdown: CancelToken,
}

impl<F> Clone for SharedState<F> {
    fn clone(&self) -> Self {
        Self {
            service: self.service.clone(),
            shutdown: self.shutdown.clone(),
        }
    }
}

pub fn allowed_file(filename: &str) -> bool {
    filename
        .rsplit_once('.')
        .map(|(_, ext)| ALLOWED_EXTENSIONS.contains(&ext.to_lowercase().as_str()))
        .unwrap_or(false)
}

/// One product in an API response.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProductItem {
    pub id: u64,
    pub product_code: String,
    pub name: String,
    pub price: f64,
    pub description: String,
    pub total_quantity: i64,
    pub sold_quantity: i64,
    pub rating: f64,
    pub discount: f64,
    pub image_url: Vec<String>,
    pub is_active: bool,
    pub category: serde_json::Value,
    pub variants: serde_json::Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub similarity: Option<f32>,
}

impl ProductItem {
    fn new(candidate: Candidate<Product>, similarity: Option<f32>) -> Self {
        let product = candidate.metadata;
        Self {
            id: product.id,
            product_code: product.product_code,
            name: product.name,
            price: product.price,
            description: product.description,
            total_quantity: product.total_quantity,
            sold_quantity: product.sold_quantity,
            rating: product.rating,
            discount: product.discount,
            image_url: candidate.image_urls,
            is_active: product.is_active,
            category: product.category,
            variants: product.variants,
            similarity,
        }
    }
}

impl From<ScoredResult<Product>> for ProductItem {
    fn from(result: ScoredResult<Product>) -> Self {
        Self::new(result.candidate, Some(result.score))
    }
}

impl From<Candidate<Product>> for ProductItem {
    fn from(candidate: Candidate<Product>) -> Self {
        Self::new(candidate, None)
    }
}

#[derive(Debug, Serialize)]
pub struct Items {
    pub items: Vec<ProductItem>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Pagination {
    pub total_items: usize,
    pub total_pages: usize,
}

/// Response envelope shared by all list endpoints.
#[derive(Debug, Serialize)]
pub struct Envelope {
    pub data: Items,
    pub pagination: Pagination,
    pub code: u16,
    pub message: &'static str,
    pub success: bool,
}

impl Envelope {
    pub fn new(items: Vec<ProductItem>) -> Self {
        let total_items = items.len();
        Self {
            data: Items { items },
            pagination: Pagination {
                total_items,
                total_pages: usize::from(total_items > 0),
            },
            code: StatusCode::OK.as_u16(),
            message: SUCCESS_MESSAGE,
            success: true,
        }
    }

    pub fn from_report(report: SearchReport<Product>) -> Self {
        Self::new(report.results.into_iter().map(Into::into).collect())
    }
}

#[derive(Debug)]
pub enum HttpError {
    BadRequest(String),
    Search(SearchError),
}

impl From<SearchError> for HttpError {
    fn from(err: SearchError) -> Self {
        HttpError::Search(err)
    }
}

impl IntoResponse for HttpError {
    fn into_response(self) -> axum::response::Response {
        match self {
            HttpError::BadRequest(message) => {
                log::debug!("bad request: {message}");
                (StatusCode::BAD_REQUEST, Json(json!({"error": message}))).into_response()
            }
            HttpError::Search(err) => {
                let status = match &err {
                    SearchError::InvalidQueryImage(_) => StatusCode::BAD_REQUEST,
                    SearchError::CatalogUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
                    SearchError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
                };
                if status.is_server_error() {
                    log::error!("{err:?}");
                }
                (
                    status,
                    Json(json!({
                        "error": err.to_string(),
                        "code": err.code(),
                        "success": false,
                    })),
                )
                    .into_response()
            }
        }
    }
}

/// Pull the uploaded image out of the multipart body.
async fn read_upload(multipart: &mut Multipart) -> Result<Vec<u8>, HttpError> {
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| HttpError::BadRequest(format!("Malformed upload: {e}")))?
    {
        if field.name() != Some(UPLOAD_FIELD) {
            continue;
        }

        let filename = field.file_name().unwrap_or_default().to_string();
        if filename.is_empty() {
            return Err(HttpError::BadRequest("No image selected".to_string()));
        }

        if !allowed_file(&filename) {
            return Err(HttpError::BadRequest("Invalid file type".to_string()));
        }

        let bytes = field
            .bytes()
            .await
            .map_err(|e| HttpError::BadRequest(format!("Malformed upload: {e}")))?;

        if bytes.is_empty() {
            return Err(HttpError::BadRequest("No image selected".to_string()));
        }

        if !infer::is_image(&bytes) {
            return Err(HttpError::BadRequest("Invalid file type".to_string()));
        }

        return Ok(bytes.to_vec());
    }

    Err(HttpError::BadRequest("No image provided".to_string()))
}

async fn search_by_image<F: ImageFetcher>(
    State(state): State<SharedState<F>>,
    mut multipart: Multipart,
) -> Result<Json<Envelope>, HttpError> {
    let image = read_upload(&mut multipart).await?;
    log::debug!("query image: {} bytes", image.len());

    let report = state
        .service
        .search_by_image(image, &state.shutdown)
        .await?;

    Ok(Json(Envelope::from_report(report)))
}

async fn list_products<F: ImageFetcher>(
    State(state): State<SharedState<F>>,
) -> Result<Json<Envelope>, HttpError> {
    let products = state.service.list_products().await?;
    Ok(Json(Envelope::new(
        products.into_iter().map(Into::into).collect(),
    )))
}

async fn health<F: ImageFetcher>(State(state): State<SharedState<F>>) -> impl IntoResponse {
    Json(json!({"status": "ok", "model": state.service.model_name()}))
}

pub fn router<F: ImageFetcher>(
    service: Arc<SearchService<F>>,
    shutdown: CancelToken,
    upload_limit_bytes: usize,
) -> Router {
    let state = SharedState { service, shutdown };

    Router::new()
        .route("/api/search-by-image", post(search_by_image::<F>))
        .route("/api/products", get(list_products::<F>))
        .route("/health", get(health::<F>))
        .layer(DefaultBodyLimit::max(upload_limit_bytes))
        .layer(tower_http::cors::CorsLayer::permissive())
        .layer(
            tower_http::trace::TraceLayer::new_for_http()
                .make_span_with(
                    tower_http::trace::DefaultMakeSpan::new().level(tracing::Level::INFO),
                )
                .on_response(
                    tower_http::trace::DefaultOnResponse::new().level(tracing::Level::INFO),
                ),
        )
        .with_state(state)
}

async fn shutdown_signal(shutdown: CancelToken) {
    let ctrl_c = async {
        if let Err(err) = signal::ctrl_c().await {
            log::error!("failed to install Ctrl+C handler: {err}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(err) => {
                log::error!("failed to install signal handler: {err}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    log::warn!("shutting down, cancelling running searches");
    shutdown.cancel();
}

async fn start_app(config: Config) -> anyhow::Result<()> {
    let service = tokio::task::block_in_place(|| app::build_service(&config))?;
    let shutdown = CancelToken::new();

    let app = router(Arc::new(service), shutdown.clone(), config.upload_limit_bytes);

    let listener = tokio::net::TcpListener::bind(&config.listen_addr).await?;
    log::info!("listening on {}", config.listen_addr);
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(shutdown))
        .await?;

    Ok(())
}

pub fn start_daemon(config: Config) -> anyhow::Result<()> {
    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?
        .block_on(start_app(config))
}
