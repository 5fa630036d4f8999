//! pdf2md-gateway - HTTP front end for pluggable PDF-to-markdown backends.

mod backends;
mod config;
mod dispatcher;
mod error;
mod registry;
mod upload;

use axum::{
    extract::{multipart::MultipartRejection, DefaultBodyLimit, Multipart, State},
    http::StatusCode,
    response::{Html, IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use config::ServerConfig;
use dispatcher::{Conversion, Dispatcher};
use error::ConvertError;
use registry::{BackendStatus, Registry};
use serde::Serialize;
use std::any::Any;
use std::sync::Arc;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const INDEX_HTML: &str = include_str!("../templates/index.html");

/// Application state shared across handlers.
#[derive(Clone)]
struct AppState {
    registry: Arc<Registry>,
    dispatcher: Arc<Dispatcher>,
}

impl AppState {
    fn new(registry: Registry, config: &ServerConfig) -> Self {
        let registry = Arc::new(registry);
        let dispatcher = Dispatcher::new(registry.clone(), config.staging_dir.clone());
        Self {
            registry,
            dispatcher: Arc::new(dispatcher),
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if present
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| "pdf2md_gateway=debug,tower_http=debug".into()))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = ServerConfig::from_env()?;

    // Probe backends once, before serving
    let registry = Registry::probe(&config).await;
    let available: Vec<_> = registry
        .list()
        .into_iter()
        .filter(|s| s.available)
        .map(|s| s.name)
        .collect();
    info!("Available backends: {:?}", available);

    let state = AppState::new(registry, &config);
    let app = router(state, config.max_upload_bytes);

    // Run server
    let addr = config.bind_addr();
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("Server listening on http://{}", addr);
    axum::serve(listener, app).await?;

    Ok(())
}

fn router(state: AppState, max_upload_bytes: usize) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/health", get(health))
        .route("/libraries", get(list_libraries))
        .route("/convert", post(convert_pdf))
        .layer(DefaultBodyLimit::max(max_upload_bytes))
        .layer(CatchPanicLayer::custom(panic_response))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

// ============================================================================
// Handlers
// ============================================================================

/// Upload page.
async fn index() -> Html<&'static str> {
    Html(INDEX_HTML)
}

/// Health check endpoint.
async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "healthy" }))
}

#[derive(Serialize)]
struct LibrariesResponse {
    libraries: Vec<BackendStatus>,
}

/// List conversion backends and whether each is usable.
async fn list_libraries(State(state): State<AppState>) -> Json<LibrariesResponse> {
    Json(LibrariesResponse {
        libraries: state.registry.list(),
    })
}

/// Convert an uploaded PDF with the requested backend.
async fn convert_pdf(
    State(state): State<AppState>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<Json<Conversion>, ConvertError> {
    let request = upload::parse_multipart(multipart?).await?;
    let conversion = state.dispatcher.handle(request).await?;
    Ok(Json(conversion))
}

/// Turn a handler panic into the same JSON error shape as other failures.
fn panic_response(err: Box<dyn Any + Send + 'static>) -> Response {
    let message = if let Some(s) = err.downcast_ref::<String>() {
        s.clone()
    } else if let Some(s) = err.downcast_ref::<&str>() {
        s.to_string()
    } else {
        "handler panicked".to_string()
    };
    error!("Unexpected error: {}", message);
    ConvertError::Unexpected(message).into_response()
}
