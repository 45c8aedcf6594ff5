//! HTTP surface
//!
//! All routes live under `/api`. Request bodies are capped by
//! `DefaultBodyLimit`; oversized bodies are answered with 413.

pub mod dto;
pub mod error;
pub mod handlers;

pub use error::{ApiError, ApiJson, ErrorResponse};

use crate::{batch::BatchProcessor, session::SessionStore};
use axum::{
    extract::DefaultBodyLimit,
    http::{HeaderValue, Method},
    routing::{delete, get, post},
    Router,
};
use std::future::Future;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

/// Default request body ceiling (100 MiB)
pub const DEFAULT_MAX_BODY_BYTES: usize = 100 * 1024 * 1024;

/// Default ceiling for the uncompressed images of one uploaded ZIP (1 GiB)
pub const DEFAULT_MAX_EXTRACTED_BYTES: u64 = 1024 * 1024 * 1024;

/// Shared state handed to every handler
#[derive(Clone)]
pub struct AppState {
    pub processor: BatchProcessor,
    pub sessions: Arc<SessionStore>,
    pub max_extracted_bytes: u64,
}

impl AppState {
    #[must_use]
    pub fn new(processor: BatchProcessor, sessions: Arc<SessionStore>) -> Self {
        Self {
            processor,
            sessions,
            max_extracted_bytes: DEFAULT_MAX_EXTRACTED_BYTES,
        }
    }

    #[must_use]
    pub fn with_max_extracted_bytes(mut self, bytes: u64) -> Self {
        self.max_extracted_bytes = bytes;
        self
    }
}

/// Router-level settings
#[derive(Debug, Clone)]
pub struct RouterSettings {
    pub max_body_bytes: usize,
    /// Allowed CORS origins; empty or `*` allows any origin
    pub cors_origins: Vec<String>,
}

impl Default for RouterSettings {
    fn default() -> Self {
        Self {
            max_body_bytes: DEFAULT_MAX_BODY_BYTES,
            cors_origins: Vec::new(),
        }
    }
}

/// Build the application router
pub fn build_router(state: AppState, settings: &RouterSettings) -> Router {
    let api = Router::new()
        .route("/health", get(handlers::health))
        .route("/process-images", post(handlers::process_images))
        .route("/download-zip", post(handlers::download_zip))
        .route("/process-zip", post(handlers::process_zip))
        .route("/upload", post(handlers::upload))
        .route("/process", post(handlers::process_session))
        .route("/download/{session_id}", get(handlers::download_session))
        .route("/preview/{session_id}/{filename}", get(handlers::preview))
        .route("/cleanup/{session_id}", delete(handlers::cleanup));

    Router::new()
        .nest("/api", api)
        .fallback(handlers::not_found)
        .layer(DefaultBodyLimit::max(settings.max_body_bytes))
        .layer(cors_layer(&settings.cors_origins))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

fn cors_layer(origins: &[String]) -> CorsLayer {
    let methods = [Method::GET, Method::POST, Method::DELETE, Method::OPTIONS];

    if origins.is_empty() || origins.iter().any(|origin| origin == "*") {
        return CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(methods)
            .allow_headers(Any);
    }

    let allowed: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|origin| match origin.parse() {
            Ok(value) => Some(value),
            Err(_) => {
                tracing::warn!(%origin, "ignoring invalid CORS origin");
                None
            },
        })
        .collect();

    CorsLayer::new()
        .allow_origin(allowed)
        .allow_methods(methods)
        .allow_headers(Any)
}

/// Serve `router` until `shutdown` resolves
///
/// # Errors
/// Returns the I/O error that stopped the accept loop.
pub async fn serve<F>(
    listener: tokio::net::TcpListener,
    router: Router,
    shutdown: F,
) -> std::io::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown)
        .await
}
