//! Development static file server with a path traversal guard.
//!
//! Every resolved path is canonicalized and checked against the base
//! directory before anything is read, so `..` segments and symlink escapes
//! answer 403 rather than leaking files.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use axum::extract::State;
use axum::http::{header, HeaderValue, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use axum::Router;
use tower::ServiceBuilder;
use tower_http::cors::{Any, CorsLayer};
use tower_http::set_header::SetResponseHeaderLayer;
use tower_http::trace::TraceLayer;
use tracing::{debug, info};

use crate::config::StaticConfig;
use crate::error::{MeterError, Result};

/// Create the static file application rooted at the configured directory.
pub fn create_app(base_dir: impl Into<PathBuf>) -> Router {
    Router::new()
        .fallback(serve_file)
        .with_state(Arc::new(base_dir.into()))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CorsLayer::new().allow_origin(Any).allow_methods(Any))
                .layer(SetResponseHeaderLayer::overriding(
                    header::CACHE_CONTROL,
                    HeaderValue::from_static("no-store"),
                )),
        )
}

/// Start the static file server with the provided configuration.
pub async fn serve(config: StaticConfig) -> Result<()> {
    let addr = config
        .bind_address()
        .parse::<SocketAddr>()
        .map_err(|e| MeterError::config_error(format!("Invalid bind address: {}", e)))?;
    let app = create_app(config.base_dir.clone());

    info!(
        "Serving {} on http://{}",
        config.base_dir.display(),
        addr
    );
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .map_err(|e| MeterError::relay_error(format!("Failed to bind to address: {}", e)))?;
    axum::serve(listener, app)
        .await
        .map_err(|e| MeterError::relay_error(format!("Server error: {}", e)))?;
    Ok(())
}

async fn serve_file(State(base_dir): State<Arc<PathBuf>>, uri: Uri) -> Response {
    let path = uri.path();
    let relative = if path == "/" { "index.html" } else { path.trim_start_matches('/') };
    let requested = base_dir.join(relative);

    let Ok(base) = tokio::fs::canonicalize(base_dir.as_ref()).await else {
        return StatusCode::NOT_FOUND.into_response();
    };
    let resolved = match tokio::fs::canonicalize(&requested).await {
        Ok(resolved) => resolved,
        Err(_) => return StatusCode::NOT_FOUND.into_response(),
    };
    if !resolved.starts_with(&base) {
        debug!("Blocked path escaping base dir: {}", path);
        return StatusCode::FORBIDDEN.into_response();
    }

    match tokio::fs::read(&resolved).await {
        Ok(contents) => (
            [(header::CONTENT_TYPE, content_type(&resolved))],
            contents,
        )
            .into_response(),
        Err(_) => StatusCode::NOT_FOUND.into_response(),
    }
}

fn content_type(path: &std::path::Path) -> &'static str {
    match path.extension().and_then(|e| e.to_str()) {
        Some("html") => "text/html; charset=utf-8",
        Some("js") => "text/javascript",
        Some("css") => "text/css",
        Some("json") => "application/json",
        Some("svg") => "image/svg+xml",
        Some("png") => "image/png",
        Some("jpg") | Some("jpeg") => "image/jpeg",
        Some("gif") => "image/gif",
        Some("ico") => "image/x-icon",
        Some("woff2") => "font/woff2",
        _ => "application/octet-stream",
    }
}
