use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use axum::extract::Request;
use axum::middleware::{self, Next};
use axum::response::Response;
use axum::{Router, routing::get};

use super::download::download_routes;
use super::xmlrpc::xmlrpc_routes;
use crate::store::BuildCatalog;

pub struct AppState {
    pub catalog: Arc<dyn BuildCatalog>,
    pub repo_root: PathBuf,
}

async fn health() -> &'static str {
    "OK"
}

async fn log_request(request: Request, next: Next) -> Response {
    let method = request.method().clone();
    let uri = request.uri().clone();
    let start = Instant::now();

    let response = next.run(request).await;

    let latency = start.elapsed();
    let status = response.status();

    tracing::info!(
        "{} {} {} {}ms",
        method,
        uri.path(),
        status.as_u16(),
        latency.as_millis()
    );

    response
}

/// The hub: XML-RPC queries on `/kojihub` (and `/`).
pub fn xmlrpc_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .merge(xmlrpc_routes())
        .layer(middleware::from_fn(log_request))
        .with_state(state)
}

/// Plain file downloads from the repository root.
pub fn download_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .merge(download_routes())
        .layer(middleware::from_fn(log_request))
        .with_state(state)
}
