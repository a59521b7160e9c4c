mod handlers;

use std::sync::Arc;

use axum::Router;
use axum::routing::get;

use crate::server::AppState;

pub fn download_routes() -> Router<Arc<AppState>> {
    Router::new().route("/{*path}", get(handlers::download))
}
