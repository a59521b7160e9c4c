use std::sync::Arc;

use axum::body::Body;
use axum::extract::{Path, State};
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use tokio::fs::{self, File};
use tokio_util::io::ReaderStream;

use crate::error::Error;
use crate::server::AppState;
use crate::server::response::ApiError;
use crate::store::path::checked_relative_path;

/// Streams one file. Directories are never listed.
pub async fn download(
    State(state): State<Arc<AppState>>,
    Path(path): Path<String>,
) -> Result<Response, ApiError> {
    let relative = checked_relative_path(&path)?;
    let full = state.repo_root.join(relative);

    let metadata = fs::metadata(&full).await.map_err(Error::from_io)?;
    if !metadata.is_file() {
        return Err(ApiError::not_found("Not found"));
    }

    let file = File::open(&full).await.map_err(Error::from_io)?;
    let body = Body::from_stream(ReaderStream::new(file));

    Ok(Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "application/octet-stream")
        .header(header::CONTENT_LENGTH, metadata.len())
        .header("X-Content-Type-Options", "nosniff")
        .body(body)
        .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response()))
}
