use std::sync::Arc;

use axum::body::Body;
use axum::extract::State;
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use tracing::{debug, error, warn};

use super::codec::{fault_response, method_response, parse_method_call};
use super::methods::{dispatch, fault_code};
use crate::server::AppState;
use crate::server::response::ApiError;

const XML_MEDIA_TYPE: &str = "text/xml";

#[must_use]
fn xml_response(xml: String) -> Response {
    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, XML_MEDIA_TYPE)
        .body(Body::from(xml))
        .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response())
}

/// Every call scans the repository, so it runs on the blocking pool.
pub async fn call(State(state): State<Arc<AppState>>, body: String) -> Response {
    let catalog = state.catalog.clone();

    let outcome = tokio::task::spawn_blocking(move || {
        let call = parse_method_call(&body)?;
        debug!("XML-RPC {} with {} param(s)", call.name, call.params.len());
        dispatch(catalog.as_ref(), &call)
    })
    .await;

    match outcome {
        Ok(Ok(value)) => xml_response(method_response(&value)),
        Ok(Err(e)) => {
            warn!("XML-RPC fault: {e}");
            xml_response(fault_response(fault_code(&e), &e.to_string()))
        }
        Err(e) => {
            error!("XML-RPC worker failed: {e}");
            ApiError::internal("Internal error").into_response()
        }
    }
}
