mod codec;
mod handlers;
mod methods;

use std::sync::Arc;

use axum::Router;
use axum::routing::post;

use crate::server::AppState;

pub use codec::{MethodCall, Value, fault_response, method_response, parse_method_call};
pub use methods::{
    FAULT_GENERIC, FAULT_INVALID_PARAMS, FAULT_UNSUPPORTED_METHOD, RpcMethod, dispatch, fault_code,
};

pub fn xmlrpc_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/kojihub", post(handlers::call))
        .route("/", post(handlers::call))
}
