mod download;
pub mod response;
mod router;
pub mod xmlrpc;

pub use router::{AppState, download_router, xmlrpc_router};
