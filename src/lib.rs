//! # fakekoji
//!
//! A stand-in for a Koji build hub that keeps everything on the filesystem.
//!
//! Build artifacts are pushed over SCP and land under
//! `<product>/<version>/<release>/...` according to the NVRA in their path. The same
//! tree answers Koji's read-only XML-RPC queries and is served for plain download.
//!
//! ## Library Usage
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use std::path::PathBuf;
//! use fakekoji::server::{AppState, xmlrpc_router};
//! use fakekoji::store::RescanCatalog;
//!
//! let root = PathBuf::from("./builds");
//! let state = Arc::new(AppState {
//!     catalog: Arc::new(RescanCatalog::new(&root)),
//!     repo_root: root,
//! });
//! let router = xmlrpc_router(state);
//! // Serve with axum...
//! ```
//!
//! ## Feature Flags
//!
//! - `cli` (default): Includes CLI module. Disable with `default-features = false`.

pub mod auth;
#[cfg(feature = "cli")]
pub mod cli;
pub mod config;
pub mod error;
pub mod ingest;
pub mod server;
pub mod store;
pub mod types;
