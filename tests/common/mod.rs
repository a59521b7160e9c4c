//! Shared fixtures: a temporary repository and helpers to drive the routers in-process.

#![allow(dead_code)]

use std::fs;
use std::path::Path;
use std::sync::Arc;

use axum::Router;
use axum::body::{Body, to_bytes};
use axum::http::{Request, Response};
use tempfile::TempDir;
use tower::ServiceExt;

use fakekoji::server::{AppState, download_router, xmlrpc_router};
use fakekoji::store::RescanCatalog;

pub const PRODUCT: &str = "java-1.8.0-openjdk";
pub const BUILD_DIR: &str = "java-1.8.0-openjdk/1.8.0.242.b08/0.fc30";
pub const NVR: &str = "java-1.8.0-openjdk-1.8.0.242.b08-0.fc30";
pub const NVRA: &str = "java-1.8.0-openjdk-1.8.0.242.b08-0.fc30.x86_64.rpm";

pub struct TestRepo {
    pub temp_dir: TempDir,
}

impl TestRepo {
    pub fn new() -> Self {
        Self {
            temp_dir: TempDir::new().expect("create temp dir"),
        }
    }

    /// A repository with one complete build carrying binaries, data and logs.
    pub fn with_build() -> Self {
        let repo = Self::new();
        repo.write(&format!("{BUILD_DIR}/x86_64/{NVRA}"), b"x86_64 binary");
        repo.write(&format!("{BUILD_DIR}/src/{NVR}.src.rpm"), b"source");
        repo.write(&format!("{BUILD_DIR}/data/readme.txt"), b"hello");
        repo.write(&format!("{BUILD_DIR}/data/logs/x86_64/build.log"), b"log");
        repo
    }

    pub fn root(&self) -> &Path {
        self.temp_dir.path()
    }

    pub fn write(&self, relative: &str, content: &[u8]) {
        let path = self.root().join(relative);
        fs::create_dir_all(path.parent().expect("file has a parent")).expect("create dirs");
        fs::write(path, content).expect("write file");
    }

    pub fn state(&self) -> Arc<AppState> {
        Arc::new(AppState {
            catalog: Arc::new(RescanCatalog::new(self.root())),
            repo_root: self.root().to_path_buf(),
        })
    }

    pub fn xmlrpc(&self) -> Router {
        xmlrpc_router(self.state())
    }

    pub fn downloads(&self) -> Router {
        download_router(self.state())
    }
}

pub async fn send(router: Router, request: Request<Body>) -> Response<Body> {
    router.oneshot(request).await.expect("router is infallible")
}

pub async fn body_bytes(response: Response<Body>) -> Vec<u8> {
    to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("read body")
        .to_vec()
}

pub async fn body_string(response: Response<Body>) -> String {
    String::from_utf8(body_bytes(response).await).expect("utf-8 body")
}

pub fn get(uri: &str) -> Request<Body> {
    Request::builder()
        .uri(uri)
        .body(Body::empty())
        .expect("valid request")
}

/// `params` are already-encoded `<value>` elements.
pub fn method_call(method: &str, params: &[&str]) -> Request<Body> {
    let params: String = params
        .iter()
        .map(|value| format!("<param>{value}</param>"))
        .collect();
    let xml = format!(
        "<?xml version='1.0'?>\n<methodCall><methodName>{method}</methodName>\
         <params>{params}</params></methodCall>"
    );

    Request::builder()
        .method("POST")
        .uri("/kojihub")
        .header("content-type", "text/xml")
        .body(Body::from(xml))
        .expect("valid request")
}

pub fn int(value: i32) -> String {
    format!("<value><int>{value}</int></value>")
}

pub fn string(value: &str) -> String {
    format!("<value><string>{value}</string></value>")
}

/// Koji's encoding of keyword arguments.
pub fn kwargs(members: &[(&str, String)]) -> String {
    let mut xml = String::from(
        "<value><struct>\
         <member><name>__starstar</name><value><boolean>1</boolean></value></member>",
    );
    for (name, value) in members {
        xml.push_str(&format!("<member><name>{name}</name>{value}</member>"));
    }
    xml.push_str("</struct></value>");
    xml
}
