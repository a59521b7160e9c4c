//! XML-RPC hub tests, driven in-process through the router.

mod common;

use axum::body::Body;
use axum::http::{Request, StatusCode};

use common::{NVR, PRODUCT, TestRepo, body_string, get, int, kwargs, method_call, send, string};
use fakekoji::store::surrogate_id;

fn post(uri: &str, body: impl Into<Body>) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .body(body.into())
        .unwrap()
}

#[tokio::test]
async fn test_health() {
    let repo = TestRepo::new();
    let response = send(repo.xmlrpc(), get("/health")).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_string(response).await, "OK");
}

#[tokio::test]
async fn test_sum() {
    let repo = TestRepo::new();
    let response = send(repo.xmlrpc(), method_call("sum", &[&int(19), &int(23)])).await;

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()["content-type"], "text/xml");
    let body = body_string(response).await;
    assert!(body.contains("<params><param><value><int>42</int></value></param></params>"));
}

#[tokio::test]
async fn test_root_path_also_dispatches() {
    let repo = TestRepo::new();
    let request = post(
        "/",
        "<methodCall><methodName>sum</methodName><params>\
         <param><value><int>1</int></value></param>\
         <param><value><int>2</int></value></param>\
         </params></methodCall>",
    );

    let body = body_string(send(repo.xmlrpc(), request).await).await;
    assert!(body.contains("<int>3</int>"));
}

#[tokio::test]
async fn test_unknown_method_is_a_distinct_fault() {
    let repo = TestRepo::new();
    let response = send(repo.xmlrpc(), method_call("getBuildTarget", &[&string("x")])).await;

    assert_eq!(response.status(), StatusCode::OK);
    let body = body_string(response).await;
    assert!(body.contains("<fault>"));
    assert!(body.contains("<int>-32601</int>"));
    assert!(body.contains("getBuildTarget"));
}

#[tokio::test]
async fn test_malformed_request_is_a_fault() {
    let repo = TestRepo::new();
    let request = post("/kojihub", "<methodCall><oops/></methodCall>");

    let body = body_string(send(repo.xmlrpc(), request).await).await;
    assert!(body.contains("<fault>"));
    assert!(body.contains("<int>-32602</int>"));
}

#[tokio::test]
async fn test_deeply_nested_request_is_a_fault() {
    let repo = TestRepo::new();
    let depth = 20_000;
    let xml = format!(
        "<methodCall><methodName>sum</methodName><params><param>{}<value><int>1</int></value>{}\
         </param></params></methodCall>",
        "<value><array><data>".repeat(depth),
        "</data></array></value>".repeat(depth),
    );

    let response = send(repo.xmlrpc(), post("/kojihub", xml)).await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_string(response).await;
    assert!(body.contains("<fault>"));
    assert!(body.contains("<int>-32602</int>"));

    // the hub is still answering
    let request = method_call("sum", &[&int(1), &int(1)]);
    let body = body_string(send(repo.xmlrpc(), request).await).await;
    assert!(body.contains("<int>2</int>"));
}

#[tokio::test]
async fn test_get_package_id() {
    let repo = TestRepo::with_build();

    let request = method_call("getPackageID", &[&string(PRODUCT)]);
    let body = body_string(send(repo.xmlrpc(), request).await).await;
    assert!(body.contains(&format!("<int>{}</int>", surrogate_id(PRODUCT))));

    let request = method_call("getPackageID", &[&string("nope")]);
    let body = body_string(send(repo.xmlrpc(), request).await).await;
    assert!(body.contains("<value><nil/></value>"));
}

#[tokio::test]
async fn test_list_builds_sees_new_builds_without_restart() {
    let repo = TestRepo::with_build();
    let router = repo.xmlrpc();
    let package = int(surrogate_id(PRODUCT));

    let request = method_call("listBuilds", &[&package]);
    let body = body_string(send(router.clone(), request).await).await;
    assert_eq!(body.matches("<name>nvr</name>").count(), 1);
    assert!(body.contains(&format!("<string>{NVR}</string>")));

    repo.write(
        "java-1.8.0-openjdk/1.8.0.252.b09/0.fc30/x86_64/\
         java-1.8.0-openjdk-1.8.0.252.b09-0.fc30.x86_64.rpm",
        b"newer",
    );
    let request = method_call("listBuilds", &[&kwargs(&[("packageID", package)])]);
    let body = body_string(send(router, request).await).await;
    assert_eq!(body.matches("<name>nvr</name>").count(), 2);
}

#[tokio::test]
async fn test_list_builds_hides_failed_builds() {
    let repo = TestRepo::with_build();
    repo.write("java-1.8.0-openjdk/1.8.0.242.b08/1.fc30/FAILED", b"");

    let package = int(surrogate_id(PRODUCT));
    let body = body_string(send(repo.xmlrpc(), method_call("listBuilds", &[&package])).await).await;
    assert_eq!(body.matches("<name>nvr</name>").count(), 1);
    assert!(!body.contains("1.fc30"));
}

#[tokio::test]
async fn test_list_tags() {
    let repo = TestRepo::with_build();
    let build = int(surrogate_id(NVR));

    let request = method_call("listTags", &[&kwargs(&[("build", build)])]);
    let body = body_string(send(repo.xmlrpc(), request).await).await;
    for tag in ["f30-candidate", "f30-src", "f30-x86_64"] {
        assert!(body.contains(&format!("<string>{tag}</string>")), "missing {tag}");
    }

    let request = method_call("listTags", &[&int(12345)]);
    let body = body_string(send(repo.xmlrpc(), request).await).await;
    assert!(body.contains("<array><data></data></array>"));
}

#[tokio::test]
async fn test_list_rpms_filters_arches() {
    let repo = TestRepo::with_build();
    let build = int(surrogate_id(NVR));

    let body = body_string(send(repo.xmlrpc(), method_call("listRPMs", &[&build])).await).await;
    assert_eq!(body.matches("<name>arch</name>").count(), 2);

    let arches = "<value><array><data><value><string>src</string></value></data></array></value>";
    let arches = arches.to_string();
    let request = method_call("listRPMs", &[&kwargs(&[("buildID", build), ("arches", arches)])]);
    let body = body_string(send(repo.xmlrpc(), request).await).await;
    assert_eq!(body.matches("<name>arch</name>").count(), 1);
    assert!(body.contains("<string>src</string>"));
    assert!(body.contains("<string>INTERNAL</string>"));
}

#[tokio::test]
async fn test_list_archives_is_empty() {
    let repo = TestRepo::with_build();
    let build = int(surrogate_id(NVR));

    let request = method_call("listArchives", &[&kwargs(&[("buildID", build)])]);
    let body = body_string(send(repo.xmlrpc(), request).await).await;
    assert!(body.contains("<array><data></data></array>"));
}
