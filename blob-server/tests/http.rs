use std::sync::Arc;

use async_trait::async_trait;
use base64::Engine;
use blob_server::http::{full, BasicAuth, BlobHttpService, HttpBody, RouteHandler};
use blob_storage::{BlobStore, HookRegistry, Pipeline, SharedMetrics};
use http_body_util::BodyExt;
use hyper::{header, Method, Request, Response, StatusCode};
use tempfile::TempDir;

const BOUNDARY: &str = "blob-test-boundary";
const HELLO: &[u8] = b"hello world";
const HELLO_SHA256: &str = "b94d27b9934d3e08a52e52d7da7dabfac484efe37a5380ee9088f7ace2efcde9";
const HELLO_MD5: &str = "5eb63bbbe01eeed093cb22bb8f5acdc3";

fn setup() -> (TempDir, BlobHttpService) {
    let dir = TempDir::new().unwrap();
    let store = Arc::new(BlobStore::new(dir.path()).unwrap());
    let pipeline = Pipeline::new(store, Arc::new(HookRegistry::new()), SharedMetrics::default());
    (dir, BlobHttpService::new(pipeline))
}

/// Builds a multipart body; text fields go before the file part.
fn multipart(file: Option<&[u8]>, fields: &[(&str, &str)]) -> Vec<u8> {
    let mut body = Vec::new();
    for (name, value) in fields {
        body.extend_from_slice(
            format!(
                "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"{name}\"\r\n\r\n{value}\r\n"
            )
            .as_bytes(),
        );
    }
    if let Some(data) = file {
        body.extend_from_slice(
            format!(
                "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"file\"; filename=\"upload.bin\"\r\n\
                 Content-Type: application/octet-stream\r\n\r\n"
            )
            .as_bytes(),
        );
        body.extend_from_slice(data);
        body.extend_from_slice(b"\r\n");
    }
    body.extend_from_slice(format!("--{BOUNDARY}--\r\n").as_bytes());
    body
}

fn upload_request(body: Vec<u8>) -> Request<HttpBody> {
    Request::builder()
        .method(Method::POST)
        .uri("/file")
        .header(
            header::CONTENT_TYPE,
            format!("multipart/form-data; boundary={BOUNDARY}"),
        )
        .body(full(body))
        .unwrap()
}

fn request(method: Method, uri: &str) -> Request<HttpBody> {
    Request::builder()
        .method(method)
        .uri(uri)
        .body(full(""))
        .unwrap()
}

async fn body_bytes(response: Response<HttpBody>) -> Vec<u8> {
    response.into_body().collect().await.unwrap().to_bytes().to_vec()
}

async fn body_json(response: Response<HttpBody>) -> serde_json::Value {
    serde_json::from_slice(&body_bytes(response).await).unwrap()
}

#[tokio::test]
async fn upload_then_download() {
    let (_dir, service) = setup();

    let response = service.handle(upload_request(multipart(Some(HELLO), &[]))).await;
    assert_eq!(response.status(), StatusCode::CREATED);
    assert_eq!(body_json(response).await["hash"], HELLO_SHA256);

    let response = service
        .handle(request(Method::GET, &format!("/file/{HELLO_SHA256}")))
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers()[header::CONTENT_LENGTH],
        HELLO.len().to_string().as_str()
    );
    assert_eq!(body_bytes(response).await, HELLO);
}

#[tokio::test]
async fn second_upload_reports_existing_blob() {
    let (_dir, service) = setup();

    let first = service.handle(upload_request(multipart(Some(HELLO), &[]))).await;
    assert_eq!(first.status(), StatusCode::CREATED);

    let second = service.handle(upload_request(multipart(Some(HELLO), &[]))).await;
    assert_eq!(second.status(), StatusCode::OK);
    assert_eq!(body_json(second).await["hash"], HELLO_SHA256);
}

#[tokio::test]
async fn declared_digests_are_verified() {
    let (dir, service) = setup();

    let upper = HELLO_MD5.to_uppercase();
    let response = service
        .handle(upload_request(multipart(
            Some(HELLO),
            &[("MD5", upper.as_str()), ("SHA256", HELLO_SHA256)],
        )))
        .await;
    assert_eq!(response.status(), StatusCode::CREATED);

    std::fs::remove_file(dir.path().join("store").join(&HELLO_SHA256[..2]).join(HELLO_SHA256))
        .unwrap();

    let wrong = "0".repeat(64);
    let response = service
        .handle(upload_request(multipart(Some(HELLO), &[("SHA256", wrong.as_str())])))
        .await;
    assert_eq!(response.status(), StatusCode::PRECONDITION_FAILED);
    let error = body_json(response).await;
    assert_eq!(error["status"], 412);

    let response = service
        .handle(request(Method::GET, &format!("/file/{HELLO_SHA256}")))
        .await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert_eq!(std::fs::read_dir(dir.path().join("tmp")).unwrap().count(), 0);
}

#[tokio::test]
async fn conflicting_declared_digests_are_rejected() {
    let (_dir, service) = setup();

    let response = service
        .handle(upload_request(multipart(
            Some(HELLO),
            &[("MD5", "ffffffffffffffffffffffffffffffff"), ("MD5", HELLO_MD5)],
        )))
        .await;
    assert_eq!(response.status(), StatusCode::PRECONDITION_FAILED);

    let response = service
        .handle(request(Method::GET, &format!("/file/{HELLO_SHA256}")))
        .await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let response = service
        .handle(upload_request(multipart(
            Some(HELLO),
            &[("MD5", HELLO_MD5), ("MD5", HELLO_MD5)],
        )))
        .await;
    assert_eq!(response.status(), StatusCode::CREATED);
}

#[tokio::test]
async fn declared_digest_after_file_part() {
    let (_dir, service) = setup();

    let mut body = Vec::new();
    body.extend_from_slice(
        format!(
            "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"file\"; filename=\"a\"\r\n\r\n"
        )
        .as_bytes(),
    );
    body.extend_from_slice(HELLO);
    body.extend_from_slice(
        format!(
            "\r\n--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"MD5\"\r\n\r\n{}\r\n--{BOUNDARY}--\r\n",
            "ffffffffffffffffffffffffffffffff"
        )
        .as_bytes(),
    );

    let response = service.handle(upload_request(body)).await;
    assert_eq!(response.status(), StatusCode::PRECONDITION_FAILED);
}

#[tokio::test]
async fn malformed_uploads_are_bad_requests() {
    let (_dir, service) = setup();

    let response = service
        .handle(upload_request(multipart(None, &[("MD5", HELLO_MD5)])))
        .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let response = service
        .handle(
            Request::builder()
                .method(Method::POST)
                .uri("/file")
                .header(header::CONTENT_TYPE, "application/octet-stream")
                .body(full(HELLO))
                .unwrap(),
        )
        .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn download_errors() {
    let (_dir, service) = setup();

    let response = service
        .handle(request(Method::GET, &format!("/file/{HELLO_SHA256}")))
        .await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let response = service.handle(request(Method::GET, "/file/a")).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn corrupted_blob_is_purged() {
    let (dir, service) = setup();
    service.handle(upload_request(multipart(Some(HELLO), &[]))).await;

    let path = dir
        .path()
        .join("store")
        .join(&HELLO_SHA256[..2])
        .join(HELLO_SHA256);
    std::fs::write(&path, b"hello wOrld").unwrap();

    let response = service
        .handle(request(Method::GET, &format!("/file/{HELLO_SHA256}")))
        .await;
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert!(!path.exists());

    let response = service
        .handle(request(Method::GET, &format!("/file/{HELLO_SHA256}")))
        .await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn delete_is_idempotent() {
    let (_dir, service) = setup();
    service.handle(upload_request(multipart(Some(HELLO), &[]))).await;

    for _ in 0..2 {
        let response = service
            .handle(request(Method::DELETE, &format!("/file/{HELLO_SHA256}")))
            .await;
        assert_eq!(response.status(), StatusCode::OK);
    }

    let response = service
        .handle(request(Method::GET, &format!("/file/{HELLO_SHA256}")))
        .await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let response = service.handle(request(Method::DELETE, "/file/x")).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn health_and_unknown_routes() {
    let (_dir, service) = setup();

    let response = service.handle(request(Method::GET, "/health")).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await["status"], "healthy");

    let response = service.handle(request(Method::GET, "/nope")).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    let error = body_json(response).await;
    assert_eq!(error["status"], 404);
    assert_eq!(error["error"], "Not Found");
}

#[tokio::test]
async fn registered_routes_are_served() {
    let (_dir, service) = setup();
    service
        .router()
        .route(Method::GET, "/stats/*", |req: Request<HttpBody>| async move {
            let path = req.uri().path().to_string();
            Response::builder()
                .status(StatusCode::ACCEPTED)
                .body(full(path))
                .unwrap()
        });

    let response = service.handle(request(Method::GET, "/stats/blobs")).await;
    assert_eq!(response.status(), StatusCode::ACCEPTED);
    assert_eq!(body_bytes(response).await, b"/stats/blobs");

    // built-in routes are not shadowed
    let response = service.handle(request(Method::GET, "/health")).await;
    assert_eq!(response.status(), StatusCode::OK);
}

struct Explodes;

#[async_trait]
impl RouteHandler for Explodes {
    async fn call(&self, _req: Request<HttpBody>) -> Response<HttpBody> {
        panic!("handler blew up")
    }
}

#[tokio::test]
async fn panicking_handler_becomes_internal_error() {
    let (_dir, service) = setup();
    service.router().route(Method::GET, "/explode", Explodes);

    let response = service.handle(request(Method::GET, "/explode")).await;
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);

    // the service keeps working
    let response = service.handle(request(Method::GET, "/health")).await;
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn basic_auth_short_circuits() {
    let (_dir, service) = setup();
    service
        .router()
        .middleware(BasicAuth::new("admin".to_string(), "secret".to_string()));

    let response = service.handle(upload_request(multipart(Some(HELLO), &[]))).await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert!(response.headers().contains_key(header::WWW_AUTHENTICATE));

    let response = service.handle(request(Method::GET, "/health")).await;
    assert_eq!(response.status(), StatusCode::OK);

    let mut req = upload_request(multipart(Some(HELLO), &[]));
    let credentials = base64::engine::general_purpose::STANDARD.encode("admin:secret");
    req.headers_mut().insert(
        header::AUTHORIZATION,
        format!("Basic {credentials}").parse().unwrap(),
    );
    let response = service.handle(req).await;
    assert_eq!(response.status(), StatusCode::CREATED);
}
