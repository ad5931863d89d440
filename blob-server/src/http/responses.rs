use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::{header, Response, StatusCode};
use serde::Serialize;

use super::HttpBody;

pub fn full(bytes: impl Into<Bytes>) -> HttpBody {
    Full::new(bytes.into())
        .map_err(|never| match never {})
        .boxed_unsync()
}

pub fn json_response<T: Serialize>(status: StatusCode, data: &T) -> Response<HttpBody> {
    let json = serde_json::to_vec(data).unwrap_or_else(|_| b"{}".to_vec());
    Response::builder()
        .status(status)
        .header(header::CONTENT_TYPE, "application/json")
        .body(full(json))
        .unwrap()
}

pub fn error_response(status: StatusCode, message: &str) -> Response<HttpBody> {
    let error = serde_json::json!({
        "error": message,
        "status": status.as_u16()
    });
    json_response(status, &error)
}

pub fn hash_response(status: StatusCode, digest: &str) -> Response<HttpBody> {
    json_response(status, &serde_json::json!({ "hash": digest }))
}

pub fn not_found() -> Response<HttpBody> {
    error_response(StatusCode::NOT_FOUND, "Not Found")
}

pub fn internal_error() -> Response<HttpBody> {
    error_response(StatusCode::INTERNAL_SERVER_ERROR, "Internal Server Error")
}
