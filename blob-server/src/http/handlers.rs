use blob_storage::{BlobError, Pipeline};
use futures::TryStreamExt;
use http_body_util::{BodyExt, StreamBody};
use hyper::body::Frame;
use hyper::{header, Request, Response, StatusCode};
use tracing::{error, warn};

use super::multipart::{read_upload_form, FormError};
use super::{responses, BoxError, HttpBody};

/// HTTP status for a storage error.
pub fn status_for(err: &BlobError) -> StatusCode {
    match err {
        BlobError::InvalidKey(_) => StatusCode::BAD_REQUEST,
        BlobError::NotFound(_) => StatusCode::NOT_FOUND,
        BlobError::AlreadyExists(_) => StatusCode::OK,
        BlobError::IntegrityMismatch { .. } => StatusCode::PRECONDITION_FAILED,
        BlobError::Corrupted { .. } | BlobError::InternalIO(_) => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

fn blob_error_response(err: &BlobError) -> Response<HttpBody> {
    let status = status_for(err);
    if status.is_server_error() {
        error!(kind = err.kind(), "request failed: {err}");
    }
    responses::error_response(status, &err.to_string())
}

/// `POST /file`
pub async fn upload(pipeline: &Pipeline, req: Request<HttpBody>) -> Response<HttpBody> {
    let form = match read_upload_form(pipeline, req).await {
        Ok(form) => form,
        Err(FormError::Storage(e)) => return blob_error_response(&e),
        Err(e) => {
            warn!("rejecting upload: {e}");
            return responses::error_response(StatusCode::BAD_REQUEST, &e.to_string());
        }
    };

    match pipeline.commit_staged(form.staged, &form.declared).await {
        Ok(outcome) if outcome.created => {
            responses::hash_response(StatusCode::CREATED, &outcome.digest)
        }
        Ok(outcome) => responses::hash_response(StatusCode::OK, &outcome.digest),
        Err(e) => blob_error_response(&e),
    }
}

/// `GET /file/{digest}`, streamed after the content has been verified.
pub async fn download(pipeline: &Pipeline, digest: &str) -> Response<HttpBody> {
    let blob = match pipeline.retrieve(digest).await {
        Ok(blob) => blob,
        Err(e) => return blob_error_response(&e),
    };

    let size = blob.size();
    let frames = blob
        .into_stream()
        .map_ok(Frame::data)
        .map_err(BoxError::from);
    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "application/octet-stream")
        .header(header::CONTENT_LENGTH, size)
        .body(StreamBody::new(frames).boxed_unsync())
        .unwrap()
}

/// `DELETE /file/{digest}`. Unknown digests succeed as well.
pub async fn delete(pipeline: &Pipeline, digest: &str) -> Response<HttpBody> {
    match pipeline.remove(digest).await {
        Ok(()) => responses::json_response(StatusCode::OK, &serde_json::json!({ "hash": digest })),
        Err(e) => blob_error_response(&e),
    }
}

pub async fn health() -> Response<HttpBody> {
    responses::json_response(StatusCode::OK, &serde_json::json!({ "status": "healthy" }))
}
