use std::io;

use blob_storage::{Algorithm, BlobError, DeclaredDigests, Pipeline, StagedUpload};
use futures::TryStreamExt;
use http_body_util::BodyExt;
use hyper::{header, Request};
use tracing::debug;

use super::HttpBody;

/// Form field carrying the blob content.
pub const FILE_FIELD: &str = "file";

/// Why an upload form could not be turned into a staged blob.
#[derive(Debug)]
pub enum FormError {
    /// Not a multipart body, or the body broke off mid-way.
    Malformed(String),
    MissingFile,
    DuplicateFile,
    Storage(BlobError),
}

impl std::fmt::Display for FormError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FormError::Malformed(reason) => write!(f, "Malformed multipart form: {}", reason),
            FormError::MissingFile => write!(f, "Missing form field: {}", FILE_FIELD),
            FormError::DuplicateFile => write!(f, "Form field {} sent more than once", FILE_FIELD),
            FormError::Storage(e) => write!(f, "{}", e),
        }
    }
}

impl std::error::Error for FormError {}

impl From<multer::Error> for FormError {
    fn from(e: multer::Error) -> Self {
        FormError::Malformed(e.to_string())
    }
}

impl From<BlobError> for FormError {
    fn from(e: BlobError) -> Self {
        match e {
            // the multipart stream failed, not the disk
            BlobError::InternalIO(io) if io.kind() == io::ErrorKind::InvalidData => {
                FormError::Malformed(io.to_string())
            }
            other => FormError::Storage(other),
        }
    }
}

/// An upload whose content sits in a staging file, with the digests the client declared.
#[derive(Debug)]
pub struct UploadForm {
    pub staged: StagedUpload,
    pub declared: DeclaredDigests,
}

/// Reads a `multipart/form-data` upload.
///
/// The `file` part is streamed into staging as it arrives. Text parts named
/// after a digest algorithm (`MD5`, `SHA1`, `SHA256`, `SHA512`) are collected
/// as declared digests and may appear before or after the file. Empty values
/// and unrelated fields are ignored.
pub async fn read_upload_form(
    pipeline: &Pipeline,
    req: Request<HttpBody>,
) -> Result<UploadForm, FormError> {
    let content_type = req
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .ok_or_else(|| FormError::Malformed("missing content-type".to_string()))?;
    let boundary = multer::parse_boundary(content_type)?;

    let mut multipart = multer::Multipart::new(req.into_body().into_data_stream(), boundary);
    let mut staged = None;
    let mut declared = DeclaredDigests::new();

    while let Some(field) = multipart.next_field().await? {
        let name = field.name().unwrap_or_default().to_string();
        if name == FILE_FIELD {
            if staged.is_some() {
                return Err(FormError::DuplicateFile);
            }
            let chunks = field.map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e));
            staged = Some(pipeline.stage_stream(chunks).await?);
            continue;
        }

        match name.parse::<Algorithm>() {
            Ok(algorithm) => {
                let value = field.text().await?;
                let value = value.trim();
                if !value.is_empty() {
                    declared.insert(algorithm, value);
                }
            }
            Err(_) => debug!(field = %name, "ignoring form field"),
        }
    }

    let staged = staged.ok_or(FormError::MissingFile)?;
    Ok(UploadForm { staged, declared })
}
