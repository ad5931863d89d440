mod auth;
mod handlers;
mod multipart;
mod responses;
mod router;

pub use auth::BasicAuth;
pub use handlers::status_for;
pub use multipart::{read_upload_form, FormError, UploadForm, FILE_FIELD};
pub use responses::{error_response, full, json_response};
pub use router::{Middleware, RouteHandler, Router};

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;

use blob_storage::Pipeline;
use bytes::Bytes;
use futures::FutureExt;
use http_body_util::combinators::UnsyncBoxBody;
use http_body_util::BodyExt;
use hyper::{Method, Request, Response};
use tracing::{error, info, Instrument};
use uuid::Uuid;

use crate::metrics::PrometheusMetrics;

pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Body type for both requests and responses.
pub type HttpBody = UnsyncBoxBody<Bytes, BoxError>;

const FILE_PREFIX: &str = "/file/";

/// The blob HTTP API.
#[derive(Clone)]
pub struct BlobHttpService {
    pipeline: Pipeline,
    router: Arc<Router>,
    metrics: Option<PrometheusMetrics>,
}

impl BlobHttpService {
    pub fn new(pipeline: Pipeline) -> Self {
        Self {
            pipeline,
            router: Arc::new(Router::new()),
            metrics: None,
        }
    }

    /// Records request counts and latencies in Prometheus.
    pub fn with_metrics(mut self, metrics: PrometheusMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn pipeline(&self) -> &Pipeline {
        &self.pipeline
    }

    /// Extension point for additional routes and middleware.
    pub fn router(&self) -> &Arc<Router> {
        &self.router
    }

    /// Entry point for hyper connections.
    pub async fn handle_request(
        &self,
        req: Request<hyper::body::Incoming>,
    ) -> Result<Response<HttpBody>, std::convert::Infallible> {
        let req = req.map(|body| body.map_err(BoxError::from).boxed_unsync());
        Ok(self.handle(req).await)
    }

    /// Handles one request. A panic anywhere below turns into a 500 response.
    pub async fn handle(&self, req: Request<HttpBody>) -> Response<HttpBody> {
        let method = req.method().clone();
        let span = tracing::info_span!(
            "request",
            id = %Uuid::new_v4(),
            method = %method,
            path = %req.uri().path(),
        );

        async move {
            let start = Instant::now();
            let response = match AssertUnwindSafe(self.dispatch(req)).catch_unwind().await {
                Ok(response) => response,
                Err(panic) => {
                    let message = panic
                        .downcast_ref::<&str>()
                        .map(|s| s.to_string())
                        .or_else(|| panic.downcast_ref::<String>().cloned())
                        .unwrap_or_else(|| "unknown panic".to_string());
                    error!(panic = %message, "request handler panicked");
                    responses::internal_error()
                }
            };

            let elapsed = start.elapsed();
            if let Some(metrics) = &self.metrics {
                metrics.http_request(method.as_str(), response.status().as_u16(), elapsed.as_secs_f64());
            }
            info!(
                status = response.status().as_u16(),
                elapsed_ms = elapsed.as_millis() as u64,
                "request finished"
            );
            response
        }
        .instrument(span)
        .await
    }

    async fn dispatch(&self, req: Request<HttpBody>) -> Response<HttpBody> {
        let chain = self.router.middleware_chain();
        for middleware in &chain {
            if let Some(response) = middleware.before(&req) {
                tracing::debug!(middleware = middleware.name(), "request answered by middleware");
                return response;
            }
        }

        let mut response = self.route_request(req).await;
        for middleware in chain.iter().rev() {
            middleware.after(&mut response);
        }
        response
    }

    async fn route_request(&self, req: Request<HttpBody>) -> Response<HttpBody> {
        let path = req.uri().path().to_string();
        let method = req.method().clone();

        match (&method, path.as_str()) {
            (&Method::POST, "/file") => handlers::upload(&self.pipeline, req).await,
            (&Method::GET, "/health") => handlers::health().await,
            (&Method::GET, path) if path.starts_with(FILE_PREFIX) => {
                handlers::download(&self.pipeline, &path[FILE_PREFIX.len()..]).await
            }
            (&Method::DELETE, path) if path.starts_with(FILE_PREFIX) => {
                handlers::delete(&self.pipeline, &path[FILE_PREFIX.len()..]).await
            }
            (method, path) => match self.router.find(method, path) {
                Some(handler) => handler.call(req).await,
                None => responses::not_found(),
            },
        }
    }
}

impl std::fmt::Debug for BlobHttpService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BlobHttpService")
            .field("pipeline", &self.pipeline)
            .field("router", &self.router)
            .finish_non_exhaustive()
    }
}
