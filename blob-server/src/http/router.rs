use std::future::Future;
use std::sync::{Arc, PoisonError, RwLock};

use async_trait::async_trait;
use hyper::{Method, Request, Response};

use super::HttpBody;

/// A handler for a route registered on the [`Router`].
#[async_trait]
pub trait RouteHandler: Send + Sync {
    async fn call(&self, req: Request<HttpBody>) -> Response<HttpBody>;
}

#[async_trait]
impl<F, Fut> RouteHandler for F
where
    F: Fn(Request<HttpBody>) -> Fut + Send + Sync,
    Fut: Future<Output = Response<HttpBody>> + Send + 'static,
{
    async fn call(&self, req: Request<HttpBody>) -> Response<HttpBody> {
        (self)(req).await
    }
}

/// Runs around every request, built-in routes included.
pub trait Middleware: Send + Sync {
    fn name(&self) -> &str {
        std::any::type_name::<Self>()
    }

    /// Returning a response answers the request without routing it.
    fn before(&self, req: &Request<HttpBody>) -> Option<Response<HttpBody>>;

    fn after(&self, _response: &mut Response<HttpBody>) {}
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum PathPattern {
    Exact(String),
    Prefix(String),
}

impl PathPattern {
    fn parse(path: &str) -> Self {
        match path.strip_suffix("/*") {
            Some(prefix) => PathPattern::Prefix(format!("{prefix}/")),
            None => PathPattern::Exact(path.to_string()),
        }
    }

    fn matches(&self, path: &str) -> bool {
        match self {
            PathPattern::Exact(exact) => exact == path,
            PathPattern::Prefix(prefix) => path.starts_with(prefix.as_str()),
        }
    }
}

struct Route {
    method: Method,
    pattern: PathPattern,
    handler: Arc<dyn RouteHandler>,
}

/// Additional routes and middleware layered on top of the blob endpoints.
///
/// Registration is allowed while the server is running.
#[derive(Default)]
pub struct Router {
    routes: RwLock<Vec<Route>>,
    middleware: RwLock<Vec<Arc<dyn Middleware>>>,
}

impl Router {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a route. A path ending in `/*` matches everything below that prefix.
    /// Earlier registrations win.
    pub fn route<H>(&self, method: Method, path: &str, handler: H)
    where
        H: RouteHandler + 'static,
    {
        tracing::debug!(%method, path, "registering route");
        self.routes
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Route {
                method,
                pattern: PathPattern::parse(path),
                handler: Arc::new(handler),
            });
    }

    /// Appends a middleware. Middleware run in registration order.
    pub fn middleware<M>(&self, middleware: M)
    where
        M: Middleware + 'static,
    {
        tracing::debug!(name = middleware.name(), "registering middleware");
        self.middleware
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Arc::new(middleware));
    }

    pub(crate) fn find(&self, method: &Method, path: &str) -> Option<Arc<dyn RouteHandler>> {
        self.routes
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .find(|route| route.method == *method && route.pattern.matches(path))
            .map(|route| route.handler.clone())
    }

    pub(crate) fn middleware_chain(&self) -> Vec<Arc<dyn Middleware>> {
        self.middleware
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl std::fmt::Debug for Router {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let routes = self.routes.read().unwrap_or_else(PoisonError::into_inner);
        let patterns: Vec<_> = routes
            .iter()
            .map(|route| (route.method.clone(), route.pattern.clone()))
            .collect();
        let middleware: Vec<String> = self
            .middleware_chain()
            .iter()
            .map(|m| m.name().to_string())
            .collect();
        f.debug_struct("Router")
            .field("routes", &patterns)
            .field("middleware", &middleware)
            .finish()
    }
}
