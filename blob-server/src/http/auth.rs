use base64::Engine;
use hyper::{header, Request, Response, StatusCode};
use subtle::ConstantTimeEq;

use super::responses::full;
use super::router::Middleware;
use super::HttpBody;

/// Paths reachable without credentials.
const PUBLIC_PATHS: &[&str] = &["/health"];

/// HTTP basic authentication for every route except the health check.
#[derive(Clone)]
pub struct BasicAuth {
    username: String,
    password: String,
}

impl BasicAuth {
    pub fn new(username: String, password: String) -> Self {
        Self { username, password }
    }

    /// Check if request has valid authentication
    pub fn check_auth<B>(&self, req: &Request<B>) -> bool {
        let Some(auth_str) = req
            .headers()
            .get(header::AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
        else {
            return false;
        };

        let Some(encoded) = auth_str.strip_prefix("Basic ") else {
            return false;
        };
        let Ok(decoded) = base64::engine::general_purpose::STANDARD.decode(encoded.trim()) else {
            return false;
        };
        let Ok(credentials) = String::from_utf8(decoded) else {
            return false;
        };
        let Some((username, password)) = credentials.split_once(':') else {
            return false;
        };

        let user_ok = username.as_bytes().ct_eq(self.username.as_bytes());
        let pass_ok = password.as_bytes().ct_eq(self.password.as_bytes());
        (user_ok & pass_ok).into()
    }

    /// Return 401 response with WWW-Authenticate header
    pub fn auth_required_response(&self) -> Response<HttpBody> {
        Response::builder()
            .status(StatusCode::UNAUTHORIZED)
            .header(header::WWW_AUTHENTICATE, "Basic realm=\"blob-server\"")
            .header(header::CONTENT_TYPE, "text/plain")
            .body(full("Authentication required"))
            .unwrap()
    }
}

impl std::fmt::Debug for BasicAuth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BasicAuth")
            .field("username", &self.username)
            .finish_non_exhaustive()
    }
}

impl Middleware for BasicAuth {
    fn name(&self) -> &str {
        "basic-auth"
    }

    fn before(&self, req: &Request<HttpBody>) -> Option<Response<HttpBody>> {
        if PUBLIC_PATHS.contains(&req.uri().path()) || self.check_auth(req) {
            return None;
        }
        tracing::debug!(path = req.uri().path(), "rejecting unauthenticated request");
        Some(self.auth_required_response())
    }
}
