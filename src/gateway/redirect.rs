//! Redirect-to-start response construction.
//!
//! # Responsibilities
//! - Build the response sent to denied, non-bypassed clients
//!
//! # Design Decisions
//! - The originally requested URL rides along as an `rd` query parameter
//!   so the authentication flow can return the user afterwards

use axum::body::Body;
use axum::http::request::Parts;
use axum::http::{header, Response, StatusCode};

use crate::config::validation::start_path_is_valid;
use crate::gateway::SetupError;

/// Builds the denied/unauthenticated response. External contract:
/// deployments may substitute their own flow entry point.
pub trait RedirectBuilder: Send + Sync {
    fn redirect_to_start(&self, parts: &Parts) -> Response<Body>;
}

/// Redirects to a configured start path, carrying the original URL.
#[derive(Debug, Clone)]
pub struct StartRedirect {
    start_path: String,
}

impl StartRedirect {
    /// Accepts only an absolute, header-value-safe start path, so the
    /// `Location` header built per request cannot fail.
    pub fn new(start_path: impl Into<String>) -> Result<Self, SetupError> {
        let start_path = start_path.into();
        if !start_path_is_valid(&start_path) {
            return Err(SetupError::InvalidStartPath(start_path));
        }
        Ok(Self { start_path })
    }
}

impl RedirectBuilder for StartRedirect {
    fn redirect_to_start(&self, parts: &Parts) -> Response<Body> {
        let original = parts
            .uri
            .path_and_query()
            .map(|pq| pq.as_str())
            .unwrap_or("/");
        let query = url::form_urlencoded::Serializer::new(String::new())
            .append_pair("rd", original)
            .finish();
        let location = format!("{}?{}", self.start_path, query);

        // Infallible: the start path was vetted at construction and the
        // query is percent-encoded.
        Response::builder()
            .status(StatusCode::FOUND)
            .header(header::LOCATION, location)
            .body(Body::empty())
            .unwrap()
    }
}
