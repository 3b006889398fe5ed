//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Verify the upstream target parses and uses a supported scheme
//! - Verify identity header names are valid HTTP header names
//! - Verify allowlist patterns are absolute paths
//! - Verify the start path can ride in a `Location` header
//!
//! # Design Decisions
//! - Returns all validation errors, not just the first
//! - Validation is a pure function: GatewayConfig -> Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use axum::http::header::HeaderName;
use thiserror::Error;
use url::Url;

use crate::config::schema::GatewayConfig;

/// A single semantic validation failure.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("upstream url is required")]
    MissingUpstream,

    #[error("upstream url is malformed: {0}")]
    MalformedUpstream(String),

    #[error("upstream scheme must be http or https, got {0}")]
    UnsupportedScheme(String),

    #[error("upstream url has no host")]
    MissingUpstreamHost,

    #[error("invalid identity header name: {0}")]
    InvalidHeaderName(String),

    #[error("allowlist pattern must start with '/': {0}")]
    RelativeAllowlistPattern(String),

    #[error("start path must be an absolute path without control characters: {0:?}")]
    InvalidStartPath(String),
}

/// A start path is legal when it is absolute and can appear verbatim in a
/// `Location` header value.
pub fn start_path_is_valid(path: &str) -> bool {
    path.starts_with('/') && axum::http::HeaderValue::try_from(path).is_ok()
}

/// Validate a configuration, collecting every error found.
pub fn validate_config(config: &GatewayConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.upstream.url.is_empty() {
        errors.push(ValidationError::MissingUpstream);
    } else {
        match Url::parse(&config.upstream.url) {
            Ok(url) => {
                if url.scheme() != "http" && url.scheme() != "https" {
                    errors.push(ValidationError::UnsupportedScheme(url.scheme().to_string()));
                }
                if url.host_str().is_none() {
                    errors.push(ValidationError::MissingUpstreamHost);
                }
            }
            Err(e) => errors.push(ValidationError::MalformedUpstream(e.to_string())),
        }
    }

    let mut header_names = vec![
        config.auth.trusted_identity_header.as_str(),
        config.identity_headers.user.as_str(),
    ];
    if let Some(name) = &config.identity_headers.name {
        header_names.push(name);
    }
    if let Some(groups) = &config.identity_headers.groups {
        header_names.push(groups);
    }
    for name in header_names {
        if HeaderName::try_from(name).is_err() {
            errors.push(ValidationError::InvalidHeaderName(name.to_string()));
        }
    }

    for pattern in &config.auth.allowlist {
        if !pattern.starts_with('/') {
            errors.push(ValidationError::RelativeAllowlistPattern(pattern.clone()));
        }
    }

    if !start_path_is_valid(&config.auth.start_path) {
        errors.push(ValidationError::InvalidStartPath(
            config.auth.start_path.clone(),
        ));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
