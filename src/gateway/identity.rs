//! Identity resolution and request classification.
//!
//! # Responsibilities
//! - Define the resolved identity shape (Claims)
//! - Consult the claim resolver and allowlist matcher
//! - Classify each request as authenticated, bypassed, or denied
//!
//! # Design Decisions
//! - Claims is an explicit struct with a required identifier, not a map
//! - Classification is a pure per-request decision; no retries
//! - The "no claims, no resolver error" case is forwarded without identity
//!   headers and logged explicitly rather than treated as authenticated

use async_trait::async_trait;
use axum::http::request::Parts;
use axum::http::HeaderValue;
use std::sync::Arc;
use thiserror::Error;

/// Resolved identity for a request.
///
/// `email` is the required identifier; the remaining fields are optional
/// extensions a resolver may populate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Claims {
    pub email: String,
    pub name: Option<String>,
    pub groups: Vec<String>,
}

impl Claims {
    pub fn new(email: impl Into<String>) -> Self {
        Self {
            email: email.into(),
            name: None,
            groups: Vec::new(),
        }
    }
}

/// Claim resolution failure (e.g., expired or invalid session).
///
/// Not fatal: the dispatcher converts it into a redirect to the start of
/// the authentication flow.
#[derive(Debug, Clone, Error)]
#[error("claim resolution failed: {0}")]
pub struct ResolveError(pub String);

/// Resolves claims for a request.
///
/// `Ok(Some(_))` means an authenticated identity, `Ok(None)` means no
/// identity and no failure, `Err(_)` means resolution failed.
#[async_trait]
pub trait ClaimResolver: Send + Sync {
    async fn resolve(&self, parts: &Parts) -> Result<Option<Claims>, ResolveError>;
}

/// Decides whether a request path may bypass authentication.
pub trait AllowlistMatcher: Send + Sync {
    fn matches(&self, parts: &Parts) -> bool;
}

/// Allowlist built from configured path prefixes.
#[derive(Debug, Clone, Default)]
pub struct PathPrefixAllowlist {
    prefixes: Vec<String>,
}

impl PathPrefixAllowlist {
    pub fn new(prefixes: Vec<String>) -> Self {
        Self { prefixes }
    }
}

impl AllowlistMatcher for PathPrefixAllowlist {
    fn matches(&self, parts: &Parts) -> bool {
        let path = parts.uri.path();
        self.prefixes.iter().any(|p| path.starts_with(p))
    }
}

/// Built-in resolver reading identity from a header set by a trusted
/// fronting authenticator. Deployments with their own session validation
/// plug in a custom [`ClaimResolver`] instead.
#[derive(Debug, Clone)]
pub struct TrustedHeaderResolver {
    header: axum::http::HeaderName,
}

impl TrustedHeaderResolver {
    pub fn new(header: axum::http::HeaderName) -> Self {
        Self { header }
    }
}

#[async_trait]
impl ClaimResolver for TrustedHeaderResolver {
    async fn resolve(&self, parts: &Parts) -> Result<Option<Claims>, ResolveError> {
        match parts.headers.get(&self.header).map(HeaderValue::to_str) {
            Some(Ok(email)) if !email.is_empty() => Ok(Some(Claims::new(email))),
            Some(Ok(_)) | None => Ok(None),
            Some(Err(_)) => Err(ResolveError("identity header is not valid UTF-8".into())),
        }
    }
}

/// Outcome of classifying a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Access {
    /// Claims resolved; identity headers are injected before forwarding.
    Authenticated(Claims),
    /// No claims, path is allowlisted; forwarded without identity.
    Bypassed,
    /// No claims and no resolver error; forwarded without identity,
    /// logged as a distinct case.
    Unresolved,
    /// No claims and resolution failed; redirected to start, not forwarded.
    Denied,
}

/// Classifies requests by consulting the claim resolver and allowlist.
pub struct IdentityGate {
    resolver: Arc<dyn ClaimResolver>,
    allowlist: Arc<dyn AllowlistMatcher>,
}

impl IdentityGate {
    pub fn new(resolver: Arc<dyn ClaimResolver>, allowlist: Arc<dyn AllowlistMatcher>) -> Self {
        Self { resolver, allowlist }
    }

    /// Classify a request. The allowlist is only consulted when no claims
    /// were resolved; a resolver error on an allowlisted path still
    /// bypasses.
    pub async fn classify(&self, parts: &Parts) -> Access {
        match self.resolver.resolve(parts).await {
            Ok(Some(claims)) => Access::Authenticated(claims),
            Ok(None) | Err(_) if self.allowlist.matches(parts) => {
                tracing::trace!(
                    path = parts.uri.path(),
                    "path can be accessed without authentication"
                );
                Access::Bypassed
            }
            Err(err) => {
                tracing::debug!(
                    error = %err,
                    path = parts.uri.path(),
                    "claim resolution failed, redirecting to start"
                );
                Access::Denied
            }
            Ok(None) => {
                tracing::warn!(
                    path = parts.uri.path(),
                    "no claims and no resolver error; forwarding without identity headers"
                );
                Access::Unresolved
            }
        }
    }
}
