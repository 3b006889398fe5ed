//! Request dispatch subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming request (catch-all route)
//!     → dispatcher.rs (per-request sequencing)
//!     → identity.rs (claim resolution + allowlist → Access)
//!     → headers.rs (identity injection, claims present only)
//!     → forwarder.rs (URI rewrite, traced round trip) under guard.rs
//!     → observability::metrics (one latency observation per forward)
//! ```
//!
//! # Design Decisions
//! - One fixed upstream per gateway; no load balancing
//! - Collaborators (resolver, allowlist, header mapping, redirect,
//!   metrics sink) are injected trait objects constructed at startup
//! - Setup errors abort router construction; no partial route is ever
//!   installed

pub mod dispatcher;
pub mod forwarder;
pub mod guard;
pub mod headers;
pub mod identity;
pub mod redirect;

use thiserror::Error;

pub use dispatcher::Gateway;
pub use forwarder::{ForwardError, ResponseHook, UpstreamForwarder};
pub use guard::ResponseAborted;
pub use identity::{Access, AllowlistMatcher, ClaimResolver, Claims, ResolveError};

/// Fatal setup failure: the gateway is not constructed and no route is
/// installed.
#[derive(Debug, Error)]
pub enum SetupError {
    #[error("invalid upstream target: {0}")]
    InvalidUpstream(#[from] url::ParseError),

    #[error("upstream scheme must be http or https, got {0}")]
    UnsupportedScheme(String),

    #[error("upstream url has no usable host")]
    MissingHost,

    #[error("invalid identity header name: {0}")]
    InvalidHeaderName(String),

    #[error("start path must be an absolute path without control characters: {0:?}")]
    InvalidStartPath(String),
}
