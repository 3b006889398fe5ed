//! Per-request dispatch.
//!
//! # Responsibilities
//! - Sequence classification → header injection → guarded forward → metric
//! - Build the catch-all router, only after setup succeeded
//!
//! # Data Flow
//! ```text
//! Incoming request
//!     → identity.rs (classify: authenticated / bypassed / denied)
//!     → headers.rs (inject identity, claims present only)
//!     → forwarder.rs under guard.rs (timed)
//!     → metrics recorder (forwarded requests only)
//! ```
//!
//! # Design Decisions
//! - Setup parses the upstream target first; on failure no route exists,
//!   so a broken gateway can never receive traffic
//! - The latency window and the panic guard are both established before
//!   the forward starts, enclosing the entire call
//! - All collaborators are injected; there is no global lookup

use std::sync::Arc;
use std::time::Instant;

use axum::body::Body;
use axum::extract::State;
use axum::http::request::Parts;
use axum::http::{header, Request, Response, StatusCode};
use axum::response::IntoResponse;
use axum::routing::any;
use axum::Router;
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::trace::TraceLayer;
use url::Url;

use crate::config::GatewayConfig;
use crate::gateway::forwarder::{ForwardError, ResponseHook, UpstreamForwarder};
use crate::gateway::guard::{guard_forward, GuardedForward};
use crate::gateway::headers::{ConfiguredHeaderMapper, HeaderMapper};
use crate::gateway::identity::{
    Access, AllowlistMatcher, ClaimResolver, IdentityGate, PathPrefixAllowlist,
};
use crate::gateway::redirect::{RedirectBuilder, StartRedirect};
use crate::gateway::SetupError;
use crate::observability::metrics::{LatencyRecorder, PrometheusLatencyRecorder, UpstreamLabels};

/// The assembled dispatch core. Constructing one validates the upstream
/// target; only a valid gateway can be turned into a router.
pub struct Gateway {
    forwarder: UpstreamForwarder,
    resolver: Arc<dyn ClaimResolver>,
    allowlist: Arc<dyn AllowlistMatcher>,
    headers: Arc<dyn HeaderMapper>,
    redirect: Arc<dyn RedirectBuilder>,
    recorder: Arc<dyn LatencyRecorder>,
    outpost_name: String,
}

impl Gateway {
    /// Build the gateway from config plus the external claim resolver.
    /// Fails fast on a malformed upstream target, header mapping, or
    /// start path.
    pub fn new(
        config: &GatewayConfig,
        resolver: Arc<dyn ClaimResolver>,
    ) -> Result<Self, SetupError> {
        let upstream = Url::parse(&config.upstream.url)?;
        let forwarder =
            UpstreamForwarder::new(&upstream, config.upstream.skip_tls_verification)?;

        Ok(Self {
            forwarder,
            resolver,
            allowlist: Arc::new(PathPrefixAllowlist::new(config.auth.allowlist.clone())),
            headers: Arc::new(ConfiguredHeaderMapper::from_config(&config.identity_headers)?),
            redirect: Arc::new(StartRedirect::new(config.auth.start_path.clone())?),
            recorder: Arc::new(PrometheusLatencyRecorder),
            outpost_name: config.auth.outpost_name.clone(),
        })
    }

    /// Replace the allowlist matcher.
    pub fn with_allowlist(mut self, allowlist: Arc<dyn AllowlistMatcher>) -> Self {
        self.allowlist = allowlist;
        self
    }

    /// Replace the header mapper.
    pub fn with_header_mapper(mut self, headers: Arc<dyn HeaderMapper>) -> Self {
        self.headers = headers;
        self
    }

    /// Replace the redirect builder.
    pub fn with_redirect(mut self, redirect: Arc<dyn RedirectBuilder>) -> Self {
        self.redirect = redirect;
        self
    }

    /// Replace the latency recorder.
    pub fn with_recorder(mut self, recorder: Arc<dyn LatencyRecorder>) -> Self {
        self.recorder = recorder;
        self
    }

    /// Install a response post-processing hook on the forwarder.
    pub fn with_response_hook(mut self, hook: ResponseHook) -> Self {
        self.forwarder = self.forwarder.with_response_hook(hook);
        self
    }

    /// Install the catch-all dispatch route with middleware layers.
    pub fn into_router(self) -> Router {
        let state = GatewayState {
            forwarder: Arc::new(self.forwarder),
            gate: Arc::new(IdentityGate::new(self.resolver, self.allowlist)),
            headers: self.headers,
            redirect: self.redirect,
            recorder: self.recorder,
            outpost_name: Arc::from(self.outpost_name),
        };
        Router::new()
            .route("/{*path}", any(dispatch))
            .route("/", any(dispatch))
            .with_state(state)
            .layer(PropagateRequestIdLayer::x_request_id())
            .layer(TraceLayer::new_for_http())
            .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
    }
}

/// Request-handling state shared across requests. Everything here is
/// read-only configuration or a concurrency-safe sink.
#[derive(Clone)]
struct GatewayState {
    forwarder: Arc<UpstreamForwarder>,
    gate: Arc<IdentityGate>,
    headers: Arc<dyn HeaderMapper>,
    redirect: Arc<dyn RedirectBuilder>,
    recorder: Arc<dyn LatencyRecorder>,
    outpost_name: Arc<str>,
}

/// Per-request entry point.
async fn dispatch(State(state): State<GatewayState>, request: Request<Body>) -> Response<Body> {
    let (mut parts, body) = request.into_parts();

    let access = state.gate.classify(&parts).await;
    if access == Access::Denied {
        return state.redirect.redirect_to_start(&parts);
    }

    let claims = match access {
        Access::Authenticated(claims) => {
            state.headers.apply(&mut parts.headers, &claims);
            Some(claims)
        }
        _ => None,
    };

    let method = parts.method.to_string();
    let path = parts.uri.path().to_string();
    let host = request_host(&parts).to_string();
    let request = Request::from_parts(parts, body);

    // Both the timing window and the recovery scope are opened before the
    // forward begins, enclosing the entire call.
    let started = Instant::now();
    let outcome = guard_forward(state.forwarder.forward(request)).await;
    let elapsed = started.elapsed();

    let response = match outcome {
        GuardedForward::Completed(Ok(response)) => response,
        GuardedForward::Completed(Err(ForwardError::Aborted)) => {
            // Expected: the response was already partially written.
            tracing::trace!("forward aborted after partial response");
            return empty_response(StatusCode::BAD_GATEWAY);
        }
        GuardedForward::Completed(Err(err)) => upstream_error_response(err),
        GuardedForward::Panicked(message) => {
            tracing::error!(panic = %message, "recovered panic while forwarding");
            return empty_response(StatusCode::BAD_GATEWAY);
        }
    };

    let user = claims.map(|c| c.email).unwrap_or_default();
    state.recorder.record(
        elapsed,
        UpstreamLabels {
            outpost_name: state.outpost_name.to_string(),
            upstream_host: state.forwarder.upstream().to_string(),
            scheme: state.forwarder.scheme().to_string(),
            method,
            path,
            host,
            user,
        },
    );
    response
}

/// Host the client addressed, from the Host header or the request URI.
fn request_host(parts: &Parts) -> &str {
    parts
        .headers
        .get(header::HOST)
        .and_then(|v| v.to_str().ok())
        .or_else(|| parts.uri.host())
        .unwrap_or_default()
}

/// Safe gateway-facing error response; transport detail goes to the log
/// only.
fn upstream_error_response(err: ForwardError) -> Response<Body> {
    tracing::error!(error = %err, "upstream request failed");
    (StatusCode::BAD_GATEWAY, "upstream request failed").into_response()
}

fn empty_response(status: StatusCode) -> Response<Body> {
    let mut response = Response::new(Body::empty());
    *response.status_mut() = status;
    response
}
