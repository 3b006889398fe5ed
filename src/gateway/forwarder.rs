//! Upstream request forwarding.
//!
//! # Responsibilities
//! - Own the long-lived client over a shared connection pool
//! - Apply the configured TLS verification policy for HTTPS upstreams
//! - Rewrite scheme and authority to the fixed upstream target
//! - Attach one tracing span per outbound round trip
//!
//! # Design Decisions
//! - Path, query, method, body, and end-to-end headers pass through
//!   unchanged; hop-by-hop headers are stripped before forwarding
//! - Skipping verification installs a no-op certificate verifier via the
//!   rustls danger API; the toggle is per-gateway, decided at setup
//! - A response post-processing hook is exposed for future rewriting and
//!   is the identity transform by default

use std::str::FromStr;
use std::sync::Arc;

use axum::body::Body;
use axum::http::header::{self, HeaderMap, HeaderName};
use axum::http::uri::{Authority, PathAndQuery, Scheme};
use axum::http::{Request, Response, Uri};
use hyper_util::client::legacy::{connect::HttpConnector, Client};
use hyper_util::rt::TokioExecutor;
use thiserror::Error;
use tracing::Instrument;
use url::Url;

use crate::gateway::SetupError;

/// Post-processing applied to every upstream response before it is
/// returned to the dispatcher.
pub type ResponseHook = Arc<dyn Fn(Response<Body>) -> Response<Body> + Send + Sync>;

/// Failure while forwarding a request upstream.
#[derive(Debug, Error)]
pub enum ForwardError {
    /// Connection, TLS, or timeout failure talking to the upstream.
    #[error("upstream request failed: {0}")]
    Transport(#[from] hyper_util::client::legacy::Error),

    /// The rewritten request URI was not constructible.
    #[error("failed to rewrite request uri: {0}")]
    Rewrite(#[from] axum::http::uri::InvalidUriParts),

    /// The response was already partially written; no further writes or
    /// error reporting may happen. Expected, never logged as an error.
    #[error("response already started, aborting")]
    Aborted,
}

type HttpsConnector = hyper_rustls::HttpsConnector<HttpConnector>;

/// Forwards requests to a single fixed upstream target.
pub struct UpstreamForwarder {
    client: Client<HttpsConnector, Body>,
    scheme: Scheme,
    authority: Authority,
    upstream: String,
    response_hook: Option<ResponseHook>,
}

impl UpstreamForwarder {
    /// Build the forwarder for `upstream`. Fails fast on an unsupported
    /// scheme or a missing host.
    pub fn new(upstream: &Url, skip_tls_verification: bool) -> Result<Self, SetupError> {
        let scheme = match upstream.scheme() {
            "http" => Scheme::HTTP,
            "https" => Scheme::HTTPS,
            other => return Err(SetupError::UnsupportedScheme(other.to_string())),
        };
        let host = upstream.host_str().ok_or(SetupError::MissingHost)?;
        let rendered = match upstream.port() {
            Some(port) => format!("{}:{}", host, port),
            None => host.to_string(),
        };
        let authority = Authority::from_str(&rendered)
            .map_err(|_| SetupError::MissingHost)?;

        let connector = build_connector(skip_tls_verification);
        let client = Client::builder(TokioExecutor::new()).build(connector);

        Ok(Self {
            client,
            upstream: format!("{}://{}", scheme, authority),
            scheme,
            authority,
            response_hook: None,
        })
    }

    /// Install a response post-processing hook.
    pub fn with_response_hook(mut self, hook: ResponseHook) -> Self {
        self.response_hook = Some(hook);
        self
    }

    /// Rendered upstream target, used as a metrics label.
    pub fn upstream(&self) -> &str {
        &self.upstream
    }

    /// Upstream scheme, used as a metrics label.
    pub fn scheme(&self) -> &Scheme {
        &self.scheme
    }

    /// Forward one request to the upstream, rewriting scheme and
    /// authority. Always yields either a response or a [`ForwardError`].
    pub async fn forward(&self, request: Request<Body>) -> Result<Response<Body>, ForwardError> {
        let (mut parts, body) = request.into_parts();
        strip_hop_by_hop(&mut parts.headers);
        let mut uri = parts.uri.into_parts();
        uri.scheme = Some(self.scheme.clone());
        uri.authority = Some(self.authority.clone());
        if uri.path_and_query.is_none() {
            uri.path_and_query = Some(PathAndQuery::from_static("/"));
        }
        parts.uri = Uri::from_parts(uri)?;
        let request = Request::from_parts(parts, body);

        let span = tracing::info_span!(
            "upstream_request",
            upstream = %self.upstream,
            method = %request.method(),
            path = request.uri().path(),
        );
        let response = self
            .client
            .request(request)
            .instrument(span)
            .await?;

        let (parts, body) = response.into_parts();
        let mut response = Response::from_parts(parts, Body::new(body));
        if let Some(hook) = &self.response_hook {
            response = hook(response);
        }
        Ok(response)
    }
}

/// Remove hop-by-hop headers (RFC 9110 §7.6.1): any header named in
/// `Connection`, then the standard set. These govern the client-to-gateway
/// connection and must not leak onto the upstream one.
fn strip_hop_by_hop(headers: &mut HeaderMap) {
    let named: Vec<HeaderName> = headers
        .get_all(header::CONNECTION)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(','))
        .filter_map(|name| HeaderName::from_str(name.trim()).ok())
        .collect();
    for name in named {
        headers.remove(name);
    }
    for name in [
        header::CONNECTION,
        HeaderName::from_static("keep-alive"),
        header::PROXY_AUTHENTICATE,
        header::PROXY_AUTHORIZATION,
        header::TE,
        header::TRAILER,
        header::TRANSFER_ENCODING,
        header::UPGRADE,
    ] {
        headers.remove(name);
    }
}

/// Build the HTTPS-capable connector, honoring the verification toggle.
fn build_connector(skip_tls_verification: bool) -> HttpsConnector {
    let builder = if skip_tls_verification {
        tracing::warn!("TLS verification disabled for upstream connections");
        let mut tls = rustls::ClientConfig::builder()
            .with_root_certificates(rustls::RootCertStore::empty())
            .with_no_client_auth();
        tls.dangerous()
            .set_certificate_verifier(Arc::new(InsecureVerifier));
        hyper_rustls::HttpsConnectorBuilder::new().with_tls_config(tls)
    } else {
        hyper_rustls::HttpsConnectorBuilder::new().with_webpki_roots()
    };
    builder.https_or_http().enable_all_versions().build()
}

/// Certificate verifier that accepts any upstream certificate. Installed
/// only when `skip_tls_verification` is set.
#[derive(Debug)]
struct InsecureVerifier;

impl rustls::client::danger::ServerCertVerifier for InsecureVerifier {
    fn verify_server_cert(
        &self,
        _end_entity: &rustls::pki_types::CertificateDer<'_>,
        _intermediates: &[rustls::pki_types::CertificateDer<'_>],
        _server_name: &rustls::pki_types::ServerName<'_>,
        _ocsp_response: &[u8],
        _now: rustls::pki_types::UnixTime,
    ) -> Result<rustls::client::danger::ServerCertVerified, rustls::Error> {
        Ok(rustls::client::danger::ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        _message: &[u8],
        _cert: &rustls::pki_types::CertificateDer<'_>,
        _dss: &rustls::DigitallySignedStruct,
    ) -> Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        Ok(rustls::client::danger::HandshakeSignatureValid::assertion())
    }

    fn verify_tls13_signature(
        &self,
        _message: &[u8],
        _cert: &rustls::pki_types::CertificateDer<'_>,
        _dss: &rustls::DigitallySignedStruct,
    ) -> Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        Ok(rustls::client::danger::HandshakeSignatureValid::assertion())
    }

    fn supported_verify_schemes(&self) -> Vec<rustls::SignatureScheme> {
        rustls::crypto::ring::default_provider()
            .signature_verification_algorithms
            .supported_schemes()
    }
}
