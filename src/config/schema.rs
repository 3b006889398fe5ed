//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the gateway.
//! All types derive Serde traits for deserialization from config files.

use serde::{Deserialize, Serialize};

/// Root configuration for the identity gateway.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct GatewayConfig {
    /// Listener configuration (bind address).
    pub listener: ListenerConfig,

    /// Upstream target the gateway forwards to.
    pub upstream: UpstreamConfig,

    /// Authentication policy settings.
    pub auth: AuthConfig,

    /// Header names used to carry resolved identity to the upstream.
    pub identity_headers: IdentityHeadersConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Bind address (e.g., "0.0.0.0:8080").
    pub bind_address: String,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:8080".to_string(),
        }
    }
}

/// Upstream target configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct UpstreamConfig {
    /// Upstream URL (scheme + host, e.g., "http://127.0.0.1:3000").
    /// A malformed value fails gateway setup before any route is installed.
    pub url: String,

    /// Skip TLS certificate verification when talking to an HTTPS upstream.
    /// Default false: verification enabled.
    pub skip_tls_verification: bool,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            url: "http://127.0.0.1:3000".to_string(),
            skip_tls_verification: false,
        }
    }
}

/// Authentication policy configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AuthConfig {
    /// Name of this gateway instance, carried as a metrics label.
    pub outpost_name: String,

    /// Path unauthenticated clients are redirected to in order to start
    /// an authentication flow.
    pub start_path: String,

    /// Path prefixes that may be accessed without authentication.
    pub allowlist: Vec<String>,

    /// Header a trusted fronting authenticator sets to convey the caller's
    /// identity. Used by the built-in claim resolver.
    pub trusted_identity_header: String,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            outpost_name: "gateway".to_string(),
            start_path: "/auth/start".to_string(),
            allowlist: Vec::new(),
            trusted_identity_header: "x-auth-email".to_string(),
        }
    }
}

/// Header names used when injecting identity into forwarded requests.
/// The exact mapping is deployment configuration, not fixed by the gateway.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct IdentityHeadersConfig {
    /// Header carrying the resolved user identifier.
    pub user: String,

    /// Optional header carrying the user's display name.
    pub name: Option<String>,

    /// Optional header carrying the user's groups (comma separated).
    pub groups: Option<String>,
}

impl Default for IdentityHeadersConfig {
    fn default() -> Self {
        Self {
            user: "x-forwarded-user".to_string(),
            name: None,
            groups: None,
        }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            metrics_enabled: true,
            metrics_address: "0.0.0.0:9090".to_string(),
        }
    }
}
