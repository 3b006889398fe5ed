//! Identity header injection.
//!
//! # Responsibilities
//! - Map resolved claims onto outbound request headers
//!
//! # Design Decisions
//! - Header names come from deployment configuration, not hardcoded
//! - Only invoked when claims are present; the gate enforces that
//! - A claim value that is not a valid header value is skipped with a
//!   warning instead of failing the request

use axum::http::header::{HeaderMap, HeaderName, HeaderValue};

use crate::config::IdentityHeadersConfig;
use crate::gateway::identity::Claims;
use crate::gateway::SetupError;

/// Maps claims onto outbound headers. External contract: the exact
/// header-name mapping is supplied by the deployment.
pub trait HeaderMapper: Send + Sync {
    fn apply(&self, headers: &mut HeaderMap, claims: &Claims);
}

/// Header mapper driven by [`IdentityHeadersConfig`].
#[derive(Debug, Clone)]
pub struct ConfiguredHeaderMapper {
    user: HeaderName,
    name: Option<HeaderName>,
    groups: Option<HeaderName>,
}

impl ConfiguredHeaderMapper {
    pub fn from_config(config: &IdentityHeadersConfig) -> Result<Self, SetupError> {
        Ok(Self {
            user: parse_name(&config.user)?,
            name: config.name.as_deref().map(parse_name).transpose()?,
            groups: config.groups.as_deref().map(parse_name).transpose()?,
        })
    }
}

fn parse_name(name: &str) -> Result<HeaderName, SetupError> {
    HeaderName::try_from(name).map_err(|_| SetupError::InvalidHeaderName(name.to_string()))
}

fn insert(headers: &mut HeaderMap, name: &HeaderName, value: &str) {
    match HeaderValue::from_str(value) {
        Ok(v) => {
            headers.insert(name.clone(), v);
        }
        Err(_) => tracing::warn!(
            header = %name,
            "claim value is not a valid header value, skipping"
        ),
    }
}

impl HeaderMapper for ConfiguredHeaderMapper {
    fn apply(&self, headers: &mut HeaderMap, claims: &Claims) {
        insert(headers, &self.user, &claims.email);
        if let (Some(header), Some(name)) = (&self.name, &claims.name) {
            insert(headers, header, name);
        }
        if let Some(header) = &self.groups {
            if !claims.groups.is_empty() {
                insert(headers, header, &claims.groups.join(","));
            }
        }
    }
}
