//! Upstream services reached by `@rest` and `@gql`.
//!
//! Upstreams are matched on the host of the URL a request is sent to. A matching upstream adds
//! its static headers, then its credentials.
use std::collections::HashMap;
use std::sync::Arc;

use http::HeaderMap;
use http::HeaderName;
use http::HeaderValue;
use url::Url;

use crate::configuration::UpstreamAuthCredentials;
use crate::configuration::UpstreamConfig;
use crate::context::Context;

pub mod authentication;

use authentication::AuthMap;
use authentication::TokenSource;
use authentication::UpstreamAuthentication;

/// An upstream service.
pub struct Upstream {
    host: String,
    headers: Vec<(HeaderName, HeaderValue)>,
    auth: Option<(Arc<dyn UpstreamAuthentication>, String)>,
}

impl std::fmt::Debug for Upstream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Upstream")
            .field("host", &self.host)
            .field("headers", &self.headers.len())
            .field("authenticated", &self.auth.is_some())
            .finish()
    }
}

impl Upstream {
    fn new(config: &UpstreamConfig, auth_map: &AuthMap) -> Self {
        let headers = config
            .headers
            .iter()
            .filter_map(|(name, value)| {
                match (
                    HeaderName::from_bytes(name.as_bytes()),
                    HeaderValue::from_str(value),
                ) {
                    (Ok(name), Ok(value)) => Some((name, value)),
                    _ => {
                        tracing::warn!(host = %config.host, header = %name, "ignoring invalid upstream header");
                        None
                    }
                }
            })
            .collect();

        let auth = config.auth.as_ref().and_then(|auth| {
            let authentication = auth_map.get(&auth.auth_type, &auth.authority);
            if authentication.is_none() {
                tracing::warn!(
                    host = %config.host,
                    auth_type = %auth.auth_type,
                    authority = %auth.authority,
                    "no credentials for upstream, requests will not be authenticated"
                );
            }
            authentication.map(|authentication| (authentication, auth.scope.clone()))
        });

        Self {
            host: config.host.clone(),
            headers,
            auth,
        }
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    /// Adds the upstream's headers then its credentials.
    pub async fn apply(&self, context: &Context, headers: &mut HeaderMap) {
        for (name, value) in &self.headers {
            headers.insert(name.clone(), value.clone());
        }
        if let Some((authentication, scope)) = &self.auth {
            authentication.authenticate(context, scope, headers).await;
        }
    }
}

/// Upstreams by host.
#[derive(Debug, Default)]
pub struct Upstreams {
    by_host: HashMap<String, Upstream>,
}

impl Upstreams {
    pub fn from_config(
        upstreams: &[UpstreamConfig],
        credentials: &[UpstreamAuthCredentials],
        tokens: Arc<dyn TokenSource>,
    ) -> Self {
        let auth_map = AuthMap::new(credentials, tokens);
        let by_host = upstreams
            .iter()
            .map(|config| (config.host.clone(), Upstream::new(config, &auth_map)))
            .collect();
        Self { by_host }
    }

    pub fn get(&self, host: &str) -> Option<&Upstream> {
        self.by_host.get(host)
    }

    /// The upstream for `url`: its `host:port` when the port is explicit, else its host.
    pub fn for_url(&self, url: &Url) -> Option<&Upstream> {
        let host = url.host_str()?;
        url.port()
            .and_then(|port| self.get(&format!("{host}:{port}")))
            .or_else(|| self.get(host))
    }

    /// Adds headers and credentials of the upstream `url` belongs to, if any.
    pub async fn apply(&self, url: &Url, context: &Context, headers: &mut HeaderMap) {
        if let Some(upstream) = self.for_url(url) {
            upstream.apply(context, headers).await;
        }
    }
}
